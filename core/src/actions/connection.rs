use super::{ActionResponse, Actions};
use crate::profile::ConnectionProfile;
use crate::types::ServerInfo;
use tracing::info;

impl Actions {
    /// Dial `profile` under a throwaway id, read the server info and close again
    pub async fn test_connection(&self, profile: &ConnectionProfile) -> ActionResponse<ServerInfo> {
        let probe = ConnectionProfile {
            id: format!("test-{}", chrono::Utc::now().timestamp_millis()),
            ..profile.clone()
        };

        self.run("test_connection", async {
            let connection = self.registry.get_connection(&probe).await?;
            let server_info = connection.server_info();
            self.registry.close(&probe.id).await?;
            info!(
                target: "actions",
                name = %probe.name,
                server = %server_info.server_name,
                version = %server_info.version,
                "Connection test succeeded"
            );
            Ok(server_info)
        })
        .await
    }

    pub async fn server_info(&self, profile: &ConnectionProfile) -> ActionResponse<ServerInfo> {
        self.run("server_info", async {
            let connection = self.registry.get_connection(profile).await?;
            Ok(connection.server_info())
        })
        .await
    }

    pub async fn close_connection(&self, id: &str) -> ActionResponse<()> {
        self.run("close_connection", self.registry.close(id)).await
    }
}
