use super::{ActionResponse, Actions};
use crate::profile::ConnectionProfile;
use crate::types::{validate_name, ConsumerConfig, ConsumerInfo, StreamConfig, StreamInfo};

impl Actions {
    pub async fn list_streams(&self, profile: &ConnectionProfile) -> ActionResponse<Vec<StreamInfo>> {
        self.run("list_streams", async {
            let management = self.registry.get_management_client(profile).await?;
            management.list_streams().await
        })
        .await
    }

    pub async fn create_stream(
        &self,
        profile: &ConnectionProfile,
        config: StreamConfig,
    ) -> ActionResponse<StreamInfo> {
        self.run("create_stream", async {
            config.validate()?;
            let management = self.registry.get_management_client(profile).await?;
            management.add_stream(config).await
        })
        .await
    }

    /// `true` when the server confirmed the deletion
    pub async fn delete_stream(&self, profile: &ConnectionProfile, name: &str) -> ActionResponse<bool> {
        self.run("delete_stream", async {
            validate_name("stream", name)?;
            let management = self.registry.get_management_client(profile).await?;
            management.delete_stream(name).await
        })
        .await
    }

    pub async fn stream_info(&self, profile: &ConnectionProfile, name: &str) -> ActionResponse<StreamInfo> {
        self.run("stream_info", async {
            validate_name("stream", name)?;
            let management = self.registry.get_management_client(profile).await?;
            management.stream_info(name).await
        })
        .await
    }

    pub async fn list_consumers(
        &self,
        profile: &ConnectionProfile,
        stream: &str,
    ) -> ActionResponse<Vec<ConsumerInfo>> {
        self.run("list_consumers", async {
            validate_name("stream", stream)?;
            let management = self.registry.get_management_client(profile).await?;
            management.list_consumers(stream).await
        })
        .await
    }

    pub async fn create_consumer(
        &self,
        profile: &ConnectionProfile,
        stream: &str,
        config: ConsumerConfig,
    ) -> ActionResponse<ConsumerInfo> {
        self.run("create_consumer", async {
            validate_name("stream", stream)?;
            config.validate()?;
            let management = self.registry.get_management_client(profile).await?;
            management.add_consumer(stream, config).await
        })
        .await
    }

    pub async fn delete_consumer(
        &self,
        profile: &ConnectionProfile,
        stream: &str,
        consumer: &str,
    ) -> ActionResponse<bool> {
        self.run("delete_consumer", async {
            validate_name("stream", stream)?;
            validate_name("consumer", consumer)?;
            let management = self.registry.get_management_client(profile).await?;
            management.delete_consumer(stream, consumer).await
        })
        .await
    }
}
