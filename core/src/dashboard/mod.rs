// Dashboard module - HTTP surface for the NATS dashboard UI
//
// Serves the action endpoints and the live monitor stream over SSE.

mod api;
mod event_stream;

pub use api::DashboardServer;
pub use event_stream::to_sse_event;

/// Dashboard configuration
#[derive(Clone, Debug)]
pub struct DashboardConfig {
    pub port: u16,
    pub host: String,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            port: 3030,
            host: "127.0.0.1".to_string(),
        }
    }
}

impl DashboardConfig {
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("COBRA_DASHBOARD_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3030),
            host: std::env::var("COBRA_DASHBOARD_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
