use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

use cobra_core::dashboard::{DashboardConfig, DashboardServer};
use cobra_core::nats::NatsConnector;
use cobra_core::{ConnectionRegistry, MonitorBridge, MonitorConfig, RegistryConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    fmt()
        .compact()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let connector = Arc::new(NatsConnector::from_env());
    let registry = Arc::new(ConnectionRegistry::new(
        connector.clone(),
        RegistryConfig::from_env(),
    ));
    let bridge = Arc::new(MonitorBridge::new(connector, MonitorConfig::from_env()));

    let config = DashboardConfig::from_env();
    tracing::info!("Dashboard listening on http://{}", config.addr());

    let dashboard = DashboardServer::new(config, registry.clone(), bridge.clone());
    let result = dashboard
        .serve(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown signal received");
            // Open event streams would otherwise hold the server open
            bridge.shutdown();
        })
        .await;

    registry.close_all().await;
    result
}
