/// Connection Registry
///
/// Process-wide cache of live connections keyed by connection-profile id.
/// Explicitly constructed by the composition root and shared via `Arc`.
///
/// Responsible for:
/// - Dialing at most one connection per profile id and reusing it
/// - Evicting and redialing connections that report closed
/// - Lazily deriving and caching management and data clients per connection
/// - Closing connections on request and at shutdown
use crate::profile::ConnectionProfile;
use crate::transport::{Connection, Connector, DataClient, ManagementClient};
use crate::{CobraError, Result};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, info, warn};

/// Registry configuration
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Prepended to the profile name to form the client name seen by the server
    pub client_name_prefix: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            client_name_prefix: "Cobra NATS".to_string(),
        }
    }
}

impl RegistryConfig {
    pub fn from_env() -> Self {
        Self {
            client_name_prefix: std::env::var("COBRA_CLIENT_NAME_PREFIX")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| Self::default().client_name_prefix),
        }
    }
}

/// One cached connection with the clients derived from it. Derived clients
/// live and die with their connection, so a redial never inherits them.
struct Handle {
    connection: Arc<dyn Connection>,
    management: OnceCell<Arc<dyn ManagementClient>>,
    data: OnceCell<Arc<dyn DataClient>>,
}

impl Handle {
    fn new(connection: Arc<dyn Connection>) -> Self {
        Self {
            connection,
            management: OnceCell::new(),
            data: OnceCell::new(),
        }
    }
}

pub struct ConnectionRegistry {
    connector: Arc<dyn Connector>,
    config: RegistryConfig,
    /// profile id -> live connection and its derived clients
    connections: DashMap<String, Arc<Handle>>,
    /// profile id -> establishment lock, so a cold id is dialed once
    dial_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl ConnectionRegistry {
    pub fn new(connector: Arc<dyn Connector>, config: RegistryConfig) -> Self {
        Self {
            connector,
            config,
            connections: DashMap::new(),
            dial_locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Return the cached connection for `profile.id`, dialing if there is none
    /// or the cached one has closed. Failed dials leave the cache untouched.
    pub async fn get_connection(&self, profile: &ConnectionProfile) -> Result<Arc<dyn Connection>> {
        Ok(Arc::clone(&self.handle(profile).await?.connection))
    }

    pub async fn get_management_client(
        &self,
        profile: &ConnectionProfile,
    ) -> Result<Arc<dyn ManagementClient>> {
        let handle = self.handle(profile).await?;
        let client = handle
            .management
            .get_or_try_init(|| async {
                let client = handle.connection.management().await?;
                debug!(target: "registry", id = %profile.id, "Management client created");
                Ok::<_, CobraError>(client)
            })
            .await?;
        Ok(Arc::clone(client))
    }

    pub async fn get_data_client(&self, profile: &ConnectionProfile) -> Result<Arc<dyn DataClient>> {
        let handle = self.handle(profile).await?;
        let client = handle
            .data
            .get_or_init(|| async {
                debug!(target: "registry", id = %profile.id, "Data client created");
                handle.connection.data()
            })
            .await;
        Ok(Arc::clone(client))
    }

    /// Evict `id` and close its transport. Closing an unknown id is a no-op.
    pub async fn close(&self, id: &str) -> Result<()> {
        // A lock still held belongs to a dial in flight and must keep serializing it
        self.dial_locks
            .remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
        let Some((_, handle)) = self.connections.remove(id) else {
            debug!(target: "registry", id = %id, "Close requested for unknown id");
            return Ok(());
        };

        handle.connection.close().await?;
        info!(target: "registry", id = %id, "Connection closed");
        Ok(())
    }

    /// Close every cached connection, continuing past individual failures
    pub async fn close_all(&self) {
        info!(target: "registry", count = self.connections.len(), "Closing all connections");

        let ids: Vec<String> = self.connections.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Err(e) = self.close(&id).await {
                warn!(target: "registry", id = %id, error = %e, "Failed to close connection");
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.connections.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Ids currently holding an establishment lock
    pub fn dial_lock_count(&self) -> usize {
        self.dial_locks.len()
    }

    async fn handle(&self, profile: &ConnectionProfile) -> Result<Arc<Handle>> {
        if let Some(handle) = self.cached_open(&profile.id) {
            return Ok(handle);
        }

        profile.validate()?;

        let lock = self
            .dial_locks
            .entry(profile.id.clone())
            .or_default()
            .value()
            .clone();
        let _guard = lock.lock().await;

        // Another caller may have finished dialing while we waited
        if let Some(handle) = self.cached_open(&profile.id) {
            return Ok(handle);
        }

        let client_name = format!("{} - {}", self.config.client_name_prefix, profile.name);
        debug!(
            target: "registry",
            id = %profile.id,
            servers = ?profile.servers,
            client_name = %client_name,
            "Dialing connection"
        );

        let connection = match self
            .connector
            .dial(&profile.servers, &profile.auth, &client_name)
            .await
        {
            Ok(connection) => connection,
            Err(e) => {
                warn!(
                    target: "registry",
                    id = %profile.id,
                    name = %profile.name,
                    error = %e,
                    "Failed to connect"
                );
                // Only the map and this caller hold the lock when nobody is queued behind us
                self.dial_locks.remove_if(&profile.id, |_, l| {
                    Arc::ptr_eq(l, &lock) && Arc::strong_count(l) <= 2
                });
                return Err(e);
            }
        };

        let handle = Arc::new(Handle::new(connection));
        self.connections
            .insert(profile.id.clone(), Arc::clone(&handle));

        info!(
            target: "registry",
            id = %profile.id,
            name = %profile.name,
            "Connection established"
        );
        Ok(handle)
    }

    /// Cached handle if its connection is still open; a closed one is evicted
    fn cached_open(&self, id: &str) -> Option<Arc<Handle>> {
        let cached = self.connections.get(id).map(|e| e.value().clone())?;
        if cached.connection.is_open() {
            return Some(cached);
        }

        debug!(target: "registry", id = %id, "Evicting closed connection");
        self.connections
            .remove_if(id, |_, current| Arc::ptr_eq(current, &cached));
        None
    }
}
