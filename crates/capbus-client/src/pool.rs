//! Multi-bus connection pool.
//!
//! The pool lazily establishes authenticated connections to non-default
//! buses, refreshes expiring credentials by reconnecting, evicts the
//! least-recently-used entry at capacity, and reaps idle entries in the
//! background. The default connection is borrowed from the facade and never
//! closed by the pool.
//!
//! Entry lifecycle: `connecting → active → (idle | expired | evicted) →
//! draining → closed`. Transitions are guarded by the pool's serial access
//! to the entry map; two callers racing to connect the same URL are not
//! deduplicated (the cost is paid once per URL in steady state, and tokens
//! are short-lived anyway).

use std::collections::HashMap;
use std::sync::Arc;

use capbus_core::AccessTokenProvider;
use capbus_core::AuthProvider;
use capbus_core::AuthRequest;
use capbus_core::BusConnection;
use capbus_core::BusConnector;
use capbus_core::BusCredentials;
use capbus_core::CapabilityError;
use capbus_core::normalize_url;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config::PoolConfig;

struct PoolEntry {
    connection: Arc<dyn BusConnection>,
    credentials: BusCredentials,
    connected_at: Instant,
    last_used_at: Instant,
}

/// Lazily-connecting pool over one default and many sandbox buses.
pub struct ConnectionPool {
    connector: Arc<dyn BusConnector>,
    default_url: String,
    default_connection: Arc<dyn BusConnection>,
    auth_provider: Option<Arc<dyn AuthProvider>>,
    token_provider: Option<Arc<dyn AccessTokenProvider>>,
    static_access_token: Option<String>,
    config: PoolConfig,
    entries: Mutex<HashMap<String, PoolEntry>>,
    cancel: CancellationToken,
    reaper: SyncMutex<Option<JoinHandle<()>>>,
}

impl ConnectionPool {
    /// Build the pool around a borrowed default connection and start the
    /// idle reaper.
    pub fn new(
        connector: Arc<dyn BusConnector>,
        default_url: &str,
        default_connection: Arc<dyn BusConnection>,
        auth_provider: Option<Arc<dyn AuthProvider>>,
        token_provider: Option<Arc<dyn AccessTokenProvider>>,
        static_access_token: Option<String>,
        config: PoolConfig,
    ) -> Arc<Self> {
        let pool = Arc::new(Self {
            connector,
            default_url: normalize_url(default_url),
            default_connection,
            auth_provider,
            token_provider,
            static_access_token,
            config,
            entries: Mutex::new(HashMap::new()),
            cancel: CancellationToken::new(),
            reaper: SyncMutex::new(None),
        });
        pool.spawn_reaper();
        pool
    }

    /// Acquire a connection for a bus URL, connecting lazily for sandbox
    /// buses.
    pub async fn get_or_connect(&self, nats_url: &str) -> Result<Arc<dyn BusConnection>, CapabilityError> {
        let url = normalize_url(nats_url);
        if url == self.default_url {
            return Ok(self.default_connection.clone());
        }

        {
            let mut entries = self.entries.lock().await;
            match entries.get_mut(&url) {
                Some(entry) if !entry.credentials.is_expired() && !entry.connection.is_closed() => {
                    entry.last_used_at = Instant::now();
                    return Ok(entry.connection.clone());
                }
                Some(_) => {
                    // Expired credentials or a dead connection: drop the
                    // entry and fall through to a fresh connect.
                    if let Some(entry) = entries.remove(&url) {
                        debug!(url = %url, "dropping pool entry with expired credentials");
                        drain_entry(url.clone(), entry.connection).await;
                    }
                }
                None => {}
            }
        }

        let Some(provider) = self.auth_provider.clone() else {
            return Err(CapabilityError::new(
                capbus_core::ErrorCode::AuthFailed,
                format!("no auth provider configured for sandbox bus '{url}'"),
                false,
            ));
        };

        {
            let mut entries = self.entries.lock().await;
            self.evict_to_capacity(&mut entries).await;
        }

        let access_token = self.current_access_token().await?;
        let credentials = provider
            .authenticate(AuthRequest {
                nats_url: url.clone(),
                access_token,
            })
            .await
            .map_err(|err| {
                CapabilityError::auth_failed(format!("auth provider failed for '{url}': {err}"))
                    .with_details(serde_json::json!({"cause": err.code.as_str()}))
            })?;

        if credentials.jwt.is_some() {
            // Accepted in the credentials shape, but no connector consumes
            // it yet.
            return Err(CapabilityError::internal(format!(
                "jwt/nkey authentication for '{url}' is not supported yet"
            )));
        }

        let connection = self
            .connector
            .connect(&url, Some(credentials.clone()))
            .await
            .map_err(|err| CapabilityError::new(
                capbus_core::ErrorCode::InternalError,
                format!("failed to connect to '{url}': {err}"),
                true,
            ))?;

        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        self.evict_to_capacity(&mut entries).await;
        entries.insert(
            url.clone(),
            PoolEntry {
                connection: connection.clone(),
                credentials,
                connected_at: now,
                last_used_at: now,
            },
        );
        info!(url = %url, "connected to sandbox bus");
        Ok(connection)
    }

    /// Number of pooled (non-default) connections.
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// True when no sandbox connections are pooled.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Cancel the reaper and drain every non-default entry. The default
    /// connection stays open; its lifecycle belongs to the facade.
    pub async fn close_all(&self) {
        self.cancel.cancel();
        let handle = self.reaper.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let mut entries = self.entries.lock().await;
        for (url, entry) in entries.drain() {
            drain_entry(url, entry.connection).await;
        }
    }

    async fn current_access_token(&self) -> Result<Option<String>, CapabilityError> {
        match &self.token_provider {
            Some(provider) => provider.access_token().await.map(Some),
            None => Ok(self.static_access_token.clone()),
        }
    }

    /// Evict least-recently-used entries until a slot is free. Capacity for
    /// non-default entries is `max_connections - 1`.
    async fn evict_to_capacity(&self, entries: &mut HashMap<String, PoolEntry>) {
        let capacity = self.config.max_connections.saturating_sub(1);
        while entries.len() >= capacity.max(1) && !entries.is_empty() {
            let lru = entries
                .iter()
                .min_by_key(|(_, entry)| entry.last_used_at)
                .map(|(url, _)| url.clone());
            let Some(url) = lru else { break };
            if let Some(entry) = entries.remove(&url) {
                debug!(url = %url, age_secs = entry.connected_at.elapsed().as_secs(), "evicting LRU pool entry");
                drain_entry(url, entry.connection).await;
            }
        }
    }

    fn spawn_reaper(self: &Arc<Self>) {
        let pool = Arc::downgrade(self);
        let cancel = self.cancel.clone();
        let interval = self.config.reaper_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(pool) = pool.upgrade() else { break };
                pool.reap_idle().await;
            }
        });
        *self.reaper.lock() = Some(handle);
    }

    async fn reap_idle(&self) {
        let idle_timeout = self.config.idle_timeout;
        let mut entries = self.entries.lock().await;
        let idle: Vec<String> = entries
            .iter()
            .filter(|(_, entry)| entry.last_used_at.elapsed() > idle_timeout)
            .map(|(url, _)| url.clone())
            .collect();
        for url in idle {
            if let Some(entry) = entries.remove(&url) {
                debug!(url = %url, "reaping idle pool entry");
                drain_entry(url, entry.connection).await;
            }
        }
    }
}

async fn drain_entry(url: String, connection: Arc<dyn BusConnection>) {
    if let Err(err) = connection.drain().await {
        warn!(url = %url, error = %err, "failed to drain pooled connection");
    }
}
