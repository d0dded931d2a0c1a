//! Discovery client: registry `discover`/`describe` with a private cache.

use std::sync::Arc;
use std::time::Duration;

use capbus_cache::TtlCache;
use capbus_cache::TtlCacheConfig;
use capbus_core::CapabilityError;
use tracing::debug;

use crate::resolution::RegistryTransport;

/// Cached access to the registry's catalog surface.
pub struct DiscoveryClient {
    registry: Arc<dyn RegistryTransport>,
    cache: TtlCache<serde_json::Value>,
}

impl DiscoveryClient {
    /// Build a discovery client with its own cache.
    pub fn new(registry: Arc<dyn RegistryTransport>, ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            registry,
            cache: TtlCache::new(TtlCacheConfig {
                default_ttl: ttl,
                stale_window: None,
                ..TtlCacheConfig::default()
            }),
        })
    }

    /// List capabilities matching an optional filter.
    pub async fn discover(&self, filter: Option<serde_json::Value>) -> Result<serde_json::Value, CapabilityError> {
        let filter = filter.unwrap_or(serde_json::Value::Null);
        let key = format!("discover|{filter}");
        if let Some(cached) = self.cached(&key) {
            return Ok(cached);
        }
        let result = self.registry.call("discover", serde_json::json!({ "filter": filter })).await?;
        self.cache.set(key.as_str(), result.clone(), None);
        Ok(result)
    }

    /// Fetch the full description of one capability.
    pub async fn describe(&self, cap_ref: &str) -> Result<serde_json::Value, CapabilityError> {
        let key = format!("describe|{cap_ref}");
        if let Some(cached) = self.cached(&key) {
            return Ok(cached);
        }
        let result = self.registry.call("describe", serde_json::json!({ "cap": cap_ref })).await?;
        self.cache.set(key.as_str(), result.clone(), None);
        Ok(result)
    }

    /// Drop the whole discovery cache; called on any registry change event.
    pub fn clear(&self) {
        debug!(entries = self.cache.len(), "clearing discovery cache");
        self.cache.clear();
    }

    fn cached(&self, key: &str) -> Option<serde_json::Value> {
        let lookup = self.cache.get(key);
        if lookup.found && !lookup.is_stale { lookup.value } else { None }
    }
}
