//! Client configuration.

use std::collections::HashMap;
use std::time::Duration;

use capbus_core::constants::BOOTSTRAP_SUBJECT;
use capbus_core::constants::DEFAULT_CHANGE_SUBJECT_PREFIX;
use capbus_core::constants::DEFAULT_IDLE_TIMEOUT;
use capbus_core::constants::DEFAULT_MAX_CACHE_ENTRIES;
use capbus_core::constants::DEFAULT_MAX_CONNECTIONS;
use capbus_core::constants::DEFAULT_NEGATIVE_TTL;
use capbus_core::constants::DEFAULT_REGISTRY_CAP;
use capbus_core::constants::DEFAULT_RESOLUTION_TTL;
use capbus_core::constants::DEFAULT_STALE_WINDOW;
use capbus_core::constants::DEFAULT_TIMEOUT;
use capbus_core::constants::REAPER_INTERVAL;
use snafu::Snafu;

/// Result type for configuration validation.
pub type Result<T, E = ConfigError> = std::result::Result<T, E>;

/// Errors from configuration validation.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// A required field was left empty.
    #[snafu(display("configuration field '{field}' must not be empty"))]
    EmptyField {
        /// Name of the offending field.
        field: &'static str,
    },

    /// A numeric field was out of range.
    #[snafu(display("configuration field '{field}' is out of range: {reason}"))]
    OutOfRange {
        /// Name of the offending field.
        field: &'static str,
        /// Why the value is rejected.
        reason: String,
    },
}

/// Resolution cache settings.
#[derive(Debug, Clone)]
pub struct ResolutionConfig {
    /// TTL for positive entries without a registry-provided TTL.
    pub default_ttl: Duration,
    /// TTL for negative entries.
    pub negative_ttl: Duration,
    /// Stale-while-revalidate window; `None` disables stale serving.
    pub stale_window: Option<Duration>,
    /// Upper bound on cached resolutions.
    pub max_entries: usize,
    /// Scope cache keys by tenant.
    pub include_tenant_in_key: bool,
    /// Scope cache keys by environment.
    pub include_env_in_key: bool,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            default_ttl: DEFAULT_RESOLUTION_TTL,
            negative_ttl: DEFAULT_NEGATIVE_TTL,
            stale_window: Some(DEFAULT_STALE_WINDOW),
            max_entries: DEFAULT_MAX_CACHE_ENTRIES,
            include_tenant_in_key: false,
            include_env_in_key: false,
        }
    }
}

/// Connection pool settings.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Upper bound on connections, the default connection included.
    pub max_connections: usize,
    /// Idle period after which a pooled connection is reaped.
    pub idle_timeout: Duration,
    /// Interval between reaper sweeps.
    pub reaper_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            reaper_interval: REAPER_INTERVAL,
        }
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// URL of the default bus.
    pub default_nats_url: String,
    /// Tenant applied when the caller context carries none.
    pub default_tenant_id: String,
    /// Environment scope, when deployments are environment-partitioned.
    pub env: Option<String>,
    /// Capability reference of the registry.
    pub registry_cap: String,
    /// Subject serving the bootstrap mapping.
    pub bootstrap_subject: String,
    /// Change-event subject prefix; `None` disables the subscriber.
    pub change_subject_prefix: Option<String>,
    /// Request-reply timeout applied when the context carries none.
    pub default_timeout: Duration,
    /// Whether `meta.duration_ms` carries real timing.
    pub include_timing: bool,
    /// Resolution cache settings.
    pub resolution: ResolutionConfig,
    /// TTL for discovery/describe cache entries.
    pub discovery_ttl: Duration,
    /// Connection pool settings.
    pub pool: PoolConfig,
    /// Capability reference → subject used when the registry cannot resolve.
    pub fallback_mappings: HashMap<String, String>,
    /// Static access token forwarded to sandbox-bus auth.
    pub access_token: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_nats_url: String::new(),
            default_tenant_id: "default".to_string(),
            env: None,
            registry_cap: DEFAULT_REGISTRY_CAP.to_string(),
            bootstrap_subject: BOOTSTRAP_SUBJECT.to_string(),
            change_subject_prefix: Some(DEFAULT_CHANGE_SUBJECT_PREFIX.to_string()),
            default_timeout: DEFAULT_TIMEOUT,
            include_timing: true,
            resolution: ResolutionConfig::default(),
            discovery_ttl: DEFAULT_RESOLUTION_TTL,
            pool: PoolConfig::default(),
            fallback_mappings: HashMap::new(),
            access_token: None,
        }
    }
}

impl ClientConfig {
    /// Configuration for a default bus URL, everything else defaulted.
    pub fn for_url(default_nats_url: impl Into<String>) -> Self {
        Self {
            default_nats_url: default_nats_url.into(),
            ..Self::default()
        }
    }

    /// Fail-fast validation of field combinations.
    pub fn validate(&self) -> Result<()> {
        if self.default_nats_url.trim().is_empty() {
            return EmptyFieldSnafu { field: "default_nats_url" }.fail();
        }
        if self.default_tenant_id.trim().is_empty() {
            return EmptyFieldSnafu { field: "default_tenant_id" }.fail();
        }
        if self.registry_cap.trim().is_empty() {
            return EmptyFieldSnafu { field: "registry_cap" }.fail();
        }
        if self.bootstrap_subject.trim().is_empty() {
            return EmptyFieldSnafu { field: "bootstrap_subject" }.fail();
        }
        if self.default_timeout.is_zero() {
            return OutOfRangeSnafu {
                field: "default_timeout",
                reason: "must be positive".to_string(),
            }
            .fail();
        }
        if self.pool.max_connections < 1 {
            return OutOfRangeSnafu {
                field: "pool.max_connections",
                reason: "must allow at least the default connection".to_string(),
            }
            .fail();
        }
        if self.resolution.max_entries == 0 {
            return OutOfRangeSnafu {
                field: "resolution.max_entries",
                reason: "must be positive".to_string(),
            }
            .fail();
        }
        Ok(())
    }
}
