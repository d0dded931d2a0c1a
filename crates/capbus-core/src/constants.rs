//! Protocol constants and default bounds for the capbus SDK.
//!
//! All limits are explicit so that every code path has a known upper bound.

use std::time::Duration;

/// Subject on which the registry serves the bootstrap mapping.
pub const BOOTSTRAP_SUBJECT: &str = "system.registry.bootstrap";

/// Capability reference of the registry itself.
pub const DEFAULT_REGISTRY_CAP: &str = "system.registry";

/// Subject prefix for registry change events. The subscriber listens on the
/// prefix itself (global channel) and `<prefix>.*` (granular channel).
pub const DEFAULT_CHANGE_SUBJECT_PREFIX: &str = "registry.changed";

/// Alias assumed when a capability reference does not carry one.
pub const DEFAULT_ALIAS: &str = "main";

/// Canonical identity scheme prefix.
pub const CANONICAL_PREFIX: &str = "cap:";

/// Default request-reply timeout for invocations.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(30_000);

/// Default TTL for positive resolution cache entries.
pub const DEFAULT_RESOLUTION_TTL: Duration = Duration::from_secs(300);

/// Default TTL for negative cache entries.
pub const DEFAULT_NEGATIVE_TTL: Duration = Duration::from_secs(30);

/// Default stale-while-revalidate window appended after entry expiry.
pub const DEFAULT_STALE_WINDOW: Duration = Duration::from_secs(60);

/// TTL applied to resolutions synthesized from fallback mappings.
pub const FALLBACK_TTL: Duration = Duration::from_secs(60);

/// Etag carried by fallback-synthesized resolutions.
pub const FALLBACK_ETAG: &str = "fallback";

/// Default upper bound on resolution cache entries.
pub const DEFAULT_MAX_CACHE_ENTRIES: usize = 1024;

/// Default upper bound on pooled connections, the default connection included.
pub const DEFAULT_MAX_CONNECTIONS: usize = 8;

/// Default idle timeout before a pooled connection is reaped.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);

/// Interval between idle-connection reaper sweeps.
pub const REAPER_INTERVAL: Duration = Duration::from_secs(60);

/// Credentials are treated as expired this long before their stated expiry.
pub const CREDENTIAL_EXPIRY_SKEW: Duration = Duration::from_secs(30);

/// Maximum accepted length of a capability reference string.
pub const MAX_REFERENCE_LENGTH: usize = 256;

/// Maximum accepted length of a message subject.
pub const MAX_SUBJECT_LENGTH: usize = 256;

/// Maximum number of registered invalidation handlers.
pub const MAX_INVALIDATION_HANDLERS: usize = 64;

/// Buffer capacity of a single bus subscription channel.
pub const SUBSCRIPTION_BUFFER: usize = 256;
