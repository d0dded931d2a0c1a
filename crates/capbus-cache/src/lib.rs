//! Caching primitives for the capbus SDK.
//!
//! - [`ttl`]: generic TTL cache with negative entries, a
//!   stale-while-revalidate window, and insertion-order eviction
//! - [`singleflight`]: in-flight deduplication of identical work
//! - [`keys`]: the resolution cache key builder

pub mod keys;
pub mod singleflight;
pub mod ttl;

pub use keys::KeyParts;
pub use keys::KeyScope;
pub use keys::build_key;
pub use singleflight::SingleFlight;
pub use ttl::CacheLookup;
pub use ttl::TtlCache;
pub use ttl::TtlCacheConfig;
