//! Client side of the capbus capability invocation SDK.
//!
//! The facade ([`CapabilityClient`]) owns three tightly-coupled subsystems:
//!
//! - **Resolution** ([`resolution`], [`discovery`], [`invalidation`]):
//!   capability reference → subject and bus URL, with TTL caching,
//!   stale-while-revalidate, negative caching, in-flight dedup, static
//!   fallbacks, and event-driven invalidation.
//! - **Connection pool** ([`pool`]): lazily-authenticated connections to
//!   sandbox buses with credential refresh, LRU eviction, and idle reaping.
//! - **Pipelined invocation** ([`pipeline`], [`middleware`], [`transport`]):
//!   a middleware-composed request path ending in a request-reply on the
//!   resolved subject.
//!
//! # Example
//!
//! ```rust,ignore
//! use capbus_client::{CapabilityClient, ClientConfig, ClientOptions, InvokeRequest};
//!
//! let options = ClientOptions::new(ClientConfig::for_url("nats://sys:4222"), connector);
//! let client = CapabilityClient::connect(options).await?;
//! let result = client
//!     .invoke("my.app/my.cap", InvokeRequest::new("ping", serde_json::json!({})), None)
//!     .await;
//! ```

pub mod client;
pub mod config;
pub mod discovery;
pub mod invalidation;
pub mod metrics;
pub mod middleware;
pub mod pipeline;
pub mod pool;
pub mod resolution;
pub mod transport;

pub use client::CapabilityClient;
pub use client::ClientOptions;
pub use client::InvokeRequest;
pub use client::InvokeSubjectRequest;
pub use client::PolicyOptions;
pub use config::ClientConfig;
pub use config::ConfigError;
pub use config::PoolConfig;
pub use config::ResolutionConfig;
pub use discovery::DiscoveryClient;
pub use invalidation::ChangeHandler;
pub use invalidation::InvalidationSubscriber;
pub use metrics::InvocationMetrics;
pub use metrics::MetricsSnapshot;
pub use middleware::DeadlineMiddleware;
pub use middleware::EnrichContextMiddleware;
pub use middleware::MethodValidator;
pub use middleware::PolicyMiddleware;
pub use middleware::ResolveMiddleware;
pub use middleware::TelemetryMiddleware;
pub use middleware::ValidationMiddleware;
pub use pipeline::Handler;
pub use pipeline::Middleware;
pub use pipeline::build_pipeline;
pub use pipeline::handler_fn;
pub use pool::ConnectionPool;
pub use resolution::RegistryTransport;
pub use resolution::ResolutionClient;
pub use resolution::ResolveInput;
pub use resolution::resolution_cache_key;
pub use transport::TransportCore;
