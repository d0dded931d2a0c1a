//! Test infrastructure for the capbus SDK.
//!
//! - [`bus`]: a process-local bus (per-URL brokers, request-reply, queue
//!   groups, wildcards) behind the production [`capbus_core::BusConnection`]
//!   traits
//! - [`registry`]: a scripted registry serving bootstrap and
//!   resolve/discover/describe from canned data
//! - [`auth`]: static auth/token providers that record their inputs
//! - [`responder`]: a scripted stand-in for a worker

pub mod auth;
pub mod bus;
pub mod registry;
pub mod responder;

pub use auth::StaticAuthProvider;
pub use auth::StaticTokenProvider;
pub use bus::MemoryBroker;
pub use bus::MemoryConnection;
pub use bus::MemoryConnector;
pub use bus::MemoryNetwork;
pub use bus::subject_matches;
pub use registry::ScriptedRegistry;
pub use registry::TEST_REGISTRY_SUBJECT;
pub use responder::spawn_responder;
