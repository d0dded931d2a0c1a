//! Worker side of the capbus capability invocation SDK.
//!
//! A worker pool subscribes its capabilities' subjects within a named queue
//! group, validates incoming envelopes, dispatches them to registered
//! handlers (echo by default), and replies with the serialized result.
//! Reconfiguration drains in-flight work before resubscribing.

pub mod bootstrap;
pub mod config;
pub mod consumer;
pub mod registry;

pub use bootstrap::BootstrapError;
pub use bootstrap::WorkerBootstrap;
pub use config::SandboxEnv;
pub use config::WorkerPoolConfig;
pub use consumer::WorkerConsumer;
pub use registry::CapabilityHandler;
pub use registry::EchoHandler;
pub use registry::HandlerRegistry;
