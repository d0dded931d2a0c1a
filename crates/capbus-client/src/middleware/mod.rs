//! The standard middleware set.
//!
//! Wired by the facade in listed order (outermost first): enrich-context,
//! resolve, deadline, policy, validation, telemetry.

mod deadline;
mod enrich;
mod policy;
mod resolve;
mod telemetry;
mod validate;

pub use deadline::DeadlineMiddleware;
pub use enrich::EnrichContextMiddleware;
pub use policy::PolicyMiddleware;
pub use resolve::ResolveMiddleware;
pub use telemetry::TelemetryMiddleware;
pub use validate::MethodValidator;
pub use validate::ValidationMiddleware;
