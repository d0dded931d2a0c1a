//! Core types for the capbus capability invocation SDK.
//!
//! A *capability* is a named, versioned RPC operation (`app/cap[@ver]`)
//! served on a message-bus subject. This crate carries everything shared
//! between the client and worker sides:
//!
//! - [`identity`]: reference parsing and canonical identities
//! - [`envelope`] / [`context`]: the invocation envelope and its context
//! - [`error`]: the closed error taxonomy ([`CapabilityError`])
//! - [`wire`]: JSON wire protocol types (invocation, registry, bootstrap,
//!   change events)
//! - [`bus`] / [`auth`]: the narrow bus-client and auth-provider seams
//! - [`policy`]: policy bindings, decisions, and their composition

pub mod auth;
pub mod bus;
pub mod constants;
pub mod context;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod policy;
pub mod wire;

pub use auth::AccessTokenProvider;
pub use auth::AuthProvider;
pub use auth::AuthRequest;
pub use auth::BusCredentials;
pub use bus::BusConnection;
pub use bus::BusConnector;
pub use bus::BusError;
pub use bus::BusMessage;
pub use bus::BusSubscription;
pub use bus::normalize_url;
pub use context::InvocationContext;
pub use envelope::Envelope;
pub use envelope::InvocationErr;
pub use envelope::InvocationMeta;
pub use envelope::InvocationOk;
pub use envelope::InvocationResult;
pub use envelope::ResolvedTarget;
pub use error::CapabilityError;
pub use error::ErrorCode;
pub use identity::CanonicalizeOptions;
pub use identity::IdentityError;
pub use identity::ParsedReference;
pub use identity::canonicalize;
pub use identity::normalize_version;
pub use identity::parse_reference;
pub use policy::MatchType;
pub use policy::PolicyBinding;
pub use policy::PolicyDecision;
pub use policy::PolicyEvaluator;
pub use policy::compose_decisions;
pub use wire::BootstrapReply;
pub use wire::RegistryChangedEvent;
pub use wire::RegistryRequest;
pub use wire::RegistryResponse;
pub use wire::ResolveOutput;
pub use wire::WireError;
pub use wire::WireReply;
pub use wire::WireRequest;
