//! Wire protocol types: invocation payloads, registry calls, bootstrap, and
//! change events.
//!
//! Every payload is JSON with camelCase keys. The request-reply pairs are:
//!
//! - invocation: [`WireRequest`] → [`WireReply`] on the resolved subject
//! - registry: [`RegistryRequest`] → [`RegistryResponse`] on the registry subject
//! - bootstrap: empty object → [`BootstrapReply`] on the bootstrap subject
//!
//! Change events ([`RegistryChangedEvent`]) are best-effort fan-out on
//! `registry.changed` and `registry.changed.<scope>`; consumers must be
//! idempotent.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

use crate::context::InvocationContext;
use crate::error::CapabilityError;

/// Invocation payload sent from client to worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireRequest {
    /// Capability reference.
    pub capability: String,
    /// Requested version, when pinned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Method name.
    pub method: String,
    /// Method payload.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Invocation context.
    pub ctx: InvocationContext,
}

/// Reply to an invocation.
///
/// Workers reply `{ok: true, data}` or `{ok: false, error}`; some emit
/// `result` instead of `data`, which the transport tolerates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireReply {
    /// Whether the invocation succeeded.
    pub ok: bool,
    /// Success payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Alternate success payload key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Failure payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
    /// Usage totals reported by the worker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<serde_json::Value>,
    /// Execution id assigned by the worker.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
}

impl WireReply {
    /// Successful reply carrying `data`.
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            ..Self::default()
        }
    }

    /// Failed reply carrying a structured error.
    pub fn err(error: CapabilityError) -> Self {
        Self {
            ok: false,
            error: Some(WireError {
                code: Some(error.code.as_str().to_string()),
                message: Some(error.message),
                retryable: Some(error.retryable),
                details: error.details,
            }),
            ..Self::default()
        }
    }
}

/// Loosely-typed error shape on the wire. Servers outside this SDK may omit
/// fields; the transport fills defaults on decode.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireError {
    /// Error code string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Human-readable message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Advisory retry hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retryable: Option<bool>,
    /// Structured details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<WireError> for CapabilityError {
    fn from(wire: WireError) -> Self {
        CapabilityError {
            code: wire.code.as_deref().map(crate::error::ErrorCode::parse_lossy).unwrap_or(crate::error::ErrorCode::InternalError),
            message: wire.message.unwrap_or_else(|| "Unknown server error".to_string()),
            retryable: wire.retryable.unwrap_or(false),
            details: wire.details,
        }
    }
}

/// Request envelope for registry operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryRequest {
    /// Request id (UUID).
    pub id: String,
    /// Always `"invoke"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Registry capability reference.
    pub cap: String,
    /// Registry method (`resolve`, `discover`, `describe`, ...).
    pub method: String,
    /// Method payload.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Optional invocation context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ctx: Option<InvocationContext>,
}

/// Reply envelope for registry operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistryResponse {
    /// Echoed request id.
    pub id: String,
    /// Whether the call succeeded.
    pub ok: bool,
    /// Success payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Failure payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

/// A resolved capability as produced by the registry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolveOutput {
    /// Canonical identity `cap:@alias/app/cap@version`.
    pub canonical_identity: String,
    /// Bus URL that serves the capability.
    pub nats_url: String,
    /// Subject the capability listens on.
    pub subject: String,
    /// Resolved major version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub major: Option<u64>,
    /// Concrete resolved version (full SemVer).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_version: Option<String>,
    /// Lifecycle status (`active`, `deprecated`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// TTL in seconds; `0` means cache indefinitely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<u64>,
    /// Registry etag for revalidation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Schema hash for auditability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_hash: Option<String>,
    /// Policy hash for auditability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_hash: Option<String>,
    /// Artifact hash for auditability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_hash: Option<String>,
    /// Published method specs, keyed by method name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub methods: Option<serde_json::Value>,
}

/// Bootstrap reply: the initial capability→subject mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BootstrapReply {
    /// Capability reference → resolution entry.
    pub capabilities: BTreeMap<String, ResolveOutput>,
    /// Alias table, when published.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub aliases: BTreeMap<String, String>,
    /// Change-event subjects, when published.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub change_event_subjects: Vec<String>,
}

/// Registry change event published on `registry.changed[.<scope>]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistryChangedEvent {
    /// Application the change belongs to.
    pub app: String,
    /// Capability that changed.
    pub capability: String,
    /// Fields that changed.
    pub changed_fields: Vec<String>,
    /// New default major, when the default moved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_default_major: Option<u64>,
    /// Majors affected by the change.
    pub affected_majors: Vec<u64>,
    /// Registry revision after the change.
    pub revision: u64,
    /// Etag after the change.
    pub etag: String,
    /// Unix ms timestamp of the change.
    pub timestamp: i64,
    /// Environment scope, when the change is environment-specific.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
}
