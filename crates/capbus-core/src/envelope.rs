//! The invocation envelope and result types.

use serde::Deserialize;
use serde::Serialize;

use crate::context::InvocationContext;
use crate::error::CapabilityError;

/// Routing target attached to an envelope once resolution has run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolvedTarget {
    /// Bus URL that serves the capability.
    pub nats_url: String,
    /// Message subject the capability listens on.
    pub subject: String,
    /// Concrete resolved version.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl ResolvedTarget {
    /// True when both routing fields are populated.
    pub fn is_routable(&self) -> bool {
        !self.nats_url.is_empty() && !self.subject.is_empty()
    }
}

/// The unit of request travelling through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    /// Capability reference as given by the caller.
    pub capability: String,
    /// Requested version, when pinned by the caller.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Routing target; set by the resolve middleware. Invariant: populated
    /// and routable by the time the envelope reaches the transport.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved: Option<ResolvedTarget>,
    /// Method to invoke on the capability.
    pub method: String,
    /// Opaque method payload.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Invocation context.
    pub ctx: InvocationContext,
}

impl Envelope {
    /// Envelope for a capability/method pair with a given context.
    pub fn new(capability: impl Into<String>, method: impl Into<String>, params: serde_json::Value, ctx: InvocationContext) -> Self {
        Self {
            capability: capability.into(),
            version: None,
            resolved: None,
            method: method.into(),
            params,
            ctx,
        }
    }
}

/// Timing, policy, and usage metadata attached to every result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InvocationMeta {
    /// Unix ms at which the transport began the request.
    pub started_at_unix_ms: i64,
    /// Unix ms at which the reply settled.
    pub ended_at_unix_ms: i64,
    /// Wall duration in milliseconds; `0` when timing is disabled.
    pub duration_ms: i64,
    /// Id of the policy decision that admitted the invocation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_decision_id: Option<String>,
    /// Reasons recorded by policy evaluation.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub policy_reasons: Vec<String>,
    /// Usage totals reported by the worker, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<serde_json::Value>,
    /// Execution id assigned by the worker, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
}

/// Successful invocation outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationOk {
    /// Typed result payload.
    pub data: serde_json::Value,
    /// Result metadata.
    #[serde(default)]
    pub meta: InvocationMeta,
}

/// Failed invocation outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationErr {
    /// The structured error.
    pub error: CapabilityError,
    /// Result metadata.
    #[serde(default)]
    pub meta: InvocationMeta,
}

impl InvocationErr {
    /// Wrap an error with empty metadata.
    pub fn bare(error: CapabilityError) -> Self {
        Self {
            error,
            meta: InvocationMeta::default(),
        }
    }
}

/// Tagged invocation outcome.
pub type InvocationResult = Result<InvocationOk, InvocationErr>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_wire_shape() {
        let env = Envelope::new(
            "my.app/my.cap",
            "ping",
            serde_json::json!({}),
            InvocationContext::for_tenant("default"),
        );
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["capability"], "my.app/my.cap");
        assert_eq!(value["method"], "ping");
        assert!(value.get("resolved").is_none());
        assert!(value["ctx"].get("tenantId").is_some());
    }

    #[test]
    fn resolved_target_routability() {
        let mut target = ResolvedTarget::default();
        assert!(!target.is_routable());
        target.subject = "cap.a.b.v1".into();
        assert!(!target.is_routable());
        target.nats_url = "nats://sys:4222".into();
        assert!(target.is_routable());
    }
}
