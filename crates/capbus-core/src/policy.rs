//! Policy bindings, decisions, and the pure composition rule.
//!
//! Policy evaluation itself is an external collaborator behind
//! [`PolicyEvaluator`]; this module only defines the data shapes and the
//! deterministic composition of multiple decisions.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::envelope::Envelope;
use crate::error::CapabilityError;

/// How a policy binding selects the capabilities it applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Match by capability type.
    CapabilityType,
    /// Match by tags.
    Tags,
    /// Match a single capability instance.
    Instance,
}

/// Binds a policy to an enforcement point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyBinding {
    /// Policy enforcement point the binding applies at.
    pub pep: String,
    /// Selection mode.
    pub match_type: MatchType,
    /// Selection priority; lower evaluates earlier.
    pub priority: i64,
    /// Id of the bound policy.
    pub policy_id: String,
}

/// Outcome of evaluating one policy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PolicyDecision {
    /// Decision id for audit trails.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Whether the policy admits the invocation.
    pub allow: bool,
    /// Deny entries; any entry forces a composed deny.
    pub deny: Vec<String>,
    /// Human-readable reasons.
    pub reasons: Vec<String>,
    /// Payload patches to apply, in selection order.
    pub patches: Vec<serde_json::Value>,
    /// Resource limits by coordinate.
    pub limits: BTreeMap<String, i64>,
    /// Obligations the caller must discharge.
    pub obligations: Vec<serde_json::Value>,
    /// Labels attached to the invocation.
    pub labels: BTreeMap<String, String>,
    /// Routing override, when the policy redirects the invocation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing: Option<serde_json::Value>,
}

impl PolicyDecision {
    /// An allowing decision with nothing attached.
    pub fn allow() -> Self {
        Self {
            allow: true,
            ..Self::default()
        }
    }

    /// True when the decision denies, either explicitly or via deny entries.
    pub fn is_denied(&self) -> bool {
        !self.allow || !self.deny.is_empty()
    }
}

/// Compose decisions in selection order.
///
/// Deny if any denies; limits collapse by coordinate-wise minimum; patches
/// and obligations concatenate in selection order; the first routing
/// override wins. The composed allow/deny outcome is order-independent.
pub fn compose_decisions(decisions: &[PolicyDecision]) -> PolicyDecision {
    let mut composed = PolicyDecision::allow();
    for decision in decisions {
        composed.allow &= decision.allow;
        composed.deny.extend(decision.deny.iter().cloned());
        composed.reasons.extend(decision.reasons.iter().cloned());
        composed.patches.extend(decision.patches.iter().cloned());
        composed.obligations.extend(decision.obligations.iter().cloned());
        for (coordinate, value) in &decision.limits {
            composed
                .limits
                .entry(coordinate.clone())
                .and_modify(|existing| *existing = (*existing).min(*value))
                .or_insert(*value);
        }
        for (key, value) in &decision.labels {
            composed.labels.entry(key.clone()).or_insert_with(|| value.clone());
        }
        if composed.routing.is_none() {
            composed.routing = decision.routing.clone();
        }
        if composed.id.is_none() {
            composed.id = decision.id.clone();
        }
    }
    composed
}

/// External policy decision point.
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    /// Evaluate the policies bound at `pep` against an envelope.
    async fn evaluate(&self, pep: &str, envelope: &Envelope) -> Result<PolicyDecision, CapabilityError>;
}
