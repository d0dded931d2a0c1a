//! Policy middleware: pre- and post-invocation enforcement points.

use std::sync::Arc;

use async_trait::async_trait;
use capbus_core::CapabilityError;
use capbus_core::Envelope;
use capbus_core::ErrorCode;
use capbus_core::InvocationErr;
use capbus_core::InvocationResult;
use capbus_core::PolicyDecision;
use capbus_core::PolicyEvaluator;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::pipeline::Handler;
use crate::pipeline::Middleware;

/// Evaluates configured PEPs around the invocation.
pub struct PolicyMiddleware {
    evaluator: Arc<dyn PolicyEvaluator>,
    pre_peps: Vec<String>,
    post_peps: Vec<String>,
}

impl PolicyMiddleware {
    /// Build the policy stage.
    pub fn new(evaluator: Arc<dyn PolicyEvaluator>, pre_peps: Vec<String>, post_peps: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            evaluator,
            pre_peps,
            post_peps,
        })
    }

    async fn evaluate_peps(&self, peps: &[String], envelope: &Envelope) -> Result<Vec<PolicyDecision>, CapabilityError> {
        let mut decisions = Vec::with_capacity(peps.len());
        for pep in peps {
            decisions.push(self.evaluator.evaluate(pep, envelope).await?);
        }
        Ok(decisions)
    }
}

fn denial(decision: &PolicyDecision) -> CapabilityError {
    CapabilityError::new(
        ErrorCode::PolicyDenied,
        format!("policy denied the invocation: {}", decision.reasons.join("; ")),
        false,
    )
    .with_details(serde_json::json!({
        "deny": decision.deny,
        "reasons": decision.reasons,
    }))
}

#[async_trait]
impl Middleware for PolicyMiddleware {
    fn name(&self) -> &'static str {
        "policy"
    }

    async fn handle(&self, mut envelope: Envelope, cancel: CancellationToken, next: Handler) -> InvocationResult {
        if !self.pre_peps.is_empty() {
            let decisions = match self.evaluate_peps(&self.pre_peps, &envelope).await {
                Ok(decisions) => decisions,
                Err(error) => return Err(InvocationErr::bare(error)),
            };
            let composed = capbus_core::compose_decisions(&decisions);
            if composed.is_denied() {
                debug!(capability = %envelope.capability, "invocation denied by pre-invocation policy");
                return Err(InvocationErr::bare(denial(&composed)));
            }
            for (index, obligation) in composed.obligations.iter().enumerate() {
                envelope.ctx.obligations.insert(format!("pre.{index}"), obligation.clone());
            }
            if let Some(id) = &composed.id {
                envelope.ctx.meta.insert("policyDecisionId".to_string(), serde_json::json!(id));
            }
            if !composed.reasons.is_empty() {
                envelope.ctx.meta.insert("policyReasons".to_string(), serde_json::json!(composed.reasons));
            }
        }

        let post_envelope = envelope.clone();
        let mut result = next(envelope, cancel).await;

        if !self.post_peps.is_empty() {
            let decisions = match self.evaluate_peps(&self.post_peps, &post_envelope).await {
                Ok(decisions) => decisions,
                Err(error) => return Err(InvocationErr::bare(error)),
            };
            let composed = capbus_core::compose_decisions(&decisions);
            if composed.is_denied() {
                debug!(capability = %post_envelope.capability, "result suppressed by post-invocation policy");
                let meta = match &result {
                    Ok(ok) => ok.meta.clone(),
                    Err(err) => err.meta.clone(),
                };
                return Err(InvocationErr {
                    error: denial(&composed),
                    meta,
                });
            }
            if let Ok(ok) = &mut result {
                if let Some(id) = &composed.id {
                    ok.meta.policy_decision_id.get_or_insert_with(|| id.clone());
                }
                ok.meta.policy_reasons.extend(composed.reasons.iter().cloned());
            }
        }
        result
    }
}
