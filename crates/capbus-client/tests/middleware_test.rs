//! Standard middleware behavior against a stub core handler.

use std::sync::Arc;

use async_trait::async_trait;
use capbus_client::DeadlineMiddleware;
use capbus_client::EnrichContextMiddleware;
use capbus_client::Handler;
use capbus_client::MethodValidator;
use capbus_client::PolicyMiddleware;
use capbus_client::ValidationMiddleware;
use capbus_client::build_pipeline;
use capbus_client::handler_fn;
use capbus_core::CapabilityError;
use capbus_core::Envelope;
use capbus_core::ErrorCode;
use capbus_core::InvocationContext;
use capbus_core::InvocationMeta;
use capbus_core::InvocationOk;
use capbus_core::PolicyDecision;
use capbus_core::PolicyEvaluator;
use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

fn envelope() -> Envelope {
    Envelope::new(
        "my.app/my.cap",
        "ping",
        serde_json::json!({}),
        InvocationContext::for_tenant("acme"),
    )
}

fn capture_core(seen: Arc<Mutex<Vec<Envelope>>>) -> Handler {
    handler_fn(move |envelope, _cancel| {
        let seen = seen.clone();
        async move {
            seen.lock().push(envelope);
            Ok(InvocationOk {
                data: serde_json::json!("done"),
                meta: InvocationMeta::default(),
            })
        }
    })
}

#[tokio::test]
async fn enrich_fills_request_id_tenant_and_token() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let pipeline = build_pipeline(
        vec![EnrichContextMiddleware::new("fallback-tenant", Some("static-token".to_string()), None)],
        capture_core(seen.clone()),
    );

    let mut envelope = envelope();
    envelope.ctx.tenant_id = String::new();
    pipeline(envelope, CancellationToken::new()).await.unwrap();

    let seen = seen.lock();
    assert_eq!(seen[0].ctx.tenant_id, "fallback-tenant");
    assert!(!seen[0].ctx.request_id.is_empty());
    assert_eq!(seen[0].ctx.access_token.as_deref(), Some("static-token"));
}

#[tokio::test]
async fn enrich_preserves_caller_supplied_fields() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let pipeline = build_pipeline(
        vec![EnrichContextMiddleware::new("fallback-tenant", Some("static-token".to_string()), None)],
        capture_core(seen.clone()),
    );

    let mut envelope = envelope();
    envelope.ctx.request_id = "caller-r1".to_string();
    envelope.ctx.access_token = Some("caller-token".to_string());
    pipeline(envelope, CancellationToken::new()).await.unwrap();

    let seen = seen.lock();
    assert_eq!(seen[0].ctx.tenant_id, "acme");
    assert_eq!(seen[0].ctx.request_id, "caller-r1");
    assert_eq!(seen[0].ctx.access_token.as_deref(), Some("caller-token"));
}

#[tokio::test]
async fn past_deadline_times_out_without_reaching_the_core() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let pipeline = build_pipeline(vec![DeadlineMiddleware::new()], capture_core(seen.clone()));

    let mut envelope = envelope();
    envelope.ctx.deadline_unix_ms = Some(Utc::now().timestamp_millis() - 1_000);
    let err = pipeline(envelope, CancellationToken::new()).await.unwrap_err();

    assert_eq!(err.error.code, ErrorCode::Timeout);
    assert!(seen.lock().is_empty());
}

#[tokio::test]
async fn deadline_narrows_the_effective_timeout() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let pipeline = build_pipeline(vec![DeadlineMiddleware::new()], capture_core(seen.clone()));

    let mut envelope = envelope();
    envelope.ctx.timeout_ms = Some(60_000);
    envelope.ctx.deadline_unix_ms = Some(Utc::now().timestamp_millis() + 5_000);
    pipeline(envelope, CancellationToken::new()).await.unwrap();

    let effective = seen.lock()[0].ctx.timeout_ms.unwrap();
    assert!(effective <= 5_000, "effective timeout was {effective}");
}

struct ScriptedEvaluator {
    decisions: Mutex<Vec<PolicyDecision>>,
}

#[async_trait]
impl PolicyEvaluator for ScriptedEvaluator {
    async fn evaluate(&self, _pep: &str, _envelope: &Envelope) -> Result<PolicyDecision, CapabilityError> {
        Ok(self.decisions.lock().remove(0))
    }
}

#[tokio::test]
async fn pre_policy_denial_short_circuits() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut denied = PolicyDecision::allow();
    denied.deny.push("quota".to_string());
    denied.reasons.push("quota exhausted".to_string());
    let evaluator = Arc::new(ScriptedEvaluator {
        decisions: Mutex::new(vec![denied]),
    });
    let pipeline = build_pipeline(
        vec![PolicyMiddleware::new(evaluator, vec!["pre".to_string()], vec![])],
        capture_core(seen.clone()),
    );

    let err = pipeline(envelope(), CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.error.code, ErrorCode::PolicyDenied);
    assert!(err.error.message.contains("quota exhausted"));
    assert!(seen.lock().is_empty());
}

#[tokio::test]
async fn allowed_policy_merges_obligations_and_decision_metadata() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut allowed = PolicyDecision::allow();
    allowed.id = Some("decision-7".to_string());
    allowed.obligations.push(serde_json::json!({"kind": "audit"}));
    allowed.reasons.push("tenant in good standing".to_string());
    let evaluator = Arc::new(ScriptedEvaluator {
        decisions: Mutex::new(vec![allowed]),
    });
    let pipeline = build_pipeline(
        vec![PolicyMiddleware::new(evaluator, vec!["pre".to_string()], vec![])],
        capture_core(seen.clone()),
    );

    pipeline(envelope(), CancellationToken::new()).await.unwrap();

    let seen = seen.lock();
    assert_eq!(seen[0].ctx.obligations["pre.0"], serde_json::json!({"kind": "audit"}));
    assert_eq!(seen[0].ctx.meta["policyDecisionId"], serde_json::json!("decision-7"));
    assert_eq!(seen[0].ctx.meta["policyReasons"], serde_json::json!(["tenant in good standing"]));
}

struct RejectingValidator;

impl MethodValidator for RejectingValidator {
    fn validate_params(&self, _capability: &str, _method: &str, params: &serde_json::Value) -> Result<(), String> {
        if params.get("bad").is_some() {
            return Err("'bad' is not allowed".to_string());
        }
        Ok(())
    }

    fn validate_data(&self, _capability: &str, _method: &str, data: &serde_json::Value) -> Result<(), String> {
        if data == &serde_json::json!("done") {
            return Err("server returned a placeholder".to_string());
        }
        Ok(())
    }
}

#[tokio::test]
async fn invalid_params_fail_validation_error() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let pipeline = build_pipeline(
        vec![ValidationMiddleware::new(Arc::new(RejectingValidator))],
        capture_core(seen.clone()),
    );

    let mut envelope = envelope();
    envelope.params = serde_json::json!({"bad": 1});
    let err = pipeline(envelope, CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.error.code, ErrorCode::ValidationError);
    assert!(seen.lock().is_empty());
}

#[tokio::test]
async fn invalid_reply_data_is_an_internal_error() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let pipeline = build_pipeline(
        vec![ValidationMiddleware::new(Arc::new(RejectingValidator))],
        capture_core(seen.clone()),
    );

    // The core returns "done", which the validator rejects on the way out.
    let err = pipeline(envelope(), CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.error.code, ErrorCode::InternalError);
    assert_eq!(seen.lock().len(), 1);
}
