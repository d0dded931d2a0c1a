//! Input/output validation against pluggable method specs.

use std::sync::Arc;

use async_trait::async_trait;
use capbus_core::CapabilityError;
use capbus_core::Envelope;
use capbus_core::InvocationErr;
use capbus_core::InvocationResult;
use tokio_util::sync::CancellationToken;

use crate::pipeline::Handler;
use crate::pipeline::Middleware;

/// Validates method payloads. Implementations typically wrap a JSON-schema
/// validator fed from the registry's method specs.
pub trait MethodValidator: Send + Sync {
    /// Validate outbound `params` for `capability.method`.
    fn validate_params(&self, capability: &str, method: &str, params: &serde_json::Value) -> Result<(), String>;

    /// Validate the `data` of a successful reply.
    fn validate_data(&self, capability: &str, method: &str, data: &serde_json::Value) -> Result<(), String>;
}

/// Runs the validator before and after the invocation.
pub struct ValidationMiddleware {
    validator: Arc<dyn MethodValidator>,
}

impl ValidationMiddleware {
    /// Build the validation stage.
    pub fn new(validator: Arc<dyn MethodValidator>) -> Arc<Self> {
        Arc::new(Self { validator })
    }
}

#[async_trait]
impl Middleware for ValidationMiddleware {
    fn name(&self) -> &'static str {
        "validate"
    }

    async fn handle(&self, envelope: Envelope, cancel: CancellationToken, next: Handler) -> InvocationResult {
        if let Err(reason) = self.validator.validate_params(&envelope.capability, &envelope.method, &envelope.params) {
            return Err(InvocationErr::bare(
                CapabilityError::validation(format!("invalid params: {reason}"))
                    .with_details(serde_json::json!({"method": envelope.method})),
            ));
        }

        let capability = envelope.capability.clone();
        let method = envelope.method.clone();
        let result = next(envelope, cancel).await;

        match result {
            Ok(ok) => match self.validator.validate_data(&capability, &method, &ok.data) {
                // An invalid success payload is a server-side defect.
                Err(reason) => Err(InvocationErr {
                    error: CapabilityError::internal(format!("reply failed output validation: {reason}")),
                    meta: ok.meta,
                }),
                Ok(()) => Ok(ok),
            },
            Err(err) => Err(err),
        }
    }
}
