//! Telemetry middleware: invocation spans and counters.

use std::sync::Arc;

use async_trait::async_trait;
use capbus_core::Envelope;
use capbus_core::InvocationResult;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use tracing::info_span;

use crate::metrics::InvocationMetrics;
use crate::pipeline::Handler;
use crate::pipeline::Middleware;

/// Wraps the invocation in a named span and counts outcomes.
pub struct TelemetryMiddleware {
    metrics: Arc<InvocationMetrics>,
}

impl TelemetryMiddleware {
    /// Build the telemetry stage around shared counters.
    pub fn new(metrics: Arc<InvocationMetrics>) -> Arc<Self> {
        Arc::new(Self { metrics })
    }
}

#[async_trait]
impl Middleware for TelemetryMiddleware {
    fn name(&self) -> &'static str {
        "telemetry"
    }

    async fn handle(&self, envelope: Envelope, cancel: CancellationToken, next: Handler) -> InvocationResult {
        let span = info_span!(
            "capability_invoke",
            capability = %envelope.capability,
            version = envelope.version.as_deref().unwrap_or(""),
            method = %envelope.method,
            tenant_id = %envelope.ctx.tenant_id,
            request_id = %envelope.ctx.request_id,
        );
        let result = next(envelope, cancel).instrument(span).await;
        self.metrics.record(&result);
        result
    }
}
