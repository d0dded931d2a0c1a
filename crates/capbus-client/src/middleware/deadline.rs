//! Deadline middleware: effective timeouts and cancellation classification.
//!
//! Derives a child cancel token that fires once the effective timeout
//! elapses, composing the caller's signal with the deadline-driven one. A
//! `deadline_unix_ms` already in the past fails `TIMEOUT` immediately. When
//! the derived signal (not the caller's) aborted the invocation, a
//! `CANCELLED` outcome is reclassified as `TIMEOUT`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use capbus_core::CapabilityError;
use capbus_core::Envelope;
use capbus_core::ErrorCode;
use capbus_core::InvocationErr;
use capbus_core::InvocationResult;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::pipeline::Handler;
use crate::pipeline::Middleware;

/// Applies `timeout_ms` / `deadline_unix_ms` from the context.
pub struct DeadlineMiddleware;

impl DeadlineMiddleware {
    /// Build the deadline stage.
    pub fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

#[async_trait]
impl Middleware for DeadlineMiddleware {
    fn name(&self) -> &'static str {
        "deadline"
    }

    async fn handle(&self, mut envelope: Envelope, cancel: CancellationToken, next: Handler) -> InvocationResult {
        let now = Utc::now().timestamp_millis();
        let remaining = match envelope.ctx.deadline_unix_ms {
            Some(deadline) if deadline <= now => {
                return Err(InvocationErr::bare(CapabilityError::timeout(format!(
                    "deadline {deadline} already passed"
                ))));
            }
            Some(deadline) => Some((deadline - now) as u64),
            None => None,
        };

        let effective = match (envelope.ctx.timeout_ms, remaining) {
            (Some(timeout), Some(remaining)) => Some(timeout.min(remaining)),
            (Some(timeout), None) => Some(timeout),
            (None, Some(remaining)) => Some(remaining),
            (None, None) => None,
        };
        let Some(effective) = effective else {
            return next(envelope, cancel).await;
        };
        envelope.ctx.timeout_ms = Some(effective);

        let child = cancel.child_token();
        let sleep = tokio::time::sleep(Duration::from_millis(effective));
        tokio::pin!(sleep);
        let invocation = next(envelope, child.clone());
        tokio::pin!(invocation);

        let mut deadline_fired = false;
        let result = loop {
            tokio::select! {
                result = &mut invocation => break result,
                _ = &mut sleep, if !deadline_fired => {
                    deadline_fired = true;
                    child.cancel();
                }
            }
        };

        // The deadline, not the caller, aborted the work.
        if deadline_fired && !cancel.is_cancelled() {
            if let Err(err) = &result
                && err.error.code == ErrorCode::Cancelled
            {
                let meta = err.meta.clone();
                return Err(InvocationErr {
                    error: CapabilityError::timeout(format!("invocation exceeded {effective}ms")),
                    meta,
                });
            }
        }
        result
    }
}
