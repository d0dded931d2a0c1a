//! Resolve middleware: populate the envelope's routing target.

use std::sync::Arc;

use async_trait::async_trait;
use capbus_core::Envelope;
use capbus_core::InvocationErr;
use capbus_core::InvocationResult;
use capbus_core::ResolvedTarget;
use tokio_util::sync::CancellationToken;

use crate::pipeline::Handler;
use crate::pipeline::Middleware;
use crate::resolution::ResolutionClient;
use crate::resolution::ResolveInput;

/// Consults the resolution client unless the envelope is already routable.
pub struct ResolveMiddleware {
    resolver: Arc<ResolutionClient>,
    env: Option<String>,
}

impl ResolveMiddleware {
    /// Build the resolve stage.
    pub fn new(resolver: Arc<ResolutionClient>, env: Option<String>) -> Arc<Self> {
        Arc::new(Self { resolver, env })
    }
}

#[async_trait]
impl Middleware for ResolveMiddleware {
    fn name(&self) -> &'static str {
        "resolve"
    }

    async fn handle(&self, mut envelope: Envelope, cancel: CancellationToken, next: Handler) -> InvocationResult {
        if envelope.resolved.as_ref().is_some_and(ResolvedTarget::is_routable) {
            return next(envelope, cancel).await;
        }

        let input = ResolveInput {
            cap: envelope.capability.clone(),
            version: envelope.version.clone(),
            tenant_id: Some(envelope.ctx.tenant_id.clone()).filter(|t| !t.is_empty()),
            env: self.env.clone(),
        };
        let output = match self.resolver.resolve(input).await {
            Ok(output) => output,
            Err(error) => return Err(InvocationErr::bare(error)),
        };
        envelope.resolved = Some(ResolvedTarget {
            nats_url: output.nats_url,
            subject: output.subject,
            version: output.resolved_version,
        });
        next(envelope, cancel).await
    }
}
