//! Context enrichment: request id, tenant default, access token.

use std::sync::Arc;

use async_trait::async_trait;
use capbus_core::AccessTokenProvider;
use capbus_core::Envelope;
use capbus_core::InvocationErr;
use capbus_core::InvocationResult;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::pipeline::Handler;
use crate::pipeline::Middleware;

/// Fills mandatory context fields the caller left empty.
pub struct EnrichContextMiddleware {
    default_tenant_id: String,
    static_access_token: Option<String>,
    token_provider: Option<Arc<dyn AccessTokenProvider>>,
}

impl EnrichContextMiddleware {
    /// Build the enrichment stage.
    pub fn new(
        default_tenant_id: impl Into<String>,
        static_access_token: Option<String>,
        token_provider: Option<Arc<dyn AccessTokenProvider>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            default_tenant_id: default_tenant_id.into(),
            static_access_token,
            token_provider,
        })
    }
}

#[async_trait]
impl Middleware for EnrichContextMiddleware {
    fn name(&self) -> &'static str {
        "enrich-context"
    }

    async fn handle(&self, mut envelope: Envelope, cancel: CancellationToken, next: Handler) -> InvocationResult {
        if envelope.ctx.request_id.is_empty() {
            envelope.ctx.request_id = Uuid::new_v4().to_string();
        }
        if envelope.ctx.tenant_id.is_empty() {
            envelope.ctx.tenant_id = self.default_tenant_id.clone();
        }
        if envelope.ctx.access_token.is_none() {
            envelope.ctx.access_token = match &self.token_provider {
                Some(provider) => match provider.access_token().await {
                    Ok(token) => Some(token),
                    Err(error) => return Err(InvocationErr::bare(error)),
                },
                None => self.static_access_token.clone(),
            };
        }
        next(envelope, cancel).await
    }
}
