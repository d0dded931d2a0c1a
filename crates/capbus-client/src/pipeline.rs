//! Pipeline composition.
//!
//! A middleware wraps the handler below it: it may pre-mutate the envelope,
//! short-circuit by not calling `next`, post-process the result, and
//! propagate cancellation. `build_pipeline` composes right-to-left so the
//! first element of the list is the outermost stage: it runs first on entry
//! and last on return.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use capbus_core::Envelope;
use capbus_core::InvocationResult;
use futures::FutureExt;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;

/// The composed handler shape every stage sees.
pub type Handler = Arc<dyn Fn(Envelope, CancellationToken) -> BoxFuture<'static, InvocationResult> + Send + Sync>;

/// One pipeline stage.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Stage name for spans and logs.
    fn name(&self) -> &'static str;

    /// Handle the envelope, calling `next` zero or one times.
    async fn handle(&self, envelope: Envelope, cancel: CancellationToken, next: Handler) -> InvocationResult;
}

/// Wrap an async closure as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(Envelope, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = InvocationResult> + Send + 'static,
{
    Arc::new(move |envelope, cancel| f(envelope, cancel).boxed())
}

/// Compose middleware around a core handler by right-fold: index 0 outermost.
pub fn build_pipeline(middleware: Vec<Arc<dyn Middleware>>, core: Handler) -> Handler {
    middleware.into_iter().rev().fold(core, |next, stage| {
        Arc::new(move |envelope, cancel| {
            let stage = stage.clone();
            let next = next.clone();
            async move { stage.handle(envelope, cancel, next).await }.boxed()
        })
    })
}
