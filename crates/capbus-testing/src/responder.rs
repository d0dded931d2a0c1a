//! A scripted request-reply responder for standing in as a worker.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use capbus_core::BusConnection;
use capbus_core::WireRequest;
use tokio::task::JoinHandle;
use tracing::warn;

/// Subscribe to `subject` and answer every request with `respond`.
///
/// `delay` simulates worker latency. The task ends when the subscription
/// closes.
pub async fn spawn_responder(
    connection: Arc<dyn BusConnection>,
    subject: &str,
    queue_group: Option<&str>,
    delay: Option<Duration>,
    respond: impl Fn(WireRequest) -> serde_json::Value + Send + Sync + 'static,
) -> JoinHandle<()> {
    let mut subscription = connection
        .subscribe(subject, queue_group)
        .await
        .expect("subscribe responder subject");
    tokio::spawn(async move {
        while let Some(message) = subscription.next().await {
            let Some(reply) = message.reply else { continue };
            let request: WireRequest = match serde_json::from_slice(&message.payload) {
                Ok(request) => request,
                Err(err) => {
                    warn!(error = %err, "responder discarding malformed request");
                    continue;
                }
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let body = respond(request);
            let payload = serde_json::to_vec(&body).expect("responder body serializes");
            if let Err(err) = connection.publish(&reply, Bytes::from(payload)).await {
                warn!(error = %err, "responder reply failed");
            }
        }
    })
}
