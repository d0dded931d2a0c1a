//! Narrow abstraction over the message-bus client.
//!
//! The SDK only needs request-reply and queue-group subscription; any bus
//! client offering those can be plugged in behind [`BusConnection`] and
//! [`BusConnector`]. The in-memory bus in `capbus-testing` implements the
//! same traits for tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use snafu::Snafu;
use tokio::sync::mpsc;

use crate::auth::BusCredentials;

/// Result type for bus operations.
pub type Result<T, E = BusError> = std::result::Result<T, E>;

/// Errors surfaced by a bus client.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum BusError {
    /// The request did not complete within the timeout.
    #[snafu(display("bus request on '{subject}' timed out after {timeout:?}"))]
    RequestTimeout {
        /// Subject the request was sent on.
        subject: String,
        /// Timeout that elapsed.
        timeout: Duration,
    },

    /// Nothing is subscribed to the subject.
    #[snafu(display("no responders on subject '{subject}'"))]
    NoResponders {
        /// Subject with no subscribers.
        subject: String,
    },

    /// The connection is closed or draining.
    #[snafu(display("bus connection to '{url}' is closed"))]
    ConnectionClosed {
        /// URL of the closed connection.
        url: String,
    },

    /// Establishing the connection failed.
    #[snafu(display("failed to connect to '{url}': {reason}"))]
    ConnectFailed {
        /// URL that could not be reached.
        url: String,
        /// Failure reason.
        reason: String,
    },

    /// The server rejected the presented credentials.
    #[snafu(display("authentication rejected by '{url}': {reason}"))]
    AuthRejected {
        /// URL that rejected the credentials.
        url: String,
        /// Rejection reason.
        reason: String,
    },

    /// Any other transport failure.
    #[snafu(display("bus transport failure: {reason}"))]
    Transport {
        /// Failure reason.
        reason: String,
    },
}

/// A message delivered to a subscription.
#[derive(Debug, Clone)]
pub struct BusMessage {
    /// Subject the message was published on.
    pub subject: String,
    /// Message payload.
    pub payload: Bytes,
    /// Reply subject for request-reply, when the sender expects one.
    pub reply: Option<String>,
}

/// A live subscription yielding messages until unsubscribed or drained.
pub struct BusSubscription {
    subject: String,
    receiver: mpsc::Receiver<BusMessage>,
}

impl BusSubscription {
    /// Wrap a channel receiver as a subscription.
    pub fn new(subject: impl Into<String>, receiver: mpsc::Receiver<BusMessage>) -> Self {
        Self {
            subject: subject.into(),
            receiver,
        }
    }

    /// Subject (or pattern) this subscription listens on.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Receive the next message; `None` once the subscription is closed and
    /// the buffer is drained.
    pub async fn next(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }
}

/// A single authenticated connection to one bus server.
#[async_trait]
pub trait BusConnection: Send + Sync {
    /// URL this connection is bound to.
    fn url(&self) -> &str;

    /// True once the connection has been closed or drained.
    fn is_closed(&self) -> bool;

    /// Send a request and await the reply.
    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<Bytes>;

    /// Publish a message without awaiting a reply.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()>;

    /// Subscribe to a subject, optionally within a queue group. Within a
    /// queue group the bus delivers each message to exactly one member.
    async fn subscribe(&self, subject: &str, queue_group: Option<&str>) -> Result<BusSubscription>;

    /// Stop accepting new work and let in-flight messages finish.
    async fn drain(&self) -> Result<()>;

    /// Close the connection immediately.
    async fn close(&self) -> Result<()>;
}

impl std::fmt::Debug for dyn BusConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusConnection")
            .field("url", &self.url())
            .field("is_closed", &self.is_closed())
            .finish()
    }
}

/// Factory for authenticated connections, one per bus URL.
#[async_trait]
pub trait BusConnector: Send + Sync {
    /// Connect to `url` using the given credentials. `None` connects
    /// unauthenticated (the default bus in development setups).
    async fn connect(&self, url: &str, credentials: Option<BusCredentials>) -> Result<Arc<dyn BusConnection>>;
}

/// Normalize a bus URL for use as a pool/cache key: lowercase, no trailing
/// slashes.
pub fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_ascii_lowercase()
}
