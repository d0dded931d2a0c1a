//! Transport core: the innermost pipeline handler.
//!
//! Serializes the envelope into the JSON wire payload, issues a
//! request-reply on the resolved subject via the connection pool, and
//! decodes the structured result.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use capbus_core::BusError;
use capbus_core::CapabilityError;
use capbus_core::Envelope;
use capbus_core::ErrorCode;
use capbus_core::InvocationErr;
use capbus_core::InvocationMeta;
use capbus_core::InvocationOk;
use capbus_core::InvocationResult;
use capbus_core::WireRequest;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::pipeline::Handler;
use crate::pipeline::handler_fn;
use crate::pool::ConnectionPool;

/// The transport stage at the bottom of every pipeline.
pub struct TransportCore {
    pool: Arc<ConnectionPool>,
    default_timeout: Duration,
    include_timing: bool,
}

impl TransportCore {
    /// Build the transport over a pool.
    pub fn new(pool: Arc<ConnectionPool>, default_timeout: Duration, include_timing: bool) -> Arc<Self> {
        Arc::new(Self {
            pool,
            default_timeout,
            include_timing,
        })
    }

    /// Expose the transport as a pipeline [`Handler`].
    pub fn handler(self: &Arc<Self>) -> Handler {
        let transport = self.clone();
        handler_fn(move |envelope, cancel| {
            let transport = transport.clone();
            async move { transport.send(envelope, cancel).await }
        })
    }

    async fn send(&self, envelope: Envelope, cancel: CancellationToken) -> InvocationResult {
        let resolved = match &envelope.resolved {
            Some(resolved) => resolved.clone(),
            None => {
                return Err(InvocationErr::bare(CapabilityError::unknown_subject(format!(
                    "capability '{}' reached the transport unresolved",
                    envelope.capability
                ))));
            }
        };
        if resolved.subject.is_empty() {
            return Err(InvocationErr::bare(CapabilityError::unknown_subject(format!(
                "resolution for '{}' produced an empty subject",
                envelope.capability
            ))));
        }
        if resolved.nats_url.is_empty() {
            return Err(InvocationErr::bare(CapabilityError::internal(format!(
                "resolution for '{}' produced an empty bus URL",
                envelope.capability
            ))));
        }

        let started_at = Utc::now().timestamp_millis();
        let connection = match self.pool.get_or_connect(&resolved.nats_url).await {
            Ok(connection) => connection,
            Err(error) => return Err(InvocationErr { error, meta: self.meta(started_at) }),
        };

        let request = WireRequest {
            capability: envelope.capability.clone(),
            version: envelope.version.clone().or(resolved.version.clone()),
            method: envelope.method.clone(),
            params: envelope.params.clone(),
            ctx: envelope.ctx.clone(),
        };
        let payload = match serde_json::to_vec(&request) {
            Ok(payload) => Bytes::from(payload),
            Err(err) => return Err(InvocationErr { error: err.into(), meta: self.meta(started_at) }),
        };

        let timeout = envelope
            .ctx
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout);

        debug!(
            subject = %resolved.subject,
            url = %resolved.nats_url,
            method = %envelope.method,
            timeout_ms = timeout.as_millis() as u64,
            "sending invocation"
        );

        let reply = tokio::select! {
            reply = connection.request(&resolved.subject, payload, timeout) => reply,
            _ = cancel.cancelled() => {
                return Err(InvocationErr {
                    error: CapabilityError::cancelled("invocation cancelled by caller"),
                    meta: self.meta(started_at),
                });
            }
        };

        let bytes = match reply {
            Ok(bytes) => bytes,
            Err(err) => {
                return Err(InvocationErr {
                    error: bus_error_to_capability(err),
                    meta: self.meta(started_at),
                });
            }
        };

        let decoded: serde_json::Value = match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(err) => {
                return Err(InvocationErr {
                    error: CapabilityError::internal(format!("reply was not valid JSON: {err}")),
                    meta: self.meta(started_at),
                });
            }
        };

        let mut meta = self.meta(started_at);
        if let Some(usage) = decoded.get("usage") {
            meta.usage = Some(usage.clone());
        }
        if let Some(execution_id) = decoded.get("executionId").and_then(|v| v.as_str()) {
            meta.execution_id = Some(execution_id.to_string());
        }

        if decoded.get("ok").and_then(|v| v.as_bool()) == Some(false) {
            let error = match decoded.get("error") {
                Some(raw) => serde_json::from_value::<capbus_core::WireError>(raw.clone())
                    .map(CapabilityError::from)
                    .unwrap_or_else(|_| CapabilityError::internal("malformed error in reply")),
                None => CapabilityError::internal("Unknown server error"),
            };
            return Err(InvocationErr { error, meta });
        }

        let data = decoded
            .get("data")
            .cloned()
            .or_else(|| decoded.get("result").cloned())
            .unwrap_or(decoded);
        Ok(InvocationOk { data, meta })
    }

    fn meta(&self, started_at: i64) -> InvocationMeta {
        let ended_at = Utc::now().timestamp_millis();
        InvocationMeta {
            started_at_unix_ms: started_at,
            ended_at_unix_ms: ended_at,
            duration_ms: if self.include_timing { (ended_at - started_at).max(0) } else { 0 },
            ..InvocationMeta::default()
        }
    }
}

/// Map transport-level failures onto the closed taxonomy.
pub fn bus_error_to_capability(err: BusError) -> CapabilityError {
    match err {
        BusError::RequestTimeout { subject, timeout } => CapabilityError::timeout(format!(
            "request on '{subject}' timed out after {}ms",
            timeout.as_millis()
        )),
        BusError::NoResponders { subject } => CapabilityError::new(
            ErrorCode::UpstreamError,
            format!("no responders on '{subject}'"),
            true,
        ),
        BusError::ConnectionClosed { url } => {
            CapabilityError::new(ErrorCode::InternalError, format!("connection to '{url}' is closed"), true)
        }
        BusError::AuthRejected { url, reason } => {
            CapabilityError::new(ErrorCode::AuthFailed, format!("'{url}' rejected credentials: {reason}"), true)
        }
        BusError::ConnectFailed { url, reason } => {
            CapabilityError::new(ErrorCode::InternalError, format!("connect to '{url}' failed: {reason}"), true)
        }
        BusError::Transport { reason } => {
            CapabilityError::new(ErrorCode::InternalError, format!("transport failure: {reason}"), true)
        }
    }
}
