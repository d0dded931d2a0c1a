//! Worker consumer: queue-group subscriptions, envelope validation,
//! handler dispatch, and the reply path.

use std::sync::Arc;

use bytes::Bytes;
use capbus_core::BusConnection;
use capbus_core::CapabilityError;
use capbus_core::Envelope;
use capbus_core::ErrorCode;
use capbus_core::WireReply;
use capbus_core::WireRequest;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::bootstrap::WorkerBootstrap;
use crate::config::SandboxEnv;
use crate::config::WorkerPoolConfig;
use crate::registry::HandlerRegistry;

struct ConsumerGeneration {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Subscribes worker pools to their subjects and dispatches envelopes.
pub struct WorkerConsumer {
    connection: Arc<dyn BusConnection>,
    registry: Arc<HandlerRegistry>,
    bootstrap: WorkerBootstrap,
    generation: tokio::sync::Mutex<Option<ConsumerGeneration>>,
}

impl WorkerConsumer {
    /// Build a consumer over a bus connection.
    pub fn new(connection: Arc<dyn BusConnection>, registry: Arc<HandlerRegistry>, bootstrap: WorkerBootstrap) -> Self {
        Self {
            connection,
            registry,
            bootstrap,
            generation: tokio::sync::Mutex::new(None),
        }
    }

    /// Start consuming for the given pools.
    ///
    /// Each `(subject, consumer_group)` pair gets `concurrent_workers`
    /// independent subscriptions on the same queue group, so the bus
    /// delivers each message to exactly one subscriber across the pool.
    pub async fn start(&self, configs: &[WorkerPoolConfig]) -> Result<(), CapabilityError> {
        let mut generation = self.generation.lock().await;
        if generation.is_some() {
            return Err(CapabilityError::invalid_request("worker consumer is already started"));
        }
        *generation = Some(self.subscribe_all(configs).await?);
        Ok(())
    }

    /// Hot-reload: drain the current subscriptions, letting in-flight
    /// messages finish, then resubscribe with the new configuration.
    pub async fn reload(&self, configs: &[WorkerPoolConfig]) -> Result<(), CapabilityError> {
        let mut generation = self.generation.lock().await;
        if let Some(current) = generation.take() {
            drain_generation(current).await;
        }
        *generation = Some(self.subscribe_all(configs).await?);
        info!("worker consumer reloaded");
        Ok(())
    }

    /// Drain everything and stop. Safe to call twice.
    pub async fn shutdown(&self) {
        let mut generation = self.generation.lock().await;
        if let Some(current) = generation.take() {
            drain_generation(current).await;
        }
        info!("worker consumer stopped");
    }

    async fn subscribe_all(&self, configs: &[WorkerPoolConfig]) -> Result<ConsumerGeneration, CapabilityError> {
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        for config in configs {
            let sandbox_env = Arc::new(config.effective_env());
            for cap_ref in &config.capabilities {
                let subject = self
                    .bootstrap
                    .subject_for(cap_ref)
                    .map_err(|err| CapabilityError::unknown_subject(err.to_string()))?
                    .to_string();

                for worker_index in 0..config.concurrent_workers.max(1) {
                    let subscription = self
                        .connection
                        .subscribe(&subject, Some(&config.consumer_group))
                        .await
                        .map_err(|err| {
                            CapabilityError::internal(format!("failed to subscribe '{subject}': {err}"))
                        })?;
                    debug!(
                        pool = %config.id,
                        subject = %subject,
                        consumer_group = %config.consumer_group,
                        worker_index,
                        "worker subscription created"
                    );
                    tasks.push(tokio::spawn(run_subscription(
                        self.connection.clone(),
                        self.registry.clone(),
                        sandbox_env.clone(),
                        cap_ref.clone(),
                        subscription,
                        cancel.clone(),
                    )));
                }
            }
        }

        Ok(ConsumerGeneration { cancel, tasks })
    }
}

async fn drain_generation(generation: ConsumerGeneration) {
    generation.cancel.cancel();
    for task in generation.tasks {
        let _ = task.await;
    }
}

async fn run_subscription(
    connection: Arc<dyn BusConnection>,
    registry: Arc<HandlerRegistry>,
    sandbox_env: Arc<SandboxEnv>,
    cap_ref: String,
    mut subscription: capbus_core::BusSubscription,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = subscription.next() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let reply = reply_for(process_message(&registry, &sandbox_env, &cap_ref, &message.payload).await);
        let Some(reply_subject) = message.reply else {
            debug!(subject = %message.subject, "dropping reply for fire-and-forget message");
            continue;
        };
        match serde_json::to_vec(&reply) {
            Ok(payload) => {
                if let Err(err) = connection.publish(&reply_subject, Bytes::from(payload)).await {
                    warn!(subject = %message.subject, error = %err, "failed to publish reply");
                }
            }
            Err(err) => warn!(error = %err, "failed to serialize reply"),
        }
    }
}

async fn process_message(
    registry: &Arc<HandlerRegistry>,
    sandbox_env: &Arc<SandboxEnv>,
    cap_ref: &str,
    payload: &[u8],
) -> Result<serde_json::Value, CapabilityError> {
    let request: WireRequest = serde_json::from_slice(payload).map_err(|err| {
        CapabilityError::invalid_request(format!("message is not a valid invocation envelope: {err}"))
    })?;
    validate_envelope(&request)?;

    let envelope = Envelope {
        capability: request.capability.clone(),
        version: request.version,
        resolved: None,
        method: request.method,
        params: request.params,
        ctx: request.ctx,
    };
    debug!(
        capability = %envelope.capability,
        method = %envelope.method,
        request_id = %envelope.ctx.request_id,
        "dispatching envelope"
    );

    let handler = registry.get(cap_ref);
    let sandbox_env = sandbox_env.clone();
    // Handlers run on their own task so a panic surfaces as a structured
    // error instead of killing the subscription loop.
    let outcome = tokio::spawn(async move { handler.handle(envelope, &sandbox_env).await }).await;
    match outcome {
        Ok(result) => result,
        Err(join_err) => {
            warn!(capability = %cap_ref, error = %join_err, "handler crashed");
            Err(CapabilityError::new(
                ErrorCode::InternalError,
                format!("handler for '{cap_ref}' crashed"),
                true,
            ))
        }
    }
}

fn validate_envelope(request: &WireRequest) -> Result<(), CapabilityError> {
    if request.capability.trim().is_empty() {
        return Err(CapabilityError::invalid_request("envelope is missing 'capability'"));
    }
    if request.method.trim().is_empty() {
        return Err(CapabilityError::invalid_request("envelope is missing 'method'"));
    }
    if request.ctx.tenant_id.trim().is_empty() {
        return Err(CapabilityError::new(
            ErrorCode::InvalidArgument,
            "envelope context is missing 'tenantId'",
            false,
        ));
    }
    if request.ctx.request_id.trim().is_empty() {
        return Err(CapabilityError::new(
            ErrorCode::InvalidArgument,
            "envelope context is missing 'requestId'",
            false,
        ));
    }
    Ok(())
}

fn reply_for(outcome: Result<serde_json::Value, CapabilityError>) -> WireReply {
    match outcome {
        Ok(data) => WireReply::ok(data),
        Err(error) => WireReply::err(error),
    }
}
