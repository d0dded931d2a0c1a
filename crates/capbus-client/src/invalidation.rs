//! Event-driven cache invalidation.
//!
//! Subscribes to the change-event subjects on the default bus and fans each
//! decoded [`RegistryChangedEvent`] out to registered handlers. Handler
//! failures are logged and never break the message stream. `stop` is
//! idempotent.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use capbus_core::BusConnection;
use capbus_core::CapabilityError;
use capbus_core::RegistryChangedEvent;
use capbus_core::constants::MAX_INVALIDATION_HANDLERS;
use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

/// Callback invoked for every decoded change event.
pub type ChangeHandler = Arc<dyn Fn(&RegistryChangedEvent) -> Result<(), CapabilityError> + Send + Sync>;

/// Subscriber over `subject_prefix` (global) and `subject_prefix.*`
/// (granular).
pub struct InvalidationSubscriber {
    connection: Arc<dyn BusConnection>,
    subject_prefix: String,
    handlers: Arc<RwLock<Vec<ChangeHandler>>>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl InvalidationSubscriber {
    /// Build a subscriber over the default bus connection.
    pub fn new(connection: Arc<dyn BusConnection>, subject_prefix: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            connection,
            subject_prefix: subject_prefix.into(),
            handlers: Arc::new(RwLock::new(Vec::new())),
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Register a handler for change events.
    pub fn on_change(&self, handler: ChangeHandler) -> Result<(), CapabilityError> {
        let mut handlers = self.handlers.write();
        if handlers.len() >= MAX_INVALIDATION_HANDLERS {
            return Err(CapabilityError::new(
                capbus_core::ErrorCode::LimitExceeded,
                format!("at most {MAX_INVALIDATION_HANDLERS} invalidation handlers are supported"),
                false,
            ));
        }
        handlers.push(handler);
        Ok(())
    }

    /// Subscribe to both change subjects and start dispatching.
    pub async fn start(&self) -> Result<(), CapabilityError> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        for subject in [self.subject_prefix.clone(), format!("{}.*", self.subject_prefix)] {
            let mut subscription = self
                .connection
                .subscribe(&subject, None)
                .await
                .map_err(|err| CapabilityError::internal(format!("failed to subscribe '{subject}': {err}")))?;
            let handlers = self.handlers.clone();
            let cancel = self.cancel.clone();
            let task = tokio::spawn(async move {
                loop {
                    let message = tokio::select! {
                        _ = cancel.cancelled() => break,
                        message = subscription.next() => match message {
                            Some(message) => message,
                            None => break,
                        },
                    };
                    let event: RegistryChangedEvent = match serde_json::from_slice(&message.payload) {
                        Ok(event) => event,
                        Err(err) => {
                            warn!(subject = %message.subject, error = %err, "discarding undecodable change event");
                            continue;
                        }
                    };
                    debug!(
                        app = %event.app,
                        capability = %event.capability,
                        revision = event.revision,
                        "registry change event"
                    );
                    for handler in handlers.read().iter() {
                        if let Err(err) = handler(&event) {
                            warn!(
                                app = %event.app,
                                capability = %event.capability,
                                error = %err,
                                "invalidation handler failed"
                            );
                        }
                    }
                }
            });
            self.tasks.lock().push(task);
        }
        Ok(())
    }

    /// Stop dispatching. Safe to call any number of times.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }
}
