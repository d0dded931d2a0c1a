//! Scripted registry: serves bootstrap and registry calls from canned data.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use capbus_client::RegistryTransport;
use capbus_core::BusConnection;
use capbus_core::CapabilityError;
use capbus_core::RegistryRequest;
use capbus_core::RegistryResponse;
use capbus_core::ResolveOutput;
use capbus_core::WireError;
use capbus_core::wire::BootstrapReply;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::warn;

/// Subject the scripted registry serves registry calls on by default.
pub const TEST_REGISTRY_SUBJECT: &str = "cap.system.registry.v1";

/// A registry whose replies are scripted by the test.
#[derive(Default)]
pub struct ScriptedRegistry {
    bootstrap: Mutex<BootstrapReply>,
    resolves: Mutex<HashMap<String, Result<ResolveOutput, CapabilityError>>>,
    discover_result: Mutex<serde_json::Value>,
    describe_results: Mutex<HashMap<String, serde_json::Value>>,
    resolve_calls: AtomicUsize,
    discover_calls: AtomicUsize,
    resolve_delay: Mutex<Option<Duration>>,
}

impl ScriptedRegistry {
    /// Empty registry; script it before use.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registry whose bootstrap maps itself onto [`TEST_REGISTRY_SUBJECT`].
    pub fn with_default_bootstrap(default_url: &str) -> Arc<Self> {
        let registry = Self::new();
        registry.add_bootstrap_entry(
            "system.registry",
            ResolveOutput {
                canonical_identity: "cap:@main/system/registry@1.0.0".to_string(),
                nats_url: default_url.to_string(),
                subject: TEST_REGISTRY_SUBJECT.to_string(),
                major: Some(1),
                resolved_version: Some("1.0.0".to_string()),
                status: Some("active".to_string()),
                ttl_seconds: Some(0),
                etag: Some("bs".to_string()),
                ..ResolveOutput::default()
            },
        );
        registry
    }

    /// Add a bootstrap mapping.
    pub fn add_bootstrap_entry(&self, cap_ref: &str, entry: ResolveOutput) {
        self.bootstrap.lock().capabilities.insert(cap_ref.to_string(), entry);
    }

    /// Script the outcome of `resolve` for one capability.
    pub fn script_resolve(&self, cap: &str, outcome: Result<ResolveOutput, CapabilityError>) {
        self.resolves.lock().insert(cap.to_string(), outcome);
    }

    /// Script the `discover` reply.
    pub fn script_discover(&self, result: serde_json::Value) {
        *self.discover_result.lock() = result;
    }

    /// Script a `describe` reply.
    pub fn script_describe(&self, cap_ref: &str, result: serde_json::Value) {
        self.describe_results.lock().insert(cap_ref.to_string(), result);
    }

    /// Delay every `resolve` by this long; used to widen race windows.
    pub fn set_resolve_delay(&self, delay: Duration) {
        *self.resolve_delay.lock() = Some(delay);
    }

    /// How many `resolve` calls reached the registry.
    pub fn resolve_calls(&self) -> usize {
        self.resolve_calls.load(Ordering::SeqCst)
    }

    /// How many `discover` calls reached the registry.
    pub fn discover_calls(&self) -> usize {
        self.discover_calls.load(Ordering::SeqCst)
    }

    async fn handle(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, CapabilityError> {
        match method {
            "resolve" => {
                let delay = *self.resolve_delay.lock();
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                self.resolve_calls.fetch_add(1, Ordering::SeqCst);
                let cap = params.get("cap").and_then(|v| v.as_str()).unwrap_or_default().to_string();
                let outcome = self
                    .resolves
                    .lock()
                    .get(&cap)
                    .cloned()
                    .unwrap_or_else(|| Err(CapabilityError::not_found(format!("capability '{cap}' is not registered"))));
                outcome.map(|output| serde_json::to_value(output).expect("resolve output serializes"))
            }
            "discover" => {
                self.discover_calls.fetch_add(1, Ordering::SeqCst);
                Ok(self.discover_result.lock().clone())
            }
            "describe" => {
                let cap = params.get("cap").and_then(|v| v.as_str()).unwrap_or_default();
                self.describe_results
                    .lock()
                    .get(cap)
                    .cloned()
                    .ok_or_else(|| CapabilityError::not_found(format!("capability '{cap}' is not described")))
            }
            other => Err(CapabilityError::invalid_request(format!("unknown registry method '{other}'"))),
        }
    }

    /// Serve bootstrap and registry request-reply on a connection. Returns
    /// the responder tasks; dropping the connection ends them.
    pub async fn serve(
        self: &Arc<Self>,
        connection: Arc<dyn BusConnection>,
        bootstrap_subject: &str,
        registry_subject: &str,
    ) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();

        let mut bootstrap_sub = connection
            .subscribe(bootstrap_subject, None)
            .await
            .expect("subscribe bootstrap subject");
        let bootstrap_conn = connection.clone();
        let registry = self.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(message) = bootstrap_sub.next().await {
                let Some(reply) = message.reply else { continue };
                let payload = serde_json::to_vec(&*registry.bootstrap.lock()).expect("bootstrap serializes");
                if let Err(err) = bootstrap_conn.publish(&reply, Bytes::from(payload)).await {
                    warn!(error = %err, "scripted bootstrap reply failed");
                }
            }
        }));

        let mut registry_sub = connection
            .subscribe(registry_subject, None)
            .await
            .expect("subscribe registry subject");
        let registry_conn = connection.clone();
        let registry = self.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(message) = registry_sub.next().await {
                let Some(reply) = message.reply else { continue };
                let response = match serde_json::from_slice::<RegistryRequest>(&message.payload) {
                    Ok(request) => match registry.handle(&request.method, request.params).await {
                        Ok(result) => RegistryResponse {
                            id: request.id,
                            ok: true,
                            result: Some(result),
                            error: None,
                        },
                        Err(error) => RegistryResponse {
                            id: request.id,
                            ok: false,
                            result: None,
                            error: Some(WireError {
                                code: Some(error.code.as_str().to_string()),
                                message: Some(error.message),
                                retryable: Some(error.retryable),
                                details: error.details,
                            }),
                        },
                    },
                    Err(err) => RegistryResponse {
                        id: String::new(),
                        ok: false,
                        result: None,
                        error: Some(WireError {
                            code: Some("INVALID_REQUEST".to_string()),
                            message: Some(format!("malformed registry request: {err}")),
                            retryable: Some(false),
                            details: None,
                        }),
                    },
                };
                let payload = serde_json::to_vec(&response).expect("registry response serializes");
                if let Err(err) = registry_conn.publish(&reply, Bytes::from(payload)).await {
                    warn!(error = %err, "scripted registry reply failed");
                }
            }
        }));

        tasks
    }
}

#[async_trait]
impl RegistryTransport for ScriptedRegistry {
    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, CapabilityError> {
        self.handle(method, params).await
    }
}
