//! Worker consumer behavior over the in-memory bus.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use capbus_core::BusConnection;
use capbus_core::BusError;
use capbus_core::CapabilityError;
use capbus_core::Envelope;
use capbus_core::InvocationContext;
use capbus_core::ResolveOutput;
use capbus_core::WireReply;
use capbus_core::WireRequest;
use capbus_testing::MemoryNetwork;
use capbus_worker::CapabilityHandler;
use capbus_worker::HandlerRegistry;
use capbus_worker::SandboxEnv;
use capbus_worker::WorkerBootstrap;
use capbus_worker::WorkerConsumer;
use capbus_worker::WorkerPoolConfig;

const URL: &str = "nats://sys:4222";
const SUBJECT: &str = "cap.my.app.my_cap.v1";

fn bootstrap_for(cap_ref: &str, subject: &str) -> WorkerBootstrap {
    let mut bootstrap = WorkerBootstrap::default();
    bootstrap.insert(
        cap_ref,
        ResolveOutput {
            subject: subject.to_string(),
            nats_url: URL.to_string(),
            ..ResolveOutput::default()
        },
    );
    bootstrap
}

fn wire_request(capability: &str, method: &str, params: serde_json::Value) -> Bytes {
    let request = WireRequest {
        capability: capability.to_string(),
        version: None,
        method: method.to_string(),
        params,
        ctx: InvocationContext {
            tenant_id: "default".to_string(),
            request_id: "r-1".to_string(),
            ..Default::default()
        },
    };
    Bytes::from(serde_json::to_vec(&request).unwrap())
}

async fn request_reply(connection: &Arc<dyn BusConnection>, payload: Bytes) -> WireReply {
    let reply = connection
        .request(SUBJECT, payload, Duration::from_secs(1))
        .await
        .unwrap();
    serde_json::from_slice(&reply).unwrap()
}

#[tokio::test]
async fn echo_default_answers_unmapped_capabilities() {
    let network = MemoryNetwork::new();
    let worker_conn: Arc<dyn BusConnection> = network.connect(URL);
    let consumer = WorkerConsumer::new(
        worker_conn,
        Arc::new(HandlerRegistry::new()),
        bootstrap_for("my.app/my.cap", SUBJECT),
    );
    consumer
        .start(&[WorkerPoolConfig::single("p1", "my.app/my.cap", "workers")])
        .await
        .unwrap();

    let client: Arc<dyn BusConnection> = network.connect(URL);
    let reply = request_reply(&client, wire_request("my.app/my.cap", "ping", serde_json::json!({"n": 1}))).await;
    assert!(reply.ok);
    assert_eq!(reply.data, Some(serde_json::json!({"n": 1})));
    consumer.shutdown().await;
}

#[tokio::test]
async fn registered_handler_receives_the_sandbox_env() {
    struct EnvReporter;

    #[async_trait]
    impl CapabilityHandler for EnvReporter {
        async fn handle(&self, _: Envelope, env: &SandboxEnv) -> Result<serde_json::Value, CapabilityError> {
            Ok(serde_json::json!(env.get("SANDBOX_ID")))
        }

        fn name(&self) -> &'static str {
            "EnvReporter"
        }
    }

    let network = MemoryNetwork::new();
    let registry = Arc::new(HandlerRegistry::new());
    registry.register("my.app/my.cap", Arc::new(EnvReporter));
    let consumer = WorkerConsumer::new(
        network.connect(URL),
        registry,
        bootstrap_for("my.app/my.cap", SUBJECT),
    );
    consumer
        .start(&[WorkerPoolConfig::single("p1", "my.app/my.cap", "workers")])
        .await
        .unwrap();

    let client: Arc<dyn BusConnection> = network.connect(URL);
    let reply = request_reply(&client, wire_request("my.app/my.cap", "whoami", serde_json::json!({}))).await;
    assert_eq!(reply.data, Some(serde_json::json!("sandbox-p1")));
    consumer.shutdown().await;
}

#[tokio::test]
async fn pool_delivers_each_message_to_exactly_one_worker() {
    struct Counter(Arc<AtomicUsize>);

    #[async_trait]
    impl CapabilityHandler for Counter {
        async fn handle(&self, envelope: Envelope, _: &SandboxEnv) -> Result<serde_json::Value, CapabilityError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(envelope.params)
        }

        fn name(&self) -> &'static str {
            "Counter"
        }
    }

    let network = MemoryNetwork::new();
    let handled = Arc::new(AtomicUsize::new(0));
    let registry = Arc::new(HandlerRegistry::new());
    registry.register("my.app/my.cap", Arc::new(Counter(handled.clone())));
    let consumer = WorkerConsumer::new(
        network.connect(URL),
        registry,
        bootstrap_for("my.app/my.cap", SUBJECT),
    );

    let mut config = WorkerPoolConfig::single("p1", "my.app/my.cap", "workers");
    config.concurrent_workers = 3;
    consumer.start(&[config]).await.unwrap();

    let client: Arc<dyn BusConnection> = network.connect(URL);
    for i in 0..9 {
        let reply = request_reply(&client, wire_request("my.app/my.cap", "ping", serde_json::json!({"i": i}))).await;
        assert!(reply.ok);
    }
    // Nine requests, nine handler executions: one per message across the
    // queue group, not one per subscription.
    assert_eq!(handled.load(Ordering::SeqCst), 9);
    consumer.shutdown().await;
}

#[tokio::test]
async fn malformed_and_incomplete_envelopes_are_rejected() {
    let network = MemoryNetwork::new();
    let consumer = WorkerConsumer::new(
        network.connect(URL),
        Arc::new(HandlerRegistry::new()),
        bootstrap_for("my.app/my.cap", SUBJECT),
    );
    consumer
        .start(&[WorkerPoolConfig::single("p1", "my.app/my.cap", "workers")])
        .await
        .unwrap();

    let client: Arc<dyn BusConnection> = network.connect(URL);

    let garbage = client
        .request(SUBJECT, Bytes::from_static(b"not json"), Duration::from_secs(1))
        .await
        .unwrap();
    let reply: WireReply = serde_json::from_slice(&garbage).unwrap();
    assert!(!reply.ok);
    assert_eq!(reply.error.unwrap().code.as_deref(), Some("INVALID_REQUEST"));

    let missing_tenant = WireRequest {
        capability: "my.app/my.cap".to_string(),
        version: None,
        method: "ping".to_string(),
        params: serde_json::Value::Null,
        ctx: InvocationContext {
            request_id: "r-1".to_string(),
            ..Default::default()
        },
    };
    let raw = client
        .request(SUBJECT, Bytes::from(serde_json::to_vec(&missing_tenant).unwrap()), Duration::from_secs(1))
        .await
        .unwrap();
    let reply: WireReply = serde_json::from_slice(&raw).unwrap();
    assert!(!reply.ok);
    assert_eq!(reply.error.unwrap().code.as_deref(), Some("INVALID_ARGUMENT"));
    consumer.shutdown().await;
}

#[tokio::test]
async fn handler_errors_keep_their_code_and_panics_collapse_to_internal_error() {
    struct Failing;

    #[async_trait]
    impl CapabilityHandler for Failing {
        async fn handle(&self, envelope: Envelope, _: &SandboxEnv) -> Result<serde_json::Value, CapabilityError> {
            match envelope.method.as_str() {
                "denied" => Err(CapabilityError::new(capbus_core::ErrorCode::Forbidden, "not yours", false)),
                _ => panic!("handler blew up"),
            }
        }

        fn name(&self) -> &'static str {
            "Failing"
        }
    }

    let network = MemoryNetwork::new();
    let registry = Arc::new(HandlerRegistry::new());
    registry.register("my.app/my.cap", Arc::new(Failing));
    let consumer = WorkerConsumer::new(
        network.connect(URL),
        registry,
        bootstrap_for("my.app/my.cap", SUBJECT),
    );
    consumer
        .start(&[WorkerPoolConfig::single("p1", "my.app/my.cap", "workers")])
        .await
        .unwrap();

    let client: Arc<dyn BusConnection> = network.connect(URL);

    let reply = request_reply(&client, wire_request("my.app/my.cap", "denied", serde_json::json!({}))).await;
    let error = reply.error.unwrap();
    assert_eq!(error.code.as_deref(), Some("FORBIDDEN"));
    assert_eq!(error.retryable, Some(false));

    let reply = request_reply(&client, wire_request("my.app/my.cap", "explode", serde_json::json!({}))).await;
    let error = reply.error.unwrap();
    assert_eq!(error.code.as_deref(), Some("INTERNAL_ERROR"));
    assert_eq!(error.retryable, Some(true));

    // The subscription survived the panic.
    let reply = request_reply(&client, wire_request("my.app/my.cap", "denied", serde_json::json!({}))).await;
    assert!(!reply.ok);
    consumer.shutdown().await;
}

#[tokio::test]
async fn reload_swaps_subscriptions() {
    let network = MemoryNetwork::new();
    let mut bootstrap = bootstrap_for("my.app/my.cap", SUBJECT);
    bootstrap.insert(
        "other.app/other.cap",
        ResolveOutput {
            subject: "cap.other.app.other_cap.v1".to_string(),
            nats_url: URL.to_string(),
            ..ResolveOutput::default()
        },
    );
    let consumer = WorkerConsumer::new(network.connect(URL), Arc::new(HandlerRegistry::new()), bootstrap);
    consumer
        .start(&[WorkerPoolConfig::single("p1", "my.app/my.cap", "workers")])
        .await
        .unwrap();

    let client: Arc<dyn BusConnection> = network.connect(URL);
    assert!(request_reply(&client, wire_request("my.app/my.cap", "ping", serde_json::json!({}))).await.ok);

    consumer
        .reload(&[WorkerPoolConfig::single("p2", "other.app/other.cap", "workers")])
        .await
        .unwrap();

    // The old subject has no subscribers anymore; the new one answers.
    let err = client
        .request(SUBJECT, wire_request("my.app/my.cap", "ping", serde_json::json!({})), Duration::from_millis(200))
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::NoResponders { .. }));

    let reply = client
        .request(
            "cap.other.app.other_cap.v1",
            wire_request("other.app/other.cap", "ping", serde_json::json!({"ok": true})),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
    let reply: WireReply = serde_json::from_slice(&reply).unwrap();
    assert!(reply.ok);
    consumer.shutdown().await;
}

#[tokio::test]
async fn unknown_capability_in_bootstrap_fails_start() {
    let network = MemoryNetwork::new();
    let consumer = WorkerConsumer::new(
        network.connect(URL),
        Arc::new(HandlerRegistry::new()),
        WorkerBootstrap::default(),
    );
    let err = consumer
        .start(&[WorkerPoolConfig::single("p1", "my.app/my.cap", "workers")])
        .await
        .unwrap_err();
    assert_eq!(err.code, capbus_core::ErrorCode::UnknownSubject);
}
