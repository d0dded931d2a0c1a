//! End-to-end invocation scenarios over the in-memory bus.

use std::sync::Arc;
use std::time::Duration;

use capbus_client::CapabilityClient;
use capbus_client::ClientConfig;
use capbus_client::ClientOptions;
use capbus_client::InvokeRequest;
use capbus_client::InvokeSubjectRequest;
use capbus_core::BusConnection;
use capbus_core::BusCredentials;
use capbus_core::ErrorCode;
use capbus_core::InvocationContext;
use capbus_core::ResolveOutput;
use capbus_core::WireRequest;
use capbus_core::constants::BOOTSTRAP_SUBJECT;
use capbus_testing::MemoryNetwork;
use capbus_testing::ScriptedRegistry;
use capbus_testing::StaticAuthProvider;
use capbus_testing::TEST_REGISTRY_SUBJECT;
use capbus_testing::spawn_responder;
use chrono::Utc;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

const DEFAULT_URL: &str = "nats://sys:4222";

struct Harness {
    network: Arc<MemoryNetwork>,
    registry: Arc<ScriptedRegistry>,
    server: Arc<dyn BusConnection>,
}

impl Harness {
    async fn start() -> Self {
        let network = MemoryNetwork::new();
        let server: Arc<dyn BusConnection> = network.connect(DEFAULT_URL);
        let registry = ScriptedRegistry::with_default_bootstrap(DEFAULT_URL);
        registry.serve(server.clone(), BOOTSTRAP_SUBJECT, TEST_REGISTRY_SUBJECT).await;
        Self {
            network,
            registry,
            server,
        }
    }

    fn options(&self) -> ClientOptions {
        ClientOptions::new(ClientConfig::for_url(DEFAULT_URL), self.network.connector())
    }
}

fn resolved(subject: &str, nats_url: &str) -> ResolveOutput {
    ResolveOutput {
        canonical_identity: "cap:@main/my.app/my.cap@1.0.0".to_string(),
        nats_url: nats_url.to_string(),
        subject: subject.to_string(),
        major: Some(1),
        resolved_version: Some("1.0.0".to_string()),
        status: Some("active".to_string()),
        ttl_seconds: Some(300),
        etag: Some("e1".to_string()),
        ..ResolveOutput::default()
    }
}

#[tokio::test]
async fn resolve_then_invoke_on_the_default_bus() {
    let harness = Harness::start().await;
    harness
        .registry
        .script_resolve("my.app/my.cap", Ok(resolved("cap.my.app.my_cap.v1", DEFAULT_URL)));

    let seen: Arc<Mutex<Vec<WireRequest>>> = Arc::new(Mutex::new(Vec::new()));
    let capture = seen.clone();
    spawn_responder(harness.server.clone(), "cap.my.app.my_cap.v1", None, None, move |request| {
        capture.lock().push(request);
        serde_json::json!({"ok": true, "data": "pong"})
    })
    .await;

    let client = CapabilityClient::connect(harness.options()).await.unwrap();
    let result = client
        .invoke("my.app/my.cap", InvokeRequest::new("ping", serde_json::json!({})), None)
        .await
        .unwrap();

    assert_eq!(result.data, serde_json::json!("pong"));
    assert!(result.meta.duration_ms >= 0);
    assert!(result.meta.started_at_unix_ms > 0);

    let requests = seen.lock();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert_eq!(request.capability, "my.app/my.cap");
    assert_eq!(request.method, "ping");
    assert_eq!(request.ctx.tenant_id, "default");
    assert!(uuid::Uuid::parse_str(&request.ctx.request_id).is_ok());
    assert_eq!(request.ctx.timeout_ms, Some(30_000));

    let metrics = client.metrics();
    assert_eq!(metrics.invocations, 1);
    assert_eq!(metrics.successes, 1);
    client.close().await;
}

#[tokio::test]
async fn multi_bus_routing_authenticates_and_uses_the_sandbox_bus() {
    let sandbox_url = "nats://sandbox-partner:4222";
    let harness = Harness::start().await;
    harness.registry.script_resolve(
        "partner.app/image.resize",
        Ok(ResolveOutput {
            canonical_identity: "cap:@main/partner.app/image.resize@1.0.0".to_string(),
            nats_url: sandbox_url.to_string(),
            subject: "cap.partner.app.image_resize.v1".to_string(),
            major: Some(1),
            resolved_version: Some("1.0.0".to_string()),
            ttl_seconds: Some(300),
            etag: Some("p1".to_string()),
            ..ResolveOutput::default()
        }),
    );

    // The worker only exists on the sandbox bus.
    let sandbox_server: Arc<dyn BusConnection> = harness.network.connect(sandbox_url);
    spawn_responder(sandbox_server, "cap.partner.app.image_resize.v1", None, None, |_| {
        serde_json::json!({"ok": true, "data": "resized"})
    })
    .await;

    let auth = StaticAuthProvider::new();
    auth.script(
        sandbox_url,
        BusCredentials::token_expiring("xyz", Utc::now().timestamp_millis() + 60_000),
    );

    let mut options = harness.options();
    options.config.access_token = Some("caller-token".to_string());
    options.auth_provider = Some(auth.clone());
    let client = CapabilityClient::connect(options).await.unwrap();

    let result = client
        .invoke("partner.app/image.resize", InvokeRequest::new("resize", serde_json::json!({"w": 64})), None)
        .await
        .unwrap();
    assert_eq!(result.data, serde_json::json!("resized"));

    let requests = auth.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].nats_url, sandbox_url);
    assert_eq!(requests[0].access_token.as_deref(), Some("caller-token"));

    // The connector saw the sandbox connect with the issued token.
    let sandbox_connects: Vec<_> = harness
        .network
        .connect_log()
        .into_iter()
        .filter(|(url, _)| url == sandbox_url)
        .collect();
    assert_eq!(sandbox_connects.len(), 1);
    assert_eq!(
        sandbox_connects[0].1.as_ref().and_then(|c| c.token.as_deref()),
        Some("xyz")
    );
    client.close().await;
}

#[tokio::test]
async fn slow_worker_times_out_with_retryable_timeout() {
    let harness = Harness::start().await;
    harness
        .registry
        .script_resolve("my.app/my.cap", Ok(resolved("cap.my.app.my_cap.v1", DEFAULT_URL)));
    spawn_responder(
        harness.server.clone(),
        "cap.my.app.my_cap.v1",
        None,
        Some(Duration::from_millis(500)),
        |_| serde_json::json!({"ok": true, "data": "late"}),
    )
    .await;

    let client = CapabilityClient::connect(harness.options()).await.unwrap();
    let ctx = InvocationContext::for_tenant("default").with_timeout_ms(50);
    let err = client
        .invoke("my.app/my.cap", InvokeRequest::new("ping", serde_json::json!({})), Some(ctx))
        .await
        .unwrap_err();

    assert_eq!(err.error.code, ErrorCode::Timeout);
    assert!(err.error.retryable);
    assert!(err.meta.duration_ms >= 30, "duration was {}", err.meta.duration_ms);
    assert!(err.meta.duration_ms < 400, "duration was {}", err.meta.duration_ms);
    client.close().await;
}

#[tokio::test]
async fn caller_cancellation_maps_to_cancelled() {
    let harness = Harness::start().await;
    harness
        .registry
        .script_resolve("my.app/my.cap", Ok(resolved("cap.my.app.my_cap.v1", DEFAULT_URL)));
    spawn_responder(
        harness.server.clone(),
        "cap.my.app.my_cap.v1",
        None,
        Some(Duration::from_millis(1_000)),
        |_| serde_json::json!({"ok": true, "data": "late"}),
    )
    .await;

    let client = CapabilityClient::connect(harness.options()).await.unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = client
        .invoke_with_cancel("my.app/my.cap", InvokeRequest::new("ping", serde_json::json!({})), None, cancel)
        .await
        .unwrap_err();
    assert_eq!(err.error.code, ErrorCode::Cancelled);
    client.close().await;
}

#[tokio::test]
async fn invoke_subject_bypasses_resolution() {
    let harness = Harness::start().await;
    spawn_responder(harness.server.clone(), "cap.direct.v1", None, None, |request| {
        serde_json::json!({"ok": true, "data": request.params})
    })
    .await;

    let client = CapabilityClient::connect(harness.options()).await.unwrap();
    let result = client
        .invoke_subject(
            InvokeSubjectRequest {
                capability: "direct/cap".to_string(),
                subject: "cap.direct.v1".to_string(),
                nats_url: String::new(),
                version: Some("1.0.0".to_string()),
                method: "echo".to_string(),
                params: serde_json::json!({"n": 9}),
            },
            None,
        )
        .await
        .unwrap();

    assert_eq!(result.data, serde_json::json!({"n": 9}));
    assert_eq!(harness.registry.resolve_calls(), 0);
    client.close().await;
}

#[tokio::test]
async fn bootstrap_seeded_capability_resolves_without_a_registry_call() {
    let harness = Harness::start().await;
    let client = CapabilityClient::connect(harness.options()).await.unwrap();

    let output = client.resolve("system.registry").await.unwrap();
    assert_eq!(output.subject, TEST_REGISTRY_SUBJECT);
    assert_eq!(harness.registry.resolve_calls(), 0);
    client.close().await;
}

#[tokio::test]
async fn unknown_server_error_shape_collapses_to_internal_error() {
    let harness = Harness::start().await;
    harness
        .registry
        .script_resolve("my.app/my.cap", Ok(resolved("cap.my.app.my_cap.v1", DEFAULT_URL)));
    spawn_responder(harness.server.clone(), "cap.my.app.my_cap.v1", None, None, |_| {
        serde_json::json!({"ok": false})
    })
    .await;

    let client = CapabilityClient::connect(harness.options()).await.unwrap();
    let err = client
        .invoke("my.app/my.cap", InvokeRequest::new("ping", serde_json::json!({})), None)
        .await
        .unwrap_err();
    assert_eq!(err.error.code, ErrorCode::InternalError);
    assert_eq!(err.error.message, "Unknown server error");
    assert!(!err.error.retryable);
    client.close().await;
}

#[tokio::test]
async fn full_loop_against_a_real_worker() {
    use capbus_worker::HandlerRegistry;
    use capbus_worker::WorkerBootstrap;
    use capbus_worker::WorkerConsumer;
    use capbus_worker::WorkerPoolConfig;

    let harness = Harness::start().await;
    harness
        .registry
        .script_resolve("my.app/my.cap", Ok(resolved("cap.my.app.my_cap.v1", DEFAULT_URL)));

    let mut bootstrap = WorkerBootstrap::default();
    bootstrap.insert("my.app/my.cap", resolved("cap.my.app.my_cap.v1", DEFAULT_URL));
    let consumer = WorkerConsumer::new(
        harness.network.connect(DEFAULT_URL),
        Arc::new(HandlerRegistry::new()),
        bootstrap,
    );
    consumer
        .start(&[WorkerPoolConfig::single("p1", "my.app/my.cap", "workers")])
        .await
        .unwrap();

    let client = CapabilityClient::connect(harness.options()).await.unwrap();
    let result = client
        .invoke(
            "my.app/my.cap",
            InvokeRequest::new("echo", serde_json::json!({"payload": [1, 2, 3]})),
            None,
        )
        .await
        .unwrap();

    // The default echo handler returns the params it received.
    assert_eq!(result.data, serde_json::json!({"payload": [1, 2, 3]}));
    consumer.shutdown().await;
    client.close().await;
}

#[tokio::test]
async fn empty_bootstrap_fails_initialization() {
    let network = MemoryNetwork::new();
    let server: Arc<dyn BusConnection> = network.connect(DEFAULT_URL);
    let registry = ScriptedRegistry::new();
    registry.serve(server, BOOTSTRAP_SUBJECT, TEST_REGISTRY_SUBJECT).await;

    let err = CapabilityClient::connect(ClientOptions::new(ClientConfig::for_url(DEFAULT_URL), network.connector()))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::RegistryUnavailable);
}

#[tokio::test]
async fn closed_client_rejects_invocations_and_closes_its_connection() {
    let harness = Harness::start().await;
    let client = CapabilityClient::connect(harness.options()).await.unwrap();
    client.close().await;
    client.close().await;

    let err = client
        .invoke("my.app/my.cap", InvokeRequest::new("ping", serde_json::json!({})), None)
        .await
        .unwrap_err();
    assert_eq!(err.error.code, ErrorCode::InternalError);

    // The client owned its default connection (it was built by the
    // connector), so close() shut it down; the harness server stays open.
    let connections = harness.network.connections_to(DEFAULT_URL);
    assert!(connections.last().unwrap().is_closed());
    assert!(!connections.first().unwrap().is_closed());
}
