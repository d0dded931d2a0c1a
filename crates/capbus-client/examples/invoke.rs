//! Resolve-then-invoke against the in-memory bus.
//!
//! Run with: `cargo run -p capbus-client --example invoke`

use std::sync::Arc;

use capbus_client::CapabilityClient;
use capbus_client::ClientConfig;
use capbus_client::ClientOptions;
use capbus_client::InvokeRequest;
use capbus_core::BusConnection;
use capbus_core::ResolveOutput;
use capbus_core::constants::BOOTSTRAP_SUBJECT;
use capbus_testing::MemoryNetwork;
use capbus_testing::ScriptedRegistry;
use capbus_testing::TEST_REGISTRY_SUBJECT;
use capbus_testing::spawn_responder;

const DEFAULT_URL: &str = "nats://sys:4222";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    // A virtual bus with a scripted registry and one worker.
    let network = MemoryNetwork::new();
    let server: Arc<dyn BusConnection> = network.connect(DEFAULT_URL);
    let registry = ScriptedRegistry::with_default_bootstrap(DEFAULT_URL);
    registry.script_resolve(
        "demo.app/greet",
        Ok(ResolveOutput {
            canonical_identity: "cap:@main/demo.app/greet@1.0.0".to_string(),
            nats_url: DEFAULT_URL.to_string(),
            subject: "cap.demo.app.greet.v1".to_string(),
            major: Some(1),
            resolved_version: Some("1.0.0".to_string()),
            ttl_seconds: Some(300),
            etag: Some("e1".to_string()),
            ..ResolveOutput::default()
        }),
    );
    registry.serve(server.clone(), BOOTSTRAP_SUBJECT, TEST_REGISTRY_SUBJECT).await;
    spawn_responder(server, "cap.demo.app.greet.v1", None, None, |request| {
        let name = request.params.get("name").and_then(|v| v.as_str()).unwrap_or("world");
        serde_json::json!({"ok": true, "data": format!("hello, {name}")})
    })
    .await;

    let client = CapabilityClient::connect(ClientOptions::new(
        ClientConfig::for_url(DEFAULT_URL),
        network.connector(),
    ))
    .await?;

    match client
        .invoke("demo.app/greet", InvokeRequest::new("greet", serde_json::json!({"name": "capbus"})), None)
        .await
    {
        Ok(ok) => println!("data = {}, took {}ms", ok.data, ok.meta.duration_ms),
        Err(err) => println!("error = {}", err.error),
    }

    client.close().await;
    Ok(())
}
