//! Event-driven invalidation: registry change events flush the resolution
//! cache per capability and the discovery cache wholesale.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use capbus_client::CapabilityClient;
use capbus_client::ClientConfig;
use capbus_client::ClientOptions;
use capbus_core::BusConnection;
use capbus_core::RegistryChangedEvent;
use capbus_core::ResolveOutput;
use capbus_core::constants::BOOTSTRAP_SUBJECT;
use capbus_testing::MemoryNetwork;
use capbus_testing::ScriptedRegistry;
use capbus_testing::TEST_REGISTRY_SUBJECT;

const DEFAULT_URL: &str = "nats://sys:4222";

async fn changed_event(server: &Arc<dyn BusConnection>, subject: &str, app: &str, capability: &str) {
    let event = RegistryChangedEvent {
        app: app.to_string(),
        capability: capability.to_string(),
        changed_fields: vec!["subject".to_string()],
        affected_majors: vec![1],
        revision: 7,
        etag: "e2".to_string(),
        timestamp: 1,
        ..RegistryChangedEvent::default()
    };
    server
        .publish(subject, Bytes::from(serde_json::to_vec(&event).unwrap()))
        .await
        .unwrap();
}

#[tokio::test]
async fn change_event_flushes_resolution_and_discovery_caches() {
    let network = MemoryNetwork::new();
    let server: Arc<dyn BusConnection> = network.connect(DEFAULT_URL);
    let registry = ScriptedRegistry::with_default_bootstrap(DEFAULT_URL);
    registry.script_resolve(
        "my.app/my.cap",
        Ok(ResolveOutput {
            canonical_identity: "cap:@main/my.app/my.cap@1.0.0".to_string(),
            nats_url: DEFAULT_URL.to_string(),
            subject: "cap.my.app.my_cap.v1".to_string(),
            ttl_seconds: Some(300),
            etag: Some("e1".to_string()),
            ..ResolveOutput::default()
        }),
    );
    registry.script_discover(serde_json::json!([{"cap": "my.app/my.cap"}]));
    registry.serve(server.clone(), BOOTSTRAP_SUBJECT, TEST_REGISTRY_SUBJECT).await;

    let client = CapabilityClient::connect(ClientOptions::new(
        ClientConfig::for_url(DEFAULT_URL),
        network.connector(),
    ))
    .await
    .unwrap();

    // Warm both caches.
    client.resolve("my.app/my.cap").await.unwrap();
    client.resolve("my.app/my.cap").await.unwrap();
    assert_eq!(registry.resolve_calls(), 1);
    client.discover(None).await.unwrap();
    client.discover(None).await.unwrap();
    assert_eq!(registry.discover_calls(), 1);

    // A granular change event lands on `registry.changed.<scope>`.
    changed_event(&server, "registry.changed.my.app", "my.app", "my.cap").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.resolve("my.app/my.cap").await.unwrap();
    assert_eq!(registry.resolve_calls(), 2);
    client.discover(None).await.unwrap();
    assert_eq!(registry.discover_calls(), 2);
    client.close().await;
}

#[tokio::test]
async fn global_channel_events_are_dispatched_too() {
    let network = MemoryNetwork::new();
    let server: Arc<dyn BusConnection> = network.connect(DEFAULT_URL);
    let registry = ScriptedRegistry::with_default_bootstrap(DEFAULT_URL);
    registry.script_resolve(
        "my.app/my.cap",
        Ok(ResolveOutput {
            canonical_identity: "cap:@main/my.app/my.cap@1.0.0".to_string(),
            nats_url: DEFAULT_URL.to_string(),
            subject: "cap.my.app.my_cap.v1".to_string(),
            ttl_seconds: Some(300),
            ..ResolveOutput::default()
        }),
    );
    registry.serve(server.clone(), BOOTSTRAP_SUBJECT, TEST_REGISTRY_SUBJECT).await;

    let client = CapabilityClient::connect(ClientOptions::new(
        ClientConfig::for_url(DEFAULT_URL),
        network.connector(),
    ))
    .await
    .unwrap();

    client.resolve("my.app/my.cap").await.unwrap();
    assert_eq!(registry.resolve_calls(), 1);

    // The global channel carries no scope suffix.
    changed_event(&server, "registry.changed", "my.app", "my.cap").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.resolve("my.app/my.cap").await.unwrap();
    assert_eq!(registry.resolve_calls(), 2);
    client.close().await;
}

#[tokio::test]
async fn unrelated_capability_keeps_its_cache_entry() {
    let network = MemoryNetwork::new();
    let server: Arc<dyn BusConnection> = network.connect(DEFAULT_URL);
    let registry = ScriptedRegistry::with_default_bootstrap(DEFAULT_URL);
    registry.script_resolve(
        "my.app/my.cap",
        Ok(ResolveOutput {
            canonical_identity: "cap:@main/my.app/my.cap@1.0.0".to_string(),
            nats_url: DEFAULT_URL.to_string(),
            subject: "cap.my.app.my_cap.v1".to_string(),
            ttl_seconds: Some(300),
            ..ResolveOutput::default()
        }),
    );
    registry.serve(server.clone(), BOOTSTRAP_SUBJECT, TEST_REGISTRY_SUBJECT).await;

    let client = CapabilityClient::connect(ClientOptions::new(
        ClientConfig::for_url(DEFAULT_URL),
        network.connector(),
    ))
    .await
    .unwrap();

    client.resolve("my.app/my.cap").await.unwrap();
    changed_event(&server, "registry.changed.other.app", "other.app", "other.cap").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    client.resolve("my.app/my.cap").await.unwrap();
    assert_eq!(registry.resolve_calls(), 1);
    client.close().await;
}
