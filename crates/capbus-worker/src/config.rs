//! Worker pool configuration.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

/// Environment variables exposed to handler execution.
pub type SandboxEnv = BTreeMap<String, String>;

/// One pool of queue-group subscriptions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPoolConfig {
    /// Pool identifier.
    pub id: String,
    /// Sandbox the handlers execute in.
    pub sandbox_id: String,
    /// Capability references this pool serves.
    pub capabilities: Vec<String>,
    /// Independent subscriptions per subject within the queue group.
    pub concurrent_workers: usize,
    /// Queue group name; the bus delivers each message to exactly one
    /// subscriber across the group.
    pub consumer_group: String,
    /// Extra environment passed to handlers.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sandbox_env: SandboxEnv,
}

impl WorkerPoolConfig {
    /// Pool for one capability with a single worker.
    pub fn single(id: &str, capability: &str, consumer_group: &str) -> Self {
        Self {
            id: id.to_string(),
            sandbox_id: format!("sandbox-{id}"),
            capabilities: vec![capability.to_string()],
            concurrent_workers: 1,
            consumer_group: consumer_group.to_string(),
            sandbox_env: SandboxEnv::new(),
        }
    }

    /// Environment handed to handlers: configured vars plus the sandbox id.
    pub fn effective_env(&self) -> SandboxEnv {
        let mut env = self.sandbox_env.clone();
        env.insert("SANDBOX_ID".to_string(), self.sandbox_id.clone());
        env
    }
}
