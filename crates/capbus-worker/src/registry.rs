//! Handler registry and the default echo handler.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use capbus_core::CapabilityError;
use capbus_core::Envelope;
use parking_lot::RwLock;
use tracing::info;

use crate::config::SandboxEnv;

/// A capability implementation.
#[async_trait]
pub trait CapabilityHandler: Send + Sync {
    /// Handle one decoded envelope and return the result payload.
    async fn handle(&self, envelope: Envelope, sandbox_env: &SandboxEnv) -> Result<serde_json::Value, CapabilityError>;

    /// Handler name for logs.
    fn name(&self) -> &'static str;
}

/// Echoes the received params back; the default for unmapped capabilities.
pub struct EchoHandler;

#[async_trait]
impl CapabilityHandler for EchoHandler {
    async fn handle(&self, envelope: Envelope, _sandbox_env: &SandboxEnv) -> Result<serde_json::Value, CapabilityError> {
        Ok(envelope.params)
    }

    fn name(&self) -> &'static str {
        "EchoHandler"
    }
}

/// Capability name → handler mapping with an echo default.
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn CapabilityHandler>>>,
    default: Arc<dyn CapabilityHandler>,
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HandlerRegistry {
    /// Registry with only the echo default.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            default: Arc::new(EchoHandler),
        }
    }

    /// Register a handler for a capability name.
    pub fn register(&self, capability: impl Into<String>, handler: Arc<dyn CapabilityHandler>) {
        let capability = capability.into();
        info!(capability = %capability, handler = handler.name(), "registered capability handler");
        self.handlers.write().insert(capability, handler);
    }

    /// Handler for a capability, falling back to echo.
    pub fn get(&self, capability: &str) -> Arc<dyn CapabilityHandler> {
        self.handlers.read().get(capability).cloned().unwrap_or_else(|| self.default.clone())
    }

    /// Number of explicitly registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    /// True when only the echo default is present.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
