//! Auth fixtures: static providers that record what was asked of them.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use capbus_core::AccessTokenProvider;
use capbus_core::AuthProvider;
use capbus_core::AuthRequest;
use capbus_core::BusCredentials;
use capbus_core::CapabilityError;
use capbus_core::normalize_url;
use parking_lot::Mutex;

/// Auth provider answering from a static URL → credentials table.
#[derive(Default)]
pub struct StaticAuthProvider {
    by_url: Mutex<HashMap<String, BusCredentials>>,
    fallback: Mutex<Option<BusCredentials>>,
    requests: Mutex<Vec<AuthRequest>>,
}

impl StaticAuthProvider {
    /// Provider with no scripted credentials; every request fails.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Provider answering every URL with the same credentials.
    pub fn always(credentials: BusCredentials) -> Arc<Self> {
        let provider = Self::new();
        *provider.fallback.lock() = Some(credentials);
        provider
    }

    /// Script credentials for one URL.
    pub fn script(&self, url: &str, credentials: BusCredentials) {
        self.by_url.lock().insert(normalize_url(url), credentials);
    }

    /// Every [`AuthRequest`] seen so far, in order.
    pub fn requests(&self) -> Vec<AuthRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl AuthProvider for StaticAuthProvider {
    async fn authenticate(&self, request: AuthRequest) -> Result<BusCredentials, CapabilityError> {
        self.requests.lock().push(request.clone());
        let scripted = self.by_url.lock().get(&normalize_url(&request.nats_url)).cloned();
        scripted
            .or_else(|| self.fallback.lock().clone())
            .ok_or_else(|| CapabilityError::auth_failed(format!("no credentials scripted for '{}'", request.nats_url)))
    }
}

/// Token provider returning a fixed token.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    /// Provider for one token.
    pub fn new(token: impl Into<String>) -> Arc<Self> {
        Arc::new(Self { token: token.into() })
    }
}

#[async_trait]
impl AccessTokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String, CapabilityError> {
        Ok(self.token.clone())
    }
}
