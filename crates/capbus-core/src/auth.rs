//! Credentials and authentication provider seams for sandbox buses.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use snafu::Snafu;

use crate::constants::CREDENTIAL_EXPIRY_SKEW;
use crate::error::CapabilityError;

/// Errors from credential validation.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum CredentialsError {
    /// No auth shape was present.
    #[snafu(display("credentials carry neither token, user/pass, nor jwt/nkey"))]
    NoAuthShape,

    /// User was given without a password, or vice versa.
    #[snafu(display("user/pass credentials are incomplete"))]
    IncompleteUserPass,

    /// Jwt was given without an nkey seed, or vice versa.
    #[snafu(display("jwt/nkey credentials are incomplete"))]
    IncompleteJwt,
}

/// Credentials for a bus server.
///
/// Exactly one auth shape is expected: `token`, `user`+`pass`, or
/// `jwt`+`nkey_seed`. Credentials are treated as expired 30 s before their
/// stated expiry so a connection is never handed out on the edge.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BusCredentials {
    /// Bearer token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    /// Username for user/pass auth.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Password for user/pass auth.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
    /// Signed JWT for jwt/nkey auth.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jwt: Option<String>,
    /// NKey seed for jwt/nkey auth.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nkey_seed: Option<String>,
    /// Expiry in Unix milliseconds; `None` never expires.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl BusCredentials {
    /// Token-only credentials.
    pub fn token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            ..Self::default()
        }
    }

    /// Token credentials with an absolute expiry.
    pub fn token_expiring(token: impl Into<String>, expires_at: i64) -> Self {
        Self {
            token: Some(token.into()),
            expires_at: Some(expires_at),
            ..Self::default()
        }
    }

    /// User/pass credentials.
    pub fn user_pass(user: impl Into<String>, pass: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            pass: Some(pass.into()),
            ..Self::default()
        }
    }

    /// Require at least one complete auth shape.
    pub fn validate(&self) -> Result<(), CredentialsError> {
        if self.user.is_some() != self.pass.is_some() {
            return IncompleteUserPassSnafu.fail();
        }
        if self.jwt.is_some() != self.nkey_seed.is_some() {
            return IncompleteJwtSnafu.fail();
        }
        if self.token.is_none() && self.user.is_none() && self.jwt.is_none() {
            return NoAuthShapeSnafu.fail();
        }
        Ok(())
    }

    /// True once `now` is within the expiry skew of `expires_at`.
    pub fn is_expired_at(&self, now_unix_ms: i64) -> bool {
        match self.expires_at {
            Some(expires_at) => now_unix_ms >= expires_at - CREDENTIAL_EXPIRY_SKEW.as_millis() as i64,
            None => false,
        }
    }

    /// [`Self::is_expired_at`] against the wall clock.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now().timestamp_millis())
    }
}

/// Request passed to the auth provider when a sandbox bus needs credentials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthRequest {
    /// Bus URL credentials are requested for.
    pub nats_url: String,
    /// Caller access token forwarded to the provider, when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

/// Exchanges an access token for per-server bus credentials.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Obtain credentials for the requested bus.
    async fn authenticate(&self, request: AuthRequest) -> Result<BusCredentials, CapabilityError>;
}

/// Supplies the caller-level access token forwarded to [`AuthProvider`].
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    /// Fetch the current access token.
    async fn access_token(&self) -> Result<String, CapabilityError>;
}
