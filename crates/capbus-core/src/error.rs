//! The closed error taxonomy shared by every capbus surface.
//!
//! `CapabilityError` is the structured error that crosses the wire and
//! surfaces from the client facade. Component-internal errors (identity
//! parsing, bus transport) are separate snafu enums that convert into this
//! taxonomy at the boundary where they become caller-visible.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Closed set of capability error codes.
///
/// The wire representation is the SCREAMING_SNAKE_CASE name. Codes outside
/// this set collapse to [`ErrorCode::InternalError`] on decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    ValidationError,
    SchemaValidationFailed,
    Unauthorized,
    AuthFailed,
    Forbidden,
    PolicyDenied,
    NotFound,
    Timeout,
    Cancelled,
    Conflict,
    RateLimited,
    LimitExceeded,
    UpstreamError,
    UnknownSubject,
    HandlerNotFound,
    RegistryUnavailable,
    PolicyEngineUnavailable,
    ObligationFailed,
    InternalError,
    InvalidRequest,
    InvalidArgument,
}

impl ErrorCode {
    /// Wire name of the code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::SchemaValidationFailed => "SCHEMA_VALIDATION_FAILED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::AuthFailed => "AUTH_FAILED",
            Self::Forbidden => "FORBIDDEN",
            Self::PolicyDenied => "POLICY_DENIED",
            Self::NotFound => "NOT_FOUND",
            Self::Timeout => "TIMEOUT",
            Self::Cancelled => "CANCELLED",
            Self::Conflict => "CONFLICT",
            Self::RateLimited => "RATE_LIMITED",
            Self::LimitExceeded => "LIMIT_EXCEEDED",
            Self::UpstreamError => "UPSTREAM_ERROR",
            Self::UnknownSubject => "UNKNOWN_SUBJECT",
            Self::HandlerNotFound => "HANDLER_NOT_FOUND",
            Self::RegistryUnavailable => "REGISTRY_UNAVAILABLE",
            Self::PolicyEngineUnavailable => "POLICY_ENGINE_UNAVAILABLE",
            Self::ObligationFailed => "OBLIGATION_FAILED",
            Self::InternalError => "INTERNAL_ERROR",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::InvalidArgument => "INVALID_ARGUMENT",
        }
    }

    /// Parse a wire name, falling back to [`ErrorCode::InternalError`] for
    /// anything outside the closed set.
    pub fn parse_lossy(s: &str) -> Self {
        serde_json::from_value(serde_json::Value::String(s.to_string())).unwrap_or(Self::InternalError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured capability error carried by invocation results and wire replies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityError {
    /// Code drawn from the closed taxonomy.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Advisory retry hint. The SDK itself never auto-retries.
    pub retryable: bool,
    /// Optional structured detail payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CapabilityError {
    /// Create an error with an explicit retryable flag.
    pub fn new(code: ErrorCode, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            code,
            message: message.into(),
            retryable,
            details: None,
        }
    }

    /// Attach a structured detail payload.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Non-retryable `INTERNAL_ERROR`.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message, false)
    }

    /// Non-retryable `NOT_FOUND`.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message, false)
    }

    /// Retryable `TIMEOUT`.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Timeout, message, true)
    }

    /// Non-retryable `CANCELLED`.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Cancelled, message, false)
    }

    /// Non-retryable `VALIDATION_ERROR`.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationError, message, false)
    }

    /// Non-retryable `INVALID_REQUEST`.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message, false)
    }

    /// Retryable `AUTH_FAILED`.
    pub fn auth_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthFailed, message, true)
    }

    /// Retryable `REGISTRY_UNAVAILABLE`.
    pub fn registry_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RegistryUnavailable, message, true)
    }

    /// Non-retryable `UNKNOWN_SUBJECT`.
    pub fn unknown_subject(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::UnknownSubject, message, false)
    }
}

impl fmt::Display for CapabilityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CapabilityError {}

impl From<serde_json::Error> for CapabilityError {
    fn from(err: serde_json::Error) -> Self {
        Self::internal(format!("serialization failed: {err}"))
    }
}
