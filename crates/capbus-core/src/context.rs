//! Invocation context: routing, authorization, and deadline metadata.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;

/// Metadata carried alongside every invocation.
///
/// `tenant_id` and `request_id` are mandatory on the wire; the enrich
/// middleware fills `request_id` (random UUID) and the default tenant when
/// the caller left them empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InvocationContext {
    /// Tenant the invocation executes for.
    pub tenant_id: String,
    /// Unique id of this request.
    pub request_id: String,
    /// Authenticated principal, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
    /// End-user id, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Roles granted to the principal.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub roles: Vec<String>,
    /// Feature flags active for this invocation.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub features: Vec<String>,
    /// Delivery channels associated with the invocation.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<String>,
    /// Distributed trace context, when propagated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    /// Correlation id linking related requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Absolute deadline in Unix milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline_unix_ms: Option<i64>,
    /// Relative timeout in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Idempotency key for retried writes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    /// Access token presented to sandbox-bus auth.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    /// Obligations accumulated by policy middleware.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub obligations: BTreeMap<String, serde_json::Value>,
    /// Free-form metadata.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, serde_json::Value>,
}

impl InvocationContext {
    /// Context for a tenant with everything else unset.
    pub fn for_tenant(tenant_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            ..Self::default()
        }
    }

    /// Set the relative timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_form_is_camel_case_and_omits_empty_fields() {
        let ctx = InvocationContext {
            tenant_id: "acme".into(),
            request_id: "r-1".into(),
            timeout_ms: Some(5_000),
            ..Default::default()
        };
        let value = serde_json::to_value(&ctx).unwrap();
        assert_eq!(value["tenantId"], "acme");
        assert_eq!(value["requestId"], "r-1");
        assert_eq!(value["timeoutMs"], 5_000);
        assert!(value.get("roles").is_none());
        assert!(value.get("obligations").is_none());
    }

    #[test]
    fn missing_optional_fields_decode_to_defaults() {
        let ctx: InvocationContext =
            serde_json::from_str(r#"{"tenantId":"t","requestId":"r"}"#).unwrap();
        assert_eq!(ctx.tenant_id, "t");
        assert!(ctx.roles.is_empty());
        assert!(ctx.deadline_unix_ms.is_none());
    }
}
