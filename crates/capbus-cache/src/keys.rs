//! Resolution cache key construction.
//!
//! Keys are pure functions of their inputs. When the canonical identity is
//! known it anchors the key; otherwise the raw capability reference and
//! version do. Tenant and environment scoping parts are appended only when
//! the corresponding flags are on.

/// Which context dimensions participate in cache keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyScope {
    /// Append `|t:<tenantId>` when a tenant is present.
    pub include_tenant_in_key: bool,
    /// Append `|e:<env>` when an environment is present.
    pub include_env_in_key: bool,
}

/// Inputs to [`build_key`].
#[derive(Debug, Clone, Copy, Default)]
pub struct KeyParts<'a> {
    /// Canonical identity, when resolution has produced one.
    pub canonical_identity: Option<&'a str>,
    /// Capability reference as given by the caller.
    pub cap: &'a str,
    /// Requested version, when pinned.
    pub version: Option<&'a str>,
    /// Tenant from the invocation context.
    pub tenant_id: Option<&'a str>,
    /// Environment from configuration.
    pub env: Option<&'a str>,
}

/// Build the cache key for a resolution lookup.
pub fn build_key(parts: KeyParts<'_>, scope: KeyScope) -> String {
    let mut key = match parts.canonical_identity {
        Some(identity) => identity.to_string(),
        None => {
            let mut key = parts.cap.to_string();
            if let Some(version) = parts.version {
                key.push_str("|v:");
                key.push_str(version);
            }
            key
        }
    };
    if scope.include_tenant_in_key
        && let Some(tenant_id) = parts.tenant_id
    {
        key.push_str("|t:");
        key.push_str(tenant_id);
    }
    if scope.include_env_in_key
        && let Some(env) = parts.env
    {
        key.push_str("|e:");
        key.push_str(env);
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCOPED: KeyScope = KeyScope {
        include_tenant_in_key: true,
        include_env_in_key: true,
    };

    #[test]
    fn canonical_identity_anchors_the_key() {
        let key = build_key(
            KeyParts {
                canonical_identity: Some("cap:@main/my.app/my.cap@1.0.0"),
                cap: "my.app/my.cap",
                ..Default::default()
            },
            KeyScope::default(),
        );
        assert_eq!(key, "cap:@main/my.app/my.cap@1.0.0");
    }

    #[test]
    fn fallback_key_includes_version() {
        let key = build_key(
            KeyParts {
                cap: "my.app/my.cap",
                version: Some("1.2"),
                ..Default::default()
            },
            KeyScope::default(),
        );
        assert_eq!(key, "my.app/my.cap|v:1.2");
    }

    #[test]
    fn scope_parts_append_only_when_flagged() {
        let parts = KeyParts {
            cap: "a/b",
            tenant_id: Some("acme"),
            env: Some("prod"),
            ..Default::default()
        };
        assert_eq!(build_key(parts, KeyScope::default()), "a/b");
        assert_eq!(build_key(parts, SCOPED), "a/b|t:acme|e:prod");
        assert_eq!(
            build_key(
                parts,
                KeyScope {
                    include_tenant_in_key: true,
                    include_env_in_key: false,
                }
            ),
            "a/b|t:acme"
        );
    }

    #[test]
    fn same_inputs_produce_identical_keys() {
        let parts = KeyParts {
            canonical_identity: Some("cap:@main/a/b@1.0.0"),
            cap: "a/b",
            tenant_id: Some("t1"),
            ..Default::default()
        };
        assert_eq!(build_key(parts, SCOPED), build_key(parts, SCOPED));
    }

    #[test]
    fn differing_tenant_changes_key_only_when_scoped() {
        let base = KeyParts {
            cap: "a/b",
            tenant_id: Some("t1"),
            ..Default::default()
        };
        let other = KeyParts {
            tenant_id: Some("t2"),
            ..base
        };
        assert_eq!(build_key(base, KeyScope::default()), build_key(other, KeyScope::default()));
        assert_ne!(build_key(base, SCOPED), build_key(other, SCOPED));
    }
}
