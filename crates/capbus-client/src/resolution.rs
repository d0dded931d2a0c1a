//! Resolution client: capability reference → subject and bus URL.
//!
//! Lookup protocol, in order: fresh cache hit (negative hits fail
//! `NOT_FOUND`), stale hit with fire-and-forget revalidation, then a
//! deduplicated registry call. A registry failure falls back to the
//! configured static mappings before the key is marked negative.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use capbus_cache::KeyParts;
use capbus_cache::KeyScope;
use capbus_cache::SingleFlight;
use capbus_cache::TtlCache;
use capbus_cache::build_key;
use capbus_core::CanonicalizeOptions;
use capbus_core::CapabilityError;
use capbus_core::ResolveOutput;
use capbus_core::canonicalize;
use capbus_core::constants::FALLBACK_ETAG;
use capbus_core::constants::FALLBACK_TTL;
use capbus_core::parse_reference;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

/// Remote registry seam; the facade implements it over request-reply.
#[async_trait]
pub trait RegistryTransport: Send + Sync {
    /// Invoke a registry method and return its raw result.
    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, CapabilityError>;
}

/// Inputs to a resolution lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolveInput {
    /// Capability reference.
    pub cap: String,
    /// Requested version, when pinned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Tenant scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Environment scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
}

impl ResolveInput {
    /// Lookup for a bare capability reference.
    pub fn for_cap(cap: impl Into<String>) -> Self {
        Self {
            cap: cap.into(),
            ..Self::default()
        }
    }
}

/// Cache key for a resolution lookup.
///
/// The canonical identity anchors the key when it is already known, which
/// pre-resolution is only the case for references that pin a version.
pub fn resolution_cache_key(input: &ResolveInput, scope: KeyScope) -> String {
    let canonical = parse_reference(&input.cap).ok().and_then(|parsed| {
        canonicalize(
            &parsed,
            CanonicalizeOptions {
                resolved_version: input.version.as_deref(),
                ..Default::default()
            },
        )
        .ok()
    });
    build_key(
        KeyParts {
            canonical_identity: canonical.as_deref(),
            cap: &input.cap,
            version: input.version.as_deref(),
            tenant_id: input.tenant_id.as_deref(),
            env: input.env.as_deref(),
        },
        scope,
    )
}

/// Client over the remote registry with caching, dedup, fallback, and
/// revalidation.
pub struct ResolutionClient {
    cache: Arc<TtlCache<ResolveOutput>>,
    inflight: SingleFlight<ResolveOutput>,
    registry: Arc<dyn RegistryTransport>,
    scope: KeyScope,
    default_nats_url: String,
    fallback_mappings: HashMap<String, String>,
}

impl ResolutionClient {
    /// Build a resolution client sharing a cache with the facade.
    pub fn new(
        cache: Arc<TtlCache<ResolveOutput>>,
        registry: Arc<dyn RegistryTransport>,
        scope: KeyScope,
        default_nats_url: impl Into<String>,
        fallback_mappings: HashMap<String, String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cache,
            inflight: SingleFlight::new(),
            registry,
            scope,
            default_nats_url: default_nats_url.into(),
            fallback_mappings,
        })
    }

    /// Resolve one capability reference.
    pub async fn resolve(self: &Arc<Self>, input: ResolveInput) -> Result<ResolveOutput, CapabilityError> {
        let key = self.cache_key(&input);

        let lookup = self.cache.get(&key);
        if lookup.found && !lookup.is_stale && lookup.is_negative {
            return Err(CapabilityError::not_found(format!(
                "capability '{}' is negatively cached",
                input.cap
            )));
        }
        if let Some(value) = lookup.value {
            if !lookup.is_stale {
                return Ok(value);
            }
            // Serve the stale value now; refresh it off the caller's path.
            self.spawn_revalidation(key, input);
            return Ok(value);
        }

        let client = self.clone();
        let flight_key = key.clone();
        self.inflight
            .get_or_create(&key, move || async move { client.fetch_and_store(flight_key, input).await })
            .await
    }

    /// Resolve many references in parallel, collecting per-cap outcomes.
    pub async fn resolve_multiple(
        self: &Arc<Self>,
        inputs: Vec<ResolveInput>,
    ) -> Vec<(String, Result<ResolveOutput, CapabilityError>)> {
        let futures = inputs.into_iter().map(|input| {
            let client = self.clone();
            async move {
                let cap = input.cap.clone();
                let outcome = client.resolve(input).await;
                (cap, outcome)
            }
        });
        futures::future::join_all(futures).await
    }

    /// Drop every cached entry for `<app>/<name>`.
    ///
    /// Matches the dotted prefix form (`<app>.<name>`), the reference form
    /// (`<app>/<name>`), and canonical-identity keys containing
    /// `/<app>/<name>@`, so registry-resolved and bootstrap-seeded entries
    /// are flushed alike.
    pub fn invalidate_capability(&self, app: &str, name: &str) -> usize {
        let dotted = format!("{app}.{name}");
        let reference = format!("{app}/{name}");
        let canonical_segment = format!("/{app}/{name}@");
        let removed = self.cache.invalidate_matching(|key| {
            key.starts_with(&dotted) || key.starts_with(&reference) || key.contains(&canonical_segment)
        });
        if removed > 0 {
            debug!(app, capability = name, removed, "invalidated cached resolutions");
        }
        removed
    }

    /// Number of in-flight registry calls, for tests and metrics.
    pub fn inflight_len(&self) -> usize {
        self.inflight.len()
    }

    fn cache_key(&self, input: &ResolveInput) -> String {
        resolution_cache_key(input, self.scope)
    }

    fn spawn_revalidation(self: &Arc<Self>, key: String, input: ResolveInput) {
        let client = self.clone();
        tokio::spawn(async move {
            let flight_key = key.clone();
            let fetch_client = client.clone();
            let outcome = client
                .inflight
                .get_or_create(&key, move || async move {
                    fetch_client.fetch_and_store(flight_key, input).await
                })
                .await;
            if let Err(err) = outcome {
                warn!(key = %key, error = %err, "background revalidation failed");
            }
        });
    }

    async fn fetch_and_store(
        self: Arc<Self>,
        key: String,
        input: ResolveInput,
    ) -> Result<ResolveOutput, CapabilityError> {
        let params = serde_json::to_value(&input)?;
        match self.registry.call("resolve", params).await {
            Ok(raw) => {
                let mut output: ResolveOutput = serde_json::from_value(raw)
                    .map_err(|err| CapabilityError::internal(format!("malformed resolve reply: {err}")))?;
                if output.subject.is_empty() {
                    return Err(CapabilityError::unknown_subject(format!(
                        "registry resolved '{}' without a subject",
                        input.cap
                    )));
                }
                if output.nats_url.is_empty() {
                    output.nats_url = self.default_nats_url.clone();
                }
                let ttl = output.ttl_seconds.map(Duration::from_secs);
                self.cache.set_with_etag(key.as_str(), output.clone(), ttl, output.etag.clone());
                Ok(output)
            }
            Err(err) => {
                if let Some(output) = self.synthesize_fallback(&input.cap) {
                    warn!(cap = %input.cap, error = %err, "registry resolve failed, using fallback mapping");
                    self.cache
                        .set_with_etag(key.as_str(), output.clone(), Some(FALLBACK_TTL), output.etag.clone());
                    return Ok(output);
                }
                self.cache.set_negative(&key);
                Err(err)
            }
        }
    }

    fn synthesize_fallback(&self, cap: &str) -> Option<ResolveOutput> {
        let subject = self.fallback_mappings.get(cap)?;
        let major = subject
            .rsplit('.')
            .next()
            .map(|segment| segment.strip_prefix('v').unwrap_or(segment))
            .and_then(|segment| segment.parse::<u64>().ok())
            .unwrap_or(0);
        Some(ResolveOutput {
            canonical_identity: format!("cap:@main/{cap}@{major}.0.0"),
            nats_url: self.default_nats_url.clone(),
            subject: subject.clone(),
            major: Some(major),
            resolved_version: Some(format!("{major}.0.0")),
            status: Some("active".to_string()),
            ttl_seconds: Some(FALLBACK_TTL.as_secs()),
            etag: Some(FALLBACK_ETAG.to_string()),
            ..ResolveOutput::default()
        })
    }
}
