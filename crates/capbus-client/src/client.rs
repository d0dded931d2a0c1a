//! Client facade: owns the components and orchestrates initialization.
//!
//! Construction performs the whole init sequence once: default-bus connect
//! (or a borrowed connection), bootstrap fetch and cache seeding, pool
//! build, registry caller, resolution and discovery clients, invalidation
//! subscriber, and pipeline assembly. Dropping in favor of [`Self::close`]
//! leaks nothing but skips the graceful drains.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use capbus_cache::KeyScope;
use capbus_cache::TtlCache;
use capbus_cache::TtlCacheConfig;
use capbus_core::AccessTokenProvider;
use capbus_core::AuthProvider;
use capbus_core::BusConnection;
use capbus_core::BusConnector;
use capbus_core::CapabilityError;
use capbus_core::Envelope;
use capbus_core::ErrorCode;
use capbus_core::InvocationContext;
use capbus_core::InvocationErr;
use capbus_core::InvocationResult;
use capbus_core::PolicyEvaluator;
use capbus_core::RegistryRequest;
use capbus_core::RegistryResponse;
use capbus_core::ResolveOutput;
use capbus_core::ResolvedTarget;
use capbus_core::normalize_url;
use capbus_core::wire::BootstrapReply;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::discovery::DiscoveryClient;
use crate::invalidation::InvalidationSubscriber;
use crate::metrics::InvocationMetrics;
use crate::metrics::MetricsSnapshot;
use crate::middleware::DeadlineMiddleware;
use crate::middleware::EnrichContextMiddleware;
use crate::middleware::MethodValidator;
use crate::middleware::PolicyMiddleware;
use crate::middleware::ResolveMiddleware;
use crate::middleware::TelemetryMiddleware;
use crate::middleware::ValidationMiddleware;
use crate::pipeline::Handler;
use crate::pipeline::Middleware;
use crate::pipeline::build_pipeline;
use crate::pool::ConnectionPool;
use crate::resolution::RegistryTransport;
use crate::resolution::ResolutionClient;
use crate::resolution::ResolveInput;
use crate::resolution::resolution_cache_key;
use crate::transport::TransportCore;
use crate::transport::bus_error_to_capability;

/// Policy wiring for the standard policy middleware.
pub struct PolicyOptions {
    /// The external decision point.
    pub evaluator: Arc<dyn PolicyEvaluator>,
    /// PEPs evaluated before the invocation.
    pub pre_peps: Vec<String>,
    /// PEPs evaluated after the invocation.
    pub post_peps: Vec<String>,
}

/// Everything needed to construct a [`CapabilityClient`].
pub struct ClientOptions {
    /// Client configuration.
    pub config: ClientConfig,
    /// Connector for the chosen bus client.
    pub connector: Arc<dyn BusConnector>,
    /// Pre-established default connection; when supplied it is borrowed and
    /// never closed by the client.
    pub default_connection: Option<Arc<dyn BusConnection>>,
    /// Auth provider for sandbox buses.
    pub auth_provider: Option<Arc<dyn AuthProvider>>,
    /// Access-token provider consulted before each sandbox auth.
    pub token_provider: Option<Arc<dyn AccessTokenProvider>>,
    /// Policy middleware wiring.
    pub policy: Option<PolicyOptions>,
    /// Method payload validator.
    pub validator: Option<Arc<dyn MethodValidator>>,
    /// User middleware, run between the standard set and the transport.
    pub extra_middleware: Vec<Arc<dyn Middleware>>,
}

impl ClientOptions {
    /// Options with only the mandatory pieces set.
    pub fn new(config: ClientConfig, connector: Arc<dyn BusConnector>) -> Self {
        Self {
            config,
            connector,
            default_connection: None,
            auth_provider: None,
            token_provider: None,
            policy: None,
            validator: None,
            extra_middleware: Vec::new(),
        }
    }
}

/// One invocation request.
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    /// Method to invoke.
    pub method: String,
    /// Method payload.
    pub params: serde_json::Value,
}

impl InvokeRequest {
    /// Request for a method and payload.
    pub fn new(method: impl Into<String>, params: serde_json::Value) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// An invocation addressed directly at a subject, bypassing resolution.
#[derive(Debug, Clone)]
pub struct InvokeSubjectRequest {
    /// Capability name carried in the envelope.
    pub capability: String,
    /// Target subject.
    pub subject: String,
    /// Target bus URL; empty selects the default bus.
    pub nats_url: String,
    /// Version stamped on the envelope, when known.
    pub version: Option<String>,
    /// Method to invoke.
    pub method: String,
    /// Method payload.
    pub params: serde_json::Value,
}

/// The capability invocation client.
pub struct CapabilityClient {
    config: ClientConfig,
    default_connection: Arc<dyn BusConnection>,
    owns_default: bool,
    pool: Arc<ConnectionPool>,
    resolver: Arc<ResolutionClient>,
    discovery: Arc<DiscoveryClient>,
    invalidation: Option<Arc<InvalidationSubscriber>>,
    pipeline: Handler,
    metrics: Arc<InvocationMetrics>,
    closed: AtomicBool,
}

impl std::fmt::Debug for CapabilityClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityClient").finish()
    }
}

impl CapabilityClient {
    /// Connect and initialize. The sequence is idempotent by construction:
    /// it runs exactly once per client.
    pub async fn connect(options: ClientOptions) -> Result<Self, CapabilityError> {
        let ClientOptions {
            config,
            connector,
            default_connection,
            auth_provider,
            token_provider,
            policy,
            validator,
            extra_middleware,
        } = options;

        config
            .validate()
            .map_err(|err| CapabilityError::invalid_request(format!("invalid client configuration: {err}")))?;
        let default_url = normalize_url(&config.default_nats_url);

        let (default_connection, owns_default) = match default_connection {
            Some(connection) => (connection, false),
            None => {
                let connection = connector
                    .connect(&default_url, None)
                    .await
                    .map_err(|err| CapabilityError::new(
                        ErrorCode::InternalError,
                        format!("failed to connect to default bus '{default_url}': {err}"),
                        true,
                    ))?;
                (connection, true)
            }
        };

        let scope = KeyScope {
            include_tenant_in_key: config.resolution.include_tenant_in_key,
            include_env_in_key: config.resolution.include_env_in_key,
        };
        let resolution_cache = Arc::new(TtlCache::new(TtlCacheConfig {
            default_ttl: config.resolution.default_ttl,
            negative_ttl: config.resolution.negative_ttl,
            stale_window: config.resolution.stale_window,
            max_entries: config.resolution.max_entries,
        }));

        let seeded = seed_bootstrap(
            default_connection.as_ref(),
            &config,
            &default_url,
            scope,
            &resolution_cache,
        )
        .await?;
        info!(seeded, "bootstrap mapping seeded");

        let pool = ConnectionPool::new(
            connector.clone(),
            &default_url,
            default_connection.clone(),
            auth_provider,
            token_provider.clone(),
            config.access_token.clone(),
            config.pool.clone(),
        );

        let registry: Arc<dyn RegistryTransport> = Arc::new(RegistryCaller {
            cache: resolution_cache.clone(),
            pool: pool.clone(),
            registry_cap: config.registry_cap.clone(),
            registry_key: resolution_cache_key(&ResolveInput::for_cap(config.registry_cap.as_str()), scope),
            timeout: config.default_timeout,
        });

        let resolver = ResolutionClient::new(
            resolution_cache.clone(),
            registry.clone(),
            scope,
            default_url.clone(),
            config.fallback_mappings.clone(),
        );
        let discovery = DiscoveryClient::new(registry, config.discovery_ttl);

        let invalidation = match &config.change_subject_prefix {
            Some(prefix) => {
                let subscriber = InvalidationSubscriber::new(default_connection.clone(), prefix.clone());
                let handler_resolver = resolver.clone();
                let handler_discovery = discovery.clone();
                subscriber.on_change(Arc::new(move |event| {
                    handler_resolver.invalidate_capability(&event.app, &event.capability);
                    handler_discovery.clear();
                    Ok(())
                }))?;
                subscriber.start().await?;
                Some(subscriber)
            }
            None => None,
        };

        let metrics = Arc::new(InvocationMetrics::new());
        let mut middleware: Vec<Arc<dyn Middleware>> = vec![
            EnrichContextMiddleware::new(
                config.default_tenant_id.clone(),
                config.access_token.clone(),
                token_provider,
            ),
            ResolveMiddleware::new(resolver.clone(), config.env.clone()),
            DeadlineMiddleware::new(),
        ];
        if let Some(policy) = policy {
            middleware.push(PolicyMiddleware::new(policy.evaluator, policy.pre_peps, policy.post_peps));
        }
        if let Some(validator) = validator {
            middleware.push(ValidationMiddleware::new(validator));
        }
        middleware.push(TelemetryMiddleware::new(metrics.clone()));
        middleware.extend(extra_middleware);

        let transport = TransportCore::new(pool.clone(), config.default_timeout, config.include_timing);
        let pipeline = build_pipeline(middleware, transport.handler());

        Ok(Self {
            config,
            default_connection,
            owns_default,
            pool,
            resolver,
            discovery,
            invalidation,
            pipeline,
            metrics,
            closed: AtomicBool::new(false),
        })
    }

    /// Invoke a capability method.
    pub async fn invoke(
        &self,
        cap_ref: &str,
        request: InvokeRequest,
        ctx: Option<InvocationContext>,
    ) -> InvocationResult {
        let envelope = Envelope::new(cap_ref, request.method, request.params, ctx.unwrap_or_default());
        self.run(envelope, CancellationToken::new()).await
    }

    /// [`Self::invoke`] with a caller-owned cancellation token.
    pub async fn invoke_with_cancel(
        &self,
        cap_ref: &str,
        request: InvokeRequest,
        ctx: Option<InvocationContext>,
        cancel: CancellationToken,
    ) -> InvocationResult {
        let envelope = Envelope::new(cap_ref, request.method, request.params, ctx.unwrap_or_default());
        self.run(envelope, cancel).await
    }

    /// Invoke with the routing target pre-populated, bypassing resolution.
    pub async fn invoke_subject(&self, request: InvokeSubjectRequest, ctx: Option<InvocationContext>) -> InvocationResult {
        let mut envelope = Envelope::new(request.capability, request.method, request.params, ctx.unwrap_or_default());
        envelope.version = request.version.clone();
        envelope.resolved = Some(ResolvedTarget {
            nats_url: if request.nats_url.is_empty() {
                normalize_url(&self.config.default_nats_url)
            } else {
                request.nats_url
            },
            subject: request.subject,
            version: request.version,
        });
        self.run(envelope, CancellationToken::new()).await
    }

    /// Resolve a capability reference without invoking it.
    pub async fn resolve(&self, cap_ref: &str) -> Result<ResolveOutput, CapabilityError> {
        self.resolver
            .resolve(ResolveInput {
                cap: cap_ref.to_string(),
                version: None,
                tenant_id: Some(self.config.default_tenant_id.clone()),
                env: self.config.env.clone(),
            })
            .await
    }

    /// Resolve many references in parallel.
    pub async fn resolve_multiple(
        &self,
        cap_refs: &[&str],
    ) -> Vec<(String, Result<ResolveOutput, CapabilityError>)> {
        let inputs = cap_refs
            .iter()
            .map(|cap_ref| ResolveInput {
                cap: cap_ref.to_string(),
                version: None,
                tenant_id: Some(self.config.default_tenant_id.clone()),
                env: self.config.env.clone(),
            })
            .collect();
        self.resolver.resolve_multiple(inputs).await
    }

    /// List capabilities matching an optional filter.
    pub async fn discover(&self, filter: Option<serde_json::Value>) -> Result<serde_json::Value, CapabilityError> {
        self.discovery.discover(filter).await
    }

    /// Describe one capability.
    pub async fn describe(&self, cap_ref: &str) -> Result<serde_json::Value, CapabilityError> {
        self.discovery.describe(cap_ref).await
    }

    /// The resolution client, for embedders composing their own pipelines.
    pub fn resolver(&self) -> &Arc<ResolutionClient> {
        &self.resolver
    }

    /// Snapshot of the invocation counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Stop the subscriber, drain the pool, and close the default
    /// connection when this client owns it. Safe to call twice.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(invalidation) = &self.invalidation {
            invalidation.stop().await;
        }
        self.pool.close_all().await;
        if self.owns_default
            && let Err(err) = self.default_connection.close().await
        {
            warn!(error = %err, "failed to close default bus connection");
        }
    }

    async fn run(&self, mut envelope: Envelope, cancel: CancellationToken) -> InvocationResult {
        if self.closed.load(Ordering::SeqCst) {
            return Err(InvocationErr::bare(CapabilityError::internal("client is closed")));
        }
        envelope.ctx.timeout_ms.get_or_insert(self.config.default_timeout.as_millis() as u64);
        let mut result = (self.pipeline)(envelope, cancel).await;
        // Errors raised above the transport carry no timing; stamp them so
        // every surfaced result has populated meta.
        if let Err(err) = &mut result
            && err.meta.ended_at_unix_ms == 0
        {
            let now = Utc::now().timestamp_millis();
            if err.meta.started_at_unix_ms == 0 {
                err.meta.started_at_unix_ms = now;
            }
            err.meta.ended_at_unix_ms = now;
        }
        result
    }
}

/// Registry access over the resolved registry subject.
struct RegistryCaller {
    cache: Arc<TtlCache<ResolveOutput>>,
    pool: Arc<ConnectionPool>,
    registry_cap: String,
    registry_key: String,
    timeout: Duration,
}

#[async_trait]
impl RegistryTransport for RegistryCaller {
    async fn call(&self, method: &str, params: serde_json::Value) -> Result<serde_json::Value, CapabilityError> {
        let lookup = self.cache.get(&self.registry_key);
        let target = match lookup.value {
            Some(target) if !lookup.is_negative => target,
            _ => {
                return Err(CapabilityError::registry_unavailable(format!(
                    "registry capability '{}' is not in the resolution cache",
                    self.registry_cap
                )));
            }
        };

        let connection = self.pool.get_or_connect(&target.nats_url).await?;
        let request = RegistryRequest {
            id: Uuid::new_v4().to_string(),
            kind: "invoke".to_string(),
            cap: self.registry_cap.clone(),
            method: method.to_string(),
            params,
            ctx: None,
        };
        let payload = Bytes::from(serde_json::to_vec(&request)?);

        debug!(subject = %target.subject, method, "registry call");
        let reply = connection
            .request(&target.subject, payload, self.timeout)
            .await
            .map_err(|err| {
                let mapped = bus_error_to_capability(err);
                CapabilityError::registry_unavailable(format!("registry call '{method}' failed: {mapped}"))
            })?;

        let response: RegistryResponse = serde_json::from_slice(&reply)
            .map_err(|err| CapabilityError::registry_unavailable(format!("malformed registry reply: {err}")))?;
        if !response.ok {
            return Err(response
                .error
                .map(CapabilityError::from)
                .unwrap_or_else(|| CapabilityError::registry_unavailable("registry rejected the call")));
        }
        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }
}

async fn seed_bootstrap(
    connection: &dyn BusConnection,
    config: &ClientConfig,
    default_url: &str,
    scope: KeyScope,
    cache: &Arc<TtlCache<ResolveOutput>>,
) -> Result<usize, CapabilityError> {
    let reply = connection
        .request(&config.bootstrap_subject, Bytes::from_static(b"{}"), config.default_timeout)
        .await
        .map_err(|err| {
            let mapped = bus_error_to_capability(err);
            CapabilityError::registry_unavailable(format!("bootstrap fetch failed: {mapped}"))
        })?;
    let bootstrap: BootstrapReply = serde_json::from_slice(&reply)
        .map_err(|err| CapabilityError::registry_unavailable(format!("malformed bootstrap reply: {err}")))?;

    let mut seeded = 0usize;
    for (cap_ref, mut entry) in bootstrap.capabilities {
        if entry.subject.is_empty() {
            warn!(cap_ref = %cap_ref, "skipping bootstrap entry without a subject");
            continue;
        }
        if entry.nats_url.is_empty() {
            entry.nats_url = default_url.to_string();
        }
        let key = resolution_cache_key(&ResolveInput::for_cap(cap_ref.as_str()), scope);
        // Bootstrap seeds never expire; change events refresh them.
        cache.set_with_etag(key.as_str(), entry.clone(), Some(Duration::ZERO), entry.etag.clone());
        if !entry.canonical_identity.is_empty() && entry.canonical_identity != key {
            cache.set_with_etag(entry.canonical_identity.as_str(), entry.clone(), Some(Duration::ZERO), entry.etag.clone());
        }
        seeded += 1;
    }
    if seeded == 0 {
        return Err(CapabilityError::registry_unavailable(
            "bootstrap reply contained no valid capabilities",
        ));
    }
    Ok(seeded)
}
