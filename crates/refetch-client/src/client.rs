//! Query engine client: execution, caching, dependency tracking and refetch.

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::future::join_all;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::broadcast::{RefetchBroadcaster, RefetchFuture, Subscription};
use crate::config::{ClientConfig, DEFAULT_TIMEOUT_MS};
use crate::document::Document;
use crate::error::{ClientError, TransportError};
use crate::fingerprint::{Fingerprint, FingerprintRegistry, QueryId};
use crate::graph::DependencyGraph;
use crate::hooks::{Hooks, RequestHook};
use crate::operation::{GraphqlRequest, GraphqlResponse};
use crate::retry::{RetryDecision, RetryPolicy, RetrySetting};
use crate::typenames::collect_typenames;
use crate::watch::QueryWatch;

/// Whether a query may be answered from the response cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchPolicy {
    /// Serve a cached payload when present, otherwise fetch.
    #[default]
    CacheFirst,
    /// Always fetch; the result is still cached.
    NetworkOnly,
}

/// Per-call query options. Unset fields fall back to the client settings.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    /// Cache override.
    pub cache: Option<bool>,
    /// Per-attempt timeout override.
    pub timeout: Option<Duration>,
    /// Retry override.
    pub retry: Option<RetrySetting>,
    /// Cancellation token.
    pub cancel: Option<CancellationToken>,
    /// Fetch policy.
    pub fetch_policy: FetchPolicy,
}

impl QueryOptions {
    /// Override caching for this call.
    #[must_use]
    pub const fn with_cache(mut self, enabled: bool) -> Self {
        self.cache = Some(enabled);
        self
    }

    /// Override the per-attempt timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Override the retry setting.
    #[must_use]
    pub fn with_retry(mut self, retry: impl Into<RetrySetting>) -> Self {
        self.retry = Some(retry.into());
        self
    }

    /// Attach a cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Set the fetch policy.
    #[must_use]
    pub const fn with_fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = policy;
        self
    }
}

/// Per-call mutation options.
#[derive(Debug, Clone)]
pub struct MutationOptions {
    /// Queries to refetch in addition to the dependency-derived ones.
    pub refetch_queries: Vec<Document>,
    /// Resolve only after every refetch completed.
    pub wait_for_refetch: bool,
    /// Refetch queries that depend on the returned types.
    pub auto_refetch: bool,
    /// Per-attempt timeout override.
    pub timeout: Option<Duration>,
    /// Cancellation token.
    pub cancel: Option<CancellationToken>,
}

impl Default for MutationOptions {
    fn default() -> Self {
        Self {
            refetch_queries: Vec::new(),
            wait_for_refetch: false,
            auto_refetch: true,
            timeout: None,
            cancel: None,
        }
    }
}

impl MutationOptions {
    /// Also refetch `document`.
    #[must_use]
    pub fn refetch(mut self, document: &Document) -> Self {
        self.refetch_queries.push(document.clone());
        self
    }

    /// Wait for refetches before resolving.
    #[must_use]
    pub const fn wait_for_refetch(mut self, wait: bool) -> Self {
        self.wait_for_refetch = wait;
        self
    }

    /// Enable or disable dependency-derived refetching.
    #[must_use]
    pub const fn with_auto_refetch(mut self, enabled: bool) -> Self {
        self.auto_refetch = enabled;
        self
    }

    /// Override the per-attempt timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Attach a cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Client metrics.
#[derive(Debug, Default)]
#[allow(clippy::struct_field_names)]
pub struct ClientMetrics {
    requests_total: AtomicU64,
    requests_success: AtomicU64,
    requests_error: AtomicU64,
    requests_retried: AtomicU64,
    cache_hits: AtomicU64,
    refetches_published: AtomicU64,
}

impl ClientMetrics {
    /// Snapshot current metrics.
    #[must_use]
    pub fn snapshot(&self) -> ClientMetricsSnapshot {
        ClientMetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_success: self.requests_success.load(Ordering::Relaxed),
            requests_error: self.requests_error.load(Ordering::Relaxed),
            requests_retried: self.requests_retried.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            refetches_published: self.refetches_published.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_field_names)]
pub struct ClientMetricsSnapshot {
    /// Network invocations started.
    pub requests_total: u64,
    /// Invocations that returned data.
    pub requests_success: u64,
    /// Invocations that failed (cancellation excluded).
    pub requests_error: u64,
    /// Retries performed.
    pub requests_retried: u64,
    /// Queries answered from the cache.
    pub cache_hits: u64,
    /// Refetch signals published.
    pub refetches_published: u64,
}

#[derive(Debug, Clone)]
struct ClientSettings {
    timeout: Duration,
    retry: RetryPolicy,
    cache: bool,
    hooks: Hooks,
}

/// Client builder.
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    endpoint: String,
    headers: HeaderMap,
    settings: ClientSettings,
}

impl ClientBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            headers: HeaderMap::new(),
            settings: ClientSettings {
                timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
                retry: RetryPolicy::default(),
                cache: true,
                hooks: Hooks::default(),
            },
        }
    }

    /// Create a builder from a loaded configuration.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        config.validate()?;
        Ok(Self {
            endpoint: config.endpoint.clone(),
            headers: config.header_map()?,
            settings: ClientSettings {
                timeout: config.timeout(),
                retry: config.retry.to_policy(),
                cache: config.cache,
                hooks: Hooks::default(),
            },
        })
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Add a bearer token header.
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl AsRef<str>) -> Self {
        let value = format!("Bearer {}", token.as_ref());
        if let Ok(header) = HeaderValue::from_str(&value) {
            self.headers.insert(AUTHORIZATION, header);
        }
        self
    }

    /// Set the per-attempt timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.settings.timeout = timeout;
        self
    }

    /// Set retry from a bool, count, or policy table.
    #[must_use]
    pub fn with_retry(mut self, retry: impl Into<RetrySetting>) -> Self {
        self.settings.retry = retry.into().to_policy();
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.settings.retry = retry;
        self
    }

    /// Enable or disable response caching.
    #[must_use]
    pub const fn with_cache(mut self, enabled: bool) -> Self {
        self.settings.cache = enabled;
        self
    }

    /// Register a request hook.
    #[must_use]
    pub fn with_hook(mut self, hook: impl RequestHook + 'static) -> Self {
        self.settings.hooks.push(Arc::new(hook));
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<Client, ClientError> {
        reqwest::Url::parse(&self.endpoint).map_err(|err| {
            ClientError::config(format!("invalid endpoint {:?}: {err}", self.endpoint))
        })?;
        let mut headers = self.headers;
        headers
            .entry(CONTENT_TYPE)
            .or_insert(HeaderValue::from_static("application/json"));
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        Ok(Client {
            inner: Arc::new(ClientInner {
                endpoint: self.endpoint,
                http,
                settings: self.settings,
                registry: FingerprintRegistry::new(),
                graph: DependencyGraph::new(),
                broadcaster: RefetchBroadcaster::new(),
                metrics: ClientMetrics::default(),
            }),
        })
    }
}

#[derive(Debug)]
struct ClientInner {
    endpoint: String,
    http: reqwest::Client,
    settings: ClientSettings,
    registry: FingerprintRegistry,
    graph: DependencyGraph,
    broadcaster: RefetchBroadcaster,
    metrics: ClientMetrics,
}

/// Query engine client.
///
/// Cloning is cheap; clones share the cache, the dependency graph and the
/// subscriptions.
#[derive(Debug, Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Client for `endpoint` with default settings.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, ClientError> {
        ClientBuilder::new(endpoint).build()
    }

    /// Start a builder.
    #[must_use]
    pub fn builder(endpoint: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(endpoint)
    }

    /// Endpoint requests are posted to.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Return client metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> ClientMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    /// Dependency graph built from query responses.
    #[must_use]
    pub fn graph(&self) -> &DependencyGraph {
        &self.inner.graph
    }

    /// Query ID of `document`, registering it if needed.
    pub fn query_id(&self, document: &Document) -> QueryId {
        self.inner.registry.identify(document).query_id
    }

    /// Execute a query.
    ///
    /// With caching in effect and [`FetchPolicy::CacheFirst`], a cached
    /// payload is returned without a network call. Successful responses
    /// update the dependency graph and, unless caching is off, the cache.
    pub async fn execute_query(
        &self,
        document: &Document,
        variables: impl Serialize,
        options: QueryOptions,
    ) -> Result<Value, ClientError> {
        let variables = serde_json::to_value(variables)?;
        let fingerprint = self.inner.registry.identify(document);
        let cache_enabled = self.cache_enabled(options.cache);

        if cache_enabled && options.fetch_policy == FetchPolicy::CacheFirst {
            if let Some(hit) = self
                .inner
                .registry
                .cache()
                .get(fingerprint.query_id, &variables)
            {
                self.inner.metrics.cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!(query_id = %fingerprint.query_id, "serving query from cache");
                return Ok(hit);
            }
        }

        let global = &self.inner.settings.retry;
        let retry = options
            .retry
            .as_ref()
            .map_or_else(|| global.clone(), |setting| setting.resolve(global));
        let timeout = options.timeout.unwrap_or(self.inner.settings.timeout);
        let data = self
            .send_with_retry(
                &fingerprint,
                &variables,
                &retry,
                timeout,
                options.cancel.as_ref(),
            )
            .await?;

        self.record_dependencies(fingerprint.query_id, &data);
        if cache_enabled {
            self.inner
                .registry
                .cache()
                .set(fingerprint.query_id, &variables, data.clone());
        }
        Ok(data)
    }

    /// Execute a query and deserialize its data.
    pub async fn execute_query_as<T: DeserializeOwned>(
        &self,
        document: &Document,
        variables: impl Serialize,
        options: QueryOptions,
    ) -> Result<T, ClientError> {
        let data = self.execute_query(document, variables, options).await?;
        Ok(serde_json::from_value(data)?)
    }

    /// Execute a mutation and refetch the queries it affects.
    ///
    /// Mutations are never retried. The affected queries are every
    /// query that has returned one of the mutation's response types, plus
    /// `options.refetch_queries`. Their cache entries are dropped and a refetch
    /// signal is published to their subscribers.
    pub async fn execute_mutation(
        &self,
        document: &Document,
        variables: impl Serialize,
        options: MutationOptions,
    ) -> Result<Value, ClientError> {
        let variables = serde_json::to_value(variables)?;
        let fingerprint = self.inner.registry.identify(document);
        let timeout = options.timeout.unwrap_or(self.inner.settings.timeout);
        let data = self
            .send_with_retry(
                &fingerprint,
                &variables,
                &RetryPolicy::disabled(),
                timeout,
                options.cancel.as_ref(),
            )
            .await?;

        let mut affected = BTreeSet::new();
        if options.auto_refetch {
            for typename in collect_typenames(&data) {
                affected.extend(self.inner.graph.dependents_of(&typename));
            }
        }
        for extra in &options.refetch_queries {
            affected.insert(self.query_id(extra));
        }

        let pending = self.refetch_queries(&affected);
        if options.wait_for_refetch {
            let results = join_all(
                pending
                    .into_iter()
                    .map(|(query_id, refetch)| async move { (query_id, refetch.await) }),
            )
            .await;
            if let Some((query_id, Err(err))) =
                results.into_iter().find(|(_, result)| result.is_err())
            {
                return Err(ClientError::Refetch {
                    query_id,
                    source: Box::new(err),
                });
            }
        } else {
            for (query_id, refetch) in pending {
                tokio::spawn(async move {
                    if let Err(err) = refetch.await {
                        warn!(%query_id, error = %err, "background refetch failed");
                    }
                });
            }
        }

        Ok(data)
    }

    /// Listen for refetch signals on `query_id`.
    pub fn subscribe_to_query<F>(&self, query_id: QueryId, handler: F) -> Subscription
    where
        F: Fn(QueryId) -> RefetchFuture + Send + Sync + 'static,
    {
        self.inner.broadcaster.subscribe(query_id, handler)
    }

    /// Execute a query and keep its result fresh across mutations.
    pub fn watch_query(
        &self,
        document: &Document,
        variables: impl Serialize,
        options: QueryOptions,
    ) -> Result<QueryWatch, ClientError> {
        let variables = serde_json::to_value(variables)?;
        Ok(QueryWatch::start(
            self.clone(),
            document.clone(),
            variables,
            options,
        ))
    }

    /// Cached payload for `document` and `variables`, if caching is on.
    pub fn cached_response(&self, document: &Document, variables: impl Serialize) -> Option<Value> {
        let variables = serde_json::to_value(variables).ok()?;
        self.cached_for(document, &variables, None)
    }

    /// Seed the cache for `document` and `variables`. No-op if caching is off.
    pub fn set_cached_response(
        &self,
        document: &Document,
        variables: impl Serialize,
        payload: Value,
    ) -> Result<(), ClientError> {
        if !self.inner.settings.cache {
            return Ok(());
        }
        let variables = serde_json::to_value(variables)?;
        let query_id = self.query_id(document);
        self.inner
            .registry
            .cache()
            .set(query_id, &variables, payload);
        Ok(())
    }

    /// Drop every cached payload.
    pub fn clear_cache(&self) {
        self.inner.registry.cache().clear();
    }

    /// Tear down: drop subscriptions, identities, caches and graph edges.
    pub fn destroy(&self) {
        self.inner.broadcaster.clear();
        self.inner.registry.reset();
        self.inner.graph.clear();
    }

    pub(crate) fn cache_enabled(&self, per_call: Option<bool>) -> bool {
        per_call.unwrap_or(self.inner.settings.cache)
    }

    pub(crate) fn cached_for(
        &self,
        document: &Document,
        variables: &Value,
        per_call: Option<bool>,
    ) -> Option<Value> {
        if !self.cache_enabled(per_call) {
            return None;
        }
        let query_id = self.query_id(document);
        self.inner.registry.cache().get(query_id, variables)
    }

    fn record_dependencies(&self, query_id: QueryId, data: &Value) {
        let graph = &self.inner.graph;
        graph.add_query_node(query_id);
        for typename in collect_typenames(data) {
            graph.add_edge(query_id, &typename);
        }
    }

    fn refetch_queries(&self, query_ids: &BTreeSet<QueryId>) -> Vec<(QueryId, RefetchFuture)> {
        let mut pending = Vec::new();
        for &query_id in query_ids {
            self.inner.registry.cache().invalidate(query_id);
            let futures = self.inner.broadcaster.publish(query_id);
            debug!(%query_id, subscribers = futures.len(), "published refetch");
            self.inner
                .metrics
                .refetches_published
                .fetch_add(1, Ordering::Relaxed);
            pending.extend(futures.into_iter().map(|future| (query_id, future)));
        }
        pending
    }

    async fn send_with_retry(
        &self,
        fingerprint: &Fingerprint,
        variables: &Value,
        retry: &RetryPolicy,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<Value, ClientError> {
        let body = GraphqlRequest::new(&fingerprint.canonical, variables).to_body()?;
        self.inner
            .metrics
            .requests_total
            .fetch_add(1, Ordering::Relaxed);

        let mut attempt = 1;
        loop {
            let result = match with_cancel(cancel, self.send_once(&body, timeout)).await {
                Ok(result) => result,
                Err(canceled) => Err(canceled),
            };
            let err = match result {
                Ok(data) => {
                    self.inner
                        .metrics
                        .requests_success
                        .fetch_add(1, Ordering::Relaxed);
                    return Ok(data);
                }
                Err(err) => err,
            };

            match retry.decide(&err, attempt) {
                RetryDecision::RetryAfter(delay) => {
                    self.inner
                        .metrics
                        .requests_retried
                        .fetch_add(1, Ordering::Relaxed);
                    debug!(
                        query_id = %fingerprint.query_id,
                        attempt,
                        error = %err,
                        "retrying GraphQL request after {:?}",
                        delay
                    );
                    with_cancel(cancel, tokio::time::sleep(delay)).await?;
                    attempt += 1;
                }
                RetryDecision::DoNotRetry => {
                    if !err.is_canceled() {
                        self.inner
                            .metrics
                            .requests_error
                            .fetch_add(1, Ordering::Relaxed);
                    }
                    return Err(err);
                }
            }
        }
    }

    async fn send_once(&self, body: &[u8], timeout: Duration) -> Result<Value, ClientError> {
        let mut request = self
            .inner
            .http
            .post(&self.inner.endpoint)
            .timeout(timeout)
            .body(body.to_vec())
            .build()?;
        self.inner.settings.hooks.before_request(&mut request);

        let response = self
            .inner
            .http
            .execute(request)
            .await
            .map_err(|err| TransportError::from_reqwest(err, timeout))?;
        self.inner.settings.hooks.after_response(&response);

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|err| TransportError::from_reqwest(err, timeout))?;

        if !status.is_success() {
            return Err(TransportError::HttpStatus {
                status,
                body: truncate_body(&bytes),
            }
            .into());
        }

        let response: GraphqlResponse = serde_json::from_slice(&bytes)?;
        response.into_result()
    }
}

async fn with_cancel<F: Future>(
    cancel: Option<&CancellationToken>,
    future: F,
) -> Result<F::Output, ClientError> {
    match cancel {
        Some(token) => tokio::select! {
            biased;
            () = token.cancelled() => Err(ClientError::Canceled),
            output = future => Ok(output),
        },
        None => Ok(future.await),
    }
}

fn truncate_body(bytes: &[u8]) -> String {
    const MAX_LEN: usize = 4096;
    let mut body = String::from_utf8_lossy(bytes).to_string();
    if body.len() > MAX_LEN {
        let mut end = MAX_LEN;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
        body.push('…');
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_body_respects_char_boundaries() {
        let long = "é".repeat(3000);
        let body = truncate_body(long.as_bytes());
        assert!(body.ends_with('…'));
        assert!(body.len() <= 4096 + '…'.len_utf8());
    }

    #[test]
    fn build_rejects_invalid_endpoint() {
        let err = Client::new("::not a url::").expect_err("invalid");
        assert!(matches!(err, ClientError::Config { .. }));
    }

    #[test]
    fn per_call_cache_option_wins_both_ways() {
        let enabled = Client::new("http://localhost/graphql").expect("client");
        assert!(!enabled.cache_enabled(Some(false)));
        assert!(enabled.cache_enabled(None));

        let disabled = Client::builder("http://localhost/graphql")
            .with_cache(false)
            .build()
            .expect("client");
        assert!(disabled.cache_enabled(Some(true)));
        assert!(!disabled.cache_enabled(None));
    }

    #[test]
    fn from_config_applies_settings() {
        let config = ClientConfig::from_value(serde_json::json!({
            "endpoint": "http://localhost/graphql",
            "retry": false,
            "timeout_ms": 250,
            "cache": false
        }))
        .expect("config");
        let builder = ClientBuilder::from_config(&config).expect("builder");
        assert_eq!(builder.settings.retry.retries, 0);
        assert_eq!(builder.settings.timeout, Duration::from_millis(250));
        assert!(!builder.settings.cache);
    }
}
