//! Runtime context.
//!
//! [`HttpRuntime`] is an explicit, cheaply cloneable handle; every clone shares the same
//! configuration snapshot, per-client state, handle cache, and metrics. Administrative
//! operations serialize on one mutex and publish a fresh snapshot, so executions in flight
//! keep the snapshot they started with.
//!
//! Example
//! ```rust
//! use ninelives_http::{GlobalConfig, HttpRuntime, Request, SharedTransport};
//! use ninelives_http::transport::{Transport, TransportRequest, TransportResponse};
//! use ninelives_http::TransportError;
//!
//! struct Ok200;
//!
//! #[async_trait::async_trait]
//! impl Transport for Ok200 {
//!     async fn send(&self, _req: TransportRequest) -> Result<TransportResponse, TransportError> {
//!         Ok(TransportResponse::new(200, "hello"))
//!     }
//! }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let runtime = HttpRuntime::new(SharedTransport::new(Ok200));
//! runtime.init(GlobalConfig::default()).unwrap();
//! let response = runtime.execute(Request::get("https://example.com/")).await.unwrap();
//! assert_eq!(response.text().unwrap(), "hello");
//! # });
//! ```

use crate::circuit_breaker::CircuitState;
use crate::clock::{Clock, MonotonicClock};
use crate::config::{CallOverrides, ClientConfig, GlobalConfig};
use crate::engine::Engine;
use crate::error::HttpError;
use crate::handle_cache::HandleCache;
use crate::metrics::{MetricsRegistry, MetricsSnapshot};
use crate::policy::EffectivePolicy;
use crate::registry::StateRegistry;
use crate::request::Request;
use crate::response::Response;
use crate::service::RuntimeService;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::snapshot::{RuntimeConfig, SnapshotCell};
use crate::telemetry::{SharedSink, TelemetrySink};
use crate::transport::{SharedTransport, TransportFactory, UnconfiguredTransport};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

struct RuntimeInner {
    config: SnapshotCell<RuntimeConfig>,
    admin: Mutex<()>,
    engine: Engine,
}

/// Shared outbound HTTP runtime.
#[derive(Clone)]
pub struct HttpRuntime {
    inner: Arc<RuntimeInner>,
}

impl fmt::Debug for HttpRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let config = self.inner.config.load();
        f.debug_struct("HttpRuntime")
            .field("initialized", &config.initialized)
            .field("clients", &config.clients.len())
            .field("handles", &self.inner.engine.handles)
            .finish_non_exhaustive()
    }
}

impl HttpRuntime {
    /// Runtime with production clock, sleeper, and a discarding telemetry sink.
    pub fn new<F: TransportFactory + 'static>(factory: F) -> Self {
        Self::builder().transport(factory).build()
    }

    pub fn builder() -> HttpRuntimeBuilder {
        HttpRuntimeBuilder::default()
    }

    /// Install the global configuration. Fails with `CONFIG_ERROR` if already initialized.
    pub fn init(&self, global: GlobalConfig) -> Result<(), HttpError> {
        let _admin = self.inner.admin.lock();
        if self.inner.config.load().initialized {
            return Err(HttpError::Config("runtime already initialized; use reinit".into()));
        }
        global.validate()?;
        self.inner.config.update(|current| current.with_global(global));
        tracing::info!("http runtime initialized");
        Ok(())
    }

    /// Replace the global configuration and drop all per-client runtime state.
    ///
    /// Registered clients are kept, so each must still resolve against the new settings.
    pub fn reinit(&self, global: GlobalConfig) -> Result<(), HttpError> {
        let _admin = self.inner.admin.lock();
        global.validate()?;
        let current = self.inner.config.load();
        for (name, client) in &current.clients {
            resolve_client(&global, name, client)?;
        }
        self.inner.config.store(current.with_global(global));
        self.inner.engine.clear_client_state();
        tracing::info!("http runtime reinitialized");
        Ok(())
    }

    /// Reset to defaults: forget clients, per-client state, cached handles, and metrics.
    pub fn close(&self) {
        let _admin = self.inner.admin.lock();
        self.inner.config.update(RuntimeConfig::closed);
        self.inner.engine.clear_client_state();
        self.inner.engine.metrics.reset();
        tracing::info!("http runtime closed");
    }

    /// Register or replace a named client. Replacing drops that client's runtime state.
    pub fn register_client(&self, name: impl Into<String>, config: ClientConfig) -> Result<(), HttpError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(HttpError::InvalidArgument("client name must not be blank".into()));
        }
        config.validate()?;

        let _admin = self.inner.admin.lock();
        let current = self.inner.config.load();
        resolve_client(&current.global, &name, &config)?;

        let replaced = current.clients.contains_key(&name);
        self.inner.config.store(current.with_client(&name, Some(config)));
        self.inner.engine.forget_client(&name);
        tracing::info!(client = %name, replaced, "http client registered");
        Ok(())
    }

    /// Remove a named client. Returns false if it was not registered.
    pub fn unregister_client(&self, name: &str) -> bool {
        let _admin = self.inner.admin.lock();
        let current = self.inner.config.load();
        if !current.clients.contains_key(name) {
            return false;
        }
        self.inner.config.store(current.with_client(name, None));
        self.inner.engine.forget_client(name);
        tracing::info!(client = %name, "http client unregistered");
        true
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.config.load().initialized
    }

    pub fn global_config(&self) -> GlobalConfig {
        self.inner.config.load().global.clone()
    }

    pub fn client_config(&self, name: &str) -> Option<ClientConfig> {
        self.inner.config.load().client(name).cloned()
    }

    /// Policy `request` would run under, without executing it.
    pub fn resolve_policy(&self, request: &Request) -> Result<EffectivePolicy, HttpError> {
        let config = self.inner.config.load();
        self.inner.engine.resolve(&config, request).map(|(policy, _)| policy)
    }

    /// Run one logical call through every configured resilience policy.
    pub async fn execute(&self, request: Request) -> Result<Response, HttpError> {
        let config = self.inner.config.load();
        self.inner.engine.execute(&config, request).await
    }

    /// Scope that runs requests under the named client.
    pub fn client(&self, name: impl Into<String>) -> ClientScope {
        ClientScope { runtime: self.clone(), name: name.into() }
    }

    /// Tower service view of this runtime.
    pub fn service(&self) -> RuntimeService {
        RuntimeService::new(self.clone())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.engine.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.inner.engine.metrics.reset();
    }

    /// Breaker state of a client, once its breaker has been created.
    pub fn circuit_state(&self, client: &str) -> Option<CircuitState> {
        self.inner.engine.breakers.get(client).map(|b| b.state())
    }

    /// Force a client's breaker closed. Returns false if it has no breaker yet.
    pub fn reset_circuit(&self, client: &str) -> bool {
        match self.inner.engine.breakers.get(client) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Transport handles built so far.
    pub fn handle_builds(&self) -> u64 {
        self.inner.engine.handles.build_count()
    }

    /// Transport handles currently cached.
    pub fn cached_handles(&self) -> usize {
        self.inner.engine.handles.len()
    }

    /// Evict cached handles idle for longer than the configured threshold, now.
    pub fn evict_idle_handles(&self) -> usize {
        let config = self.inner.config.load();
        match config.global.client_reuse_idle_evict_ms {
            0 => 0,
            ms => self.inner.engine.handles.evict_idle(
                self.inner.engine.clock.now_millis(),
                std::time::Duration::from_millis(ms),
            ),
        }
    }
}

/// Runs requests under one named client.
#[derive(Debug, Clone)]
pub struct ClientScope {
    runtime: HttpRuntime,
    name: String,
}

impl ClientScope {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Execute `request` under this client unless it names another one.
    pub async fn execute(&self, request: Request) -> Result<Response, HttpError> {
        self.runtime.execute(request.with_default_client(&self.name)).await
    }

    pub fn runtime(&self) -> &HttpRuntime {
        &self.runtime
    }
}

/// Builder for [`HttpRuntime`].
pub struct HttpRuntimeBuilder {
    factory: Arc<dyn TransportFactory>,
    clock: Arc<dyn Clock>,
    sleeper: Arc<dyn Sleeper>,
    sink: SharedSink,
}

impl Default for HttpRuntimeBuilder {
    fn default() -> Self {
        Self {
            factory: Arc::new(SharedTransport::new(UnconfiguredTransport)),
            clock: Arc::new(MonotonicClock::default()),
            sleeper: Arc::new(TokioSleeper),
            sink: SharedSink::default(),
        }
    }
}

impl HttpRuntimeBuilder {
    pub fn transport<F: TransportFactory + 'static>(mut self, factory: F) -> Self {
        self.factory = Arc::new(factory);
        self
    }

    /// Override the clock (useful for deterministic tests).
    pub fn clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Override how retry delays are waited out.
    pub fn sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn telemetry<S>(mut self, sink: S) -> Self
    where
        S: TelemetrySink,
        S::Future: Send + 'static,
    {
        self.sink = SharedSink::new(sink);
        self
    }

    pub fn build(self) -> HttpRuntime {
        let engine = Engine {
            factory: self.factory,
            clock: self.clock,
            sleeper: self.sleeper,
            sink: self.sink,
            handles: HandleCache::new(),
            limiters: StateRegistry::new(),
            breakers: StateRegistry::new(),
            bulkheads: StateRegistry::new(),
            metrics: MetricsRegistry::new(),
        };
        HttpRuntime {
            inner: Arc::new(RuntimeInner {
                config: SnapshotCell::default(),
                admin: Mutex::new(()),
                engine,
            }),
        }
    }
}

/// Resolve a registered client against `global`, naming it in the error.
fn resolve_client(global: &GlobalConfig, name: &str, client: &ClientConfig) -> Result<(), HttpError> {
    EffectivePolicy::resolve(global, name, Some(client), &CallOverrides::default())
        .map(|_| ())
        .map_err(|e| match e {
            HttpError::InvalidArgument(msg) => HttpError::InvalidArgument(format!("client '{name}': {msg}")),
            other => other,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;

    #[test]
    fn init_twice_is_config_error() {
        let runtime = HttpRuntime::builder().build();
        runtime.init(GlobalConfig::default()).unwrap();
        assert!(runtime.is_initialized());
        let err = runtime.init(GlobalConfig::default()).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigError);
    }

    #[test]
    fn reinit_keeps_clients_and_close_drops_them() {
        let runtime = HttpRuntime::builder().build();
        runtime.register_client("svc", ClientConfig::default()).unwrap();
        runtime.init(GlobalConfig::default()).unwrap();
        runtime.reinit(GlobalConfig::builder().max_retries(9).build().unwrap()).unwrap();
        assert!(runtime.client_config("svc").is_some());
        assert_eq!(runtime.global_config().call.max_retries, 9);

        runtime.close();
        assert!(!runtime.is_initialized());
        assert!(runtime.client_config("svc").is_none());
        assert_eq!(runtime.global_config(), GlobalConfig::default());
    }

    #[test]
    fn register_validates_against_global() {
        let runtime = HttpRuntime::builder().build();
        let bad = ClientConfig {
            resilience: crate::config::ResilienceOverrides::new().rate_limit(1.0, 0),
            ..ClientConfig::default()
        };
        assert_eq!(runtime.register_client("svc", bad).unwrap_err().code(), ErrorCode::InvalidArgument);
        assert_eq!(
            runtime.register_client(" ", ClientConfig::default()).unwrap_err().code(),
            ErrorCode::InvalidArgument
        );
        assert!(!runtime.unregister_client("svc"));
    }

    #[tokio::test]
    async fn stale_snapshot_cannot_outlive_reregistration() {
        let runtime = HttpRuntime::builder().build();
        runtime.init(GlobalConfig::builder().max_retries(0).build().unwrap()).unwrap();
        let svc = ClientConfig {
            resilience: crate::config::ResilienceOverrides::new().circuit_enabled(true),
            ..ClientConfig::default()
        };
        runtime.register_client("svc", svc.clone()).unwrap();
        let stale = runtime.inner.config.load();
        runtime.register_client("svc", svc).unwrap();

        let request = || Request::get("https://svc.test/").client("svc");
        runtime.inner.engine.execute(&stale, request()).await.unwrap_err();
        let from_stale = runtime.inner.engine.breakers.get("svc").unwrap();

        runtime.execute(request()).await.unwrap_err();
        let current = runtime.inner.engine.breakers.get("svc").unwrap();
        assert!(!Arc::ptr_eq(&from_stale, &current));
        assert_eq!(current.window_len(), 1);
    }

    #[test]
    fn unknown_client_fails_resolution() {
        let runtime = HttpRuntime::builder().build();
        let err = runtime.resolve_policy(&Request::get("https://x").client("ghost")).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigError);
        assert!(runtime.resolve_policy(&Request::get("https://x")).is_ok());
    }
}
