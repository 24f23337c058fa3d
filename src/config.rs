//! Layered configuration.
//!
//! Three layers feed every call: the process-wide [`GlobalConfig`], an optional named
//! [`ClientConfig`], and the per-call [`CallOverrides`] carried by a
//! [`Request`](crate::Request). Layers below the global one store `Option`s, so an unset field
//! (`None`) is distinct from a legitimate `0` or `false` and falls through to the next layer.
//!
//! Configs are plain immutable values once built; the runtime shares them behind `Arc`
//! snapshots and never mutates them in place. They derive serde traits so applications can load
//! them from whatever format they already use.

use crate::error::HttpError;
use http::header::{HeaderName, HeaderValue};
use http::Method;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::Duration;

/// Client name used for requests that do not name a registered client.
pub const DEFAULT_CLIENT: &str = "default";

/// Methods that may be retried without an idempotency key.
pub const SAFE_METHODS: [&str; 6] = ["GET", "HEAD", "OPTIONS", "PUT", "DELETE", "TRACE"];

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_TOTAL_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_READ_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_MAX_RETRIES: u32 = 2;
const DEFAULT_BACKOFF_BASE_MS: u64 = 200;
const DEFAULT_BACKOFF_MAX_MS: u64 = 2_000;
const DEFAULT_MAX_RETRY_DELAY_MS: u64 = 10_000;
const DEFAULT_IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
const DEFAULT_RETRY_STATUSES: [u16; 4] = [429, 502, 503, 504];
const DEFAULT_MAX_RESPONSE_BODY_BYTES: u64 = 10 * 1024 * 1024;
const DEFAULT_IDLE_EVICT_MS: u64 = 5 * 60 * 1_000;

const DEFAULT_RATE_LIMIT_BURST: u32 = 10;
const DEFAULT_CIRCUIT_WINDOW: usize = 20;
const DEFAULT_CIRCUIT_MIN_CALLS: usize = 10;
const DEFAULT_CIRCUIT_THRESHOLD: u8 = 50;
const DEFAULT_CIRCUIT_OPEN_WAIT_MS: u64 = 30_000;
const DEFAULT_CIRCUIT_HALF_OPEN_CALLS: usize = 2;
const DEFAULT_CIRCUIT_RECORD_STATUSES: [u16; 4] = [500, 502, 503, 504];
const DEFAULT_BULKHEAD_MAX_CONCURRENT: usize = 64;
const DEFAULT_BULKHEAD_ACQUIRE_TIMEOUT_MS: u64 = 1_000;

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn method_set<I, S>(methods: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    methods.into_iter().map(|m| m.as_ref().trim().to_ascii_uppercase()).collect()
}

// ============================================================================
// Call-level settings (resolvable at every layer)
// ============================================================================

/// Fully resolved call-level defaults held by [`GlobalConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallSettings {
    pub connect_timeout_ms: u64,
    pub total_timeout_ms: u64,
    /// Zero disables the engine-imposed read timeout.
    pub read_timeout_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_base_ms: u64,
    pub retry_backoff_max_ms: u64,
    pub max_retry_delay_ms: u64,
    pub retry_jitter_enabled: bool,
    pub retry_on_network_error: bool,
    pub retry_on_timeout: bool,
    pub respect_retry_after: bool,
    pub require_idempotency_key_for_unsafe_retry: bool,
    pub idempotency_key_header: String,
    pub retry_on_statuses: BTreeSet<u16>,
    pub retry_methods: BTreeSet<String>,
    pub fail_on_non_2xx: bool,
    pub follow_redirects: bool,
    /// Zero disables the limit.
    pub max_response_body_bytes: u64,
}

impl Default for CallSettings {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            total_timeout_ms: DEFAULT_TOTAL_TIMEOUT_MS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            retry_backoff_max_ms: DEFAULT_BACKOFF_MAX_MS,
            max_retry_delay_ms: DEFAULT_MAX_RETRY_DELAY_MS,
            retry_jitter_enabled: true,
            retry_on_network_error: true,
            retry_on_timeout: true,
            respect_retry_after: true,
            require_idempotency_key_for_unsafe_retry: true,
            idempotency_key_header: DEFAULT_IDEMPOTENCY_HEADER.to_string(),
            retry_on_statuses: DEFAULT_RETRY_STATUSES.into_iter().collect(),
            retry_methods: method_set(SAFE_METHODS),
            fail_on_non_2xx: true,
            follow_redirects: true,
            max_response_body_bytes: DEFAULT_MAX_RESPONSE_BODY_BYTES,
        }
    }
}

/// Per-layer call-level overrides. `None` means "unset, ask the next layer".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallOverrides {
    pub connect_timeout_ms: Option<u64>,
    pub total_timeout_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub retry_backoff_base_ms: Option<u64>,
    pub retry_backoff_max_ms: Option<u64>,
    pub max_retry_delay_ms: Option<u64>,
    pub retry_jitter_enabled: Option<bool>,
    pub retry_on_network_error: Option<bool>,
    pub retry_on_timeout: Option<bool>,
    pub respect_retry_after: Option<bool>,
    pub require_idempotency_key_for_unsafe_retry: Option<bool>,
    pub idempotency_key_header: Option<String>,
    pub retry_on_statuses: Option<BTreeSet<u16>>,
    pub retry_methods: Option<BTreeSet<String>>,
    pub fail_on_non_2xx: Option<bool>,
    pub follow_redirects: Option<bool>,
    pub max_response_body_bytes: Option<u64>,
}

impl CallOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_ms = Some(millis(timeout));
        self
    }

    pub fn total_timeout(mut self, timeout: Duration) -> Self {
        self.total_timeout_ms = Some(millis(timeout));
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout_ms = Some(millis(timeout));
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn retry_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.retry_backoff_base_ms = Some(millis(base));
        self.retry_backoff_max_ms = Some(millis(max));
        self
    }

    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay_ms = Some(millis(delay));
        self
    }

    pub fn retry_jitter(mut self, enabled: bool) -> Self {
        self.retry_jitter_enabled = Some(enabled);
        self
    }

    pub fn retry_on_network_error(mut self, enabled: bool) -> Self {
        self.retry_on_network_error = Some(enabled);
        self
    }

    pub fn retry_on_timeout(mut self, enabled: bool) -> Self {
        self.retry_on_timeout = Some(enabled);
        self
    }

    pub fn respect_retry_after(mut self, enabled: bool) -> Self {
        self.respect_retry_after = Some(enabled);
        self
    }

    pub fn require_idempotency_key(mut self, required: bool) -> Self {
        self.require_idempotency_key_for_unsafe_retry = Some(required);
        self
    }

    pub fn idempotency_key_header(mut self, name: impl Into<String>) -> Self {
        self.idempotency_key_header = Some(name.into());
        self
    }

    pub fn retry_on_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.retry_on_statuses = Some(statuses.into_iter().collect());
        self
    }

    pub fn retry_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.retry_methods = Some(method_set(methods));
        self
    }

    pub fn fail_on_non_2xx(mut self, fail: bool) -> Self {
        self.fail_on_non_2xx = Some(fail);
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = Some(follow);
        self
    }

    pub fn max_response_body_bytes(mut self, limit: u64) -> Self {
        self.max_response_body_bytes = Some(limit);
        self
    }

    /// Field-level checks that do not need other layers.
    pub(crate) fn validate(&self) -> Result<(), HttpError> {
        if let Some(name) = &self.idempotency_key_header {
            validate_header_name(name)?;
        }
        if let Some(methods) = &self.retry_methods {
            validate_methods(methods)?;
        }
        Ok(())
    }
}

// ============================================================================
// Resilience settings (global + client layers)
// ============================================================================

/// Fully resolved per-client resilience defaults held by [`GlobalConfig`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceSettings {
    /// Zero disables rate limiting.
    pub rate_limit_qps: f64,
    pub rate_limit_burst: u32,
    pub circuit_enabled: bool,
    pub circuit_window_size: usize,
    pub circuit_min_calls: usize,
    /// Percentage in `1..=100`.
    pub circuit_failure_rate_threshold: u8,
    pub circuit_open_wait_ms: u64,
    pub circuit_half_open_max_calls: usize,
    pub circuit_record_statuses: BTreeSet<u16>,
    pub bulkhead_enabled: bool,
    pub bulkhead_max_concurrent: usize,
    pub bulkhead_queue_size: usize,
    pub bulkhead_acquire_timeout_ms: u64,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            rate_limit_qps: 0.0,
            rate_limit_burst: DEFAULT_RATE_LIMIT_BURST,
            circuit_enabled: false,
            circuit_window_size: DEFAULT_CIRCUIT_WINDOW,
            circuit_min_calls: DEFAULT_CIRCUIT_MIN_CALLS,
            circuit_failure_rate_threshold: DEFAULT_CIRCUIT_THRESHOLD,
            circuit_open_wait_ms: DEFAULT_CIRCUIT_OPEN_WAIT_MS,
            circuit_half_open_max_calls: DEFAULT_CIRCUIT_HALF_OPEN_CALLS,
            circuit_record_statuses: DEFAULT_CIRCUIT_RECORD_STATUSES.into_iter().collect(),
            bulkhead_enabled: false,
            bulkhead_max_concurrent: DEFAULT_BULKHEAD_MAX_CONCURRENT,
            bulkhead_queue_size: 0,
            bulkhead_acquire_timeout_ms: DEFAULT_BULKHEAD_ACQUIRE_TIMEOUT_MS,
        }
    }
}

impl ResilienceSettings {
    /// Cross-field checks on a resolved set of resilience settings.
    pub(crate) fn validate(&self) -> Result<(), HttpError> {
        if !self.rate_limit_qps.is_finite() || self.rate_limit_qps < 0.0 {
            return Err(HttpError::InvalidArgument(format!(
                "rate_limit_qps must be a finite value >= 0 (got {})",
                self.rate_limit_qps
            )));
        }
        if self.rate_limit_qps > 0.0 && self.rate_limit_burst == 0 {
            return Err(HttpError::InvalidArgument(
                "rate_limit_burst must be > 0 when rate limiting is enabled".into(),
            ));
        }
        if self.circuit_enabled {
            if self.circuit_window_size == 0 {
                return Err(HttpError::InvalidArgument("circuit_window_size must be > 0".into()));
            }
            if self.circuit_min_calls == 0 {
                return Err(HttpError::InvalidArgument("circuit_min_calls must be > 0".into()));
            }
            if self.circuit_min_calls > self.circuit_window_size {
                return Err(HttpError::InvalidArgument(format!(
                    "circuit_min_calls ({}) must be <= circuit_window_size ({})",
                    self.circuit_min_calls, self.circuit_window_size
                )));
            }
            if !(1..=100).contains(&self.circuit_failure_rate_threshold) {
                return Err(HttpError::InvalidArgument(format!(
                    "circuit_failure_rate_threshold must be within 1..=100 (got {})",
                    self.circuit_failure_rate_threshold
                )));
            }
            if self.circuit_half_open_max_calls == 0 {
                return Err(HttpError::InvalidArgument(
                    "circuit_half_open_max_calls must be > 0".into(),
                ));
            }
        }
        if self.bulkhead_enabled && self.bulkhead_max_concurrent == 0 {
            return Err(HttpError::InvalidArgument("bulkhead_max_concurrent must be > 0".into()));
        }
        Ok(())
    }
}

/// Client-layer resilience overrides. `None` falls through to the global value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceOverrides {
    pub rate_limit_qps: Option<f64>,
    pub rate_limit_burst: Option<u32>,
    pub circuit_enabled: Option<bool>,
    pub circuit_window_size: Option<usize>,
    pub circuit_min_calls: Option<usize>,
    pub circuit_failure_rate_threshold: Option<u8>,
    pub circuit_open_wait_ms: Option<u64>,
    pub circuit_half_open_max_calls: Option<usize>,
    pub circuit_record_statuses: Option<BTreeSet<u16>>,
    pub bulkhead_enabled: Option<bool>,
    pub bulkhead_max_concurrent: Option<usize>,
    pub bulkhead_queue_size: Option<usize>,
    pub bulkhead_acquire_timeout_ms: Option<u64>,
}

impl ResilienceOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token bucket refilled at `qps`, holding at most `burst` tokens.
    pub fn rate_limit(mut self, qps: f64, burst: u32) -> Self {
        self.rate_limit_qps = Some(qps);
        self.rate_limit_burst = Some(burst);
        self
    }

    /// Enable the circuit breaker with the given window and thresholds.
    pub fn circuit(
        mut self,
        window_size: usize,
        min_calls: usize,
        failure_rate_threshold: u8,
        open_wait: Duration,
    ) -> Self {
        self.circuit_enabled = Some(true);
        self.circuit_window_size = Some(window_size);
        self.circuit_min_calls = Some(min_calls);
        self.circuit_failure_rate_threshold = Some(failure_rate_threshold);
        self.circuit_open_wait_ms = Some(millis(open_wait));
        self
    }

    pub fn circuit_enabled(mut self, enabled: bool) -> Self {
        self.circuit_enabled = Some(enabled);
        self
    }

    pub fn circuit_half_open_max_calls(mut self, calls: usize) -> Self {
        self.circuit_half_open_max_calls = Some(calls);
        self
    }

    pub fn circuit_record_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.circuit_record_statuses = Some(statuses.into_iter().collect());
        self
    }

    /// Enable the bulkhead.
    pub fn bulkhead(mut self, max_concurrent: usize, queue_size: usize, acquire_timeout: Duration) -> Self {
        self.bulkhead_enabled = Some(true);
        self.bulkhead_max_concurrent = Some(max_concurrent);
        self.bulkhead_queue_size = Some(queue_size);
        self.bulkhead_acquire_timeout_ms = Some(millis(acquire_timeout));
        self
    }

    pub fn bulkhead_enabled(mut self, enabled: bool) -> Self {
        self.bulkhead_enabled = Some(enabled);
        self
    }

    /// Merge over `global`, field by field.
    pub(crate) fn resolve(&self, global: &ResilienceSettings) -> ResilienceSettings {
        ResilienceSettings {
            rate_limit_qps: self.rate_limit_qps.unwrap_or(global.rate_limit_qps),
            rate_limit_burst: self.rate_limit_burst.unwrap_or(global.rate_limit_burst),
            circuit_enabled: self.circuit_enabled.unwrap_or(global.circuit_enabled),
            circuit_window_size: self.circuit_window_size.unwrap_or(global.circuit_window_size),
            circuit_min_calls: self.circuit_min_calls.unwrap_or(global.circuit_min_calls),
            circuit_failure_rate_threshold: self
                .circuit_failure_rate_threshold
                .unwrap_or(global.circuit_failure_rate_threshold),
            circuit_open_wait_ms: self.circuit_open_wait_ms.unwrap_or(global.circuit_open_wait_ms),
            circuit_half_open_max_calls: self
                .circuit_half_open_max_calls
                .unwrap_or(global.circuit_half_open_max_calls),
            circuit_record_statuses: self
                .circuit_record_statuses
                .clone()
                .unwrap_or_else(|| global.circuit_record_statuses.clone()),
            bulkhead_enabled: self.bulkhead_enabled.unwrap_or(global.bulkhead_enabled),
            bulkhead_max_concurrent: self
                .bulkhead_max_concurrent
                .unwrap_or(global.bulkhead_max_concurrent),
            bulkhead_queue_size: self.bulkhead_queue_size.unwrap_or(global.bulkhead_queue_size),
            bulkhead_acquire_timeout_ms: self
                .bulkhead_acquire_timeout_ms
                .unwrap_or(global.bulkhead_acquire_timeout_ms),
        }
    }
}

// ============================================================================
// Auth and TLS material
// ============================================================================

/// Credentials rendered into the `Authorization` header.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Auth {
    Bearer { token: String },
    Basic { username: String, password: String },
}

impl Auth {
    /// Value for the `Authorization` header.
    pub fn header_value(&self) -> String {
        use base64::Engine as _;
        match self {
            Auth::Bearer { token } => format!("Bearer {token}"),
            Auth::Basic { username, password } => {
                let raw = format!("{username}:{password}");
                format!("Basic {}", base64::engine::general_purpose::STANDARD.encode(raw))
            }
        }
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Bearer { .. } => f.debug_struct("Bearer").field("token", &"<redacted>").finish(),
            Auth::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// Opaque TLS material handed to the transport.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsMaterial {
    pub ca_pem: Option<Vec<u8>>,
    pub client_cert_pem: Option<Vec<u8>>,
    pub client_key_pem: Option<Vec<u8>>,
    pub insecure_skip_verify: bool,
}

impl TlsMaterial {
    /// Digest identifying this material inside a handle fingerprint.
    pub fn identity(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl fmt::Debug for TlsMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsMaterial")
            .field("ca_pem", &self.ca_pem.as_ref().map(Vec::len))
            .field("client_cert_pem", &self.client_cert_pem.as_ref().map(Vec::len))
            .field("client_key_pem", &self.client_key_pem.as_ref().map(|_| "<redacted>"))
            .field("insecure_skip_verify", &self.insecure_skip_verify)
            .field("identity", &self.identity())
            .finish()
    }
}

// ============================================================================
// Global layer
// ============================================================================

/// Process-wide defaults. Created at `init`, replaced wholesale at `reinit`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GlobalConfig {
    pub call: CallSettings,
    pub resilience: ResilienceSettings,
    /// Zero disables idle eviction of cached transport handles.
    pub client_reuse_idle_evict_ms: u64,
    pub user_agent: String,
    pub default_headers: BTreeMap<String, String>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            call: CallSettings::default(),
            resilience: ResilienceSettings::default(),
            client_reuse_idle_evict_ms: DEFAULT_IDLE_EVICT_MS,
            user_agent: format!("ninelives-http/{}", env!("CARGO_PKG_VERSION")),
            default_headers: BTreeMap::new(),
        }
    }
}

impl GlobalConfig {
    pub fn builder() -> GlobalConfigBuilder {
        GlobalConfigBuilder::default()
    }

    /// Validate a config obtained without the builder (e.g. deserialized).
    pub fn validate(&self) -> Result<(), HttpError> {
        if self.call.retry_backoff_max_ms < self.call.retry_backoff_base_ms {
            return Err(HttpError::InvalidArgument(format!(
                "retry_backoff_max_ms ({}) must be >= retry_backoff_base_ms ({})",
                self.call.retry_backoff_max_ms, self.call.retry_backoff_base_ms
            )));
        }
        validate_header_name(&self.call.idempotency_key_header)?;
        validate_methods(&self.call.retry_methods)?;
        validate_headers(&self.default_headers)?;
        validate_header_value("user-agent", &self.user_agent)?;
        self.resilience.validate()
    }
}

/// Builder for [`GlobalConfig`]; `build` validates.
#[derive(Debug, Default)]
pub struct GlobalConfigBuilder {
    config: GlobalConfig,
}

impl GlobalConfigBuilder {
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.call.connect_timeout_ms = millis(timeout);
        self
    }

    pub fn total_timeout(mut self, timeout: Duration) -> Self {
        self.config.call.total_timeout_ms = millis(timeout);
        self
    }

    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.config.call.read_timeout_ms = millis(timeout);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.call.max_retries = retries;
        self
    }

    pub fn retry_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.config.call.retry_backoff_base_ms = millis(base);
        self.config.call.retry_backoff_max_ms = millis(max);
        self
    }

    pub fn max_retry_delay(mut self, delay: Duration) -> Self {
        self.config.call.max_retry_delay_ms = millis(delay);
        self
    }

    pub fn retry_jitter(mut self, enabled: bool) -> Self {
        self.config.call.retry_jitter_enabled = enabled;
        self
    }

    pub fn retry_on_network_error(mut self, enabled: bool) -> Self {
        self.config.call.retry_on_network_error = enabled;
        self
    }

    pub fn retry_on_timeout(mut self, enabled: bool) -> Self {
        self.config.call.retry_on_timeout = enabled;
        self
    }

    pub fn respect_retry_after(mut self, enabled: bool) -> Self {
        self.config.call.respect_retry_after = enabled;
        self
    }

    pub fn require_idempotency_key(mut self, required: bool) -> Self {
        self.config.call.require_idempotency_key_for_unsafe_retry = required;
        self
    }

    pub fn idempotency_key_header(mut self, name: impl Into<String>) -> Self {
        self.config.call.idempotency_key_header = name.into();
        self
    }

    pub fn retry_on_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.config.call.retry_on_statuses = statuses.into_iter().collect();
        self
    }

    pub fn retry_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.config.call.retry_methods = method_set(methods);
        self
    }

    pub fn fail_on_non_2xx(mut self, fail: bool) -> Self {
        self.config.call.fail_on_non_2xx = fail;
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.config.call.follow_redirects = follow;
        self
    }

    pub fn max_response_body_bytes(mut self, limit: u64) -> Self {
        self.config.call.max_response_body_bytes = limit;
        self
    }

    pub fn client_reuse_idle_evict(mut self, idle: Duration) -> Self {
        self.config.client_reuse_idle_evict_ms = millis(idle);
        self
    }

    pub fn rate_limit(mut self, qps: f64, burst: u32) -> Self {
        self.config.resilience.rate_limit_qps = qps;
        self.config.resilience.rate_limit_burst = burst;
        self
    }

    pub fn circuit(
        mut self,
        window_size: usize,
        min_calls: usize,
        failure_rate_threshold: u8,
        open_wait: Duration,
    ) -> Self {
        let r = &mut self.config.resilience;
        r.circuit_enabled = true;
        r.circuit_window_size = window_size;
        r.circuit_min_calls = min_calls;
        r.circuit_failure_rate_threshold = failure_rate_threshold;
        r.circuit_open_wait_ms = millis(open_wait);
        self
    }

    pub fn circuit_enabled(mut self, enabled: bool) -> Self {
        self.config.resilience.circuit_enabled = enabled;
        self
    }

    pub fn circuit_half_open_max_calls(mut self, calls: usize) -> Self {
        self.config.resilience.circuit_half_open_max_calls = calls;
        self
    }

    pub fn circuit_record_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.config.resilience.circuit_record_statuses = statuses.into_iter().collect();
        self
    }

    pub fn bulkhead(mut self, max_concurrent: usize, queue_size: usize, acquire_timeout: Duration) -> Self {
        let r = &mut self.config.resilience;
        r.bulkhead_enabled = true;
        r.bulkhead_max_concurrent = max_concurrent;
        r.bulkhead_queue_size = queue_size;
        r.bulkhead_acquire_timeout_ms = millis(acquire_timeout);
        self
    }

    pub fn bulkhead_enabled(mut self, enabled: bool) -> Self {
        self.config.resilience.bulkhead_enabled = enabled;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.insert(name.into(), value.into());
        self
    }

    pub fn build(self) -> Result<GlobalConfig, HttpError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ============================================================================
// Client layer
// ============================================================================

/// Named override set. Immutable once registered; replaced only by re-registration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: Option<String>,
    pub auth: Option<Auth>,
    pub tls: Option<TlsMaterial>,
    pub user_agent: Option<String>,
    pub default_headers: BTreeMap<String, String>,
    pub call: CallOverrides,
    pub resilience: ResilienceOverrides,
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Field-level checks; resilience cross-checks need the global layer.
    pub fn validate(&self) -> Result<(), HttpError> {
        if let Some(base) = &self.base_url {
            url::Url::parse(base)
                .map_err(|e| HttpError::InvalidArgument(format!("invalid base_url '{base}': {e}")))?;
        }
        if let Some(ua) = &self.user_agent {
            validate_header_value("user-agent", ua)?;
        }
        validate_headers(&self.default_headers)?;
        self.call.validate()
    }
}

/// Builder for [`ClientConfig`]; `build` validates.
#[derive(Debug, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = Some(url.into());
        self
    }

    pub fn bearer_token(mut self, token: impl Into<String>) -> Self {
        self.config.auth = Some(Auth::Bearer { token: token.into() });
        self
    }

    pub fn basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.auth = Some(Auth::Basic { username: username.into(), password: password.into() });
        self
    }

    pub fn tls(mut self, tls: TlsMaterial) -> Self {
        self.config.tls = Some(tls);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.insert(name.into(), value.into());
        self
    }

    pub fn call(mut self, overrides: CallOverrides) -> Self {
        self.config.call = overrides;
        self
    }

    pub fn resilience(mut self, overrides: ResilienceOverrides) -> Self {
        self.config.resilience = overrides;
        self
    }

    pub fn build(self) -> Result<ClientConfig, HttpError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ============================================================================
// Validation helpers
// ============================================================================

fn validate_header_name(name: &str) -> Result<HeaderName, HttpError> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| HttpError::InvalidArgument(format!("invalid header name '{name}'")))
}

fn validate_header_value(name: &str, value: &str) -> Result<HeaderValue, HttpError> {
    HeaderValue::from_str(value)
        .map_err(|_| HttpError::InvalidArgument(format!("invalid value for header '{name}'")))
}

fn validate_headers(headers: &BTreeMap<String, String>) -> Result<(), HttpError> {
    for (name, value) in headers {
        validate_header_name(name)?;
        validate_header_value(name, value)?;
    }
    Ok(())
}

fn validate_methods(methods: &BTreeSet<String>) -> Result<(), HttpError> {
    for method in methods {
        Method::from_bytes(method.as_bytes())
            .map_err(|_| HttpError::InvalidArgument(format!("invalid retry method '{method}'")))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorCode;

    #[test]
    fn defaults_are_valid() {
        GlobalConfig::default().validate().expect("defaults validate");
        assert!(GlobalConfig::default().call.retry_methods.contains("GET"));
        assert!(!GlobalConfig::default().call.retry_methods.contains("POST"));
    }

    #[test]
    fn builder_rejects_backoff_max_below_base() {
        let err = GlobalConfig::builder()
            .retry_backoff(Duration::from_secs(2), Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn builder_rejects_zero_burst_with_rate() {
        let err = GlobalConfig::builder().rate_limit(5.0, 0).build().unwrap_err();
        assert!(err.to_string().contains("rate_limit_burst"));
    }

    #[test]
    fn builder_rejects_threshold_out_of_range() {
        let err = GlobalConfig::builder()
            .circuit(10, 5, 0, Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("circuit_failure_rate_threshold"));

        let err = GlobalConfig::builder()
            .circuit(10, 5, 101, Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn builder_rejects_min_calls_beyond_window() {
        let err = GlobalConfig::builder()
            .circuit(3, 5, 50, Duration::from_secs(1))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
        assert!(err.to_string().contains("circuit_min_calls"));

        assert!(GlobalConfig::builder().circuit(5, 5, 50, Duration::from_secs(1)).build().is_ok());
    }

    #[test]
    fn builder_rejects_bad_headers() {
        let err = GlobalConfig::builder().default_header("bad header", "x").build().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn client_builder_validates_base_url() {
        let err = ClientConfig::builder().base_url("not a url").build().unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);

        let ok = ClientConfig::builder().base_url("https://api.example.com/v1").build();
        assert!(ok.is_ok());
    }

    #[test]
    fn methods_are_normalized() {
        let overrides = CallOverrides::new().retry_methods(["post", " get "]);
        let methods = overrides.retry_methods.unwrap();
        assert!(methods.contains("POST"));
        assert!(methods.contains("GET"));
    }

    #[test]
    fn resilience_overrides_fall_through_per_field() {
        let global = ResilienceSettings::default();
        let overrides = ResilienceOverrides::new().rate_limit(3.0, 1);
        let resolved = overrides.resolve(&global);
        assert_eq!(resolved.rate_limit_qps, 3.0);
        assert_eq!(resolved.rate_limit_burst, 1);
        assert_eq!(resolved.circuit_window_size, global.circuit_window_size);
        assert_eq!(resolved.bulkhead_enabled, global.bulkhead_enabled);
    }

    #[test]
    fn basic_auth_is_base64_encoded() {
        let auth = Auth::Basic { username: "user".into(), password: "pass".into() };
        assert_eq!(auth.header_value(), "Basic dXNlcjpwYXNz");
        assert!(!format!("{auth:?}").contains("pass\""));
    }

    #[test]
    fn tls_identity_is_stable_and_content_sensitive() {
        let a = TlsMaterial { ca_pem: Some(b"ca".to_vec()), ..Default::default() };
        let b = a.clone();
        let c = TlsMaterial { ca_pem: Some(b"other".to_vec()), ..Default::default() };
        assert_eq!(a.identity(), b.identity());
        assert_ne!(a.identity(), c.identity());
    }

    #[test]
    fn global_config_round_trips_through_serde() {
        let config = GlobalConfig::builder().max_retries(7).build().unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let back: GlobalConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);

        let partial: GlobalConfig = serde_json::from_str(r#"{"call":{"max_retries":1}}"#).unwrap();
        assert_eq!(partial.call.max_retries, 1);
        assert_eq!(partial.call.connect_timeout_ms, DEFAULT_CONNECT_TIMEOUT_MS);
    }
}
