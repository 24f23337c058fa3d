//! Effective policy resolution.
//!
//! [`EffectivePolicy::resolve`] merges the three configuration layers field by field: the
//! request value wins if set, then the client value, then the global default. Fields are
//! independent, so one policy may take its timeout from the request, its retry bound from the
//! client, and its backoff from the global layer. Resolution is a pure function and the result
//! is immutable; the engine resolves once per logical call and reuses it for every attempt.

use crate::backoff::Backoff;
use crate::bulkhead::BulkheadConfig;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::config::{CallOverrides, ClientConfig, GlobalConfig, ResilienceSettings, SAFE_METHODS};
use crate::error::HttpError;
use crate::jitter::Jitter;
use crate::rate_limit::RateLimitConfig;
use http::header::HeaderName;
use http::Method;
use std::collections::BTreeSet;
use std::time::Duration;

/// Resolved settings governing one logical call.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub struct EffectivePolicy {
    pub client: String,
    pub connect_timeout: Duration,
    pub total_timeout: Duration,
    /// `None` when the engine-imposed read timeout is disabled.
    pub read_timeout: Option<Duration>,
    pub max_retries: u32,
    pub backoff: Backoff,
    pub jitter: Jitter,
    pub max_retry_delay: Duration,
    pub retry_on_network_error: bool,
    pub retry_on_timeout: bool,
    pub respect_retry_after: bool,
    pub require_idempotency_key: bool,
    pub idempotency_key_header: HeaderName,
    pub retry_on_statuses: BTreeSet<u16>,
    pub retry_methods: BTreeSet<String>,
    pub fail_on_non_2xx: bool,
    pub follow_redirects: bool,
    /// `None` when unlimited.
    pub max_response_body_bytes: Option<u64>,
    /// `None` when idle eviction is disabled.
    pub idle_evict: Option<Duration>,
    pub rate_limit: Option<RateLimitConfig>,
    pub circuit: Option<CircuitBreakerConfig>,
    pub bulkhead: Option<BulkheadConfig>,
}

fn layered<T: Clone>(request: &Option<T>, client: Option<&Option<T>>, global: &T) -> T {
    request
        .clone()
        .or_else(|| client.and_then(Clone::clone))
        .unwrap_or_else(|| global.clone())
}

impl EffectivePolicy {
    /// Merge `request` over `client` over `global`.
    pub fn resolve(
        global: &GlobalConfig,
        client_name: &str,
        client: Option<&ClientConfig>,
        request: &CallOverrides,
    ) -> Result<Self, HttpError> {
        let client_call = client.map(|c| &c.call);
        let g = &global.call;

        macro_rules! pick {
            ($field:ident) => {
                layered(&request.$field, client_call.map(|c| &c.$field), &g.$field)
            };
        }

        let backoff = Backoff::new(
            Duration::from_millis(pick!(retry_backoff_base_ms)),
            Duration::from_millis(pick!(retry_backoff_max_ms)),
        )
        .map_err(|e| HttpError::InvalidArgument(e.to_string()))?;

        let header: String = pick!(idempotency_key_header);
        let idempotency_key_header = HeaderName::from_bytes(header.as_bytes())
            .map_err(|_| HttpError::InvalidArgument(format!("invalid idempotency header '{header}'")))?;

        let resilience = match client {
            Some(c) => c.resilience.resolve(&global.resilience),
            None => global.resilience.clone(),
        };
        resilience.validate()?;

        let read_timeout_ms: u64 = pick!(read_timeout_ms);
        let max_body: u64 = pick!(max_response_body_bytes);

        Ok(Self {
            client: client_name.to_string(),
            connect_timeout: Duration::from_millis(pick!(connect_timeout_ms)),
            total_timeout: Duration::from_millis(pick!(total_timeout_ms)),
            read_timeout: (read_timeout_ms > 0).then(|| Duration::from_millis(read_timeout_ms)),
            max_retries: pick!(max_retries),
            backoff,
            jitter: Jitter::from_enabled(pick!(retry_jitter_enabled)),
            max_retry_delay: Duration::from_millis(pick!(max_retry_delay_ms)),
            retry_on_network_error: pick!(retry_on_network_error),
            retry_on_timeout: pick!(retry_on_timeout),
            respect_retry_after: pick!(respect_retry_after),
            require_idempotency_key: pick!(require_idempotency_key_for_unsafe_retry),
            idempotency_key_header,
            retry_on_statuses: pick!(retry_on_statuses),
            retry_methods: pick!(retry_methods),
            fail_on_non_2xx: pick!(fail_on_non_2xx),
            follow_redirects: pick!(follow_redirects),
            max_response_body_bytes: (max_body > 0).then_some(max_body),
            idle_evict: (global.client_reuse_idle_evict_ms > 0)
                .then(|| Duration::from_millis(global.client_reuse_idle_evict_ms)),
            rate_limit: rate_limit_config(&resilience),
            circuit: circuit_config(&resilience),
            bulkhead: bulkhead_config(&resilience),
        })
    }

    /// Whether `method` may be retried at all.
    pub fn allows_method(&self, method: &Method) -> bool {
        self.retry_methods.contains(method.as_str())
    }

    /// Methods outside the safe set need an idempotency key before being retried.
    pub fn is_safe_method(method: &Method) -> bool {
        SAFE_METHODS.contains(&method.as_str())
    }
}

fn rate_limit_config(r: &ResilienceSettings) -> Option<RateLimitConfig> {
    (r.rate_limit_qps > 0.0).then_some(RateLimitConfig { qps: r.rate_limit_qps, burst: r.rate_limit_burst })
}

fn circuit_config(r: &ResilienceSettings) -> Option<CircuitBreakerConfig> {
    r.circuit_enabled.then(|| CircuitBreakerConfig {
        window_size: r.circuit_window_size,
        min_calls: r.circuit_min_calls,
        failure_rate_threshold: r.circuit_failure_rate_threshold,
        open_wait: Duration::from_millis(r.circuit_open_wait_ms),
        half_open_max_calls: r.circuit_half_open_max_calls,
        record_statuses: r.circuit_record_statuses.clone(),
    })
}

fn bulkhead_config(r: &ResilienceSettings) -> Option<BulkheadConfig> {
    r.bulkhead_enabled.then_some(BulkheadConfig {
        max_concurrent: r.bulkhead_max_concurrent,
        queue_size: r.bulkhead_queue_size,
        acquire_timeout: Duration::from_millis(r.bulkhead_acquire_timeout_ms),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ResilienceOverrides, DEFAULT_CLIENT};
    use crate::ErrorCode;

    fn global() -> GlobalConfig {
        GlobalConfig::builder()
            .connect_timeout(Duration::from_millis(1_000))
            .total_timeout(Duration::from_millis(9_000))
            .max_retries(1)
            .build()
            .unwrap()
    }

    #[test]
    fn global_only() {
        let policy =
            EffectivePolicy::resolve(&global(), DEFAULT_CLIENT, None, &CallOverrides::default()).unwrap();
        assert_eq!(policy.client, DEFAULT_CLIENT);
        assert_eq!(policy.connect_timeout, Duration::from_millis(1_000));
        assert_eq!(policy.max_retries, 1);
        assert_eq!(policy.idempotency_key_header, "idempotency-key");
        assert!(policy.rate_limit.is_none());
        assert!(policy.circuit.is_none());
        assert!(policy.bulkhead.is_none());
    }

    #[test]
    fn precedence_is_per_field() {
        let client = ClientConfig::builder()
            .call(CallOverrides::new().max_retries(5).connect_timeout(Duration::from_millis(2_000)))
            .build()
            .unwrap();
        let request = CallOverrides::new().max_retries(0);

        let policy = EffectivePolicy::resolve(&global(), "svc", Some(&client), &request).unwrap();
        // Request beats client.
        assert_eq!(policy.max_retries, 0);
        // Client beats global.
        assert_eq!(policy.connect_timeout, Duration::from_millis(2_000));
        // Global fills the rest.
        assert_eq!(policy.total_timeout, Duration::from_millis(9_000));
    }

    #[test]
    fn explicit_false_and_zero_are_not_unset() {
        let client = ClientConfig::builder()
            .call(CallOverrides::new().fail_on_non_2xx(false).read_timeout(Duration::ZERO))
            .build()
            .unwrap();
        let policy =
            EffectivePolicy::resolve(&global(), "svc", Some(&client), &CallOverrides::default()).unwrap();
        assert!(!policy.fail_on_non_2xx);
        assert_eq!(policy.read_timeout, None);

        let request = CallOverrides::new().fail_on_non_2xx(true);
        let policy = EffectivePolicy::resolve(&global(), "svc", Some(&client), &request).unwrap();
        assert!(policy.fail_on_non_2xx);
    }

    #[test]
    fn backoff_bounds_validated_after_merge() {
        let request = CallOverrides::new().retry_backoff(Duration::from_secs(5), Duration::from_secs(1));
        let err = EffectivePolicy::resolve(&global(), "svc", None, &request).unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn client_resilience_overrides_global() {
        let client = ClientConfig::builder()
            .resilience(
                ResilienceOverrides::new()
                    .rate_limit(2.0, 1)
                    .bulkhead(1, 0, Duration::from_millis(10))
                    .circuit(4, 2, 50, Duration::from_secs(1)),
            )
            .build()
            .unwrap();
        let policy =
            EffectivePolicy::resolve(&global(), "svc", Some(&client), &CallOverrides::default()).unwrap();
        assert_eq!(policy.rate_limit, Some(RateLimitConfig { qps: 2.0, burst: 1 }));
        assert_eq!(policy.bulkhead.map(|b| b.max_concurrent), Some(1));
        let circuit = policy.circuit.unwrap();
        assert_eq!(circuit.window_size, 4);
        assert_eq!(circuit.half_open_max_calls, 2);
        assert!(circuit.record_statuses.contains(&503));
    }

    #[test]
    fn invalid_client_resilience_is_rejected_at_resolution() {
        let client = ClientConfig::builder()
            .resilience(ResilienceOverrides::new().rate_limit(1.0, 0))
            .build()
            .unwrap();
        let err = EffectivePolicy::resolve(&global(), "svc", Some(&client), &CallOverrides::default())
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArgument);
    }

    #[test]
    fn method_sets() {
        let policy =
            EffectivePolicy::resolve(&global(), "svc", None, &CallOverrides::default()).unwrap();
        assert!(policy.allows_method(&Method::GET));
        assert!(!policy.allows_method(&Method::POST));
        assert!(EffectivePolicy::is_safe_method(&Method::PUT));
        assert!(!EffectivePolicy::is_safe_method(&Method::PATCH));
    }
}
