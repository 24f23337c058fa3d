//! Execution engine.
//!
//! One logical call runs this pipeline:
//!
//! 1. resolve the [`EffectivePolicy`] and prepare URL and headers;
//! 2. token bucket (never waits);
//! 3. circuit breaker admission;
//! 4. bulkhead permit (the only gate that may wait);
//! 5. attempt loop: cached transport handle, send under the read timeout, size check, retry
//!    controller, sleep;
//! 6. breaker outcome and metrics, exactly once for the terminal attempt;
//! 7. `HTTP_STATUS` for a non-2xx final status when `fail_on_non_2xx` is set.
//!
//! Admission rejections never reach the transport, never retry, and never touch the breaker
//! window. The bulkhead permit and breaker trial slot are RAII guards, so they are released on
//! every exit path, including when the caller drops the future.

use crate::bulkhead::{Bulkhead, BulkheadPermit};
use crate::circuit_breaker::{CircuitBreaker, CircuitPermit, CircuitState};
use crate::clock::Clock;
use crate::config::{ClientConfig, GlobalConfig, DEFAULT_CLIENT};
use crate::error::{ErrorCode, HttpError};
use crate::handle_cache::{HandleCache, HandleKey};
use crate::metrics::MetricsRegistry;
use crate::policy::EffectivePolicy;
use crate::rate_limit::{Decision, TokenBucket};
use crate::registry::StateRegistry;
use crate::request::Request;
use crate::response::Response;
use crate::retry::{AttemptOutcome, RetryController, RetryDecision};
use crate::sleeper::Sleeper;
use crate::snapshot::RuntimeConfig;
use crate::telemetry::{CallEvent, SharedSink};
use crate::transport::{TransportFactory, TransportRequest, TransportResponse};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, AUTHORIZATION, USER_AGENT};
use http::{HeaderMap, Method};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Shared machinery behind an [`HttpRuntime`](crate::HttpRuntime).
pub(crate) struct Engine {
    pub(crate) factory: Arc<dyn TransportFactory>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) sleeper: Arc<dyn Sleeper>,
    pub(crate) sink: SharedSink,
    pub(crate) handles: HandleCache,
    pub(crate) limiters: StateRegistry<TokenBucket>,
    pub(crate) breakers: StateRegistry<CircuitBreaker>,
    pub(crate) bulkheads: StateRegistry<Bulkhead>,
    pub(crate) metrics: MetricsRegistry,
}

/// Request ready for the transport, shared by every attempt.
#[derive(Debug)]
struct Prepared {
    method: Method,
    url: url::Url,
    headers: HeaderMap,
    body: Option<Bytes>,
    tls: Option<crate::config::TlsMaterial>,
}

impl Engine {
    /// Drop every piece of per-client runtime state.
    pub(crate) fn clear_client_state(&self) {
        self.limiters.clear();
        self.breakers.clear();
        self.bulkheads.clear();
        self.handles.clear();
    }

    pub(crate) fn forget_client(&self, name: &str) {
        self.limiters.remove(name);
        self.breakers.remove(name);
        self.bulkheads.remove(name);
        self.handles.remove_client(name);
    }

    pub(crate) fn resolve(
        &self,
        config: &RuntimeConfig,
        request: &Request,
    ) -> Result<(EffectivePolicy, Option<Arc<ClientConfig>>), HttpError> {
        let client_name = request.client_name().unwrap_or(DEFAULT_CLIENT);
        let client = match config.clients.get(client_name) {
            Some(client) => Some(Arc::clone(client)),
            None if client_name == DEFAULT_CLIENT => None,
            None => return Err(HttpError::Config(format!("unknown client '{client_name}'"))),
        };
        let policy =
            EffectivePolicy::resolve(&config.global, client_name, client.as_deref(), request.call_overrides())?;
        Ok((policy, client))
    }

    pub(crate) async fn execute(&self, config: &RuntimeConfig, mut request: Request) -> Result<Response, HttpError> {
        if let Some(err) = request.take_deferred() {
            return Err(err);
        }
        let (policy, client) = self.resolve(config, &request)?;
        let prepared = prepare(&config.global, client.as_deref(), &policy, request)?;
        let started_ms = self.clock.now_millis();

        if self.handles.tick() {
            if let Some(idle) = policy.idle_evict {
                self.handles.evict_idle(started_ms, idle);
            }
        }

        let epoch = config.state_epoch(&policy.client);
        self.check_rate_limit(&policy, epoch, started_ms).await?;
        let circuit_permit = self.admit_circuit(&policy, epoch, started_ms).await?;
        let bulkhead_permit = self.acquire_bulkhead(&policy, epoch).await?;

        let controller = RetryController::new(&policy, &prepared.method, &prepared.headers);
        let mut attempt: u32 = 0;
        let outcome = loop {
            let result = self.attempt(&policy, &prepared).await;
            let decision = match &result {
                Ok(resp) => controller.decide(
                    attempt,
                    AttemptOutcome::Status { status: resp.status, headers: &resp.headers },
                ),
                Err(err) => controller.decide(attempt, AttemptOutcome::Error(err)),
            };
            let delay = match decision {
                RetryDecision::Stop => break result,
                RetryDecision::Retry { delay } => delay,
            };

            self.metrics.record_retry();
            let (status, error) = match &result {
                Ok(resp) => (Some(resp.status), None),
                Err(err) => (None, Some(err.code())),
            };
            tracing::debug!(
                client = %policy.client,
                attempt,
                delay_ms = delay.as_millis() as u64,
                ?status,
                ?error,
                "retrying call"
            );
            self.sink
                .emit(CallEvent::RetryScheduled {
                    client: policy.client.clone(),
                    attempt,
                    delay_ms: duration_ms(delay),
                    status,
                    error,
                })
                .await;
            self.sleeper.sleep(delay).await;
            attempt += 1;
        };

        let finished_ms = self.clock.now_millis();
        if let Some(permit) = circuit_permit {
            self.record_circuit(&policy, permit, &outcome, finished_ms).await;
        }
        drop(bulkhead_permit);

        let cost_ms = finished_ms.saturating_sub(started_ms);
        self.complete(&policy, &prepared, outcome, attempt, cost_ms).await
    }

    async fn check_rate_limit(&self, policy: &EffectivePolicy, epoch: u64, now_ms: u64) -> Result<(), HttpError> {
        let Some(config) = policy.rate_limit else {
            return Ok(());
        };
        let bucket = self.limiters.get_or_insert_with(&policy.client, epoch, || TokenBucket::new(config, now_ms));
        match bucket.try_acquire(now_ms) {
            Decision::Allowed { .. } => Ok(()),
            Decision::Denied { wait } => {
                tracing::debug!(client = %policy.client, retry_in_ms = duration_ms(wait), "rate limited");
                self.metrics.record_rejection(ErrorCode::RateLimited);
                self.sink
                    .emit(CallEvent::RateLimited { client: policy.client.clone(), retry_in_ms: duration_ms(wait) })
                    .await;
                Err(HttpError::RateLimited { client: policy.client.clone(), retry_in: wait })
            }
        }
    }

    async fn admit_circuit(
        &self,
        policy: &EffectivePolicy,
        epoch: u64,
        now_ms: u64,
    ) -> Result<Option<CircuitPermit>, HttpError> {
        let Some(config) = &policy.circuit else {
            return Ok(None);
        };
        let breaker = self
            .breakers
            .get_or_insert_with(&policy.client, epoch, || CircuitBreaker::new(policy.client.clone(), config.clone()));
        match breaker.check_admit(now_ms) {
            Ok(permit) => {
                if permit.transition() == Some(CircuitState::HalfOpen) {
                    self.sink.emit(CallEvent::CircuitHalfOpen { client: policy.client.clone() }).await;
                }
                Ok(Some(permit))
            }
            Err(rejection) => {
                tracing::debug!(client = %policy.client, state = ?rejection.state, "circuit breaker rejected call");
                self.metrics.record_rejection(ErrorCode::CircuitOpen);
                Err(HttpError::CircuitOpen { client: policy.client.clone(), open_for: rejection.open_for })
            }
        }
    }

    async fn acquire_bulkhead(&self, policy: &EffectivePolicy, epoch: u64) -> Result<Option<BulkheadPermit>, HttpError> {
        let Some(config) = policy.bulkhead else {
            return Ok(None);
        };
        let bulkhead = self.bulkheads.get_or_insert_with(&policy.client, epoch, || Bulkhead::new(config));
        match bulkhead.acquire().await {
            Ok(permit) => Ok(Some(permit)),
            Err(rejection) => {
                tracing::debug!(
                    client = %policy.client,
                    active = rejection.active,
                    max = rejection.max,
                    timed_out = rejection.timed_out,
                    "bulkhead rejected call"
                );
                self.metrics.record_rejection(ErrorCode::BulkheadRejected);
                self.sink
                    .emit(CallEvent::BulkheadRejected {
                        client: policy.client.clone(),
                        active: rejection.active,
                        max: rejection.max,
                        timed_out: rejection.timed_out,
                    })
                    .await;
                Err(HttpError::BulkheadRejected {
                    client: policy.client.clone(),
                    active: rejection.active,
                    max: rejection.max,
                })
            }
        }
    }

    async fn attempt(&self, policy: &EffectivePolicy, prepared: &Prepared) -> Result<TransportResponse, HttpError> {
        let key = HandleKey::for_policy(policy, prepared.tls.as_ref());
        let transport = self.handles.get_or_create(&key, self.clock.now_millis(), |key| self.factory.build(key))?;

        let send = transport.send(TransportRequest {
            method: prepared.method.clone(),
            url: prepared.url.clone(),
            headers: prepared.headers.clone(),
            body: prepared.body.clone(),
            connect_timeout: policy.connect_timeout,
            total_timeout: policy.total_timeout,
            follow_redirects: policy.follow_redirects,
            tls: prepared.tls.clone(),
        });
        let response = match policy.read_timeout {
            // Dropping the send future on expiry cancels the in-flight attempt.
            Some(timeout) => tokio::time::timeout(timeout, send)
                .await
                .map_err(|_| HttpError::ReadTimeout { timeout })??,
            None => send.await?,
        };

        if let Some(limit) = policy.max_response_body_bytes {
            let actual = response.body.len() as u64;
            if actual > limit {
                return Err(HttpError::ResponseTooLarge { limit, actual });
            }
        }
        Ok(response)
    }

    async fn record_circuit(
        &self,
        policy: &EffectivePolicy,
        permit: CircuitPermit,
        outcome: &Result<TransportResponse, HttpError>,
        now_ms: u64,
    ) {
        let failure = match outcome {
            Ok(resp) => policy.circuit.as_ref().is_some_and(|c| c.is_failure_status(resp.status)),
            Err(err) if err.is_transport_failure() => true,
            Err(HttpError::ResponseTooLarge { .. }) => false,
            // Local failures (handle construction) say nothing about the remote side.
            Err(_) => return,
        };
        let client = policy.client.clone();
        match permit.record(now_ms, failure) {
            Some(CircuitState::Open) => self.sink.emit(CallEvent::CircuitOpened { client }).await,
            Some(CircuitState::Closed) => self.sink.emit(CallEvent::CircuitClosed { client }).await,
            Some(CircuitState::HalfOpen) | None => {}
        }
    }

    async fn complete(
        &self,
        policy: &EffectivePolicy,
        prepared: &Prepared,
        outcome: Result<TransportResponse, HttpError>,
        retries: u32,
        cost_ms: u64,
    ) -> Result<Response, HttpError> {
        let (result, status, error) = match outcome {
            Ok(raw) => {
                self.metrics.record_response(raw.status, cost_ms);
                let status = raw.status;
                let response = Response::new(raw.status, raw.headers, raw.body)
                    .with_call_stats(retries, Duration::from_millis(cost_ms));
                if policy.fail_on_non_2xx && !response.is_success() {
                    let err = HttpError::HttpStatus { status, response: Box::new(response) };
                    (Err(err), Some(status), Some(ErrorCode::HttpStatus))
                } else {
                    (Ok(response), Some(status), None)
                }
            }
            Err(err) => {
                self.metrics.record_failure(&err, cost_ms);
                let code = err.code();
                (Err(err), None, Some(code))
            }
        };

        tracing::info!(
            client = %policy.client,
            method = %prepared.method,
            url = %prepared.url,
            status = status.unwrap_or(0),
            error = error.map(ErrorCode::as_str).unwrap_or(""),
            cost_ms,
            retries,
            "http call completed"
        );
        self.sink
            .emit(CallEvent::Completed {
                client: policy.client.clone(),
                method: prepared.method.to_string(),
                url: prepared.url.to_string(),
                status,
                error,
                retries,
                cost_ms,
            })
            .await;
        result
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Build the outgoing URL and headers from the request and its configuration layers.
fn prepare(
    global: &GlobalConfig,
    client: Option<&ClientConfig>,
    policy: &EffectivePolicy,
    request: Request,
) -> Result<Prepared, HttpError> {
    let url = resolve_url(client.and_then(|c| c.base_url.as_deref()), request.url())?;

    let mut headers = HeaderMap::new();
    insert_all(&mut headers, &global.default_headers)?;
    if let Some(client) = client {
        insert_all(&mut headers, &client.default_headers)?;
    }
    for (name, value) in request.headers() {
        headers.insert(name.clone(), value.clone());
    }

    if !request.headers().contains_key(USER_AGENT) {
        let user_agent = client.and_then(|c| c.user_agent.as_deref()).unwrap_or(&global.user_agent);
        headers.insert(USER_AGENT, header_value(USER_AGENT.as_str(), user_agent)?);
    }
    if let Some(auth) = client.and_then(|c| c.auth.as_ref()) {
        if !headers.contains_key(AUTHORIZATION) {
            let mut value = header_value(AUTHORIZATION.as_str(), &auth.header_value())?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
    }
    if let Some(key) = request.idempotency_key_value() {
        if !headers.contains_key(&policy.idempotency_key_header) {
            let value = header_value(policy.idempotency_key_header.as_str(), key)?;
            headers.insert(policy.idempotency_key_header.clone(), value);
        }
    }

    Ok(Prepared {
        method: request.method().clone(),
        url,
        headers,
        body: request.body_bytes().cloned(),
        tls: client.and_then(|c| c.tls.clone()),
    })
}

fn insert_all(headers: &mut HeaderMap, source: &BTreeMap<String, String>) -> Result<(), HttpError> {
    for (name, value) in source {
        let header = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| HttpError::InvalidArgument(format!("invalid header name '{name}'")))?;
        headers.insert(header, header_value(name, value)?);
    }
    Ok(())
}

fn header_value(name: &str, value: &str) -> Result<HeaderValue, HttpError> {
    HeaderValue::from_str(value).map_err(|_| HttpError::InvalidArgument(format!("invalid value for header '{name}'")))
}

/// Absolute `http(s)` URLs are used verbatim; anything else is appended to the base URL.
fn resolve_url(base: Option<&str>, target: &str) -> Result<url::Url, HttpError> {
    let lower = target.to_ascii_lowercase();
    let full = if lower.starts_with("http://") || lower.starts_with("https://") {
        target.to_string()
    } else {
        let base = base.ok_or_else(|| {
            HttpError::InvalidArgument(format!("relative url '{target}' requires a client base_url"))
        })?;
        match (base.ends_with('/'), target.starts_with('/')) {
            (true, true) => format!("{}{}", base.trim_end_matches('/'), target),
            (false, false) if !target.is_empty() => format!("{base}/{target}"),
            _ => format!("{base}{target}"),
        }
    };
    url::Url::parse(&full).map_err(|e| HttpError::InvalidArgument(format!("invalid url '{full}': {e}")))
}
