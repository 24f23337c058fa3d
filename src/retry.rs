//! Retry controller.
//!
//! Consulted after every attempt of a logical call with the 0-based attempt index and either
//! the response status or the classified error. Gates, in order:
//! - stop once `attempt >= max_retries`;
//! - the request method must be in the retry-methods set, and a method outside the safe set
//!   (GET/HEAD/OPTIONS/PUT/DELETE/TRACE) also needs a non-blank idempotency header when
//!   `require_idempotency_key` is set;
//! - a status is retried iff it is in the retry-on-statuses set;
//! - an error is retried iff it is a network error with `retry_on_network_error`, or one of
//!   the timeout codes with `retry_on_timeout`.
//!
//! Delay: a parseable `Retry-After` header (delta-seconds or HTTP-date) replaces the backoff
//! when `respect_retry_after` is set; otherwise `backoff.delay(attempt)` plus jitter. Either
//! way the delay is clamped to `max_retry_delay`.
//!
//! Decisions are pure apart from the jitter RNG and wall clock, both injectable through
//! [`RetryController::decide_with`].

use crate::error::{ErrorCode, HttpError};
use crate::policy::EffectivePolicy;
use http::header::RETRY_AFTER;
use http::{HeaderMap, Method};
use rand::Rng;
use std::time::{Duration, SystemTime};

/// What the last attempt produced.
#[derive(Debug, Clone, Copy)]
pub enum AttemptOutcome<'a> {
    Status { status: u16, headers: &'a HeaderMap },
    Error(&'a HttpError),
}

/// Verdict for the last attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Stop,
}

/// Retry decisions for one logical call.
#[derive(Debug)]
pub struct RetryController<'a> {
    policy: &'a EffectivePolicy,
    method_eligible: bool,
}

impl<'a> RetryController<'a> {
    /// `headers` are the outgoing request headers, checked for the idempotency key.
    pub fn new(policy: &'a EffectivePolicy, method: &Method, headers: &HeaderMap) -> Self {
        let method_eligible = policy.allows_method(method)
            && (EffectivePolicy::is_safe_method(method)
                || !policy.require_idempotency_key
                || has_idempotency_key(headers, policy));
        Self { policy, method_eligible }
    }

    /// Method gate result, independent of the outcome.
    pub fn method_eligible(&self) -> bool {
        self.method_eligible
    }

    pub fn decide(&self, attempt: u32, outcome: AttemptOutcome<'_>) -> RetryDecision {
        self.decide_with(attempt, outcome, SystemTime::now(), &mut rand::rng())
    }

    pub fn decide_with<R: Rng>(
        &self,
        attempt: u32,
        outcome: AttemptOutcome<'_>,
        now: SystemTime,
        rng: &mut R,
    ) -> RetryDecision {
        if attempt >= self.policy.max_retries || !self.method_eligible {
            return RetryDecision::Stop;
        }
        let retry_after_headers = match outcome {
            AttemptOutcome::Status { status, headers } => {
                if !self.policy.retry_on_statuses.contains(&status) {
                    return RetryDecision::Stop;
                }
                Some(headers)
            }
            AttemptOutcome::Error(err) => {
                let eligible = match err.code() {
                    ErrorCode::NetworkError => self.policy.retry_on_network_error,
                    code if code.is_timeout() => self.policy.retry_on_timeout,
                    _ => false,
                };
                if !eligible {
                    return RetryDecision::Stop;
                }
                None
            }
        };
        RetryDecision::Retry { delay: self.delay_with(attempt, retry_after_headers, now, rng) }
    }

    /// Delay before the attempt following `attempt`.
    pub fn delay_with<R: Rng>(
        &self,
        attempt: u32,
        response_headers: Option<&HeaderMap>,
        now: SystemTime,
        rng: &mut R,
    ) -> Duration {
        let policy = self.policy;
        if policy.respect_retry_after {
            let hinted = response_headers
                .and_then(|h| h.get(RETRY_AFTER))
                .and_then(|v| v.to_str().ok())
                .and_then(|v| parse_retry_after(v, now));
            if let Some(delay) = hinted {
                return delay.min(policy.max_retry_delay);
            }
        }
        let wait = policy.backoff.delay(attempt);
        policy.jitter.apply_with_rng(wait, rng).min(policy.max_retry_delay)
    }
}

fn has_idempotency_key(headers: &HeaderMap, policy: &EffectivePolicy) -> bool {
    headers
        .get(&policy.idempotency_key_header)
        .map(|v| !v.as_bytes().iter().all(u8::is_ascii_whitespace))
        .unwrap_or(false)
}

/// Parse a `Retry-After` value as delta-seconds or an HTTP-date relative to `now`.
///
/// Dates in the past yield zero. Unparseable values yield `None`.
pub fn parse_retry_after(value: &str, now: SystemTime) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = httpdate::parse_http_date(value).ok()?;
    Some(at.duration_since(now).unwrap_or(Duration::ZERO))
}
