use crate::error::ErrorCode;
use serde::Serialize;
use std::fmt;

/// Events emitted while executing a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CallEvent {
    /// A logical call finished, successfully or not.
    Completed {
        client: String,
        method: String,
        url: String,
        /// Final status when the terminal attempt produced one.
        status: Option<u16>,
        /// Error code when the call surfaced an error.
        error: Option<ErrorCode>,
        retries: u32,
        cost_ms: u64,
    },
    /// The retry controller chose to retry after `attempt` (0-based).
    RetryScheduled {
        client: String,
        attempt: u32,
        delay_ms: u64,
        status: Option<u16>,
        error: Option<ErrorCode>,
    },
    /// The token bucket was empty.
    RateLimited { client: String, retry_in_ms: u64 },
    /// The breaker tripped from CLOSED or a trial failed.
    CircuitOpened { client: String },
    /// The open wait elapsed and probing began.
    CircuitHalfOpen { client: String },
    /// Enough trials succeeded.
    CircuitClosed { client: String },
    /// No permit or queue slot was available.
    BulkheadRejected { client: String, active: usize, max: usize, timed_out: bool },
}

impl CallEvent {
    /// Client the event belongs to.
    pub fn client(&self) -> &str {
        match self {
            CallEvent::Completed { client, .. }
            | CallEvent::RetryScheduled { client, .. }
            | CallEvent::RateLimited { client, .. }
            | CallEvent::CircuitOpened { client }
            | CallEvent::CircuitHalfOpen { client }
            | CallEvent::CircuitClosed { client }
            | CallEvent::BulkheadRejected { client, .. } => client,
        }
    }

    /// Stable snake_case name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            CallEvent::Completed { .. } => "completed",
            CallEvent::RetryScheduled { .. } => "retry_scheduled",
            CallEvent::RateLimited { .. } => "rate_limited",
            CallEvent::CircuitOpened { .. } => "circuit_opened",
            CallEvent::CircuitHalfOpen { .. } => "circuit_half_open",
            CallEvent::CircuitClosed { .. } => "circuit_closed",
            CallEvent::BulkheadRejected { .. } => "bulkhead_rejected",
        }
    }
}

impl fmt::Display for CallEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallEvent::Completed { client, method, url, status, error, retries, cost_ms } => {
                write!(f, "[{client}] {method} {url} -> ")?;
                match (status, error) {
                    (_, Some(code)) => write!(f, "{code}")?,
                    (Some(status), None) => write!(f, "{status}")?,
                    (None, None) => f.write_str("?")?,
                }
                write!(f, " in {cost_ms}ms after {retries} retries")
            }
            CallEvent::RetryScheduled { client, attempt, delay_ms, .. } => {
                write!(f, "[{client}] retry after attempt {attempt} in {delay_ms}ms")
            }
            CallEvent::RateLimited { client, retry_in_ms } => {
                write!(f, "[{client}] rate limited, next token in {retry_in_ms}ms")
            }
            CallEvent::CircuitOpened { client } => write!(f, "[{client}] circuit opened"),
            CallEvent::CircuitHalfOpen { client } => write!(f, "[{client}] circuit half-open"),
            CallEvent::CircuitClosed { client } => write!(f, "[{client}] circuit closed"),
            CallEvent::BulkheadRejected { client, active, max, timed_out } => {
                write!(f, "[{client}] bulkhead rejected ({active}/{max}")?;
                if *timed_out {
                    f.write_str(", timed out")?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_completed() {
        let event = CallEvent::Completed {
            client: "billing".into(),
            method: "GET".into(),
            url: "https://x/y".into(),
            status: Some(200),
            error: None,
            retries: 2,
            cost_ms: 15,
        };
        assert_eq!(event.to_string(), "[billing] GET https://x/y -> 200 in 15ms after 2 retries");
        assert_eq!(event.client(), "billing");
        assert_eq!(event.kind(), "completed");
    }

    #[test]
    fn test_display_error_wins_over_status() {
        let event = CallEvent::Completed {
            client: "c".into(),
            method: "GET".into(),
            url: "u".into(),
            status: Some(503),
            error: Some(ErrorCode::HttpStatus),
            retries: 0,
            cost_ms: 1,
        };
        assert!(event.to_string().contains("HTTP_STATUS"));
    }

    #[test]
    fn test_serializes_tagged() {
        let event = CallEvent::BulkheadRejected { client: "c".into(), active: 1, max: 1, timed_out: true };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "bulkhead_rejected");
        assert_eq!(json["timed_out"], true);
        assert_eq!(event.to_string(), "[c] bulkhead rejected (1/1, timed out)");

        let event = CallEvent::RetryScheduled {
            client: "c".into(),
            attempt: 0,
            delay_ms: 100,
            status: None,
            error: Some(ErrorCode::NetworkError),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["error"], "NETWORK_ERROR");
    }
}
