#![forbid(unsafe_code)]

//! # Nine Lives HTTP 🐱
//!
//! Resilient outbound HTTP execution: one runtime that turns a logical request plus three
//! layers of configuration (global, named client, per request) into a single effective policy,
//! then runs it against a pluggable transport.
//!
//! ## Features
//!
//! - **Layered configuration** resolved field by field: Request > Client > Global
//! - **Retries** with exponential backoff, jitter, `Retry-After`, and idempotency-key gating
//! - **Circuit breakers** over a sliding window of outcomes, with half-open probing
//! - **Rate limiting** through a non-blocking token bucket per client
//! - **Bulkheads** with an optional bounded wait queue
//! - **Transport-handle reuse** keyed by connection fingerprint, with idle eviction
//! - **Metrics and telemetry** via a snapshot registry and `tower` event sinks
//!
//! ## Quick Start
//!
//! ```rust
//! use ninelives_http::{ClientConfig, GlobalConfig, HttpRuntime, Request, ResilienceOverrides};
//! use ninelives_http::transport::{Transport, TransportRequest, TransportResponse};
//! use ninelives_http::TransportError;
//!
//! struct Upstream;
//!
//! #[async_trait::async_trait]
//! impl Transport for Upstream {
//!     async fn send(&self, req: TransportRequest) -> Result<TransportResponse, TransportError> {
//!         Ok(TransportResponse::new(200, req.url.path().to_string()))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let runtime = HttpRuntime::new(ninelives_http::SharedTransport::new(Upstream));
//!     runtime.init(GlobalConfig::builder().max_retries(3).build().unwrap()).unwrap();
//!     runtime
//!         .register_client(
//!             "billing",
//!             ClientConfig::builder()
//!                 .base_url("https://billing.internal")
//!                 .resilience(ResilienceOverrides::new().rate_limit(50.0, 10))
//!                 .build()
//!                 .unwrap(),
//!         )
//!         .unwrap();
//!
//!     let billing = runtime.client("billing");
//!     let response = billing.execute(Request::get("/invoices")).await.unwrap();
//!     assert_eq!(response.text().unwrap(), "/invoices");
//!     assert_eq!(runtime.metrics().success_calls, 1);
//! }
//! ```

pub mod backoff;
pub mod bulkhead;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
mod engine;
pub mod error;
pub mod handle_cache;
pub mod jitter;
pub mod metrics;
pub mod policy;
pub mod prelude;
pub mod rate_limit;
pub mod registry;
pub mod request;
pub mod response;
pub mod retry;
pub mod runtime;
pub mod service;
pub mod sleeper;
pub mod snapshot;
pub mod telemetry;
pub mod transport;

// Re-exports
pub use backoff::Backoff;
pub use circuit_breaker::CircuitState;
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{
    Auth, CallOverrides, ClientConfig, GlobalConfig, ResilienceOverrides, TlsMaterial, DEFAULT_CLIENT,
};
pub use error::{ErrorCode, HttpError, TransportError};
pub use handle_cache::HandleKey;
pub use jitter::Jitter;
pub use metrics::MetricsSnapshot;
pub use policy::EffectivePolicy;
pub use request::Request;
pub use response::Response;
pub use runtime::{ClientScope, HttpRuntime, HttpRuntimeBuilder};
pub use service::RuntimeService;
pub use sleeper::{InstantSleeper, RecordingSleeper, Sleeper, TokioSleeper};
pub use telemetry::{CallEvent, LogSink, MemorySink, NullSink, TelemetrySink};
pub use transport::{SharedTransport, Transport, TransportFactory};
