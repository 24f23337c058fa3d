//! Convenient re-exports for common Nine Lives HTTP types.
pub use crate::{
    config::{Auth, CallOverrides, ClientConfig, GlobalConfig, ResilienceOverrides, TlsMaterial},
    error::{ErrorCode, HttpError, TransportError},
    metrics::MetricsSnapshot,
    request::Request,
    response::Response,
    runtime::{ClientScope, HttpRuntime},
    telemetry::{CallEvent, TelemetrySink},
    transport::{SharedTransport, Transport, TransportFactory, TransportRequest, TransportResponse},
    CircuitState,
};
