//! Prometheus export for `ninelives-http`.
//!
//! Two pieces, both registering into a caller-owned [`prometheus::Registry`]:
//!
//! - [`PrometheusSink`] is a telemetry sink that counts [`CallEvent`]s by client and kind.
//! - [`MetricsExporter`] copies a [`MetricsSnapshot`] into gauges; call [`MetricsExporter::publish`]
//!   before each scrape.

use ninelives_http::telemetry::TelemetrySink;
use ninelives_http::{CallEvent, MetricsSnapshot};
use prometheus::{IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry};
use std::convert::Infallible;
use std::future::{ready, Ready};
use std::sync::Arc;
use std::task::{Context, Poll};

#[derive(Clone, Debug)]
pub struct PrometheusSink {
    registry: Arc<Registry>,
    events: IntCounterVec,
}

impl PrometheusSink {
    /// Create a sink and register its counter into the provided registry.
    ///
    /// # Errors
    /// Returns an error if the metric cannot be registered (e.g. name conflict).
    pub fn new<R: Into<Arc<Registry>>>(registry: R) -> Result<Self, prometheus::Error> {
        let registry = registry.into();
        let events = IntCounterVec::new(
            Opts::new("ninelives_http_events_total", "Call events by client and kind"),
            &["client", "event"],
        )?;
        registry.register(Box::new(events.clone()))?;
        Ok(Self { registry, events })
    }

    /// Expose the registry for HTTP scraping.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl tower_service::Service<CallEvent> for PrometheusSink {
    type Response = ();
    type Error = Infallible;
    type Future = Ready<Result<(), Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: CallEvent) -> Self::Future {
        self.events.with_label_values(&[event.client(), event.kind()]).inc();
        ready(Ok(()))
    }
}

impl TelemetrySink for PrometheusSink {
    type SinkError = Infallible;
}

/// Gauges mirroring the runtime's call counters.
#[derive(Clone, Debug)]
pub struct MetricsExporter {
    calls: IntGaugeVec,
    statuses: IntGaugeVec,
    total_cost_ms: IntGauge,
}

impl MetricsExporter {
    /// Register the gauges into `registry`.
    ///
    /// # Errors
    /// Returns an error if a metric cannot be registered (e.g. name conflict).
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        let calls = IntGaugeVec::new(
            Opts::new("ninelives_http_calls", "Logical calls by outcome since the last reset"),
            &["outcome"],
        )?;
        let statuses = IntGaugeVec::new(
            Opts::new("ninelives_http_status_calls", "Completed calls by final HTTP status"),
            &["status"],
        )?;
        let total_cost_ms =
            IntGauge::new("ninelives_http_cost_milliseconds_total", "Summed wall time of completed calls")?;
        registry.register(Box::new(calls.clone()))?;
        registry.register(Box::new(statuses.clone()))?;
        registry.register(Box::new(total_cost_ms.clone()))?;
        Ok(Self { calls, statuses, total_cost_ms })
    }

    /// Overwrite every gauge with the values in `snapshot`.
    pub fn publish(&self, snapshot: &MetricsSnapshot) {
        let outcomes = [
            ("total", snapshot.total_calls),
            ("success", snapshot.success_calls),
            ("failed", snapshot.failed_calls),
            ("retried", snapshot.retried_calls),
            ("timeout", snapshot.timeout_calls),
            ("network_error", snapshot.network_error_calls),
            ("rate_limited", snapshot.rate_limited_calls),
            ("circuit_open", snapshot.circuit_open_calls),
            ("bulkhead_rejected", snapshot.bulkhead_rejected_calls),
        ];
        for (outcome, value) in outcomes {
            self.calls.with_label_values(&[outcome]).set(clamp(value));
        }

        // Statuses absent from the snapshot (after a reset) must not linger.
        self.statuses.reset();
        for (status, count) in &snapshot.status_counts {
            self.statuses.with_label_values(&[status.to_string().as_str()]).set(clamp(*count));
        }
        self.total_cost_ms.set(clamp(snapshot.total_cost_ms));
        tracing::trace!(total = snapshot.total_calls, "published http metrics");
    }
}

fn clamp(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
