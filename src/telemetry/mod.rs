//! Telemetry for outbound calls.
//!
//! The engine emits one [`CallEvent`] per notable step of a call (completion, scheduled retry,
//! admission rejection, breaker transition). Events flow through a [`TelemetrySink`], which is
//! a `tower::Service<CallEvent>`, so sinks compose like any other tower service.
//!
//! Delivery is best-effort: a sink that is not ready or fails never changes the outcome of
//! the call that produced the event.

pub mod events;
pub mod sinks;

pub use events::CallEvent;
pub use sinks::{emit_best_effort, LogSink, MemorySink, NullSink, SharedSink, TelemetrySink};
