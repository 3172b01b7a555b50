//! Observability setup for Flowcast.
//!
//! Installs the global tracing subscriber: structured `fmt` output (text or
//! JSON) and an optional OpenTelemetry bridge.

pub mod tracing_setup;
