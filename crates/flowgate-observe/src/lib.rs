//! Observability setup for flowgate: structured logging and optional
//! OpenTelemetry trace export.

pub mod tracing_setup;
