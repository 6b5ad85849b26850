//! `rosmod-runtime` – process-level wiring.
//!
//! # Modules
//!
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber with an optional OTLP span exporter.  Set
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` to export adapter spans.
//!
//! The `rosmod-demo` binary runs both adapters against a simulated robot.

pub mod telemetry;
