//! Tracing and OpenTelemetry initialisation.
//!
//! Call [`init_tracing`] once at process startup and hold the returned guard
//! until exit.
//!
//! # Environment variables
//!
//! | Variable | Effect |
//! |---|---|
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | OTLP collector base URL (e.g. `http://localhost:4318`). When set, adapter spans are exported over OTLP/HTTP. |
//! | `RUST_LOG` | Log filter (default `"info"`). |
//! | `ROSMOD_LOG_FORMAT=json` | Emit newline-delimited JSON logs. |
//!
//! # Example
//!
//! ```rust,no_run
//! let _guard = rosmod_runtime::telemetry::init_tracing("rosmod-demo");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Console log encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

/// Logging settings resolved from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetrySettings {
    pub filter: String,
    pub format: LogFormat,
    pub otlp_endpoint: Option<String>,
}

impl TelemetrySettings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve settings through `lookup` instead of the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let format = match lookup("ROSMOD_LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        };
        Self {
            filter: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            format,
            otlp_endpoint: lookup("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|e| !e.trim().is_empty()),
        }
    }
}

/// Install the global `tracing` subscriber described by the environment.
///
/// If a global subscriber is already installed the call only reports it on
/// stderr; the returned guard still owns any provider it built.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    init_tracing_with(service_name, &TelemetrySettings::from_env())
}

/// [`init_tracing`] with explicit settings.
pub fn init_tracing_with(service_name: &str, settings: &TelemetrySettings) -> TracerProviderGuard {
    let env_filter =
        EnvFilter::try_new(&settings.filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let provider = settings
        .otlp_endpoint
        .as_deref()
        .and_then(|endpoint| build_provider(service_name, endpoint));

    let otel_layer = provider.as_ref().map(|p| {
        tracing_opentelemetry::layer().with_tracer(p.tracer(service_name.to_string()))
    });
    let json = settings.format == LogFormat::Json;

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(otel_layer)
        .with(json.then(|| fmt::layer().with_target(true).json()))
        .with((!json).then(|| fmt::layer().with_target(true).compact()))
        .try_init();
    if let Err(e) = installed {
        eprintln!("[rosmod] tracing subscriber already installed: {e}");
    }

    TracerProviderGuard(provider)
}

// ─────────────────────────────────────────────────────────────────────────────
// RAII guard
// ─────────────────────────────────────────────────────────────────────────────

/// Shuts the OTel [`SdkTracerProvider`] down on drop, flushing pending spans.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    /// `true` when spans are being exported.
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take() {
            if let Err(e) = provider.shutdown() {
                eprintln!("[rosmod] OpenTelemetry provider shutdown error: {e}");
            }
        }
    }
}

/// Build an OTLP/HTTP tracer provider, or `None` (reported on stderr) when
/// the exporter cannot be created.
fn build_provider(service_name: &str, endpoint: &str) -> Option<SdkTracerProvider> {
    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint.to_string())
        .build()
        .map_err(|e| eprintln!("[rosmod] OTLP exporter init failed: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    // Simple exporter: adapters run on plain threads, no async runtime.
    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(exporter)
            .build(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_environment() {
        let settings = TelemetrySettings::from_lookup(lookup(&[]));
        assert_eq!(
            settings,
            TelemetrySettings {
                filter: "info".into(),
                format: LogFormat::Compact,
                otlp_endpoint: None,
            }
        );
    }

    #[test]
    fn json_format_and_filter_from_environment() {
        let settings = TelemetrySettings::from_lookup(lookup(&[
            ("ROSMOD_LOG_FORMAT", "json"),
            ("RUST_LOG", "rosmod_middleware=debug"),
        ]));
        assert_eq!(settings.format, LogFormat::Json);
        assert_eq!(settings.filter, "rosmod_middleware=debug");
    }

    #[test]
    fn blank_endpoint_disables_export() {
        let settings =
            TelemetrySettings::from_lookup(lookup(&[("OTEL_EXPORTER_OTLP_ENDPOINT", "  ")]));
        assert!(settings.otlp_endpoint.is_none());
    }

    #[test]
    fn init_without_endpoint_does_not_export() {
        let settings = TelemetrySettings::from_lookup(lookup(&[("RUST_LOG", "not a [valid filter")]));
        let guard = init_tracing_with("test-service", &settings);
        assert!(!guard.is_exporting());
        // A second install reports instead of panicking.
        let again = init_tracing_with("test-service", &settings);
        assert!(!again.is_exporting());
    }

    #[test]
    fn guard_drop_with_none_is_safe() {
        drop(TracerProviderGuard(None));
    }
}
