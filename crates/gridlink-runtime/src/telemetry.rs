//! Process-wide log output for gridlink.
//!
//! [`init_tracing`] installs one subscriber: an `EnvFilter` (from `RUST_LOG`,
//! default `info`), a console formatter chosen by `GRIDLINK_LOG_FORMAT`, and
//! an OTLP span layer when `OTEL_EXPORTER_OTLP_ENDPOINT` names a collector.
//! It must run before the tokio runtime exists; the CLI calls it first thing
//! in `main` and drops the guard just before `process::exit`.
//!
//! ```rust,no_run
//! let _guard = gridlink_runtime::telemetry::init_tracing("gridlink");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Console output style, selected by `GRIDLINK_LOG_FORMAT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One short line per event.
    #[default]
    Compact,
    /// Newline-delimited JSON, for log shippers on the companion computer.
    Json,
}

impl LogFormat {
    /// `json` (any case) selects JSON; anything else, or nothing, is compact.
    pub fn from_env_value(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

/// Install the global subscriber and return the guard that flushes spans.
///
/// Spans from the heartbeat, dispatch and ingest loops reach the collector
/// only when an OTLP endpoint is configured. Panics if a global subscriber
/// is already installed.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let format = LogFormat::from_env_value(std::env::var("GRIDLINK_LOG_FORMAT").ok().as_deref());
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok();
    let provider = build_provider(service_name, endpoint.as_deref());

    let otel = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("gridlink")));
    let json = (format == LogFormat::Json).then(|| fmt::layer().json());
    let compact = (format == LogFormat::Compact).then(|| fmt::layer().compact());

    tracing_subscriber::registry()
        .with(filter)
        .with(otel)
        .with(json)
        .with(compact)
        .init();

    TracerProviderGuard(provider)
}

/// Shuts the tracer provider down, flushing pending spans, when dropped.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    /// Whether spans are being exported.
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[gridlink] span export shutdown failed: {e}");
        }
    }
}

/// OTLP/HTTP provider for `endpoint`, or `None` when there is no endpoint or
/// the exporter cannot be built. Errors go to stderr: no subscriber exists
/// yet.
fn build_provider(service_name: &str, endpoint: Option<&str>) -> Option<SdkTracerProvider> {
    let endpoint = endpoint.map(str::trim).filter(|e| !e.is_empty())?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[gridlink] OTLP exporter for {endpoint} failed: {e}"))
        .ok()?;

    Some(
        SdkTracerProvider::builder()
            .with_resource(
                Resource::builder()
                    .with_service_name(service_name.to_string())
                    .build(),
            )
            // Synchronous export: the tokio runtime is built after this.
            .with_simple_exporter(exporter)
            .build(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_defaults_to_compact() {
        assert_eq!(LogFormat::from_env_value(None), LogFormat::Compact);
        assert_eq!(LogFormat::from_env_value(Some("")), LogFormat::Compact);
        assert_eq!(LogFormat::from_env_value(Some("pretty")), LogFormat::Compact);
    }

    #[test]
    fn log_format_accepts_json_in_any_case() {
        assert_eq!(LogFormat::from_env_value(Some("json")), LogFormat::Json);
        assert_eq!(LogFormat::from_env_value(Some(" JSON ")), LogFormat::Json);
    }

    #[test]
    fn no_exporter_without_endpoint() {
        assert!(build_provider("gridlink-test", None).is_none());
        assert!(build_provider("gridlink-test", Some("  ")).is_none());
    }

    #[test]
    fn empty_guard_is_not_exporting_and_drops_cleanly() {
        let guard = TracerProviderGuard(None);
        assert!(!guard.is_exporting());
        drop(guard);
    }
}
