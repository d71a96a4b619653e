//! Tracing setup: stderr formatter plus optional OTLP span export.
//!
//! Filter comes from `SCIRUN_LOG`, then `RUST_LOG`, default `warn`.
//! `SCIRUN_LOG_FORMAT=json` switches the stderr formatter to JSON lines.
//! With the `otel` feature and `OTEL_EXPORTER_OTLP_ENDPOINT` set, spans are
//! also exported over OTLP/HTTP.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

/// Flushes exporters when dropped. Hold it for the life of `main`.
pub struct TelemetryGuard {
    #[cfg(feature = "otel")]
    provider: Option<opentelemetry_sdk::trace::SdkTracerProvider>,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        #[cfg(feature = "otel")]
        if let Some(provider) = self.provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("warning: failed to flush OTLP spans: {e}");
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("SCIRUN_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"))
}

fn stderr_layer() -> Box<dyn Layer<Registry> + Send + Sync> {
    let json = std::env::var("SCIRUN_LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .boxed()
    }
}

#[cfg(feature = "otel")]
fn otlp_provider() -> Option<opentelemetry_sdk::trace::SdkTracerProvider> {
    if std::env::var_os("OTEL_EXPORTER_OTLP_ENDPOINT").is_none() {
        return None;
    }
    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            eprintln!("warning: OTLP exporter disabled: {e}");
            return None;
        }
    };
    let resource = opentelemetry_sdk::Resource::builder()
        .with_service_name("scirun")
        .build();
    Some(
        opentelemetry_sdk::trace::SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(resource)
            .build(),
    )
}

/// Install the global subscriber. Safe to call more than once; later calls
/// keep the first subscriber.
pub fn init() -> TelemetryGuard {
    #[cfg(feature = "otel")]
    {
        use opentelemetry::trace::TracerProvider as _;

        let provider = otlp_provider();
        let otel_layer = provider
            .as_ref()
            .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("scirun")));

        let _ = tracing_subscriber::registry()
            .with(stderr_layer())
            .with(otel_layer)
            .with(env_filter())
            .try_init();

        TelemetryGuard { provider }
    }

    #[cfg(not(feature = "otel"))]
    {
        let _ = tracing_subscriber::registry()
            .with(stderr_layer())
            .with(env_filter())
            .try_init();

        TelemetryGuard {}
    }
}
