//! Tracing setup for the murmur binary.
//!
//! `init` installs a plain fmt subscriber. With the `otel` feature,
//! `init_otlp` also exports traces and logs over OTLP gRPC.

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter from the configured level. `RUST_LOG` has already been folded
/// into `log_level` by the config loader.
fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Log to stderr so stdout stays clean for the transcript.
pub fn init(log_level: &str) -> Result<()> {
    tracing_subscriber::registry()
        .with(env_filter(log_level))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(())
}

#[cfg(feature = "otel")]
mod otlp {
    use std::time::Duration;

    use anyhow::{Context, Result};
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::{global, KeyValue};
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::trace::{RandomIdGenerator, Sampler};
    use opentelemetry_sdk::Resource;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    /// Timeout for OTLP exports - prevents blocking on unavailable endpoints
    const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Initialize tracing with OTLP trace and log exporters.
    ///
    /// Default endpoint is localhost:4317 (standard OTLP gRPC port).
    pub fn init_otlp(otlp_endpoint: &str, log_level: &str) -> Result<()> {
        let resource = Resource::builder_empty()
            .with_service_name("murmur")
            .with_attributes(vec![KeyValue::new(
                "service.version",
                env!("CARGO_PKG_VERSION"),
            )])
            .build();

        let endpoint = if otlp_endpoint.starts_with("http") {
            otlp_endpoint.to_string()
        } else {
            format!("http://{}", otlp_endpoint)
        };

        let trace_exporter = opentelemetry_otlp::SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint.clone())
            .with_timeout(EXPORT_TIMEOUT)
            .build()
            .context("Failed to create OTLP span exporter")?;

        let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
            .with_span_processor(
                opentelemetry_sdk::trace::BatchSpanProcessor::builder(trace_exporter).build(),
            )
            .with_sampler(Sampler::AlwaysOn)
            .with_id_generator(RandomIdGenerator::default())
            .with_resource(resource.clone())
            .build();

        let tracer = tracer_provider.tracer("murmur");
        global::set_tracer_provider(tracer_provider);

        let log_exporter = opentelemetry_otlp::LogExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .with_timeout(EXPORT_TIMEOUT)
            .build()
            .context("Failed to create OTLP log exporter")?;

        let logger_provider = opentelemetry_sdk::logs::SdkLoggerProvider::builder()
            .with_log_processor(
                opentelemetry_sdk::logs::BatchLogProcessor::builder(log_exporter).build(),
            )
            .with_resource(resource)
            .build();

        let telemetry_layer = tracing_opentelemetry::layer().with_tracer(tracer);
        let log_appender =
            opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(&logger_provider);

        tracing_subscriber::registry()
            .with(super::env_filter(log_level))
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .with(telemetry_layer)
            .with(log_appender)
            .try_init()
            .context("Failed to install tracing subscriber")?;

        tracing::info!("OpenTelemetry initialized with OTLP endpoint: {}", otlp_endpoint);
        Ok(())
    }
}

#[cfg(feature = "otel")]
pub use otlp::init_otlp;
