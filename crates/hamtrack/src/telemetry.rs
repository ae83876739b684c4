//! Logging setup.
//!
//! Always installs a fmt layer filtered by `telemetry.log_level`. Built with
//! the `otel` feature and given an OTLP endpoint, traces and logs are also
//! exported over gRPC.

use anyhow::{Context, Result};
use hamconf::TelemetryConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
}

pub fn init(config: &TelemetryConfig) -> Result<()> {
    #[cfg(feature = "otel")]
    if let Some(endpoint) = &config.otlp_endpoint {
        return otlp::init(&config.log_level, endpoint);
    }

    tracing_subscriber::registry()
        .with(env_filter(&config.log_level))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Failed to install tracing subscriber")?;

    #[cfg(not(feature = "otel"))]
    if let Some(endpoint) = &config.otlp_endpoint {
        tracing::warn!(
            "OTLP endpoint {} ignored: built without the otel feature",
            endpoint
        );
    }
    Ok(())
}

/// Flush exporters, if any were installed.
pub fn shutdown() {
    #[cfg(feature = "otel")]
    otlp::shutdown();
}

#[cfg(feature = "otel")]
mod otlp {
    use std::sync::OnceLock;
    use std::time::Duration;

    use anyhow::{Context, Result};
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry::{global, KeyValue};
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::logs::SdkLoggerProvider;
    use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider};
    use opentelemetry_sdk::Resource;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

    static PROVIDERS: OnceLock<(SdkTracerProvider, SdkLoggerProvider)> = OnceLock::new();

    pub(super) fn init(log_level: &str, otlp_endpoint: &str) -> Result<()> {
        let resource = Resource::builder_empty()
            .with_service_name("hamtrack")
            .with_attributes(vec![KeyValue::new(
                "service.version",
                env!("CARGO_PKG_VERSION"),
            )])
            .build();

        let endpoint = if otlp_endpoint.contains("://") {
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

        let tracer_provider = SdkTracerProvider::builder()
            .with_batch_exporter(trace_exporter)
            .with_sampler(Sampler::AlwaysOn)
            .with_resource(resource.clone())
            .build();
        let tracer = tracer_provider.tracer("hamtrack");
        global::set_tracer_provider(tracer_provider.clone());

        let log_exporter = opentelemetry_otlp::LogExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .with_timeout(EXPORT_TIMEOUT)
            .build()
            .context("Failed to create OTLP log exporter")?;

        let logger_provider = SdkLoggerProvider::builder()
            .with_batch_exporter(log_exporter)
            .with_resource(resource)
            .build();

        let log_appender =
            opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge::new(&logger_provider);

        tracing_subscriber::registry()
            .with(super::env_filter(log_level))
            .with(tracing_subscriber::fmt::layer())
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .with(log_appender)
            .try_init()
            .context("Failed to install tracing subscriber")?;

        let _ = PROVIDERS.set((tracer_provider, logger_provider));
        tracing::info!("Exporting traces and logs to {}", otlp_endpoint);
        Ok(())
    }

    pub(super) fn shutdown() {
        if let Some((tracer, logger)) = PROVIDERS.get() {
            if let Err(e) = tracer.shutdown() {
                eprintln!("trace exporter shutdown failed: {e}");
            }
            if let Err(e) = logger.shutdown() {
                eprintln!("log exporter shutdown failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn bad_filter_falls_back_to_info() {
        let filter = env_filter("hamtrack=notalevel[");
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::INFO));
    }

    #[test]
    fn directives_pass_through() {
        let filter = env_filter("warn,hamtrack=debug");
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    }
}
