//! # Metrics
//!
//! Two layers:
//!
//! - [`collector::MetricsCollector`]: in-process atomics behind
//!   `CacheService::stats()`, always on
//! - [`cache`]: OpenTelemetry instruments mirrored from the collector and
//!   exported over OTLP once [`init_metrics`] has run with
//!   `TELEMETRY_ENABLED=true`. Without a meter provider the instruments are
//!   no-ops.
//!
//! ## Configuration
//!
//! - `TELEMETRY_ENABLED=true` - Enable metrics export
//! - `OTEL_EXPORTER_OTLP_ENDPOINT` - OTLP endpoint (default: http://localhost:4317)
//! - `OTEL_SERVICE_NAME` - Service name for resource attributes
//!
//! Export interval is fixed at 60 seconds.

use opentelemetry::KeyValue;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{
    metrics::{PeriodicReader, SdkMeterProvider},
    runtime, Resource,
};
use std::sync::OnceLock;
use std::time::Duration;

pub mod cache;
pub mod collector;

pub use collector::{LatencySnapshot, MetricsCollector, StatsSnapshot};

/// Global metrics initialization state
static METRICS_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Provider kept so `shutdown_metrics` can flush it
static METER_PROVIDER: OnceLock<SdkMeterProvider> = OnceLock::new();

/// Telemetry export settings, read from the environment
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub service_name: String,
    pub service_version: String,
    pub deployment_environment: String,
    pub otlp_endpoint: String,
    pub export_interval_seconds: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: std::env::var("TELEMETRY_ENABLED")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(false),
            service_name: std::env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| "cache-sync".to_string()),
            service_version: std::env::var("OTEL_SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            deployment_environment: std::env::var("DEPLOYMENT_ENVIRONMENT")
                .or_else(|_| std::env::var("CACHE_SYNC_ENV"))
                .unwrap_or_else(|_| "development".to_string()),
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
                .unwrap_or_else(|_| "http://localhost:4317".to_string()),
            export_interval_seconds: 60,
        }
    }
}

fn init_opentelemetry_meter(
    config: &MetricsConfig,
) -> Result<SdkMeterProvider, Box<dyn std::error::Error>> {
    let resource = Resource::new(vec![
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("service.version", config.service_version.clone()),
        KeyValue::new(
            "deployment.environment",
            config.deployment_environment.clone(),
        ),
    ]);

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_tonic()
        .with_endpoint(&config.otlp_endpoint)
        .build()?;

    let reader = PeriodicReader::builder(exporter, runtime::Tokio)
        .with_interval(Duration::from_secs(config.export_interval_seconds))
        .build();

    Ok(SdkMeterProvider::builder()
        .with_reader(reader)
        .with_resource(resource)
        .build())
}

/// Initialize metrics export with OpenTelemetry
///
/// Safe to call multiple times; only the first call does anything. Must run
/// inside a tokio runtime when telemetry is enabled (the periodic reader
/// spawns onto it).
pub fn init_metrics() {
    METRICS_INITIALIZED.get_or_init(|| {
        let config = MetricsConfig::default();

        if !config.enabled {
            tracing::debug!("Metrics export disabled (TELEMETRY_ENABLED=false)");
            return;
        }

        match init_opentelemetry_meter(&config) {
            Ok(meter_provider) => {
                opentelemetry::global::set_meter_provider(meter_provider.clone());
                let _ = METER_PROVIDER.set(meter_provider);

                tracing::info!(
                    service_name = %config.service_name,
                    otlp_endpoint = %config.otlp_endpoint,
                    export_interval_seconds = config.export_interval_seconds,
                    "OpenTelemetry metrics initialized"
                );
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Failed to initialize OpenTelemetry metrics - export disabled"
                );
            }
        }
    });
}

/// Flush and stop the meter provider, if one was installed
pub fn shutdown_metrics() {
    if let Some(provider) = METER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() {
            tracing::warn!(error = %e, "Meter provider shutdown failed");
        } else {
            tracing::debug!("Meter provider shut down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_config_defaults() {
        let config = MetricsConfig::default();
        assert_eq!(config.export_interval_seconds, 60);
        assert!(!config.otlp_endpoint.is_empty());
    }
}
