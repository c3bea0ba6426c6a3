//! OpenTelemetry metrics for cloud function deployment and execution.
//!
//! Instruments are created from the global meter, so they are no-ops until
//! [`init_provider`] installs an exporting provider.

use std::time::Duration;

use anyhow::Result;
use opentelemetry::{
    metrics::{Counter, Histogram},
    KeyValue,
};
use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::{
    metrics::{PeriodicReader, SdkMeterProvider},
    Resource,
};
use serde::{Deserialize, Serialize};

const METER_NAME: &str = "cloudfn";
const DEFAULT_METRICS_INTERVAL_SECS: u64 = 10;

fn default_metrics_interval() -> u64 {
    DEFAULT_METRICS_INTERVAL_SECS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Enable metrics export.
    #[serde(default)]
    pub enable_metrics: bool,
    /// OTLP collector grpc endpoint. Falls back to OTEL_EXPORTER_OTLP_ENDPOINT
    /// or localhost:4317 when unset.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Export interval in seconds.
    #[serde(default = "default_metrics_interval")]
    pub metrics_interval: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enable_metrics: false,
            endpoint: None,
            metrics_interval: DEFAULT_METRICS_INTERVAL_SECS,
        }
    }
}

/// Install the global meter provider with an OTLP exporter.
///
/// Does nothing when metrics are disabled.
pub fn init_provider(config: &TelemetryConfig, instance_id: &str) -> Result<()> {
    if !config.enable_metrics {
        return Ok(());
    }

    let resource = Resource::builder()
        .with_attribute(KeyValue::new("service.name", "cloudfn"))
        .with_attribute(KeyValue::new("service.version", env!("CARGO_PKG_VERSION")))
        .with_attribute(KeyValue::new("cloudfn.instance.id", instance_id.to_string()))
        .build();

    let mut exporter_builder = MetricExporter::builder().with_tonic();
    if let Some(endpoint) = &config.endpoint {
        exporter_builder = exporter_builder.with_endpoint(endpoint.clone());
    }
    let exporter = exporter_builder.build()?;

    let reader = PeriodicReader::builder(exporter)
        .with_interval(Duration::from_secs(config.metrics_interval))
        .build();

    let provider = SdkMeterProvider::builder()
        .with_resource(resource)
        .with_reader(reader)
        .build();

    opentelemetry::global::set_meter_provider(provider);

    tracing::info!(
        endpoint = ?config.endpoint,
        interval_secs = config.metrics_interval,
        "Metrics provider initialized"
    );
    Ok(())
}

/// Instruments for the version cache, deployer and executor.
#[derive(Clone)]
pub struct FunctionMetrics {
    pub version_cache_hits: Counter<u64>,
    pub version_cache_misses: Counter<u64>,
    pub version_lookup_failures: Counter<u64>,
    pub deploys: Counter<u64>,
    pub deploy_failures: Counter<u64>,
    pub deploy_chunks_uploaded: Counter<u64>,
    pub invocations: Counter<u64>,
    pub invocation_errors: Counter<u64>,
    pub contexts_built: Counter<u64>,
    pub contexts_purged: Counter<u64>,
    pub context_acquire_latency_seconds: Histogram<f64>,
    pub invocation_latency_seconds: Histogram<f64>,
}

impl FunctionMetrics {
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter(METER_NAME);

        Self {
            version_cache_hits: meter
                .u64_counter("cloudfn.version_cache.hits")
                .with_description("Latest version lookups served from the cache")
                .build(),
            version_cache_misses: meter
                .u64_counter("cloudfn.version_cache.misses")
                .with_description("Latest version lookups that went to the store")
                .build(),
            version_lookup_failures: meter
                .u64_counter("cloudfn.version_cache.lookup_failures")
                .with_description("Store lookups that failed or returned no version")
                .build(),
            deploys: meter
                .u64_counter("cloudfn.deploy.started")
                .with_description("Number of deploys started")
                .build(),
            deploy_failures: meter
                .u64_counter("cloudfn.deploy.failures")
                .with_description("Number of deploys that failed to upload every chunk")
                .build(),
            deploy_chunks_uploaded: meter
                .u64_counter("cloudfn.deploy.chunks_uploaded")
                .with_description("Number of deploy chunks acknowledged by the store")
                .build(),
            invocations: meter
                .u64_counter("cloudfn.invocations")
                .with_description("Number of function invocations")
                .build(),
            invocation_errors: meter
                .u64_counter("cloudfn.invocation.errors")
                .with_description("Number of failed function invocations")
                .build(),
            contexts_built: meter
                .u64_counter("cloudfn.context_cache.built")
                .with_description("Execution contexts built on a cache miss")
                .build(),
            contexts_purged: meter
                .u64_counter("cloudfn.context_cache.purged")
                .with_description("Idle execution contexts evicted")
                .build(),
            context_acquire_latency_seconds: meter
                .f64_histogram("cloudfn.context_cache.acquire_latency")
                .with_unit("s")
                .with_description("Time to acquire an execution context")
                .build(),
            invocation_latency_seconds: meter
                .f64_histogram("cloudfn.invocation.latency")
                .with_unit("s")
                .with_description("Time spent inside the execution context")
                .build(),
        }
    }
}

impl Default for FunctionMetrics {
    fn default() -> Self {
        Self::new()
    }
}
