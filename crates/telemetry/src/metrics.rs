//! Meter provider setup and metric helpers.

mod names;
mod recorder;

pub use names::*;
pub use recorder::Recorder;

use anyhow::Context;
use config::{OtlpExporterConfig, OtlpProtocol, TelemetryConfig};
use opentelemetry::{KeyValue, metrics::Meter};
use opentelemetry_otlp::{MetricExporter, WithExportConfig};
use opentelemetry_sdk::{
    Resource,
    metrics::{PeriodicReader, SdkMeterProvider},
};

const METER_NAME: &str = "gateway";

/// The meter every gateway instrument is created from.
pub fn meter() -> Meter {
    opentelemetry::global::meter(METER_NAME)
}

pub(crate) fn init_metrics(config: &TelemetryConfig) -> anyhow::Result<SdkMeterProvider> {
    let meter_provider = match config.metrics_otlp_config() {
        Some(exporter_config) => otlp_meter_provider(config, exporter_config)?,
        None => {
            log::debug!("No metrics exporter enabled, metrics will not be exported");
            SdkMeterProvider::builder().build()
        }
    };

    opentelemetry::global::set_meter_provider(meter_provider.clone());

    Ok(meter_provider)
}

fn resource(config: &TelemetryConfig) -> Resource {
    let attributes = config
        .resource_attributes()
        .iter()
        .map(|(key, value)| KeyValue::new(key.clone(), value.clone()));

    Resource::builder()
        .with_service_name(config.service_name().unwrap_or(METER_NAME).to_string())
        .with_attributes(attributes)
        .build()
}

fn otlp_meter_provider(config: &TelemetryConfig, exporter_config: &OtlpExporterConfig) -> anyhow::Result<SdkMeterProvider> {
    let endpoint = exporter_config.endpoint.as_str();

    let exporter = match exporter_config.protocol {
        OtlpProtocol::Grpc => MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .with_timeout(exporter_config.timeout)
            .build()
            .context("Failed to create gRPC OTLP metric exporter")?,
        OtlpProtocol::Http => MetricExporter::builder()
            .with_http()
            .with_endpoint(endpoint)
            .with_timeout(exporter_config.timeout)
            .build()
            .context("Failed to create HTTP OTLP metric exporter")?,
    };

    let reader = PeriodicReader::builder(exporter)
        .with_interval(exporter_config.batch_export.scheduled_delay)
        .build();

    log::info!(
        "Exporting metrics to {endpoint} via {:?} every {:?}",
        exporter_config.protocol,
        exporter_config.batch_export.scheduled_delay
    );

    Ok(SdkMeterProvider::builder()
        .with_resource(resource(config))
        .with_reader(reader)
        .build())
}
