use opentelemetry::KeyValue;
use opentelemetry_appender_tracing::layer::OpenTelemetryTracingBridge;
use opentelemetry_otlp::{ExporterBuildError, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::logs::SdkLoggerProvider;
use std::error::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::prelude::*;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct MonitoringConfig {
    pub service_name: String,
    pub logs: EnvFilterConfig,
    pub otlp: Option<OtlpConfig>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct EnvFilterConfig {
    pub default_level: String,
    #[serde(default)]
    pub filters: Vec<String>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct OtlpConfig {
    pub url: Option<String>,
}

impl TryInto<EnvFilter> for EnvFilterConfig {
    type Error = tracing_subscriber::filter::ParseError;

    fn try_into(self) -> Result<EnvFilter, Self::Error> {
        EnvFilter::builder()
            .with_default_directive(self.default_level.parse()?)
            .parse(self.filters.join(","))
    }
}

impl MonitoringConfig {
    pub fn init(&self) -> Result<(), Box<dyn Error>> {
        let resource = Resource::builder()
            .with_attribute(KeyValue::new("service.name", self.service_name.clone()))
            .build();

        if let Some(otlp_config) = &self.otlp {
            let logger_provider = init_logs(resource.clone(), otlp_config.url.clone())?;
            let logging_filter: EnvFilter = self.logs.clone().try_into()?;
            let logging_layer = OpenTelemetryTracingBridge::new(&logger_provider).with_filter(logging_filter);

            let metrics = init_metrics(resource, otlp_config.url.clone())?;
            opentelemetry::global::set_meter_provider(metrics);

            let fmt_filter: EnvFilter = self.logs.clone().try_into()?;
            let fmt_layer = tracing_subscriber::fmt::layer().with_filter(fmt_filter);

            tracing_subscriber::registry().with(logging_layer).with(fmt_layer).init();
        } else {
            let fmt_filter: EnvFilter = self.logs.clone().try_into()?;
            let fmt_layer = tracing_subscriber::fmt::layer().with_filter(fmt_filter);

            tracing_subscriber::registry().with(fmt_layer).init();
        }

        Ok(())
    }
}

fn init_metrics(
    resource: Resource,
    url: Option<String>,
) -> Result<opentelemetry_sdk::metrics::SdkMeterProvider, ExporterBuildError> {
    match url {
        Some(url) => {
            let exporter = opentelemetry_otlp::MetricExporter::builder()
                .with_tonic()
                .with_endpoint(url)
                .build()?;
            let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(exporter)
                .with_interval(std::time::Duration::from_secs(15))
                .build();
            Ok(opentelemetry_sdk::metrics::SdkMeterProvider::builder()
                .with_reader(reader)
                .with_resource(resource)
                .build())
        }
        None => {
            let reader = opentelemetry_sdk::metrics::PeriodicReader::builder(
                opentelemetry_stdout::MetricExporter::default(),
            )
            .with_interval(std::time::Duration::from_secs(15))
            .build();
            Ok(opentelemetry_sdk::metrics::SdkMeterProvider::builder()
                .with_reader(reader)
                .with_resource(resource)
                .build())
        }
    }
}

fn init_logs(resource: Resource, url: Option<String>) -> Result<SdkLoggerProvider, ExporterBuildError> {
    match url {
        Some(url) => {
            let exporter = opentelemetry_otlp::LogExporter::builder()
                .with_tonic()
                .with_endpoint(url)
                .build()?;

            Ok(SdkLoggerProvider::builder()
                .with_resource(resource)
                .with_batch_exporter(exporter)
                .build())
        }
        None => Ok(SdkLoggerProvider::builder()
            .with_resource(resource)
            .with_simple_exporter(opentelemetry_stdout::LogExporter::default())
            .build()),
    }
}
