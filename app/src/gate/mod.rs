pub mod catalog;
pub mod service;

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::core::broker::GateBroker;
use crate::core::telemetry::{BrokerRole, Telemetry};
use crate::gate::catalog::Catalog;
use crate::gate::service::GateService;
use infrastructure::HttpClientConfig;

const DEFAULT_FRESH_SECONDS: u64 = 3;
const DEFAULT_CYCLE_SECONDS: u64 = 10;
const DEFAULT_QUERY_LIMIT: usize = 30;
const DEFAULT_SETTER_QUEUE_SIZE: usize = 1;
const DEFAULT_SETTER_FLUSH_MS: u64 = 50;

/// Gate connection settings. The gate's established configuration names
/// (`Host`, `ReadPath`, ...) are accepted as aliases so an existing config
/// file keeps working.
#[derive(Debug, Clone, Deserialize)]
pub struct GateConfig {
    #[serde(alias = "Host")]
    pub host: String,
    #[serde(alias = "ReadPath")]
    pub read_path: String,
    #[serde(alias = "SetLightPath")]
    pub set_light_path: String,
    #[serde(default, alias = "FreshInSeconds")]
    pub fresh_in_seconds: u64,
    #[serde(default, alias = "CycleInSeconds")]
    pub cycle_in_seconds: u64,
    #[serde(default, alias = "QueryLimit")]
    pub query_limit: usize,
    #[serde(default, alias = "SetterQueueSize")]
    pub setter_queue_size: usize,
    #[serde(default, alias = "SetterFlushMs")]
    pub setter_flush_ms: u64,
}

impl GateConfig {
    pub fn fresh_window(&self) -> Duration {
        Duration::from_secs(non_zero_or(self.fresh_in_seconds, DEFAULT_FRESH_SECONDS))
    }

    pub fn cycle_period(&self) -> Duration {
        Duration::from_secs(non_zero_or(self.cycle_in_seconds, DEFAULT_CYCLE_SECONDS))
    }

    fn query_limit(&self) -> usize {
        if self.query_limit == 0 {
            DEFAULT_QUERY_LIMIT
        } else {
            self.query_limit
        }
    }

    /// Stays at 1 unless the gate's write endpoint accepts batches.
    fn setter_queue_size(&self) -> usize {
        if self.setter_queue_size == 0 {
            DEFAULT_SETTER_QUEUE_SIZE
        } else {
            self.setter_queue_size
        }
    }

    fn setter_flush_period(&self) -> Duration {
        Duration::from_millis(non_zero_or(self.setter_flush_ms, DEFAULT_SETTER_FLUSH_MS))
    }

    fn read_url(&self) -> String {
        format!("{}{}", self.host, self.read_path)
    }

    fn set_url(&self) -> String {
        format!("{}{}", self.host, self.set_light_path)
    }

    /// Builds both brokers and the service around an existing catalog. The
    /// reader batches up to the query limit and flushes within the freshness
    /// window; the writer flushes small batches quickly.
    pub fn new_service(&self, catalog: Arc<Catalog>, telemetry: Arc<Telemetry>) -> anyhow::Result<Arc<GateService>> {
        let client = HttpClientConfig::default().new_tracing_client()?;

        let reader = GateBroker::new(
            BrokerRole::Reader,
            self.query_limit(),
            self.fresh_window(),
            self.read_url(),
            client.clone(),
            catalog.clone(),
            telemetry.clone(),
        );

        let writer = GateBroker::new(
            BrokerRole::Writer,
            self.setter_queue_size(),
            self.setter_flush_period(),
            self.set_url(),
            client,
            catalog.clone(),
            telemetry.clone(),
        );

        Ok(GateService::new(
            catalog,
            reader,
            writer,
            self.cycle_period(),
            telemetry,
        ))
    }
}

fn non_zero_or(value: u64, fallback: u64) -> u64 {
    if value == 0 { fallback } else { value }
}
