use config::{Config, ConfigError, File};
use infrastructure::{HttpServerConfig, MonitoringConfig, MqttConfig};
use serde::Deserialize;

use crate::accessory::ClusterConfig;
use crate::adapter::homekit::Homekit;
use crate::gate::GateConfig;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub monitoring: MonitoringConfig,
    pub mqtt: MqttConfig,
    pub http_server: HttpServerConfig,
    pub gate: GateConfig,
    pub homekit: Homekit,
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder().add_source(File::with_name("config.json")).build()?;

        s.try_deserialize()
    }
}
