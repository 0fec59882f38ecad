pub mod hap;
mod runtime;

pub use runtime::HomekitRunner;

use std::sync::Arc;

use serde::Deserialize;

use crate::accessory::AccessoryRegistry;
use crate::adapter::homekit::hap::StateExport;
use crate::gate::service::GateService;
use infrastructure::{EventListener, Mqtt};

/// Downstream bridge connection: one MQTT topic tree per homebridge-mqtt
/// convention, `<base>/to/...` towards the bridge, `<base>/from/...` back.
#[derive(Clone, Deserialize, Debug)]
pub struct Homekit {
    pub base_topic: String,
}

impl Homekit {
    pub async fn new_runner(
        &self,
        mqtt: &mut Mqtt,
        registry: AccessoryRegistry,
        exports_rx: EventListener<StateExport>,
        gate: Arc<GateService>,
    ) -> HomekitRunner {
        let set_rx = mqtt
            .subscribe(format!("{}/from/set", &self.base_topic))
            .await
            .expect("Error subscribing to MQTT set topic");
        let get_rx = mqtt
            .subscribe(format!("{}/from/get", &self.base_topic))
            .await
            .expect("Error subscribing to MQTT get topic");

        HomekitRunner::new(registry, exports_rx, set_rx, get_rx, mqtt.sender(&self.base_topic), gate)
    }
}
