use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::accessory::{AccessoryHandle, AccessoryRegistry, RegistryEntry};
use crate::adapter::homekit::hap::{HomekitCharacteristic, HomekitEvent, HomekitService, StateExport};
use crate::core::request::GateRequest;
use crate::gate::service::GateService;
use infrastructure::{EventListener, MqttInMessage, MqttSender, MqttSubscription};

/// Bridges between accessory adapters and the downstream protocol: announces
/// accessories at startup, forwards state exports, and turns set-callbacks
/// into gate commands.
pub struct HomekitRunner {
    registry: AccessoryRegistry,
    exports_rx: EventListener<StateExport>,
    set_rx: MqttSubscription,
    get_rx: MqttSubscription,
    sender: MqttSender,
    gate: Arc<GateService>,
}

#[derive(Debug, Serialize)]
struct OutgoingMessage {
    name: String,
    #[serde(rename = "service_name")]
    service: HomekitService,
    characteristic: HomekitCharacteristic,
    value: serde_json::Value,
}

impl HomekitRunner {
    pub fn new(
        registry: AccessoryRegistry,
        exports_rx: EventListener<StateExport>,
        set_rx: MqttSubscription,
        get_rx: MqttSubscription,
        sender: MqttSender,
        gate: Arc<GateService>,
    ) -> Self {
        Self {
            registry,
            exports_rx,
            set_rx,
            get_rx,
            sender,
            gate,
        }
    }

    pub async fn run(mut self) {
        self.register_accessories().await;

        loop {
            tokio::select! {
                Some(export) = self.exports_rx.recv() => {
                    self.publish_export(export).await;
                }

                Some(msg) = self.set_rx.recv() => {
                    self.handle_set(msg).await;
                }

                Some(msg) = self.get_rx.recv() => {
                    self.handle_get(msg).await;
                }
            }
        }
    }

    async fn publish_export(&self, export: StateExport) {
        let message = OutgoingMessage {
            name: export.name,
            service: export.service,
            characteristic: export.characteristic,
            value: export.value,
        };

        let payload = match serde_json::to_string(&message) {
            Ok(p) => p,
            Err(e) => {
                tracing::error!("Error serializing outgoing accessory message: {:?} -- {:?}", message, e);
                return;
            }
        };

        if let Err(e) = self.sender.send_transient("to/set", payload).await {
            tracing::error!("Error publishing accessory state: {:?}", e);
        }
    }

    async fn handle_set(&self, msg: MqttInMessage) {
        let event: HomekitEvent = match serde_json::from_str(&msg.payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!("Error parsing incoming set message: {:?} -- {:?}", msg.payload, e);
                return;
            }
        };

        let Some(entry) = self.registry.find_by_name(&event.name) else {
            tracing::warn!("Set callback for unknown accessory: {}", event.name);
            return;
        };

        tracing::debug!("Processing set callback: {:?}", event);

        match (&entry.handle, event.characteristic) {
            (AccessoryHandle::Light(light), HomekitCharacteristic::On) => {
                let Some(on) = event.value.as_bool() else {
                    tracing::warn!("Non-boolean On value for {}: {:?}", event.name, event.value);
                    return;
                };
                self.dispatch_write(light.set_request(on));
            }

            (AccessoryHandle::Thermo(thermo), HomekitCharacteristic::TargetTemperature) => {
                let Some(temperature) = event.value.as_f64() else {
                    tracing::warn!("Non-numeric target temperature for {}: {:?}", event.name, event.value);
                    return;
                };
                self.dispatch_write(thermo.set_temperature_request(temperature));
            }

            (AccessoryHandle::Thermo(thermo), HomekitCharacteristic::TargetHeatingCoolingState) => {
                let Some(state) = event.value.as_i64() else {
                    tracing::warn!("Non-numeric heating state for {}: {:?}", event.name, event.value);
                    return;
                };
                self.dispatch_write(thermo.set_mode_request(state));
            }

            (AccessoryHandle::Shutter(shutter), HomekitCharacteristic::TargetPosition) => {
                let Some(target) = event.value.as_i64() else {
                    tracing::warn!("Non-numeric target position for {}: {:?}", event.name, event.value);
                    return;
                };

                let request = shutter.move_to_request(target);
                let shutter = shutter.clone();
                let gate = self.gate.clone();
                tokio::spawn(async move {
                    match gate.send_write(request).await {
                        Ok(()) => shutter.begin_travel(target),
                        Err(e) => tracing::error!("Shutter command failed: {}", e),
                    }
                });
            }

            _ => {
                tracing::debug!("No write mapping for {:?} on {}", event.characteristic, event.name);
            }
        }
    }

    /// Answers a get-callback from cache. When the cache is stale a single
    /// read-through is queued; the refreshed value follows on its own once
    /// the reader flushes.
    async fn handle_get(&self, msg: MqttInMessage) {
        let event: HomekitEvent = match serde_json::from_str(&msg.payload) {
            Ok(event) => event,
            Err(e) => {
                tracing::error!("Error parsing incoming get message: {:?} -- {:?}", msg.payload, e);
                return;
            }
        };

        let Some(entry) = self.registry.find_by_name(&event.name) else {
            tracing::warn!("Get callback for unknown accessory: {}", event.name);
            return;
        };

        if !self.gate.is_fresh() {
            let gate = self.gate.clone();
            let template = entry.handle.template();
            tokio::spawn(async move { gate.request_read(template).await });
        }

        for export in entry.handle.exports() {
            self.publish_export(export).await;
        }
    }

    fn dispatch_write(&self, request: GateRequest) {
        let gate = self.gate.clone();
        tokio::spawn(async move {
            if let Err(e) = gate.send_write(request).await {
                tracing::error!("Gate command failed: {}", e);
            }
        });
    }

    async fn register_accessories(&self) {
        for entry in self.registry.entries() {
            // give the bridge a moment to create each accessory
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;

            let payload = registration_payload(entry);
            if let Err(e) = self.sender.send_transient("to/add", payload.to_string()).await {
                tracing::error!("Error registering accessory {}: {:?}", entry.name, e);
                continue;
            }

            tracing::info!(
                "Accessory registered: {} [{}|{}] (id: {:x})",
                entry.name,
                entry.clu,
                entry.id,
                entry.long_id
            );
        }
    }
}

fn registration_payload(entry: &RegistryEntry) -> serde_json::Value {
    #[derive(Serialize)]
    struct Payload {
        name: String,
        service_name: HomekitService,
        service: HomekitService,
        #[serde(flatten)]
        characteristics: HashMap<HomekitCharacteristic, serde_json::Value>,
    }

    let service = entry.handle.service();
    let characteristics = entry
        .handle
        .characteristics()
        .into_iter()
        .map(|c| (c, serde_json::Value::String("default".to_string())))
        .collect();

    let payload = Payload {
        name: entry.name.clone(),
        service_name: service,
        service,
        characteristics,
    };

    serde_json::to_value(payload).expect("Error serializing accessory registration payload")
}

#[cfg(test)]
mod tests {
    use assert_json_diff::assert_json_eq;
    use infrastructure::EventBus;

    use super::*;
    use crate::accessory::{ClusterConfig, build};

    fn registry() -> AccessoryRegistry {
        let configs: Vec<ClusterConfig> = serde_json::from_value(serde_json::json!([
            {
                "id": "CLU0001",
                "name": "Test",
                "lights": [ { "id": 1, "name": "Test Lamp", "kind": "DOU" } ],
                "shutters": [ { "id": 2, "name": "Test Blind", "kind": "ROL" } ]
            }
        ]))
        .unwrap();

        let bus: EventBus<crate::adapter::homekit::hap::StateExport> = EventBus::new(8);
        build(&configs, bus.emitter()).1
    }

    #[test]
    fn light_registration_payload_has_on_characteristic() {
        let registry = registry();
        let entry = registry.find_by_name("Test Lamp").unwrap();

        assert_json_eq!(
            registration_payload(entry),
            serde_json::json!({
                "name": "Test Lamp",
                "service_name": "Lightbulb",
                "service": "Lightbulb",
                "On": "default"
            })
        );
    }

    #[test]
    fn shutter_registration_payload_covers_position_characteristics() {
        let registry = registry();
        let entry = registry.find_by_name("Test Blind").unwrap();

        assert_json_eq!(
            registration_payload(entry),
            serde_json::json!({
                "name": "Test Blind",
                "service_name": "WindowCovering",
                "service": "WindowCovering",
                "CurrentPosition": "default",
                "TargetPosition": "default",
                "PositionState": "default"
            })
        );
    }
}
