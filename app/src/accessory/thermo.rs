use std::sync::{Arc, Mutex};

use anyhow::{bail, ensure};
use serde_json::json;

use crate::adapter::homekit::hap::{HomekitCharacteristic, HomekitService, StateExport};
use crate::core::request::{GateRequest, Kind, Payload, ThermoState};
use crate::port::Accessory;
use infrastructure::EventEmitter;

pub struct Thermo {
    name: String,
    clu: String,
    id: String,
    source: Option<String>,
    state: Mutex<ThermoState>,
    exports: EventEmitter<StateExport>,
}

impl Thermo {
    pub fn new(
        name: impl Into<String>,
        clu: impl Into<String>,
        id: impl Into<String>,
        source: Option<String>,
        exports: EventEmitter<StateExport>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            clu: clu.into(),
            id: id.into(),
            source,
            state: Mutex::new(ThermoState::default()),
            exports,
        })
    }

    pub fn reading(&self) -> ThermoState {
        *self.state.lock().unwrap()
    }

    /// Command changing the setpoint, keeping the remaining fields as last
    /// reported by the gate.
    pub fn set_temperature_request(&self, temperature: f64) -> GateRequest {
        let mut state = self.reading();
        state.temp_setpoint = temperature;
        self.template().with_payload(Payload::Thermo(state))
    }

    /// Command translating the HomeKit target heating/cooling state into the
    /// gate's state and mode fields: heat runs mode 0, auto runs mode 1,
    /// anything else turns the thermostat off.
    pub fn set_mode_request(&self, hk_target_state: i64) -> GateRequest {
        let mut state = self.reading();
        match hk_target_state {
            1 => {
                state.state = 1;
                state.mode = 0;
            }
            3 => {
                state.state = 1;
                state.mode = 1;
            }
            _ => state.state = 0,
        }

        self.template().with_payload(Payload::Thermo(state))
    }

    pub fn exports(&self) -> Vec<StateExport> {
        let state = self.reading();
        vec![
            StateExport::new(
                &self.name,
                HomekitService::Thermostat,
                HomekitCharacteristic::CurrentTemperature,
                json!(state.temp_current),
            ),
            StateExport::new(
                &self.name,
                HomekitService::Thermostat,
                HomekitCharacteristic::TargetTemperature,
                json!(state.temp_target),
            ),
            StateExport::new(
                &self.name,
                HomekitService::Thermostat,
                HomekitCharacteristic::CurrentHeatingCoolingState,
                json!(state.state),
            ),
        ]
    }
}

impl Accessory for Thermo {
    fn template(&self) -> GateRequest {
        let template = GateRequest::template(Kind::Thermo, &self.clu, &self.id);
        match &self.source {
            Some(source) => template.with_source(source),
            None => template,
        }
    }

    fn load_response(&self, response: &GateRequest) -> anyhow::Result<()> {
        ensure!(response.kind == Kind::Thermo, "wrong object kind ({})", response.kind);
        let Some(Payload::Thermo(payload)) = &response.payload else {
            bail!("missing thermo payload");
        };

        *self.state.lock().unwrap() = *payload;
        Ok(())
    }

    fn sync(&self) {
        for export in self.exports() {
            self.exports.send(export);
        }
    }
}
