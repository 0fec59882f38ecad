use std::sync::{Arc, Mutex};

use anyhow::{bail, ensure};
use serde_json::json;

use crate::adapter::homekit::hap::{HomekitCharacteristic, HomekitService, StateExport};
use crate::core::request::{GateRequest, Kind, LightState, Payload};
use crate::port::Accessory;
use infrastructure::EventEmitter;

pub struct Light {
    name: String,
    clu: String,
    id: String,
    state: Mutex<bool>,
    exports: EventEmitter<StateExport>,
}

impl Light {
    pub fn new(
        name: impl Into<String>,
        clu: impl Into<String>,
        id: impl Into<String>,
        exports: EventEmitter<StateExport>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            clu: clu.into(),
            id: id.into(),
            state: Mutex::new(false),
            exports,
        })
    }

    pub fn state(&self) -> bool {
        *self.state.lock().unwrap()
    }

    /// Command turning the light on or off; the verb is filled in on the
    /// write path.
    pub fn set_request(&self, on: bool) -> GateRequest {
        self.template().with_payload(Payload::Light(LightState { state: on }))
    }

    pub fn exports(&self) -> Vec<StateExport> {
        vec![StateExport::new(
            &self.name,
            HomekitService::Lightbulb,
            HomekitCharacteristic::On,
            json!(self.state()),
        )]
    }
}

impl Accessory for Light {
    fn template(&self) -> GateRequest {
        GateRequest::template(Kind::Light, &self.clu, &self.id)
    }

    fn load_response(&self, response: &GateRequest) -> anyhow::Result<()> {
        ensure!(response.kind == Kind::Light, "wrong object kind ({})", response.kind);
        let Some(Payload::Light(payload)) = &response.payload else {
            bail!("missing light payload");
        };

        *self.state.lock().unwrap() = payload.state;
        Ok(())
    }

    fn sync(&self) {
        for export in self.exports() {
            self.exports.send(export);
        }
    }
}
