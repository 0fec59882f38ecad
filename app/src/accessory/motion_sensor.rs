use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, ensure};
use serde_json::json;

use crate::adapter::homekit::hap::{HomekitCharacteristic, HomekitService, StateExport};
use crate::core::request::{GateRequest, Kind, Payload};
use crate::port::Accessory;
use infrastructure::EventEmitter;

const MOTION_CLEAR_AFTER: Duration = Duration::from_secs(15);

pub struct MotionSensor {
    name: String,
    clu: String,
    id: String,
    state: Mutex<bool>,
    /// Bumped on every state change so a pending auto-clear can tell whether
    /// it was superseded.
    generation: AtomicU64,
    exports: EventEmitter<StateExport>,
}

impl MotionSensor {
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
            generation: AtomicU64::new(0),
            exports,
        })
    }

    pub fn detected(&self) -> bool {
        *self.state.lock().unwrap()
    }

    fn apply_state(&self, detected: bool) -> u64 {
        *self.state.lock().unwrap() = detected;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.sync();
        generation
    }

    /// Push notification from the motion input endpoint. A detection clears
    /// itself after a quiet period unless a newer event arrives first.
    pub fn push(self: &Arc<Self>, detected: bool) {
        let generation = self.apply_state(detected);

        if !detected {
            return;
        }

        let sensor = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(MOTION_CLEAR_AFTER).await;
            if sensor.generation.load(Ordering::SeqCst) == generation {
                sensor.apply_state(false);
            }
        });
    }

    pub fn exports(&self) -> Vec<StateExport> {
        vec![StateExport::new(
            &self.name,
            HomekitService::MotionSensor,
            HomekitCharacteristic::MotionDetected,
            json!(self.detected()),
        )]
    }
}

impl Accessory for MotionSensor {
    fn template(&self) -> GateRequest {
        GateRequest::template(Kind::MotionSensor, &self.clu, &self.id)
    }

    fn load_response(&self, response: &GateRequest) -> anyhow::Result<()> {
        ensure!(
            response.kind == Kind::MotionSensor,
            "wrong object kind ({})",
            response.kind
        );
        let Some(Payload::MotionSensor(payload)) = &response.payload else {
            bail!("missing motion sensor payload");
        };

        *self.state.lock().unwrap() = payload.state;
        self.generation.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn sync(&self) {
        for export in self.exports() {
            self.exports.send(export);
        }
    }
}
