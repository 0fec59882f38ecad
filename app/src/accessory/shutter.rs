use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, ensure};
use serde_json::json;

use crate::adapter::homekit::hap::{
    HomekitCharacteristic, HomekitService, POSITION_STATE_DECREASING, POSITION_STATE_INCREASING,
    POSITION_STATE_STOPPED, StateExport,
};
use crate::core::request::{Cmd, GateRequest, Kind, Payload, ShutterState};
use crate::port::Accessory;
use infrastructure::EventEmitter;

/// Number of simulated position steps over a full travel.
const TRAVEL_STEPS: i64 = 100;

pub struct Shutter {
    name: String,
    clu: String,
    id: String,
    state: Mutex<ShutterState>,
    /// Simulated position in percent, 0 closed, 100 open. The gate does not
    /// report positions, so travel is extrapolated from `max_time`.
    position: Mutex<i64>,
    exports: EventEmitter<StateExport>,
}

impl Shutter {
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
            state: Mutex::new(ShutterState::default()),
            position: Mutex::new(0),
            exports,
        })
    }

    pub fn position(&self) -> i64 {
        *self.position.lock().unwrap()
    }

    /// Command moving towards `target`, derived from the current simulated
    /// position. A target equal to the current position becomes a stop.
    pub fn move_to_request(&self, target: i64) -> GateRequest {
        let position = self.position();
        let cmd = if target == position {
            Cmd::Stop
        } else if target > position {
            Cmd::MoveUp
        } else {
            Cmd::MoveDown
        };

        let state = *self.state.lock().unwrap();
        self.template().with_cmd(cmd).with_payload(Payload::Shutter(state))
    }

    fn hk_position_state(&self) -> i64 {
        match self.state.lock().unwrap().state {
            1 => POSITION_STATE_INCREASING,
            2 => POSITION_STATE_DECREASING,
            _ => POSITION_STATE_STOPPED,
        }
    }

    /// Walks the simulated position towards `target`, one percent per step,
    /// spread over the configured full travel time. Each step is pushed
    /// downstream so the covering animates instead of jumping.
    pub fn begin_travel(self: &Arc<Self>, target: i64) {
        let shutter = self.clone();
        let target = target.clamp(0, TRAVEL_STEPS);

        tokio::spawn(async move {
            let max_time = shutter.state.lock().unwrap().max_time as i64;
            let step_duration = Duration::from_millis((max_time / TRAVEL_STEPS).max(1) as u64);

            loop {
                {
                    let mut position = shutter.position.lock().unwrap();
                    if *position == target {
                        break;
                    }
                    *position += if target > *position { 1 } else { -1 };
                }

                shutter.exports.send(StateExport::new(
                    &shutter.name,
                    HomekitService::WindowCovering,
                    HomekitCharacteristic::CurrentPosition,
                    json!(shutter.position()),
                ));

                tokio::time::sleep(step_duration).await;
            }

            shutter.exports.send(StateExport::new(
                &shutter.name,
                HomekitService::WindowCovering,
                HomekitCharacteristic::PositionState,
                json!(POSITION_STATE_STOPPED),
            ));
        });
    }

    pub fn exports(&self) -> Vec<StateExport> {
        vec![
            StateExport::new(
                &self.name,
                HomekitService::WindowCovering,
                HomekitCharacteristic::CurrentPosition,
                json!(self.position()),
            ),
            StateExport::new(
                &self.name,
                HomekitService::WindowCovering,
                HomekitCharacteristic::PositionState,
                json!(self.hk_position_state()),
            ),
        ]
    }
}

impl Accessory for Shutter {
    fn template(&self) -> GateRequest {
        GateRequest::template(Kind::Shutter, &self.clu, &self.id)
    }

    fn load_response(&self, response: &GateRequest) -> anyhow::Result<()> {
        ensure!(response.kind == Kind::Shutter, "wrong object kind ({})", response.kind);
        let Some(Payload::Shutter(payload)) = &response.payload else {
            bail!("missing shutter payload");
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
