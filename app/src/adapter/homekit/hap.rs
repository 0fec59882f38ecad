use serde::{Deserialize, Serialize};

/// HomeKit position state values for window coverings.
pub const POSITION_STATE_DECREASING: i64 = 0;
pub const POSITION_STATE_INCREASING: i64 = 1;
pub const POSITION_STATE_STOPPED: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HomekitService {
    Lightbulb,
    Thermostat,
    WindowCovering,
    MotionSensor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HomekitCharacteristic {
    On,
    CurrentTemperature,
    TargetTemperature,
    CurrentHeatingCoolingState,
    TargetHeatingCoolingState,
    CurrentPosition,
    TargetPosition,
    PositionState,
    MotionDetected,
}

/// One characteristic value pushed towards the downstream bridge.
#[derive(Debug, Clone)]
pub struct StateExport {
    pub name: String,
    pub service: HomekitService,
    pub characteristic: HomekitCharacteristic,
    pub value: serde_json::Value,
}

impl StateExport {
    pub fn new(
        name: impl Into<String>,
        service: HomekitService,
        characteristic: HomekitCharacteristic,
        value: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            service,
            characteristic,
            value,
        }
    }
}

/// A set- or get-callback arriving from the downstream bridge.
#[derive(Debug, Clone, Deserialize)]
pub struct HomekitEvent {
    pub name: String,
    #[serde(rename = "service_name")]
    pub service: HomekitService,
    pub characteristic: HomekitCharacteristic,
    #[serde(default)]
    pub value: serde_json::Value,
}
