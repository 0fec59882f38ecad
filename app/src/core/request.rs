use serde::{Deserialize, Serialize};

/// Accessory kinds known to the gate. Responses may carry kinds this bridge
/// does not handle, those are kept as [`Kind::Unknown`] instead of failing
/// the whole batch decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, derive_more::Display)]
pub enum Kind {
    Light,
    Thermo,
    Shutter,
    MotionSensor,
    Unknown,
}

impl<'de> Deserialize<'de> for Kind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(match name.as_str() {
            "Light" => Kind::Light,
            "Thermo" => Kind::Thermo,
            "Shutter" => Kind::Shutter,
            "MotionSensor" => Kind::MotionSensor,
            _ => Kind::Unknown,
        })
    }
}

/// Operation verb as the gate expects it on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Cmd {
    Set,
    MoveUp,
    MoveDown,
    Stop,
}

impl Cmd {
    fn as_wire(&self) -> &'static str {
        match self {
            Cmd::Set => "SET",
            Cmd::MoveUp => "MOVEUP",
            Cmd::MoveDown => "MOVEDOWN",
            Cmd::Stop => "STOP",
        }
    }
}

impl std::fmt::Display for Cmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_wire())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LightState {
    pub state: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ThermoState {
    pub temp_current: f64,
    pub temp_setpoint: f64,
    pub temp_target: f64,
    pub temp_holiday: f64,
    pub temp_min: f64,
    pub temp_max: f64,
    pub state: i32,
    pub mode: i32,
}

/// `state`: 0 stopped, 1 moving up, 2 moving down. `max_time` is the full
/// travel time in milliseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ShutterState {
    pub state: i32,
    pub max_time: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MotionState {
    pub state: bool,
}

/// The state slot of a request. Exactly one slot may be present on the wire
/// and it must agree with the declared kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Light(LightState),
    Thermo(ThermoState),
    Shutter(ShutterState),
    MotionSensor(MotionState),
}

impl Payload {
    pub fn kind(&self) -> Kind {
        match self {
            Payload::Light(_) => Kind::Light,
            Payload::Thermo(_) => Kind::Thermo,
            Payload::Shutter(_) => Kind::Shutter,
            Payload::MotionSensor(_) => Kind::MotionSensor,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("more than one payload slot present")]
    AmbiguousPayload,
    #[error("kind {kind} does not match payload slot {payload}")]
    KindMismatch { kind: Kind, payload: Kind },
}

/// One addressable command or query for a single accessory.
///
/// Equality of two requests as far as queue deduplication is concerned is
/// equality of [`GateRequest::key`]; the payload carries no identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireRequest", into = "WireRequest")]
pub struct GateRequest {
    pub clu: String,
    pub id: String,
    pub kind: Kind,
    pub cmd: Option<Cmd>,
    pub source: Option<String>,
    pub payload: Option<Payload>,
}

impl GateRequest {
    pub fn template(kind: Kind, clu: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            clu: clu.into(),
            id: id.into(),
            kind,
            cmd: None,
            source: None,
            payload: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_cmd(mut self, cmd: Cmd) -> Self {
        self.cmd = Some(cmd);
        self
    }

    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Canonical dedup key: `clu|id|kind|cmd`, all lowercase. The payload is
    /// deliberately not part of the key.
    pub fn key(&self) -> String {
        format!(
            "{}|{}|{}|{}",
            self.clu.to_lowercase(),
            self.id.to_lowercase(),
            self.kind.to_string().to_lowercase(),
            self.cmd.map(|c| c.as_wire().to_lowercase()).unwrap_or_default(),
        )
    }

}

/// Wire shape of a request: the payload lives in a per-kind slot next to the
/// addressing fields, e.g. `{"Clu": "...", "Kind": "Light", "Light": {...}}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireRequest {
    clu: String,
    id: String,
    kind: Kind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    cmd: Option<Cmd>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    light: Option<LightState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thermo: Option<ThermoState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    shutter: Option<ShutterState>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    motion_sensor: Option<MotionState>,
}

impl TryFrom<WireRequest> for GateRequest {
    type Error = RequestError;

    fn try_from(wire: WireRequest) -> Result<Self, Self::Error> {
        let mut slots: Vec<Payload> = Vec::new();
        if let Some(s) = wire.light {
            slots.push(Payload::Light(s));
        }
        if let Some(s) = wire.thermo {
            slots.push(Payload::Thermo(s));
        }
        if let Some(s) = wire.shutter {
            slots.push(Payload::Shutter(s));
        }
        if let Some(s) = wire.motion_sensor {
            slots.push(Payload::MotionSensor(s));
        }

        if slots.len() > 1 {
            return Err(RequestError::AmbiguousPayload);
        }

        let payload = match (wire.kind, slots.pop()) {
            (Kind::Unknown, _) => None,
            (kind, Some(payload)) if payload.kind() != kind => {
                return Err(RequestError::KindMismatch {
                    kind,
                    payload: payload.kind(),
                });
            }
            (_, payload) => payload,
        };

        Ok(GateRequest {
            clu: wire.clu,
            id: wire.id,
            kind: wire.kind,
            cmd: wire.cmd,
            source: wire.source,
            payload,
        })
    }
}

impl From<GateRequest> for WireRequest {
    fn from(request: GateRequest) -> Self {
        let mut wire = WireRequest {
            clu: request.clu,
            id: request.id,
            kind: request.kind,
            cmd: request.cmd,
            source: request.source,
            light: None,
            thermo: None,
            shutter: None,
            motion_sensor: None,
        };

        match request.payload {
            Some(Payload::Light(s)) => wire.light = Some(s),
            Some(Payload::Thermo(s)) => wire.thermo = Some(s),
            Some(Payload::Shutter(s)) => wire.shutter = Some(s),
            Some(Payload::MotionSensor(s)) => wire.motion_sensor = Some(s),
            None => {}
        }

        wire
    }
}

#[cfg(test)]
mod tests {
    use assert_json_diff::assert_json_eq;
    use serde_json::json;

    use super::*;

    #[test]
    fn write_request_serializes_with_payload_slot() {
        let request = GateRequest::template(Kind::Light, "CLU01", "DOU0001")
            .with_cmd(Cmd::Set)
            .with_payload(Payload::Light(LightState { state: true }));

        assert_json_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "Clu": "CLU01",
                "Id": "DOU0001",
                "Kind": "Light",
                "Cmd": "SET",
                "Light": { "State": true }
            })
        );
    }

    #[test]
    fn read_template_serializes_without_optionals() {
        let request = GateRequest::template(Kind::Thermo, "CLU01", "THE0001").with_source("THE0001_temp");

        assert_json_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "Clu": "CLU01",
                "Id": "THE0001",
                "Kind": "Thermo",
                "Source": "THE0001_temp"
            })
        );
    }

    #[test]
    fn response_entry_decodes_into_payload() {
        let decoded: GateRequest = serde_json::from_value(json!({
            "Clu": "CLU01",
            "Id": "ROL0002",
            "Kind": "Shutter",
            "Shutter": { "State": 1, "MaxTime": 20000 }
        }))
        .unwrap();

        assert_eq!(
            decoded.payload,
            Some(Payload::Shutter(ShutterState {
                state: 1,
                max_time: 20000
            }))
        );
    }

    #[test]
    fn decode_fails_when_kind_and_slot_disagree() {
        let result: Result<GateRequest, _> = serde_json::from_value(json!({
            "Clu": "CLU01",
            "Id": "DOU0001",
            "Kind": "Light",
            "Thermo": { "TempCurrent": 21.0, "TempSetpoint": 0.0, "TempTarget": 0.0,
                        "TempHoliday": 0.0, "TempMin": 0.0, "TempMax": 0.0, "State": 0, "Mode": 0 }
        }));

        assert!(result.is_err());
    }

    #[test]
    fn decode_fails_on_multiple_slots() {
        let result: Result<GateRequest, _> = serde_json::from_value(json!({
            "Clu": "CLU01",
            "Id": "DOU0001",
            "Kind": "Light",
            "Light": { "State": true },
            "MotionSensor": { "State": false }
        }));

        assert!(result.is_err());
    }

    #[test]
    fn unrecognized_kind_is_tolerated() {
        let decoded: GateRequest = serde_json::from_value(json!({
            "Clu": "CLU01",
            "Id": "XYZ0001",
            "Kind": "Sprinkler",
            "Light": { "State": true }
        }))
        .unwrap();

        assert_eq!(decoded.kind, Kind::Unknown);
        assert_eq!(decoded.payload, None);
    }

    #[test]
    fn key_is_case_insensitive_and_ignores_payload() {
        let a = GateRequest::template(Kind::Light, "CLU01", "DOU0001")
            .with_cmd(Cmd::Set)
            .with_payload(Payload::Light(LightState { state: true }));
        let b = GateRequest::template(Kind::Light, "clu01", "dou0001")
            .with_cmd(Cmd::Set)
            .with_payload(Payload::Light(LightState { state: false }));

        assert_eq!(a.key(), b.key());
        assert_eq!(a.key(), "clu01|dou0001|light|set");
    }

    #[test]
    fn key_distinguishes_commands() {
        let up = GateRequest::template(Kind::Shutter, "CLU01", "ROL0001").with_cmd(Cmd::MoveUp);
        let down = GateRequest::template(Kind::Shutter, "CLU01", "ROL0001").with_cmd(Cmd::MoveDown);

        assert_ne!(up.key(), down.key());
    }
}
