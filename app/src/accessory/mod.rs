mod light;
mod motion_sensor;
mod shutter;
mod thermo;

pub use light::Light;
pub use motion_sensor::MotionSensor;
pub use shutter::Shutter;
pub use thermo::Thermo;

use std::sync::Arc;

use serde::Deserialize;

use crate::adapter::homekit::hap::{HomekitCharacteristic, HomekitService, StateExport};
use crate::core::id::{long_id, mixed_id, parse_cluster_id};
use crate::core::request::{GateRequest, Kind};
use crate::gate::catalog::{AccessoryRecord, Cluster};
use crate::port::Accessory;
use infrastructure::EventEmitter;

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub lights: Vec<AccessoryConfig>,
    #[serde(default)]
    pub thermostats: Vec<AccessoryConfig>,
    #[serde(default)]
    pub shutters: Vec<AccessoryConfig>,
    #[serde(default)]
    pub motion_sensors: Vec<AccessoryConfig>,
}

/// `kind` is the gate's device prefix (`DOU`, `THE`, ...); together with the
/// zero-padded number it forms the wire identifier.
#[derive(Debug, Clone, Deserialize)]
pub struct AccessoryConfig {
    pub id: u32,
    pub name: String,
    pub kind: String,
    #[serde(default)]
    pub source: Option<String>,
}

pub enum AccessoryHandle {
    Light(Arc<Light>),
    Thermo(Arc<Thermo>),
    Shutter(Arc<Shutter>),
    MotionSensor(Arc<MotionSensor>),
}

impl AccessoryHandle {
    pub fn template(&self) -> GateRequest {
        match self {
            AccessoryHandle::Light(a) => a.template(),
            AccessoryHandle::Thermo(a) => a.template(),
            AccessoryHandle::Shutter(a) => a.template(),
            AccessoryHandle::MotionSensor(a) => a.template(),
        }
    }

    pub fn exports(&self) -> Vec<StateExport> {
        match self {
            AccessoryHandle::Light(a) => a.exports(),
            AccessoryHandle::Thermo(a) => a.exports(),
            AccessoryHandle::Shutter(a) => a.exports(),
            AccessoryHandle::MotionSensor(a) => a.exports(),
        }
    }

    pub fn service(&self) -> HomekitService {
        match self {
            AccessoryHandle::Light(_) => HomekitService::Lightbulb,
            AccessoryHandle::Thermo(_) => HomekitService::Thermostat,
            AccessoryHandle::Shutter(_) => HomekitService::WindowCovering,
            AccessoryHandle::MotionSensor(_) => HomekitService::MotionSensor,
        }
    }

    pub fn characteristics(&self) -> Vec<HomekitCharacteristic> {
        match self {
            AccessoryHandle::Light(_) => vec![HomekitCharacteristic::On],
            AccessoryHandle::Thermo(_) => vec![
                HomekitCharacteristic::CurrentTemperature,
                HomekitCharacteristic::TargetTemperature,
                HomekitCharacteristic::CurrentHeatingCoolingState,
                HomekitCharacteristic::TargetHeatingCoolingState,
            ],
            AccessoryHandle::Shutter(_) => vec![
                HomekitCharacteristic::CurrentPosition,
                HomekitCharacteristic::TargetPosition,
                HomekitCharacteristic::PositionState,
            ],
            AccessoryHandle::MotionSensor(_) => vec![HomekitCharacteristic::MotionDetected],
        }
    }
}

pub struct RegistryEntry {
    pub name: String,
    pub clu: String,
    pub id: String,
    pub long_id: u64,
    pub handle: AccessoryHandle,
}

/// Name- and address-indexed view of all accessories, shared between the
/// downstream runtime and the motion input endpoint.
#[derive(Clone)]
pub struct AccessoryRegistry {
    entries: Arc<Vec<RegistryEntry>>,
}

impl AccessoryRegistry {
    pub fn entries(&self) -> &[RegistryEntry] {
        &self.entries
    }

    pub fn find_by_name(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    pub fn find_motion_sensor(&self, clu: &str, id: &str) -> Option<Arc<MotionSensor>> {
        self.entries.iter().find_map(|entry| match &entry.handle {
            AccessoryHandle::MotionSensor(sensor)
                if entry.clu.eq_ignore_ascii_case(clu) && entry.id.eq_ignore_ascii_case(id) =>
            {
                Some(sensor.clone())
            }
            _ => None,
        })
    }
}

/// Builds the gate-side catalog and the downstream registry from config.
/// A cluster whose identifier does not parse loses its accessories but does
/// not stop the bridge.
pub fn build(configs: &[ClusterConfig], exports: EventEmitter<StateExport>) -> (Vec<Cluster>, AccessoryRegistry) {
    let mut clusters = Vec::new();
    let mut entries = Vec::new();

    for config in configs {
        let int_id = match parse_cluster_id(&config.id) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!("skipping cluster {} ({}): {:#}", config.id, config.name, e);
                continue;
            }
        };

        let mut records = Vec::new();

        for cfg in &config.lights {
            let id = mixed_id(&cfg.kind, cfg.id);
            let adapter = Light::new(&cfg.name, &config.id, &id, exports.clone());
            records.push(AccessoryRecord {
                kind: Kind::Light,
                id: id.clone(),
                adapter: adapter.clone(),
            });
            entries.push(RegistryEntry {
                name: cfg.name.clone(),
                clu: config.id.clone(),
                id,
                long_id: long_id(int_id, cfg.id),
                handle: AccessoryHandle::Light(adapter),
            });
        }

        for cfg in &config.thermostats {
            let id = mixed_id(&cfg.kind, cfg.id);
            let adapter = Thermo::new(&cfg.name, &config.id, &id, cfg.source.clone(), exports.clone());
            records.push(AccessoryRecord {
                kind: Kind::Thermo,
                id: id.clone(),
                adapter: adapter.clone(),
            });
            entries.push(RegistryEntry {
                name: cfg.name.clone(),
                clu: config.id.clone(),
                id,
                long_id: long_id(int_id, cfg.id),
                handle: AccessoryHandle::Thermo(adapter),
            });
        }

        for cfg in &config.shutters {
            let id = mixed_id(&cfg.kind, cfg.id);
            let adapter = Shutter::new(&cfg.name, &config.id, &id, exports.clone());
            records.push(AccessoryRecord {
                kind: Kind::Shutter,
                id: id.clone(),
                adapter: adapter.clone(),
            });
            entries.push(RegistryEntry {
                name: cfg.name.clone(),
                clu: config.id.clone(),
                id,
                long_id: long_id(int_id, cfg.id),
                handle: AccessoryHandle::Shutter(adapter),
            });
        }

        for cfg in &config.motion_sensors {
            let id = mixed_id(&cfg.kind, cfg.id);
            let adapter = MotionSensor::new(&cfg.name, &config.id, &id, exports.clone());
            records.push(AccessoryRecord {
                kind: Kind::MotionSensor,
                id: id.clone(),
                adapter: adapter.clone(),
            });
            entries.push(RegistryEntry {
                name: cfg.name.clone(),
                clu: config.id.clone(),
                id,
                long_id: long_id(int_id, cfg.id),
                handle: AccessoryHandle::MotionSensor(adapter),
            });
        }

        clusters.push(Cluster {
            id: config.id.clone(),
            int_id,
            records,
        });
    }

    (
        clusters,
        AccessoryRegistry {
            entries: Arc::new(entries),
        },
    )
}
