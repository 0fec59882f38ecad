use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::core::broker::UpdateSink;
use crate::core::request::{GateRequest, Kind};
use crate::port::Accessory;

/// One accessory as the catalog sees it: its address plus the adapter that
/// holds its state.
pub struct AccessoryRecord {
    pub kind: Kind,
    pub id: String,
    pub adapter: Arc<dyn Accessory>,
}

/// Gate-side grouping of accessories. `int_id` is parsed once at startup.
pub struct Cluster {
    pub id: String,
    pub int_id: u32,
    pub records: Vec<AccessoryRecord>,
}

/// Owns the accessory records and the freshness window. Shared between the
/// brokers (as their response sink), the refresh cycle and the read paths.
pub struct Catalog {
    clusters: Vec<Cluster>,
    fresh_window: Duration,
    last_refresh: Mutex<Option<Instant>>,
}

impl Catalog {
    pub fn new(clusters: Vec<Cluster>, fresh_window: Duration) -> Self {
        Self {
            clusters,
            fresh_window,
            last_refresh: Mutex::new(None),
        }
    }

    /// Query templates of every accessory, in stable catalog order.
    pub fn templates(&self) -> Vec<GateRequest> {
        self.clusters
            .iter()
            .flat_map(|cluster| cluster.records.iter().map(|record| record.adapter.template()))
            .collect()
    }

    pub fn accessory_count(&self) -> usize {
        self.clusters.iter().map(|cluster| cluster.records.len()).sum()
    }

    fn find(&self, clu: &str, id: &str, kind: Kind) -> Option<&AccessoryRecord> {
        self.clusters
            .iter()
            .filter(|cluster| cluster.id.eq_ignore_ascii_case(clu))
            .flat_map(|cluster| cluster.records.iter())
            .find(|record| record.kind == kind && record.id.eq_ignore_ascii_case(id))
    }

    /// Cached state counts as authoritative within the freshness window.
    pub fn is_fresh(&self) -> bool {
        match *self.last_refresh.lock().unwrap() {
            Some(at) => at.elapsed() <= self.fresh_window,
            None => false,
        }
    }

    fn mark_refreshed(&self) {
        *self.last_refresh.lock().unwrap() = Some(Instant::now());
    }

    fn route(&self, response: &GateRequest) {
        if response.kind == Kind::Unknown {
            tracing::warn!("unmatched object kind in gate response for [{}|{}]", response.clu, response.id);
            return;
        }

        let Some(record) = self.find(&response.clu, &response.id, response.kind) else {
            tracing::warn!(
                "{} not found in catalog [clu: {} id: {}]",
                response.kind,
                response.clu,
                response.id
            );
            return;
        };

        match record.adapter.load_response(response) {
            Ok(()) => record.adapter.sync(),
            Err(e) => tracing::error!("loading gate response for [{}|{}] failed: {:#}", response.clu, response.id, e),
        }
    }
}

impl UpdateSink for Catalog {
    /// Routes every decoded entry to its adapter. Entries that cannot be
    /// routed are logged and skipped, they never fail the flush.
    fn apply(&self, responses: Vec<GateRequest>) {
        for response in &responses {
            self.route(response);
        }

        self.mark_refreshed();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::core::request::{LightState, Payload, ThermoState};

    #[derive(Default)]
    struct StubAdapter {
        template: Option<GateRequest>,
        loaded: Mutex<Vec<GateRequest>>,
        synced: AtomicUsize,
    }

    impl StubAdapter {
        fn with_template(template: GateRequest) -> Arc<Self> {
            Arc::new(Self {
                template: Some(template),
                ..Default::default()
            })
        }
    }

    impl Accessory for StubAdapter {
        fn template(&self) -> GateRequest {
            self.template.clone().unwrap()
        }

        fn load_response(&self, response: &GateRequest) -> anyhow::Result<()> {
            self.loaded.lock().unwrap().push(response.clone());
            Ok(())
        }

        fn sync(&self) {
            self.synced.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn catalog_with(records: Vec<(String, Vec<AccessoryRecord>)>, fresh_window: Duration) -> Catalog {
        let clusters = records
            .into_iter()
            .map(|(id, records)| Cluster {
                id,
                int_id: 1,
                records,
            })
            .collect();
        Catalog::new(clusters, fresh_window)
    }

    #[test]
    fn routes_decoded_entries_to_their_adapters() {
        let light = StubAdapter::with_template(GateRequest::template(Kind::Light, "CLU01", "DOU0001"));
        let thermo = StubAdapter::with_template(GateRequest::template(Kind::Thermo, "CLU02", "THE0001"));

        let catalog = catalog_with(
            vec![
                (
                    "CLU01".to_string(),
                    vec![AccessoryRecord {
                        kind: Kind::Light,
                        id: "DOU0001".to_string(),
                        adapter: light.clone(),
                    }],
                ),
                (
                    "CLU02".to_string(),
                    vec![AccessoryRecord {
                        kind: Kind::Thermo,
                        id: "THE0001".to_string(),
                        adapter: thermo.clone(),
                    }],
                ),
            ],
            Duration::from_secs(3),
        );

        let responses: Vec<GateRequest> = serde_json::from_value(serde_json::json!([
            { "Clu": "CLU01", "Id": "DOU0001", "Kind": "Light", "Light": { "State": true } },
            { "Clu": "CLU02", "Id": "THE0001", "Kind": "Thermo",
              "Thermo": { "TempCurrent": 21.5, "TempSetpoint": 22.0, "TempTarget": 22.0,
                          "TempHoliday": 0.0, "TempMin": 15.0, "TempMax": 30.0, "State": 1, "Mode": 0 } },
            { "Clu": "CLU01", "Id": "XYZ0001", "Kind": "Sprinkler" }
        ]))
        .unwrap();

        catalog.apply(responses);

        let loaded = light.loaded.lock().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].payload, Some(Payload::Light(LightState { state: true })));
        assert_eq!(light.synced.load(Ordering::SeqCst), 1);

        let loaded = thermo.loaded.lock().unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(
            loaded[0].payload,
            Some(Payload::Thermo(ThermoState {
                temp_current: 21.5,
                temp_setpoint: 22.0,
                temp_target: 22.0,
                temp_holiday: 0.0,
                temp_min: 15.0,
                temp_max: 30.0,
                state: 1,
                mode: 0,
            }))
        );

        assert!(catalog.is_fresh());
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let light = StubAdapter::with_template(GateRequest::template(Kind::Light, "CLU01", "DOU0001"));
        let catalog = catalog_with(
            vec![(
                "CLU01".to_string(),
                vec![AccessoryRecord {
                    kind: Kind::Light,
                    id: "DOU0001".to_string(),
                    adapter: light.clone(),
                }],
            )],
            Duration::from_secs(3),
        );

        catalog.apply(
            serde_json::from_value(serde_json::json!([
                { "Clu": "clu01", "Id": "dou0001", "Kind": "Light", "Light": { "State": false } }
            ]))
            .unwrap(),
        );

        assert_eq!(light.loaded.lock().unwrap().len(), 1);
    }

    #[test]
    fn missing_accessories_do_not_fail_the_update() {
        let catalog = catalog_with(vec![("CLU01".to_string(), vec![])], Duration::from_secs(3));

        catalog.apply(
            serde_json::from_value(serde_json::json!([
                { "Clu": "CLU01", "Id": "DOU0009", "Kind": "Light", "Light": { "State": true } }
            ]))
            .unwrap(),
        );

        assert!(catalog.is_fresh());
    }

    #[test]
    fn freshness_expires_after_the_window() {
        let catalog = catalog_with(vec![], Duration::from_millis(30));

        assert!(!catalog.is_fresh());
        catalog.apply(vec![]);
        assert!(catalog.is_fresh());

        std::thread::sleep(Duration::from_millis(60));
        assert!(!catalog.is_fresh());
    }

    #[test]
    fn templates_preserve_catalog_order() {
        let first = StubAdapter::with_template(GateRequest::template(Kind::Light, "CLU01", "DOU0001"));
        let second = StubAdapter::with_template(GateRequest::template(Kind::Shutter, "CLU01", "ROL0001"));

        let catalog = catalog_with(
            vec![(
                "CLU01".to_string(),
                vec![
                    AccessoryRecord {
                        kind: Kind::Light,
                        id: "DOU0001".to_string(),
                        adapter: first,
                    },
                    AccessoryRecord {
                        kind: Kind::Shutter,
                        id: "ROL0001".to_string(),
                        adapter: second,
                    },
                ],
            )],
            Duration::from_secs(3),
        );

        let templates = catalog.templates();
        assert_eq!(templates.len(), 2);
        assert_eq!(templates[0].kind, Kind::Light);
        assert_eq!(templates[1].kind, Kind::Shutter);
    }
}
