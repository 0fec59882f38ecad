use std::sync::Arc;

use opentelemetry::KeyValue;
use opentelemetry::metrics::{Counter, Gauge, Histogram};

use infrastructure::EventListener;

use crate::core::telemetry::{FlushEvent, Telemetry};

/// Pushes the flush-event stream and the aggregate counters to the meter.
/// Pure observer, nothing feeds back into the bridge.
///
/// Instruments are created once and owned here: flushes are counted per role
/// and outcome, their durations and batch sizes recorded as histograms, and
/// the snapshot aggregates exposed as two labeled gauge families.
pub struct TelemetryExporter {
    events: EventListener<FlushEvent>,
    telemetry: Arc<Telemetry>,
    flush_total: Counter<u64>,
    flush_duration_ms: Histogram<f64>,
    flush_object_count: Histogram<u64>,
    queue_operations: Gauge<u64>,
    latency_avg_ms: Gauge<f64>,
}

impl TelemetryExporter {
    pub fn new(telemetry: Arc<Telemetry>) -> Self {
        let meter = opentelemetry::global::meter("gatebridge");

        Self {
            events: telemetry.subscribe(),
            telemetry,
            flush_total: meter.u64_counter("gate_flush_total").build(),
            flush_duration_ms: meter.f64_histogram("gate_flush_duration_ms").build(),
            flush_object_count: meter.u64_histogram("gate_flush_object_count").build(),
            queue_operations: meter.u64_gauge("gate_queue_operations").build(),
            latency_avg_ms: meter.f64_gauge("gate_latency_avg_ms").build(),
        }
    }

    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            let role = KeyValue::new("role", event.role.as_label());
            let outcome = KeyValue::new("outcome", if event.success { "success" } else { "error" });

            self.flush_total.add(1, &[role.clone(), outcome]);
            self.flush_duration_ms
                .record(event.duration.as_secs_f64() * 1000.0, &[role.clone()]);
            self.flush_object_count.record(event.object_count as u64, &[role]);

            self.export_aggregates();
        }
    }

    fn export_aggregates(&self) {
        let snapshot = self.telemetry.snapshot();

        for (operation, value) in [
            ("adds", snapshot.queue_adds),
            ("duplicates", snapshot.queue_duplicates),
            ("rejects", snapshot.queue_rejects),
        ] {
            self.queue_operations.record(value, &[KeyValue::new("operation", operation)]);
        }

        for (operation, value) in [
            ("command", snapshot.command_avg_ms),
            ("command_queue_wait", snapshot.command_queue_wait_avg_ms),
            ("refresh", snapshot.refresh_avg_ms),
        ] {
            self.latency_avg_ms.record(value, &[KeyValue::new("operation", operation)]);
        }
    }
}
