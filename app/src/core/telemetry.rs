use std::sync::Mutex;
use std::time::{Duration, Instant};

use infrastructure::{EventBus, EventListener};

/// Which of the two brokers produced a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerRole {
    Reader,
    Writer,
}

impl BrokerRole {
    pub fn as_label(&self) -> &'static str {
        match self {
            BrokerRole::Reader => "reader",
            BrokerRole::Writer => "writer",
        }
    }
}

/// Emitted once per completed flush attempt, successful or not.
#[derive(Debug, Clone)]
pub struct FlushEvent {
    pub role: BrokerRole,
    pub object_count: usize,
    pub duration: Duration,
    pub success: bool,
}

#[derive(Debug, Default)]
struct Counters {
    queue_adds: u64,
    queue_rejects: u64,
    queue_duplicates: u64,

    flush_count: u64,
    flush_errors: u64,
    flush_avg_ms: f64,

    writer_flush_count: u64,
    writer_flush_errors: u64,
    writer_flush_avg_ms: f64,

    command_count: u64,
    command_avg_ms: f64,
    command_queue_wait_avg_ms: f64,

    refresh_count: u64,
    refresh_objects: u64,
    refresh_avg_ms: f64,
}

/// Operational counters and cumulative means. Pure observer: nothing in the
/// bridge changes behavior based on these values.
pub struct Telemetry {
    counters: Mutex<Counters>,
    events: EventBus<FlushEvent>,
    started: Instant,
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            events: EventBus::new(64),
            started: Instant::now(),
        }
    }

    pub fn subscribe(&self) -> EventListener<FlushEvent> {
        self.events.subscribe()
    }

    pub fn record_queue_add(&self) {
        self.counters.lock().unwrap().queue_adds += 1;
    }

    pub fn record_queue_reject(&self) {
        self.counters.lock().unwrap().queue_rejects += 1;
    }

    pub fn record_queue_duplicate(&self) {
        self.counters.lock().unwrap().queue_duplicates += 1;
    }

    pub fn record_flush(&self, role: BrokerRole, duration: Duration, object_count: usize, success: bool) {
        {
            let mut counters = self.counters.lock().unwrap();
            match role {
                BrokerRole::Reader => {
                    counters.flush_count += 1;
                    if success {
                        // failed requests are excluded from the duration mean
                        counters.flush_avg_ms = incremental_mean(
                            counters.flush_avg_ms,
                            counters.flush_count - counters.flush_errors,
                            duration,
                        );
                    } else {
                        counters.flush_errors += 1;
                    }
                }
                BrokerRole::Writer => {
                    counters.writer_flush_count += 1;
                    if success {
                        // failed requests are excluded from the duration mean
                        counters.writer_flush_avg_ms = incremental_mean(
                            counters.writer_flush_avg_ms,
                            counters.writer_flush_count - counters.writer_flush_errors,
                            duration,
                        );
                    } else {
                        counters.writer_flush_errors += 1;
                    }
                }
            }
        }

        self.events.emitter().send(FlushEvent {
            role,
            object_count,
            duration,
            success,
        });
    }

    pub fn record_command(&self, total: Duration, queue_wait: Duration) {
        let mut counters = self.counters.lock().unwrap();
        counters.command_count += 1;
        counters.command_avg_ms = incremental_mean(counters.command_avg_ms, counters.command_count, total);
        counters.command_queue_wait_avg_ms =
            incremental_mean(counters.command_queue_wait_avg_ms, counters.command_count, queue_wait);
    }

    pub fn record_refresh(&self, duration: Duration, object_count: usize) {
        let mut counters = self.counters.lock().unwrap();
        counters.refresh_count += 1;
        counters.refresh_objects += object_count as u64;
        counters.refresh_avg_ms = incremental_mean(counters.refresh_avg_ms, counters.refresh_count, duration);
    }

    pub fn snapshot(&self) -> TelemetrySnapshot {
        let counters = self.counters.lock().unwrap();
        TelemetrySnapshot {
            queue_adds: counters.queue_adds,
            queue_rejects: counters.queue_rejects,
            queue_duplicates: counters.queue_duplicates,
            flush_count: counters.flush_count,
            flush_errors: counters.flush_errors,
            flush_avg_ms: counters.flush_avg_ms,
            writer_flush_count: counters.writer_flush_count,
            writer_flush_errors: counters.writer_flush_errors,
            writer_flush_avg_ms: counters.writer_flush_avg_ms,
            command_count: counters.command_count,
            command_avg_ms: counters.command_avg_ms,
            command_queue_wait_avg_ms: counters.command_queue_wait_avg_ms,
            refresh_count: counters.refresh_count,
            refresh_objects: counters.refresh_objects,
            refresh_avg_ms: counters.refresh_avg_ms,
            uptime: self.started.elapsed(),
        }
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

fn incremental_mean(mean: f64, count: u64, value: Duration) -> f64 {
    let value_ms = value.as_secs_f64() * 1000.0;
    if count <= 1 {
        value_ms
    } else {
        (mean * (count - 1) as f64 + value_ms) / count as f64
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySnapshot {
    pub queue_adds: u64,
    pub queue_rejects: u64,
    pub queue_duplicates: u64,
    pub flush_count: u64,
    pub flush_errors: u64,
    pub flush_avg_ms: f64,
    pub writer_flush_count: u64,
    pub writer_flush_errors: u64,
    pub writer_flush_avg_ms: f64,
    pub command_count: u64,
    pub command_avg_ms: f64,
    pub command_queue_wait_avg_ms: f64,
    pub refresh_count: u64,
    pub refresh_objects: u64,
    pub refresh_avg_ms: f64,
    pub uptime: Duration,
}
