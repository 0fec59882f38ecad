use std::sync::Arc;
use std::time::Instant;

use tokio::sync::oneshot;

use crate::core::broker::{FlushError, GateBroker};
use crate::core::request::{Cmd, GateRequest};
use crate::core::telemetry::Telemetry;
use crate::gate::catalog::Catalog;

/// Drives the refresh cycle and is the single entry point adapters use for
/// commands. Reads go through the batching reader broker, writes through the
/// serialized writer broker; decoded responses come back via the catalog.
pub struct GateService {
    catalog: Arc<Catalog>,
    reader: Arc<GateBroker>,
    writer: Arc<GateBroker>,
    cycle_period: std::time::Duration,
    telemetry: Arc<Telemetry>,
}

impl GateService {
    pub fn new(
        catalog: Arc<Catalog>,
        reader: Arc<GateBroker>,
        writer: Arc<GateBroker>,
        cycle_period: std::time::Duration,
        telemetry: Arc<Telemetry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            catalog,
            reader,
            writer,
            cycle_period,
            telemetry,
        })
    }

    pub fn is_fresh(&self) -> bool {
        self.catalog.is_fresh()
    }

    /// Launches a refresh on every cycle tick. A slow refresh does not delay
    /// the next tick, they are allowed to overlap.
    pub async fn run_cycle(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.cycle_period);

        loop {
            ticker.tick().await;
            let service = self.clone();
            tokio::spawn(async move { service.refresh().await });
        }
    }

    /// Queues the whole catalog for reading, re-offering whatever the reader
    /// could not admit until everything is in. Responses are routed by the
    /// reader broker as each wave flushes.
    pub async fn refresh(&self) {
        let started = Instant::now();
        let templates = self.catalog.templates();
        let object_count = templates.len();

        if object_count == 0 {
            tracing::debug!("refresh skipped, catalog is empty");
            return;
        }

        tracing::debug!("refresh queueing {} objects", object_count);

        let mut pending = self.reader.queue(None, templates).await;
        while !pending.is_empty() {
            pending = self.reader.queue(None, pending).await;
        }

        self.telemetry.record_refresh(started.elapsed(), object_count);
        tracing::info!(
            "refresh queued {} objects in {}ms",
            object_count,
            started.elapsed().as_millis()
        );
    }

    /// Read-through for a single accessory, used when a downstream get finds
    /// the cache stale. Returns once the request is admitted; the response
    /// arrives through the catalog.
    pub async fn request_read(&self, request: GateRequest) {
        let mut pending = self.reader.queue(None, vec![request]).await;
        while !pending.is_empty() {
            pending = self.reader.queue(None, pending).await;
        }
    }

    /// Sends one command through the writer and waits for the flush that
    /// carries it. Commands without a verb default to `SET`.
    pub async fn send_write(&self, mut request: GateRequest) -> Result<(), FlushError> {
        let started = Instant::now();

        if request.cmd.is_none() {
            request.cmd = Some(Cmd::Set);
        }

        let (tx, rx) = oneshot::channel();
        let queued_at = Instant::now();
        let mut pending = self.writer.queue(Some(tx), vec![request]).await;
        while !pending.is_empty() {
            pending = self.writer.queue(None, pending).await;
        }

        let result = match rx.await {
            Ok(result) => result,
            Err(_) => Err(FlushError::Shutdown),
        };

        let queue_wait = queued_at.elapsed();
        self.telemetry.record_command(started.elapsed(), queue_wait);
        tracing::debug!(
            "command completed in {}ms (queue wait {}ms)",
            started.elapsed().as_millis(),
            queue_wait.as_millis()
        );

        result
    }

    /// Drains both brokers once and rejects whatever arrives too late.
    pub async fn shutdown(&self) {
        self.writer.shutdown().await;
        self.reader.shutdown().await;
    }
}
