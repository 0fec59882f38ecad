use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reqwest::header::CONTENT_TYPE;
use reqwest_middleware::ClientWithMiddleware;
use tokio::sync::{Semaphore, oneshot};

use crate::core::request::GateRequest;
use crate::core::telemetry::{BrokerRole, Telemetry};

const GATE_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Receives every successfully decoded flush response.
pub trait UpdateSink: Send + Sync {
    fn apply(&self, responses: Vec<GateRequest>);
}

/// Outcome of a flush, fanned out to every waiter of the batch. Clonable so
/// a single failure can be delivered to all of them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlushError {
    #[error("building gate request failed: {0}")]
    Build(String),
    #[error("gate request failed: {0}")]
    Transport(String),
    #[error("gate returned non-success status: {0}")]
    Status(String),
    #[error("decoding gate response failed: {0}")]
    Decode(String),
    #[error("bridge is shutting down")]
    Shutdown,
}

/// One value is sent per waiter before the batch is dropped.
pub type FlushAck = oneshot::Sender<Result<(), FlushError>>;

#[derive(Default)]
struct BrokerState {
    queue: Vec<GateRequest>,
    keys: HashSet<String>,
    waiters: Vec<FlushAck>,
}

/// Bounded coalescing queue with single-flight HTTP dispatch.
///
/// Requests whose canonical key is already queued are coalesced away; the
/// first admission wins and a later duplicate's payload is discarded. Callers
/// that need the latest payload must not generate duplicates within one
/// flush window.
///
/// Two locks with distinct jobs: `state` covers queue manipulation and is
/// only held for O(batch) work, `dispatch` is held across the whole HTTP
/// round-trip so at most one request per broker is ever in flight.
pub struct GateBroker {
    role: BrokerRole,
    max_queue_length: usize,
    flush_period: Duration,
    post_path: String,
    client: ClientWithMiddleware,
    capacity: Semaphore,
    state: Mutex<BrokerState>,
    dispatch: tokio::sync::Mutex<()>,
    sink: Arc<dyn UpdateSink>,
    telemetry: Arc<Telemetry>,
}

impl GateBroker {
    pub fn new(
        role: BrokerRole,
        max_queue_length: usize,
        flush_period: Duration,
        post_path: impl Into<String>,
        client: ClientWithMiddleware,
        sink: Arc<dyn UpdateSink>,
        telemetry: Arc<Telemetry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            role,
            max_queue_length: max_queue_length.max(1),
            flush_period,
            post_path: post_path.into(),
            client,
            capacity: Semaphore::new(max_queue_length.max(1)),
            state: Mutex::new(BrokerState::default()),
            dispatch: tokio::sync::Mutex::new(()),
            sink,
            telemetry,
        })
    }

    /// Admits requests into the queue, returning the ones that did not fit.
    ///
    /// Blocks until at least one queue slot is free; the remaining requests
    /// of the call take slots without waiting and are handed back when none
    /// is left. A waiter is registered before admission, so a caller whose
    /// requests all coalesce into already-queued ones still receives the
    /// outcome of the next flush.
    pub async fn queue(self: &Arc<Self>, waiter: Option<FlushAck>, requests: Vec<GateRequest>) -> Vec<GateRequest> {
        if requests.is_empty() {
            return requests;
        }

        let Ok(first_permit) = self.capacity.acquire().await else {
            // the semaphore is never closed
            return requests;
        };
        first_permit.forget();

        let mut pending = Vec::new();
        let (size_reached, became_nonempty) = {
            let mut state = self.state.lock().unwrap();

            if let Some(waiter) = waiter {
                state.waiters.push(waiter);
            }

            let was_empty = state.queue.is_empty();
            let mut first_slot = true;

            for request in requests {
                let got_slot = if first_slot {
                    first_slot = false;
                    true
                } else {
                    match self.capacity.try_acquire() {
                        Ok(permit) => {
                            permit.forget();
                            true
                        }
                        Err(_) => false,
                    }
                };

                if !got_slot {
                    self.telemetry.record_queue_reject();
                    pending.push(request);
                    continue;
                }

                let key = request.key();
                if state.keys.contains(&key) {
                    // duplicates do not consume a slot
                    self.capacity.add_permits(1);
                    self.telemetry.record_queue_duplicate();
                    continue;
                }

                state.queue.push(request);
                state.keys.insert(key);
                self.telemetry.record_queue_add();
            }

            (
                state.queue.len() >= self.max_queue_length,
                was_empty && !state.queue.is_empty(),
            )
        };

        if size_reached {
            self.spawn_flush();
        } else if became_nonempty {
            self.spawn_delayed_flush();
        }

        pending
    }

    fn spawn_flush(self: &Arc<Self>) {
        let broker = self.clone();
        tokio::spawn(async move { broker.flush().await });
    }

    /// One-shot delayed flush, armed only on the empty-to-nonempty
    /// transition. Firing on an already flushed queue is a no-op.
    fn spawn_delayed_flush(self: &Arc<Self>) {
        let broker = self.clone();
        let delay = self.flush_period;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            broker.flush().await;
        });
    }

    /// Snapshots the queue, posts it to the gate and fans the outcome out to
    /// every waiter of the batch. Queue slots are released as soon as the
    /// snapshot is taken, so new admissions proceed during the HTTP exchange.
    pub async fn flush(&self) {
        let started = Instant::now();
        let _dispatch = self.dispatch.lock().await;

        let (batch, waiters) = {
            let mut state = self.state.lock().unwrap();
            if state.queue.is_empty() {
                tracing::debug!("{} broker flush found an empty queue, skipping", self.role.as_label());
                return;
            }

            let batch = std::mem::take(&mut state.queue);
            state.keys.clear();
            let waiters = std::mem::take(&mut state.waiters);
            self.capacity.add_permits(batch.len());
            (batch, waiters)
        };

        let object_count = batch.len();
        tracing::debug!(
            "{} broker flushing {} objects to {}",
            self.role.as_label(),
            object_count,
            self.post_path
        );

        match self.dispatch_batch(&batch).await {
            Ok(responses) => {
                // route responses before acknowledging, so a command caller
                // observes applied state once its waiter resolves
                self.sink.apply(responses);
                fan_out(waiters, Ok(()));
                self.telemetry.record_flush(self.role, started.elapsed(), object_count, true);
                tracing::info!(
                    "{} broker flushed {} objects in {}ms",
                    self.role.as_label(),
                    object_count,
                    started.elapsed().as_millis()
                );
            }
            Err(error) => {
                tracing::warn!(
                    "{} broker flush of {} objects failed: {}",
                    self.role.as_label(),
                    object_count,
                    error
                );
                fan_out(waiters, Err(error));
                self.telemetry.record_flush(self.role, started.elapsed(), object_count, false);
            }
        }
    }

    async fn dispatch_batch(&self, batch: &[GateRequest]) -> Result<Vec<GateRequest>, FlushError> {
        // single-slot brokers talk to endpoints that expect one object, not
        // an array of one
        let body = if self.max_queue_length == 1 {
            serde_json::to_vec(&batch[0])
        } else {
            serde_json::to_vec(batch)
        }
        .map_err(|e| FlushError::Build(e.to_string()))?;

        let response = self
            .client
            .post(&self.post_path)
            .header(CONTENT_TYPE, "application/json")
            .timeout(GATE_HTTP_TIMEOUT)
            .body(body)
            .send()
            .await
            .map_err(|e| FlushError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("gate answered {} with body: {}", status, body);
            return Err(FlushError::Status(status.to_string()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| FlushError::Transport(e.to_string()))?;

        serde_json::from_slice::<Vec<GateRequest>>(&body).map_err(|e| {
            tracing::warn!("undecodable gate response: {}", String::from_utf8_lossy(&body));
            FlushError::Decode(e.to_string())
        })
    }

    /// Final drain at process shutdown. Whatever is queued is flushed once;
    /// waiters that race in afterwards are told the bridge is going away.
    pub async fn shutdown(&self) {
        self.flush().await;

        let waiters = std::mem::take(&mut self.state.lock().unwrap().waiters);
        fan_out(waiters, Err(FlushError::Shutdown));
    }
}

fn fan_out(waiters: Vec<FlushAck>, result: Result<(), FlushError>) {
    for waiter in waiters {
        // a caller that gave up on its acknowledgement is not an error
        let _ = waiter.send(result.clone());
    }
}

#[cfg(test)]
mod tests {
    use assert_json_diff::assert_json_eq;
    use mockito::Matcher;
    use serde_json::json;

    use super::*;
    use crate::core::request::{Cmd, Kind, LightState, Payload};
    use infrastructure::HttpClientConfig;

    #[derive(Default)]
    struct RecordingSink {
        batches: Mutex<Vec<Vec<GateRequest>>>,
    }

    impl UpdateSink for RecordingSink {
        fn apply(&self, responses: Vec<GateRequest>) {
            self.batches.lock().unwrap().push(responses);
        }
    }

    fn broker(
        role: BrokerRole,
        max_queue_length: usize,
        flush_period: Duration,
        post_path: String,
        sink: Arc<RecordingSink>,
        telemetry: Arc<Telemetry>,
    ) -> Arc<GateBroker> {
        let client = HttpClientConfig::default().new_tracing_client().unwrap();
        GateBroker::new(role, max_queue_length, flush_period, post_path, client, sink, telemetry)
    }

    fn light_set(clu: &str, id: &str, state: bool) -> GateRequest {
        GateRequest::template(Kind::Light, clu, id)
            .with_cmd(Cmd::Set)
            .with_payload(Payload::Light(LightState { state }))
    }

    #[tokio::test]
    async fn coalesces_duplicates_into_one_flush() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/write")
            .match_body(Matcher::Json(json!([
                { "Clu": "CLU01", "Id": "DOU0001", "Kind": "Light", "Cmd": "SET", "Light": { "State": true } },
                { "Clu": "CLU01", "Id": "DOU0002", "Kind": "Light", "Cmd": "SET", "Light": { "State": true } }
            ])))
            .with_status(200)
            .with_body("[]")
            .expect(1)
            .create_async()
            .await;

        let broker = broker(
            BrokerRole::Writer,
            3,
            Duration::from_millis(50),
            format!("{}/write", server.url()),
            Arc::new(RecordingSink::default()),
            Arc::new(Telemetry::new()),
        );

        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        let (tx3, rx3) = oneshot::channel();

        broker.queue(Some(tx1), vec![light_set("CLU01", "DOU0001", true)]).await;
        // duplicate key, payload discarded
        broker.queue(Some(tx2), vec![light_set("CLU01", "DOU0001", false)]).await;
        broker.queue(Some(tx3), vec![light_set("CLU01", "DOU0002", true)]).await;

        assert_eq!(rx1.await.unwrap(), Ok(()));
        assert_eq!(rx2.await.unwrap(), Ok(()));
        assert_eq!(rx3.await.unwrap(), Ok(()));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn full_queue_flushes_without_waiting_for_the_timer() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/read")
            .with_status(200)
            .with_body("[]")
            .expect(1)
            .create_async()
            .await;

        // a timer of 10s cannot explain a prompt flush
        let broker = broker(
            BrokerRole::Reader,
            2,
            Duration::from_secs(10),
            format!("{}/read", server.url()),
            Arc::new(RecordingSink::default()),
            Arc::new(Telemetry::new()),
        );

        let (tx, rx) = oneshot::channel();
        broker
            .queue(None, vec![GateRequest::template(Kind::Light, "CLU01", "DOU0001")])
            .await;
        broker
            .queue(Some(tx), vec![GateRequest::template(Kind::Light, "CLU01", "DOU0002")])
            .await;

        tokio::time::timeout(Duration::from_secs(1), rx)
            .await
            .expect("size-triggered flush did not happen")
            .unwrap()
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn status_error_reaches_every_waiter() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/write")
            .with_status(500)
            .with_body("internal failure")
            .expect(1)
            .create_async()
            .await;

        let telemetry = Arc::new(Telemetry::new());
        let broker = broker(
            BrokerRole::Writer,
            3,
            Duration::from_millis(50),
            format!("{}/write", server.url()),
            Arc::new(RecordingSink::default()),
            telemetry.clone(),
        );

        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        broker.queue(Some(tx1), vec![light_set("CLU01", "DOU0001", true)]).await;
        broker.queue(Some(tx2), vec![light_set("CLU01", "DOU0002", true)]).await;

        let e1 = rx1.await.unwrap().unwrap_err();
        let e2 = rx2.await.unwrap().unwrap_err();
        assert!(e1.to_string().contains("500"), "unexpected error: {e1}");
        assert_eq!(e1, e2);

        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.writer_flush_errors, 1);
    }

    #[tokio::test]
    async fn admission_order_is_preserved_and_first_writer_wins() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/write")
            .match_body(Matcher::Json(json!([
                { "Clu": "CLU01", "Id": "DOU0001", "Kind": "Light", "Cmd": "SET", "Light": { "State": true } },
                { "Clu": "CLU01", "Id": "DOU0002", "Kind": "Light", "Cmd": "SET", "Light": { "State": false } },
                { "Clu": "CLU01", "Id": "DOU0003", "Kind": "Light", "Cmd": "SET", "Light": { "State": true } }
            ])))
            .with_status(200)
            .with_body("[]")
            .expect(1)
            .create_async()
            .await;

        let broker = broker(
            BrokerRole::Writer,
            10,
            Duration::from_millis(100),
            format!("{}/write", server.url()),
            Arc::new(RecordingSink::default()),
            Arc::new(Telemetry::new()),
        );

        let (tx, rx) = oneshot::channel();
        broker
            .queue(
                None,
                vec![light_set("CLU01", "DOU0001", true), light_set("CLU01", "DOU0002", false)],
            )
            .await;
        broker
            .queue(
                Some(tx),
                vec![
                    light_set("CLU01", "DOU0001", false), // coalesced, original payload wins
                    light_set("CLU01", "DOU0003", true),
                ],
            )
            .await;

        rx.await.unwrap().unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn duplicates_and_flushes_return_all_permits() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/write")
            .with_status(200)
            .with_body("[]")
            .create_async()
            .await;

        let telemetry = Arc::new(Telemetry::new());
        let broker = broker(
            BrokerRole::Writer,
            5,
            Duration::from_millis(20),
            format!("{}/write", server.url()),
            Arc::new(RecordingSink::default()),
            telemetry.clone(),
        );

        let (tx, rx) = oneshot::channel();
        broker
            .queue(
                Some(tx),
                vec![
                    light_set("CLU01", "DOU0001", true),
                    light_set("CLU01", "DOU0001", true),
                    light_set("CLU01", "DOU0001", false),
                    light_set("CLU01", "DOU0002", true),
                ],
            )
            .await;

        rx.await.unwrap().unwrap();

        assert_eq!(broker.capacity.available_permits(), 5);
        let snapshot = telemetry.snapshot();
        assert_eq!(snapshot.queue_adds, 2);
        assert_eq!(snapshot.queue_duplicates, 2);
    }

    #[tokio::test]
    async fn single_slot_broker_posts_a_bare_object() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/write")
            .match_body(Matcher::Json(json!(
                { "Clu": "CLU01", "Id": "DOU0001", "Kind": "Light", "Cmd": "SET", "Light": { "State": true } }
            )))
            .with_status(200)
            .with_body("[]")
            .expect(1)
            .create_async()
            .await;

        let broker = broker(
            BrokerRole::Writer,
            1,
            Duration::from_millis(20),
            format!("{}/write", server.url()),
            Arc::new(RecordingSink::default()),
            Arc::new(Telemetry::new()),
        );

        let (tx, rx) = oneshot::channel();
        broker.queue(Some(tx), vec![light_set("CLU01", "DOU0001", true)]).await;
        rx.await.unwrap().unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn capacity_one_serializes_concurrent_writes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/write")
            .with_status(200)
            .with_body("[]")
            .expect(10)
            .create_async()
            .await;

        let telemetry = Arc::new(Telemetry::new());
        let broker = broker(
            BrokerRole::Writer,
            1,
            Duration::from_millis(5),
            format!("{}/write", server.url()),
            Arc::new(RecordingSink::default()),
            telemetry.clone(),
        );

        let mut handles = Vec::new();
        for i in 0..10 {
            let broker = broker.clone();
            handles.push(tokio::spawn(async move {
                let (tx, rx) = oneshot::channel();
                let pending = broker
                    .queue(Some(tx), vec![light_set("CLU01", &format!("DOU{:04}", i), true)])
                    .await;
                assert!(pending.is_empty());
                rx.await.unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(()));
        }

        mock.assert_async().await;
        assert_eq!(telemetry.snapshot().queue_adds, 10);
    }

    #[tokio::test]
    async fn overflowing_requests_are_handed_back() {
        let server = mockito::Server::new_async().await;

        let telemetry = Arc::new(Telemetry::new());
        let broker = broker(
            BrokerRole::Reader,
            2,
            Duration::from_secs(60),
            format!("{}/read", server.url()),
            Arc::new(RecordingSink::default()),
            telemetry.clone(),
        );

        let pending = broker
            .queue(
                None,
                vec![
                    GateRequest::template(Kind::Light, "CLU01", "DOU0001"),
                    GateRequest::template(Kind::Light, "CLU01", "DOU0002"),
                    GateRequest::template(Kind::Light, "CLU01", "DOU0003"),
                ],
            )
            .await;

        assert_json_eq!(
            serde_json::to_value(&pending).unwrap(),
            json!([{ "Clu": "CLU01", "Id": "DOU0003", "Kind": "Light" }])
        );
        assert_eq!(telemetry.snapshot().queue_rejects, 1);
    }

    #[tokio::test]
    async fn responses_are_routed_before_waiters_resolve() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/write")
            .with_status(200)
            .with_body(r#"[{ "Clu": "CLU01", "Id": "DOU0001", "Kind": "Light", "Light": { "State": true } }]"#)
            .create_async()
            .await;

        let sink = Arc::new(RecordingSink::default());
        let broker = broker(
            BrokerRole::Writer,
            1,
            Duration::from_millis(5),
            format!("{}/write", server.url()),
            sink.clone(),
            Arc::new(Telemetry::new()),
        );

        let (tx, rx) = oneshot::channel();
        broker.queue(Some(tx), vec![light_set("CLU01", "DOU0001", true)]).await;
        rx.await.unwrap().unwrap();

        let batches = sink.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].payload, Some(Payload::Light(LightState { state: true })));
    }

    #[tokio::test]
    async fn flush_on_empty_queue_is_a_no_op() {
        let mut server = mockito::Server::new_async().await;
        let mock = server.mock("POST", "/read").expect(0).create_async().await;

        let broker = broker(
            BrokerRole::Reader,
            5,
            Duration::from_millis(20),
            format!("{}/read", server.url()),
            Arc::new(RecordingSink::default()),
            Arc::new(Telemetry::new()),
        );

        broker.flush().await;
        mock.assert_async().await;
    }
}
