//! Best-effort delivery of seat-change events to the downstream consumer.
//!
//! Delivery is attempted synchronously first; payloads that cannot be
//! delivered land on a durable retry queue drained by a single background
//! worker. A payload is never silently dropped, and a permanently failing one
//! is re-enqueued at the tail so it cannot starve the rest of the queue.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::WebhookConfig;
use crate::models::SeatStatus;
use crate::storage::{StorageBackend, StorageError};

const RETRY_QUEUE: &str = "webhook:retry";
const ACK_KEY_PREFIX: &str = "webhook:ack";

const MAX_SYNC_ATTEMPTS: usize = 3;
const SYNC_BACKOFFS_MS: [u64; 3] = [100, 300, 1000];
/// How long the worker blocks on an empty queue before its liveness check.
const WORKER_POP_TIMEOUT: Duration = Duration::from_secs(5);
/// Pause after a failed worker delivery so a dead consumer is not hammered.
const WORKER_FAILURE_BACKOFF: Duration = Duration::from_millis(500);

/// Payload sent to the downstream consumer on every accepted state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatChangeNotification {
    #[serde(rename = "eventoId")]
    pub evento_id: String,
    #[serde(rename = "seatId")]
    pub seat_id: String,
    pub status: SeatStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    Delivered,
    /// Older than the last acknowledged event for this seat; dropped.
    DroppedStale,
    /// All synchronous attempts failed; queued for the background worker.
    Queued,
    /// No consumer configured.
    Skipped,
}

#[derive(Clone)]
pub struct NotificationQueue {
    backend: Arc<dyn StorageBackend>,
    http: reqwest::Client,
    url: String,
}

impl NotificationQueue {
    pub fn from_config(config: &WebhookConfig, backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            http: reqwest::Client::builder()
                .timeout(Duration::from_millis(config.timeout_ms))
                .build()
                .expect("Failed to create HTTP client"),
            url: config.url.clone(),
        }
    }

    fn ack_key(evento_id: &str, seat_id: &str) -> String {
        format!("{ACK_KEY_PREFIX}:{evento_id}:{seat_id}")
    }

    /// Whether `event` is older than the last acknowledged delivery for its
    /// (event, seat) key.
    async fn is_stale(&self, event: &SeatChangeNotification) -> Result<bool, StorageError> {
        let key = Self::ack_key(&event.evento_id, &event.seat_id);
        let Some(raw) = self.backend.get(&key).await? else {
            return Ok(false);
        };
        match raw.parse::<DateTime<Utc>>() {
            Ok(acked) => Ok(event.updated_at < acked),
            Err(_) => Ok(false),
        }
    }

    async fn record_ack(&self, event: &SeatChangeNotification) -> Result<(), StorageError> {
        let key = Self::ack_key(&event.evento_id, &event.seat_id);
        self.backend.set(&key, &event.updated_at.to_rfc3339()).await
    }

    async fn deliver(&self, event: &SeatChangeNotification) -> Result<(), reqwest::Error> {
        self.http
            .post(&self.url)
            .json(event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Deliver a state-change event, falling back to the durable retry queue
    /// when the consumer cannot be reached.
    pub async fn notify(
        &self,
        event: &SeatChangeNotification,
    ) -> Result<NotifyOutcome, StorageError> {
        if self.url.is_empty() {
            debug!(
                evento_id = %event.evento_id,
                seat_id = %event.seat_id,
                "Webhook URL not configured, skipping notification"
            );
            return Ok(NotifyOutcome::Skipped);
        }

        for attempt in 1..=MAX_SYNC_ATTEMPTS {
            // gate every try: a delivery may have been acknowledged meanwhile
            if self.is_stale(event).await? {
                debug!(
                    evento_id = %event.evento_id,
                    seat_id = %event.seat_id,
                    "Notification older than last acknowledgment, dropping"
                );
                return Ok(NotifyOutcome::DroppedStale);
            }

            match self.deliver(event).await {
                Ok(()) => {
                    self.record_ack(event).await?;
                    debug!(
                        evento_id = %event.evento_id,
                        seat_id = %event.seat_id,
                        "Notification delivered"
                    );
                    return Ok(NotifyOutcome::Delivered);
                }
                Err(e) => {
                    warn!(
                        "Notification attempt {}/{} failed for {}:{}: {}",
                        attempt, MAX_SYNC_ATTEMPTS, event.evento_id, event.seat_id, e
                    );
                    if attempt < MAX_SYNC_ATTEMPTS {
                        tokio::time::sleep(Duration::from_millis(SYNC_BACKOFFS_MS[attempt - 1]))
                            .await;
                    }
                }
            }
        }

        let payload = serde_json::to_string(event)?;
        self.backend.queue_push(RETRY_QUEUE, &payload).await?;
        warn!(
            "Notification queued for background retry: {}:{}",
            event.evento_id, event.seat_id
        );
        Ok(NotifyOutcome::Queued)
    }

    /// Depth of the durable retry queue.
    pub async fn retry_queue_len(&self) -> Result<u64, StorageError> {
        self.backend.queue_len(RETRY_QUEUE).await
    }

    /// Continuous blocking-pop worker retrying queued payloads. The returned
    /// handle must be aborted on shutdown.
    pub fn start_worker(&self) -> JoinHandle<()> {
        let queue = self.clone();
        tokio::spawn(async move {
            info!("Notification retry worker started");
            loop {
                queue.drain_one().await;
            }
        })
    }

    /// One worker iteration: pop (bounded by a timeout so the loop stays
    /// live), retry, re-enqueue at the tail on failure.
    async fn drain_one(&self) {
        let payload = match self.backend.queue_pop(RETRY_QUEUE, WORKER_POP_TIMEOUT).await {
            Ok(Some(payload)) => payload,
            Ok(None) => return,
            Err(e) => {
                warn!("Retry queue pop failed: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
                return;
            }
        };

        let event: SeatChangeNotification = match serde_json::from_str(&payload) {
            Ok(event) => event,
            Err(e) => {
                // cannot ever be delivered; drop loudly instead of cycling
                warn!("Discarding undecodable retry payload {payload:?}: {e}");
                return;
            }
        };

        match self.is_stale(&event).await {
            Ok(true) => {
                debug!(
                    evento_id = %event.evento_id,
                    seat_id = %event.seat_id,
                    "Queued notification superseded, dropping"
                );
                return;
            }
            Ok(false) => {}
            Err(e) => {
                warn!("Acknowledgment check failed, retrying payload later: {}", e);
                let _ = self.backend.queue_push(RETRY_QUEUE, &payload).await;
                tokio::time::sleep(WORKER_FAILURE_BACKOFF).await;
                return;
            }
        }

        match self.deliver(&event).await {
            Ok(()) => {
                if let Err(e) = self.record_ack(&event).await {
                    warn!("Delivered from retry queue but failed to record ack: {}", e);
                }
                info!(
                    "Retried notification delivered: {}:{}",
                    event.evento_id, event.seat_id
                );
            }
            Err(e) => {
                warn!(
                    "Retry delivery failed for {}:{}, re-enqueueing: {}",
                    event.evento_id, event.seat_id, e
                );
                if let Err(push_err) = self.backend.queue_push(RETRY_QUEUE, &payload).await {
                    warn!("Failed to re-enqueue payload: {}", push_err);
                }
                tokio::time::sleep(WORKER_FAILURE_BACKOFF).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use chrono::TimeZone;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn event(at: DateTime<Utc>) -> SeatChangeNotification {
        SeatChangeNotification {
            evento_id: "1".into(),
            seat_id: "r2c5".into(),
            status: SeatStatus::Vendido,
            holder: None,
            updated_at: at,
        }
    }

    fn queue(url: &str) -> NotificationQueue {
        NotificationQueue::from_config(
            &WebhookConfig {
                url: url.to_string(),
                timeout_ms: 2000,
            },
            Arc::new(MemoryStorage::new()),
        )
    }

    #[tokio::test]
    async fn delivers_and_records_ack() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "eventoId": "1",
                "seatId": "r2c5",
                "status": "Vendido",
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let queue = queue(&server.uri());
        let outcome = queue.notify(&event(ts(10))).await.unwrap();
        assert_eq!(outcome, NotifyOutcome::Delivered);

        // an older event for the same seat is now dropped without sending
        let outcome = queue.notify(&event(ts(5))).await.unwrap();
        assert_eq!(outcome, NotifyOutcome::DroppedStale);
    }

    #[tokio::test]
    async fn queues_after_exhausting_sync_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(3)
            .mount(&server)
            .await;

        let queue = queue(&server.uri());
        let outcome = queue.notify(&event(ts(10))).await.unwrap();
        assert_eq!(outcome, NotifyOutcome::Queued);
        assert_eq!(queue.retry_queue_len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn worker_drains_queue_once_consumer_recovers() {
        let server = MockServer::start().await;
        // first round fails, everything after succeeds
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let queue = queue(&server.uri());
        let payload = serde_json::to_string(&event(ts(10))).unwrap();
        queue
            .backend
            .queue_push(RETRY_QUEUE, &payload)
            .await
            .unwrap();

        // first iteration fails and re-enqueues, second delivers
        queue.drain_one().await;
        assert_eq!(queue.retry_queue_len().await.unwrap(), 1);
        queue.drain_one().await;
        assert_eq!(queue.retry_queue_len().await.unwrap(), 0);

        // the delivery was acknowledged
        assert!(queue.is_stale(&event(ts(9))).await.unwrap());
    }

    #[tokio::test]
    async fn worker_drops_superseded_payloads() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let queue = queue(&server.uri());
        queue.record_ack(&event(ts(20))).await.unwrap();
        let payload = serde_json::to_string(&event(ts(10))).unwrap();
        queue
            .backend
            .queue_push(RETRY_QUEUE, &payload)
            .await
            .unwrap();

        queue.drain_one().await;
        assert_eq!(queue.retry_queue_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn blank_url_skips_delivery() {
        let queue = queue("");
        let outcome = queue.notify(&event(ts(10))).await.unwrap();
        assert_eq!(outcome, NotifyOutcome::Skipped);
    }
}
