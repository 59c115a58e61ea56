//! Client for the authoritative ticketing system.
//!
//! The upstream is treated as an untrusted, possibly slow or unavailable
//! collaborator: every call runs behind a circuit breaker with a bounded
//! request timeout, and failures are reported as typed results so callers can
//! tell retryable transport problems apart from terminal business rejections.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::{CircuitBreakerConfig, UpstreamConfig};
use crate::coords::SeatCoord;
use crate::models::Seat;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Normal operation, requests allowed.
    Closed,
    /// Tripped after repeated failures, requests blocked until the cooldown
    /// elapses.
    Open,
    /// One probe request allowed to check whether the service recovered.
    HalfOpen,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
}

/// Trips after `failure_threshold` consecutive failures and blocks requests
/// for `timeout` before letting a probe through.
#[derive(Debug)]
pub struct CircuitBreaker {
    inner: Mutex<BreakerInner>,
    failure_threshold: u32,
    timeout: Duration,
}

impl CircuitBreaker {
    pub fn new(failure_threshold: u32, timeout_seconds: u64) -> Self {
        Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure: None,
            }),
            failure_threshold,
            timeout: Duration::from_secs(timeout_seconds),
        }
    }

    pub fn can_execute(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let cooled_down = inner
                    .last_failure
                    .map_or(true, |at| at.elapsed() >= self.timeout);
                if cooled_down {
                    inner.state = CircuitState::HalfOpen;
                    info!("Circuit breaker transitioning to HalfOpen state");
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Closed;
                inner.failure_count = 0;
                info!("Circuit breaker recovered - transitioning to Closed state");
            }
            CircuitState::Closed => {
                inner.failure_count = 0;
            }
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.failure_count += 1;
        inner.last_failure = Some(Instant::now());
        match inner.state {
            CircuitState::Closed => {
                if inner.failure_count >= self.failure_threshold {
                    inner.state = CircuitState::Open;
                    error!(
                        "Circuit breaker OPENED - {} failures reached threshold {}",
                        inner.failure_count, self.failure_threshold
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                warn!("Circuit breaker test failed - returning to Open state");
            }
            CircuitState::Open => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap().state
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream base url is not configured")]
    Disabled,
    #[error("circuit breaker is open - upstream temporarily unavailable")]
    CircuitOpen,
    #[error("upstream request timed out")]
    Timeout,
    #[error("upstream transport error: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("upstream unavailable: status {status}")]
    Unavailable { status: u16 },
    #[error("upstream rejected request: status {status}")]
    Rejected { status: u16, body: String },
}

impl UpstreamError {
    /// Retryable errors are transport-level; a 4xx rejection is terminal and
    /// must not be retried.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, UpstreamError::Disabled | UpstreamError::Rejected { .. })
    }
}

#[derive(Debug, Serialize)]
struct MirrorPayload {
    #[serde(rename = "eventoId")]
    evento_id: String,
    asientos: Vec<SeatCell>,
    #[serde(rename = "precioVenta", skip_serializing_if = "Option::is_none")]
    precio_venta: Option<f64>,
}

#[derive(Debug, Serialize)]
struct SeatCell {
    fila: u32,
    columna: u32,
}

/// Typed client for the upstream seat endpoints. An empty base url disables
/// the client entirely.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: String,
    bearer_token: Option<String>,
    breaker: Arc<CircuitBreaker>,
}

impl UpstreamClient {
    pub fn from_config(config: &UpstreamConfig, breaker_config: &CircuitBreakerConfig) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_millis(config.timeout_ms))
                .build()
                .expect("Failed to create HTTP client"),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            bearer_token: config.bearer_token.clone(),
            breaker: Arc::new(CircuitBreaker::new(
                breaker_config.failure_threshold,
                breaker_config.timeout_seconds,
            )),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.base_url.is_empty()
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.state()
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.bearer_token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn execute(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, UpstreamError> {
        if !self.is_enabled() {
            return Err(UpstreamError::Disabled);
        }
        if !self.breaker.can_execute() {
            warn!("Circuit breaker is OPEN - blocking upstream request");
            return Err(UpstreamError::CircuitOpen);
        }

        let response = match self.request(builder).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() => {
                self.breaker.record_failure();
                return Err(UpstreamError::Timeout);
            }
            Err(e) => {
                self.breaker.record_failure();
                return Err(UpstreamError::Transport(e));
            }
        };

        let status = response.status();
        if status.is_server_error() {
            self.breaker.record_failure();
            return Err(UpstreamError::Unavailable {
                status: status.as_u16(),
            });
        }
        // the service answered, even if it rejected the request
        self.breaker.record_success();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Authoritative seat list for an event.
    pub async fn fetch_seats(&self, evento_id: &str) -> Result<Vec<Seat>, UpstreamError> {
        let url = format!("{}/internal/eventos/{}/asientos", self.base_url, evento_id);
        let response = self.execute(self.http.get(&url)).await?;
        let mut seats: Vec<Seat> = response
            .json()
            .await
            .map_err(UpstreamError::Transport)?;
        for seat in &mut seats {
            seat.normalize();
        }
        Ok(seats)
    }

    /// Push one canonical seat record upstream (reconciliation repair).
    pub async fn push_seat_update(
        &self,
        evento_id: &str,
        seat: &Seat,
    ) -> Result<(), UpstreamError> {
        let url = format!("{}/internal/eventos/{}/asientos", self.base_url, evento_id);
        self.execute(self.http.post(&url).json(seat)).await?;
        debug!(evento_id, seat_id = %seat.seat_id, "Pushed seat update upstream");
        Ok(())
    }

    /// Best-effort mirror of a block intent.
    pub async fn mirror_block(
        &self,
        evento_id: &str,
        coord: SeatCoord,
    ) -> Result<(), UpstreamError> {
        let url = format!("{}/api/endpoints/v1/bloquear-asientos", self.base_url);
        let payload = MirrorPayload {
            evento_id: evento_id.to_string(),
            asientos: vec![SeatCell {
                fila: coord.fila,
                columna: coord.columna,
            }],
            precio_venta: None,
        };
        self.execute(self.http.post(&url).json(&payload)).await?;
        Ok(())
    }

    /// Best-effort mirror of a completed sale.
    pub async fn mirror_sale(
        &self,
        evento_id: &str,
        coord: SeatCoord,
        precio_venta: f64,
    ) -> Result<(), UpstreamError> {
        let url = format!("{}/api/endpoints/v1/realizar-venta", self.base_url);
        let payload = MirrorPayload {
            evento_id: evento_id.to_string(),
            asientos: vec![SeatCell {
                fila: coord.fila,
                columna: coord.columna,
            }],
            precio_venta: Some(precio_venta),
        };
        self.execute(self.http.post(&url).json(&payload)).await?;
        Ok(())
    }
}
