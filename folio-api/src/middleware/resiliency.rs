use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitState {
    Closed,   // Normal operation
    Open,     // Failing fast
    HalfOpen, // One trial request in flight
}

pub struct CircuitBreaker {
    pub name: String,
    pub state: RwLock<CircuitState>,
    pub failure_count: AtomicUsize,
    pub failure_threshold: usize,
    pub reset_timeout: Duration,
    pub last_failure: RwLock<Option<Instant>>,
    trial_in_flight: AtomicBool,
}

impl CircuitBreaker {
    pub fn new(name: &str, threshold: usize, timeout: Duration) -> Self {
        Self {
            name: name.to_string(),
            state: RwLock::new(CircuitState::Closed),
            failure_count: AtomicUsize::new(0),
            failure_threshold: threshold.max(1),
            reset_timeout: timeout,
            last_failure: RwLock::new(None),
            trial_in_flight: AtomicBool::new(false),
        }
    }

    pub async fn current(&self) -> CircuitState {
        *self.state.read().await
    }

    /// Whether a request may go through right now.
    pub async fn check(&self) -> bool {
        let state = *self.state.read().await;
        match state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled_down = self
                    .last_failure
                    .read()
                    .await
                    .map(|instant| instant.elapsed() >= self.reset_timeout)
                    .unwrap_or(true);
                if !cooled_down {
                    return false;
                }
                let mut s = self.state.write().await;
                if *s == CircuitState::Open {
                    *s = CircuitState::HalfOpen;
                    tracing::info!("Circuit Breaker [{}] moving to Half-Open", self.name);
                }
                drop(s);
                self.claim_trial()
            }
            CircuitState::HalfOpen => self.claim_trial(),
        }
    }

    fn claim_trial(&self) -> bool {
        self.trial_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub async fn record_success(&self) {
        let mut state = self.state.write().await;
        if *state == CircuitState::HalfOpen {
            *state = CircuitState::Closed;
            tracing::info!("Circuit Breaker [{}] recovered to Closed", self.name);
        }
        self.failure_count.store(0, Ordering::SeqCst);
        self.trial_in_flight.store(false, Ordering::SeqCst);
    }

    /// A response that says nothing about the gateway, such as a 4xx. Frees a
    /// half-open trial slot without closing the circuit or resetting the count.
    pub fn record_inconclusive(&self) {
        self.trial_in_flight.store(false, Ordering::SeqCst);
    }

    pub async fn record_failure(&self) {
        let count = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.write().await;

        if count >= self.failure_threshold || *state == CircuitState::HalfOpen {
            *state = CircuitState::Open;
            *self.last_failure.write().await = Some(Instant::now());
            tracing::error!("Circuit Breaker [{}] TRIPPED to Open. Failures: {}", self.name, count);
        }
        self.trial_in_flight.store(false, Ordering::SeqCst);
    }
}

pub struct ResiliencyState {
    /// Guards order creation, the only route that calls the payment gateway.
    pub payment_cb: CircuitBreaker,
}

impl ResiliencyState {
    pub fn new(threshold: usize, reset_timeout: Duration) -> Self {
        Self {
            payment_cb: CircuitBreaker::new("payment-gateway", threshold, reset_timeout),
        }
    }
}

pub async fn circuit_breaker_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let cb = &state.resiliency.payment_cb;

    if !cb.check().await {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "error": format!("Circuit Breaker [{}] is OPEN", cb.name),
                "code": "service_unavailable",
            })),
        )
            .into_response();
    }

    let response = next.run(req).await;

    let status = response.status();
    if status.is_server_error() {
        cb.record_failure().await;
    } else if status.is_success() {
        cb.record_success().await;
    } else {
        cb.record_inconclusive();
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trips_after_threshold_and_recovers_through_half_open() {
        let cb = CircuitBreaker::new("test", 2, Duration::from_millis(20));
        assert!(cb.check().await);

        cb.record_failure().await;
        assert_eq!(cb.current().await, CircuitState::Closed);
        cb.record_failure().await;
        assert_eq!(cb.current().await, CircuitState::Open);
        assert!(!cb.check().await);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(cb.check().await);
        assert_eq!(cb.current().await, CircuitState::HalfOpen);
        // only one trial at a time
        assert!(!cb.check().await);

        cb.record_success().await;
        assert_eq!(cb.current().await, CircuitState::Closed);
        assert!(cb.check().await);
    }

    #[tokio::test]
    async fn client_errors_neither_reset_nor_count() {
        let cb = CircuitBreaker::new("test", 2, Duration::from_millis(10));
        cb.record_failure().await;
        cb.record_inconclusive();
        assert_eq!(cb.failure_count.load(Ordering::SeqCst), 1);
        cb.record_failure().await;
        assert_eq!(cb.current().await, CircuitState::Open);

        // a 4xx trial leaves the circuit half-open for the next caller
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cb.check().await);
        cb.record_inconclusive();
        assert_eq!(cb.current().await, CircuitState::HalfOpen);
        assert!(cb.check().await);
    }

    #[tokio::test]
    async fn failed_trial_reopens() {
        let cb = CircuitBreaker::new("test", 1, Duration::from_millis(10));
        cb.record_failure().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cb.check().await);

        cb.record_failure().await;
        assert_eq!(cb.current().await, CircuitState::Open);
        assert!(!cb.check().await);
    }
}
