//! Circuit breaker guarding outbound delivery calls.
//!
//! ```text
//!   Closed ──(ratio tripped within window)──▶ Open
//!     ▲                                        │
//!     │ max_requests successes                 │ timeout elapsed, next call
//!     │                                        ▼
//!     └────────────── HalfOpen ◀───────────────┘
//!                        │
//!                        └──(any failure)──▶ Open
//! ```
//!
//! Counts are scoped to a generation. Every state change, and every expiry of
//! the closed-state window, starts a new generation with zeroed counts; results
//! of calls that began in an older generation are discarded.

use std::{
    fmt,
    future::Future,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    pub name: String,
    /// Trial calls admitted while half-open, and successes needed to close.
    pub max_requests: u32,
    /// Length of the closed-state counting window. Zero keeps counts forever.
    pub interval: Duration,
    /// Cool-down spent in the open state before a trial call is allowed.
    pub timeout: Duration,
    pub failure_ratio: f64,
    /// Requests that must be observed in the window before the ratio counts.
    pub min_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: "webhook-circuit-breaker".to_string(),
            max_requests: 3,
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(60),
            failure_ratio: 0.6,
            min_requests: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }

    pub fn failure_ratio(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            f64::from(self.total_failures) / f64::from(self.requests)
        }
    }
}

/// Read-only view used for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub requests: u32,
    pub failures: u32,
}

#[derive(Debug, Error)]
pub enum BreakerError<E> {
    #[error("service unavailable: circuit breaker is open")]
    Open,
    #[error("service unavailable: too many requests")]
    TooManyRequests,
    #[error("operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Inner(E),
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    generation: u64,
    counts: Counts,
    expiry: Option<Instant>,
}

/// The state lock is never held across an await.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let expiry = closed_expiry(&config, Instant::now());
        Self {
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                generation: 0,
                counts: Counts::default(),
                expiry,
            }),
        }
    }

    /// Runs `work` if the breaker admits it and records the outcome.
    ///
    /// A token that is already cancelled short-circuits without touching the
    /// counts. A call that is cancelled, or whose future is dropped, while
    /// `work` is in flight withdraws its request; it is never a failure.
    pub async fn execute<F, Fut, T, E>(
        &self,
        cancel: &CancellationToken,
        work: F,
    ) -> Result<T, BreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if cancel.is_cancelled() {
            return Err(BreakerError::Cancelled);
        }

        let request = self.before_request::<E>()?;

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            result = work() => Some(result),
        };

        match outcome {
            Some(Ok(value)) => {
                request.finish(true);
                Ok(value)
            }
            Some(Err(err)) => {
                request.finish(false);
                Err(BreakerError::Inner(err))
            }
            // dropping `request` withdraws it
            None => Err(BreakerError::Cancelled),
        }
    }

    pub fn state(&self) -> CircuitState {
        let inner = self.lock();
        project(&inner, Instant::now()).0
    }

    pub fn counts(&self) -> Counts {
        let inner = self.lock();
        project(&inner, Instant::now()).1
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.lock();
        let (state, counts) = project(&inner, Instant::now());
        CircuitBreakerSnapshot {
            state,
            requests: counts.requests,
            failures: counts.total_failures,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn before_request<E>(&self) -> Result<InFlight<'_>, BreakerError<E>> {
        let mut inner = self.lock();
        let (state, generation) = self.current_state(&mut inner, Instant::now());

        match state {
            CircuitState::Open => {
                warn!(breaker = %self.config.name, "Circuit breaker is open, request blocked");
                Err(BreakerError::Open)
            }
            CircuitState::HalfOpen if inner.counts.requests >= self.config.max_requests => {
                warn!(breaker = %self.config.name, "Circuit breaker: too many requests");
                Err(BreakerError::TooManyRequests)
            }
            _ => {
                inner.counts.on_request();
                Ok(InFlight {
                    breaker: self,
                    generation: Some(generation),
                })
            }
        }
    }

    fn after_request(&self, before: u64, success: bool) {
        let mut inner = self.lock();
        let now = Instant::now();
        let (state, generation) = self.current_state(&mut inner, now);
        if generation != before {
            return;
        }

        if success {
            inner.counts.on_success();
            if state == CircuitState::HalfOpen
                && inner.counts.consecutive_successes >= self.config.max_requests
            {
                self.set_state(&mut inner, CircuitState::Closed, now);
            }
            return;
        }

        match state {
            CircuitState::Closed => {
                inner.counts.on_failure();
                if self.ready_to_trip(&inner.counts) {
                    self.set_state(&mut inner, CircuitState::Open, now);
                }
            }
            CircuitState::HalfOpen => self.set_state(&mut inner, CircuitState::Open, now),
            CircuitState::Open => {}
        }
    }

    fn withdraw_request(&self, before: u64) {
        let mut inner = self.lock();
        let (_, generation) = self.current_state(&mut inner, Instant::now());
        if generation == before {
            inner.counts.requests = inner.counts.requests.saturating_sub(1);
        }
    }

    fn ready_to_trip(&self, counts: &Counts) -> bool {
        counts.requests > 0
            && counts.requests >= self.config.min_requests
            && counts.failure_ratio() >= self.config.failure_ratio
    }

    fn current_state(&self, inner: &mut BreakerInner, now: Instant) -> (CircuitState, u64) {
        let expired = inner.expiry.is_some_and(|expiry| now >= expiry);
        match inner.state {
            CircuitState::Closed if expired => self.new_generation(inner, now),
            CircuitState::Open if expired => self.set_state(inner, CircuitState::HalfOpen, now),
            _ => {}
        }
        (inner.state, inner.generation)
    }

    fn set_state(&self, inner: &mut BreakerInner, state: CircuitState, now: Instant) {
        if inner.state == state {
            return;
        }
        let previous = inner.state;
        inner.state = state;
        self.new_generation(inner, now);

        info!(
            name = %self.config.name,
            from = %previous,
            to = %state,
            "Circuit breaker state changed"
        );
    }

    fn new_generation(&self, inner: &mut BreakerInner, now: Instant) {
        inner.generation = inner.generation.wrapping_add(1);
        inner.counts = Counts::default();
        inner.expiry = match inner.state {
            CircuitState::Closed => closed_expiry(&self.config, now),
            CircuitState::Open => Some(now + self.config.timeout),
            CircuitState::HalfOpen => None,
        };
    }
}

/// A request admitted by the breaker. Unless finished with an outcome it is
/// withdrawn on drop, so an abandoned call never holds a half-open trial slot.
struct InFlight<'a> {
    breaker: &'a CircuitBreaker,
    generation: Option<u64>,
}

impl InFlight<'_> {
    fn finish(mut self, success: bool) {
        if let Some(generation) = self.generation.take() {
            self.breaker.after_request(generation, success);
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if let Some(generation) = self.generation.take() {
            self.breaker.withdraw_request(generation);
        }
    }
}

fn closed_expiry(config: &CircuitBreakerConfig, now: Instant) -> Option<Instant> {
    (!config.interval.is_zero()).then(|| now + config.interval)
}

/// State and counts as the next call would observe them, without applying
/// the transition.
fn project(inner: &BreakerInner, now: Instant) -> (CircuitState, Counts) {
    let expired = inner.expiry.is_some_and(|expiry| now >= expiry);
    match inner.state {
        CircuitState::Closed if expired => (CircuitState::Closed, Counts::default()),
        CircuitState::Open if expired => (CircuitState::HalfOpen, Counts::default()),
        state => (state, inner.counts),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    };

    use super::*;

    fn breaker(min_requests: u32, failure_ratio: f64) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            name: "test".to_string(),
            max_requests: 2,
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(30),
            failure_ratio,
            min_requests,
        })
    }

    async fn fail(breaker: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        breaker
            .execute(&CancellationToken::new(), || async { Err::<(), _>("boom") })
            .await
    }

    async fn succeed(breaker: &CircuitBreaker) -> Result<(), BreakerError<&'static str>> {
        breaker
            .execute(&CancellationToken::new(), || async { Ok::<_, &str>(()) })
            .await
    }

    async fn trip(breaker: &CircuitBreaker) {
        for _ in 0..3 {
            let _ = fail(breaker).await;
        }
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_rejects_without_running_work() {
        let breaker = breaker(3, 0.5);

        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Open);

        let calls = AtomicU32::new(0);
        let result = breaker
            .execute(&CancellationToken::new(), || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Open)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            result.unwrap_err().to_string(),
            "service unavailable: circuit breaker is open"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn stays_closed_while_failure_ratio_is_below_threshold() {
        let breaker = breaker(3, 0.6);

        for _ in 0..4 {
            let _ = succeed(&breaker).await;
            let _ = fail(&breaker).await;
        }

        assert_eq!(breaker.state(), CircuitState::Closed);
        let counts = breaker.counts();
        assert_eq!(counts.requests, 8);
        assert_eq!(counts.total_failures, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn half_opens_only_after_timeout() {
        let breaker = breaker(3, 0.5);
        trip(&breaker).await;

        tokio::time::advance(Duration::from_secs(30) - Duration::from_millis(1)).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(matches!(succeed(&breaker).await, Err(BreakerError::Open)));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(succeed(&breaker).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_closes_after_enough_successes() {
        let breaker = breaker(3, 0.5);
        trip(&breaker).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        assert!(succeed(&breaker).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert!(succeed(&breaker).await.is_ok());

        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.counts(), Counts::default());
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_failure_reopens_and_restarts_cool_down() {
        let breaker = breaker(3, 0.5);
        trip(&breaker).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        assert!(matches!(fail(&breaker).await, Err(BreakerError::Inner("boom"))));
        assert_eq!(breaker.state(), CircuitState::Open);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(breaker.state(), CircuitState::Open);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_rejects_calls_beyond_max_requests() {
        let breaker = Arc::new(breaker(3, 0.5));
        trip(&breaker).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        let slow = |breaker: Arc<CircuitBreaker>| async move {
            breaker
                .execute(&CancellationToken::new(), || async {
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    Ok::<_, &str>(())
                })
                .await
        };
        let late = |breaker: Arc<CircuitBreaker>| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            succeed(&breaker).await
        };

        let (first, second, third) = tokio::join!(
            slow(breaker.clone()),
            slow(breaker.clone()),
            late(breaker.clone())
        );

        assert!(first.is_ok());
        assert!(second.is_ok());
        assert!(matches!(third, Err(BreakerError::TooManyRequests)));
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_token_is_not_counted() {
        let breaker = breaker(1, 0.5);
        let token = CancellationToken::new();
        token.cancel();

        let calls = AtomicU32::new(0);
        let result = breaker
            .execute(&token, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("boom")
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(breaker.counts(), Counts::default());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_during_work_withdraws_the_request() {
        let breaker = breaker(1, 0.5);
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(5)).await;
            canceller.cancel();
        });

        let result = breaker
            .execute(&token, || async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Err::<(), _>("never")
            })
            .await;

        assert!(matches!(result, Err(BreakerError::Cancelled)));
        assert_eq!(breaker.counts().requests, 0);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_call_is_withdrawn() {
        let breaker = breaker(1, 0.5);

        let abandoned = tokio::time::timeout(
            Duration::from_secs(1),
            breaker.execute(&CancellationToken::new(), || async {
                tokio::time::sleep(Duration::from_secs(100)).await;
                Err::<(), _>("never")
            }),
        )
        .await;

        assert!(abandoned.is_err());
        assert_eq!(breaker.counts(), Counts::default());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_half_open_trial_frees_its_slot() {
        let breaker = breaker(3, 0.5);
        trip(&breaker).await;
        tokio::time::advance(Duration::from_secs(30)).await;

        for _ in 0..2 {
            let abandoned = tokio::time::timeout(
                Duration::from_secs(1),
                breaker.execute(&CancellationToken::new(), || async {
                    tokio::time::sleep(Duration::from_secs(100)).await;
                    Ok::<_, &str>(())
                }),
            )
            .await;
            assert!(abandoned.is_err());
        }

        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        assert_eq!(breaker.counts().requests, 0);

        assert!(succeed(&breaker).await.is_ok());
        assert!(succeed(&breaker).await.is_ok());
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_window_resets_counts() {
        let breaker = breaker(3, 0.5);
        let _ = fail(&breaker).await;
        let _ = fail(&breaker).await;
        assert_eq!(breaker.counts().total_failures, 2);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(breaker.counts(), Counts::default());

        let _ = fail(&breaker).await;
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_reports_requests_and_failures() {
        let breaker = breaker(10, 0.5);
        let _ = succeed(&breaker).await;
        let _ = fail(&breaker).await;

        let snapshot = breaker.snapshot();
        assert_eq!(snapshot.state, CircuitState::Closed);
        assert_eq!(snapshot.requests, 2);
        assert_eq!(snapshot.failures, 1);
    }
}
