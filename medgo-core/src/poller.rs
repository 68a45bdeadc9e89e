//! Upload status polling.
//!
//! Split in two:
//! - [`PollSchedule`]: pure decision logic. Given the outcome of a fetch and
//!   the elapsed time, it says when to fetch next or why to stop.
//! - [`ResourcePoller`]: the async driver. It fetches through an
//!   [`UploadSource`], sleeps on `tokio::time`, stops on a
//!   [`CancellationToken`], and publishes [`PollState`] on a watch channel.
//!
//! Concurrent [`ResourcePoller::refresh`] calls share one in-flight request.

use crate::config::PollerConfig;
use crate::models::{UploadPage, UploadResource};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_util::sync::CancellationToken;

/// Failure of one fetch. Cloneable so a shared fetch can hand it to every
/// waiter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct PollError {
    pub message: String,
    /// HTTP status when the server answered.
    pub status: Option<u16>,
}

impl PollError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    pub fn with_status(message: impl Into<String>, status: u16) -> Self {
        Self {
            message: message.into(),
            status: Some(status),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadQuery {
    pub user_id: String,
    pub limit: u32,
    pub offset: u32,
}

impl UploadQuery {
    pub fn new(user_id: impl Into<String>, limit: u32) -> Self {
        Self {
            user_id: user_id.into(),
            limit,
            offset: 0,
        }
    }
}

#[async_trait]
pub trait UploadSource: Send + Sync {
    async fn list_uploads(&self, query: &UploadQuery) -> Result<UploadPage, PollError>;
}

// ============================================================================
// Schedule
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollPhase {
    Polling,
    #[default]
    Idle,
    ErrorBackoff,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    AllTerminal,
    MaxDuration,
    /// Retry budget spent; carries the last error.
    RetriesExhausted(PollError),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollDecision {
    FetchAfter(Duration),
    Stop(StopReason),
}

/// Polling state machine, free of timers and I/O.
#[derive(Debug)]
pub struct PollSchedule {
    config: PollerConfig,
    phase: PollPhase,
    retries: u32,
    backoff: ExponentialBackoff,
}

impl PollSchedule {
    pub fn new(config: &PollerConfig) -> Self {
        Self {
            config: config.clone(),
            phase: PollPhase::Polling,
            retries: 0,
            backoff: backoff(config),
        }
    }

    pub fn phase(&self) -> PollPhase {
        self.phase
    }

    /// After a successful fetch. Resets the retry budget.
    pub fn on_success(&mut self, elapsed: Duration, page: &UploadPage) -> PollDecision {
        self.retries = 0;
        self.backoff = backoff(&self.config);

        if page.all_terminal() {
            return self.stop(StopReason::AllTerminal);
        }
        if elapsed > Duration::from_millis(self.config.max_duration_ms) {
            return self.stop(StopReason::MaxDuration);
        }

        self.phase = PollPhase::Polling;
        let interval = if elapsed < Duration::from_millis(self.config.fast_window_ms) {
            self.config.fast_interval_ms
        } else {
            self.config.slow_interval_ms
        };
        PollDecision::FetchAfter(Duration::from_millis(interval))
    }

    /// After a failed fetch: back off, or stop once the budget is spent.
    pub fn on_failure(&mut self, error: PollError) -> PollDecision {
        self.retries += 1;
        if self.retries > self.config.max_retries {
            return self.stop(StopReason::RetriesExhausted(error));
        }
        self.phase = PollPhase::ErrorBackoff;
        let delay = self
            .backoff
            .next()
            .unwrap_or(Duration::from_millis(self.config.retry_max_ms));
        PollDecision::FetchAfter(delay)
    }

    fn stop(&mut self, reason: StopReason) -> PollDecision {
        self.phase = PollPhase::Idle;
        PollDecision::Stop(reason)
    }
}

/// Starting value doubled before first use, capped.
fn backoff(config: &PollerConfig) -> ExponentialBackoff {
    ExponentialBackoff::from_millis(2)
        .factor(config.retry_initial_ms)
        .max_delay(Duration::from_millis(config.retry_max_ms))
}

// ============================================================================
// Driver
// ============================================================================

/// Snapshot published after every state change.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PollState {
    /// What is being watched (session or user id). Lets consumers drop
    /// updates from a watch they no longer care about.
    pub scope: String,
    pub phase: PollPhase,
    pub items: Vec<UploadResource>,
    pub error: Option<PollError>,
    pub fetches: u32,
    pub stopped: Option<StopReason>,
}

type SharedFetch = Shared<BoxFuture<'static, Result<UploadPage, PollError>>>;

pub struct ResourcePoller {
    source: Arc<dyn UploadSource>,
    query: UploadQuery,
    config: PollerConfig,
    state: watch::Sender<PollState>,
    in_flight: Mutex<Option<(u64, SharedFetch)>>,
    next_fetch: AtomicU64,
    cancel: CancellationToken,
}

impl ResourcePoller {
    pub fn new(
        source: Arc<dyn UploadSource>,
        query: UploadQuery,
        config: PollerConfig,
        scope: impl Into<String>,
    ) -> Self {
        let (state, _) = watch::channel(PollState {
            scope: scope.into(),
            ..PollState::default()
        });
        Self {
            source,
            query,
            config,
            state,
            in_flight: Mutex::new(None),
            next_fetch: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PollState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> PollState {
        self.state.borrow().clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn spawn(self: Arc<Self>) -> JoinHandle<StopReason> {
        tokio::spawn(async move { self.run().await })
    }

    /// Fetch once, joining a fetch that is already in flight.
    pub async fn refresh(&self) -> Result<UploadPage, PollError> {
        let (id, fetch) = self.join_or_start();
        let result = fetch.await;

        let finished_here = {
            let mut slot = self.lock_in_flight();
            let current = matches!(slot.as_ref(), Some((cur, _)) if *cur == id);
            if current {
                *slot = None;
            }
            current
        };
        if finished_here {
            self.record(&result);
        }
        result
    }

    fn join_or_start(&self) -> (u64, SharedFetch) {
        let mut slot = self.lock_in_flight();
        if let Some((id, fetch)) = slot.as_ref() {
            tracing::debug!(fetch = *id, "Joining in-flight upload fetch");
            return (*id, fetch.clone());
        }

        let id = self.next_fetch.fetch_add(1, Ordering::Relaxed);
        let source = Arc::clone(&self.source);
        let query = self.query.clone();
        let fetch = async move { source.list_uploads(&query).await }
            .boxed()
            .shared();
        *slot = Some((id, fetch.clone()));
        (id, fetch)
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, Option<(u64, SharedFetch)>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, result: &Result<UploadPage, PollError>) {
        self.state.send_modify(|state| {
            state.fetches += 1;
            match result {
                Ok(page) => {
                    state.items = page.items.clone();
                    state.error = None;
                }
                Err(e) => state.error = Some(e.clone()),
            }
        });
    }

    /// Poll until every resource is terminal, the time limit passes, the
    /// retry budget runs out, or the token is cancelled.
    pub async fn run(&self) -> StopReason {
        let started = Instant::now();
        let mut schedule = PollSchedule::new(&self.config);
        self.state.send_modify(|state| {
            state.phase = PollPhase::Polling;
            state.stopped = None;
        });
        let scope = self.state.borrow().scope.clone();
        tracing::info!(scope = %scope, user_id = %self.query.user_id, "Upload polling started");

        loop {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => return self.finish(StopReason::Cancelled),
                result = self.refresh() => result,
            };

            let decision = match result {
                Ok(page) => schedule.on_success(started.elapsed(), &page),
                Err(e) => {
                    tracing::warn!(error = %e, status = ?e.status, "Upload fetch failed");
                    schedule.on_failure(e)
                }
            };

            match decision {
                PollDecision::FetchAfter(delay) => {
                    self.state.send_modify(|state| state.phase = schedule.phase());
                    tracing::debug!(delay_ms = delay.as_millis() as u64, phase = ?schedule.phase(), "Next upload fetch scheduled");
                    tokio::select! {
                        _ = self.cancel.cancelled() => return self.finish(StopReason::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                PollDecision::Stop(reason) => return self.finish(reason),
            }
        }
    }

    fn finish(&self, reason: StopReason) -> StopReason {
        match &reason {
            StopReason::RetriesExhausted(e) => {
                tracing::error!(error = %e, "Upload polling gave up after retries")
            }
            other => tracing::info!(reason = ?other, "Upload polling stopped"),
        }
        self.state.send_modify(|state| {
            state.phase = PollPhase::Idle;
            state.stopped = Some(reason.clone());
        });
        reason
    }
}
