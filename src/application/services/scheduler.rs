use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Time a tick gets to wind down after its deadline cancels it.
const CANCEL_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SchedulerError {
    #[error("scheduler is already running")]
    AlreadyRunning,
    #[error("scheduler is not running")]
    NotRunning,
}

/// Unit of work fired on every scheduler tick.
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()>;
}

enum RunState {
    Stopped,
    Running {
        stop: CancellationToken,
        done: JoinHandle<()>,
    },
    /// `stop()` has signalled the loop and is waiting for it to exit.
    Stopping,
}

/// Periodic driver for a [`ScheduledTask`].
///
/// At most one loop runs per scheduler. The loop fires the task once right
/// away and then once per `interval`; it ends on [`Scheduler::stop`] or when
/// the token given to [`Scheduler::start`] is cancelled.
pub struct Scheduler {
    interval: Duration,
    task: Arc<dyn ScheduledTask>,
    state: Arc<Mutex<RunState>>,
}

impl Scheduler {
    pub fn new(interval: Duration, task: Arc<dyn ScheduledTask>) -> Self {
        Self {
            interval,
            task,
            state: Arc::new(Mutex::new(RunState::Stopped)),
        }
    }

    /// Deadline for a single tick: one second short of the interval, so a hung
    /// tick is abandoned before the next one is due.
    pub fn tick_timeout(&self) -> Duration {
        match self.interval.checked_sub(Duration::from_secs(1)) {
            Some(timeout) if !timeout.is_zero() => timeout,
            _ => self.interval,
        }
    }

    pub async fn start(&self, ctx: &CancellationToken) -> Result<(), SchedulerError> {
        let mut state = self.state.lock().await;
        if !matches!(*state, RunState::Stopped) {
            return Err(SchedulerError::AlreadyRunning);
        }

        let stop = ctx.child_token();
        let run = RunLoop {
            interval: self.interval,
            tick_timeout: self.tick_timeout(),
            task: self.task.clone(),
            ctx: ctx.clone(),
            stop: stop.clone(),
        };
        let shared = self.state.clone();
        let done = tokio::spawn(async move {
            run.run().await;
            let mut state = shared.lock().await;
            if matches!(*state, RunState::Running { .. }) {
                *state = RunState::Stopped;
            }
        });

        *state = RunState::Running { stop, done };
        info!(interval = ?self.interval, "Scheduler started");
        Ok(())
    }

    /// Signals the loop and waits until it has fully exited.
    pub async fn stop(&self) -> Result<(), SchedulerError> {
        let (stop, done) = {
            let mut state = self.state.lock().await;
            match std::mem::replace(&mut *state, RunState::Stopping) {
                RunState::Running { stop, done } => (stop, done),
                other => {
                    *state = other;
                    return Err(SchedulerError::NotRunning);
                }
            }
        };

        stop.cancel();
        if let Err(err) = done.await {
            error!(error = %err, "Scheduler loop terminated abnormally");
        }

        *self.state.lock().await = RunState::Stopped;
        info!("Scheduler stopped");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        !matches!(*self.state.lock().await, RunState::Stopped)
    }
}

struct RunLoop {
    interval: Duration,
    tick_timeout: Duration,
    task: Arc<dyn ScheduledTask>,
    ctx: CancellationToken,
    stop: CancellationToken,
}

impl RunLoop {
    async fn run(self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        if let Err(err) = self.execute_task().await {
            error!(error = %err, "Failed to execute initial task");
        }

        loop {
            tokio::select! {
                biased;
                () = self.stop.cancelled() => {
                    if self.ctx.is_cancelled() {
                        info!("Scheduler context canceled");
                    } else {
                        info!("Scheduler stop signal received");
                    }
                    return;
                }
                _ = ticker.tick() => {
                    if let Err(err) = self.execute_task().await {
                        error!(error = %err, "Failed to execute scheduled task");
                    }
                }
            }
        }
    }

    async fn execute_task(&self) -> anyhow::Result<()> {
        if self.stop.is_cancelled() {
            return Ok(());
        }
        info!("Executing scheduled task");

        let tick = self.stop.child_token();
        let run = self.task.run(tick.clone());
        tokio::pin!(run);

        let result = tokio::select! {
            result = &mut run => result,
            () = tokio::time::sleep(self.tick_timeout) => {
                tick.cancel();
                warn!(timeout = ?self.tick_timeout, "Scheduled task exceeded its deadline");
                let _ = wind_down(&mut run).await;
                Err(anyhow::anyhow!(
                    "task exceeded deadline of {:?}",
                    self.tick_timeout
                ))
            }
            () = self.stop.cancelled() => wind_down(&mut run).await.unwrap_or(Ok(())),
        };

        match &result {
            Ok(()) => info!("Task execution completed successfully"),
            Err(err) => error!(error = %err, "Task execution failed"),
        }
        result
    }
}

/// Lets a cancelled tick finish within [`CANCEL_GRACE`]. A task that ignores
/// its token is dropped after that.
async fn wind_down<F>(run: &mut Pin<&mut F>) -> Option<anyhow::Result<()>>
where
    F: Future<Output = anyhow::Result<()>>,
{
    match tokio::time::timeout(CANCEL_GRACE, run).await {
        Ok(result) => Some(result),
        Err(_) => {
            warn!(grace = ?CANCEL_GRACE, "Scheduled task ignored cancellation, abandoning it");
            None
        }
    }
}
