//! Periodic collection scheduler
//!
//! State machine: Idle -> Running -> (Completed | Failed) -> Idle.
//! Completed and Failed hold until the next trigger, which passes back
//! through Idle before Running. A tick that lands while a cycle is Running
//! is dropped, not queued. The cycle's report travels back through the
//! trigger's `JoinHandle`.
//! On shutdown the loop stops ticking and waits for the in-flight cycle,
//! which itself stops at its next unit-of-work boundary.

use super::engine::{CycleOutcome, CycleRunner};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Running,
    Completed,
    Failed,
}

pub enum TriggerOutcome {
    Started(JoinHandle<CycleOutcome>),
    /// A cycle was already running
    Dropped,
}

impl TriggerOutcome {
    pub fn is_dropped(&self) -> bool {
        matches!(self, TriggerOutcome::Dropped)
    }
}

pub struct CollectionScheduler {
    runner: Arc<dyn CycleRunner>,
    interval: Duration,
    state: Arc<Mutex<CycleState>>,
    shutdown: watch::Receiver<bool>,
}

impl CollectionScheduler {
    pub fn new(runner: Arc<dyn CycleRunner>, interval: Duration, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            runner,
            interval,
            state: Arc::new(Mutex::new(CycleState::Idle)),
            shutdown,
        }
    }

    /// Start a cycle unless one is already running
    pub fn trigger(&self) -> TriggerOutcome {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            match *state {
                CycleState::Running => {
                    log::warn!("⏭️  Collection trigger dropped: previous cycle still running");
                    return TriggerOutcome::Dropped;
                }
                CycleState::Completed | CycleState::Failed => {
                    log::debug!("🔁 Previous cycle {:?}, back to Idle", *state);
                    *state = CycleState::Idle;
                }
                CycleState::Idle => {}
            }
            *state = CycleState::Running;
        }

        let runner = self.runner.clone();
        let state = self.state.clone();
        let shutdown = self.shutdown.clone();
        TriggerOutcome::Started(tokio::spawn(async move {
            let outcome = runner.run_cycle(&shutdown).await;
            let finished = if outcome.is_failed() {
                CycleState::Failed
            } else {
                CycleState::Completed
            };

            match &outcome {
                CycleOutcome::Completed(report) => log::info!(
                    "✅ Cycle completed in {}ms",
                    (report.finished_at - report.started_at).num_milliseconds()
                ),
                CycleOutcome::Failed { error, .. } => {
                    log::error!("❌ Cycle failed: {} (scheduler stays up)", error)
                }
            }
            *state.lock().unwrap_or_else(|e| e.into_inner()) = finished;
            outcome
        }))
    }

    /// Current state; Completed or Failed describe the most recent cycle
    pub fn state(&self) -> CycleState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Tick until shutdown flips to true, then wait for the in-flight cycle
    pub async fn run(&self) {
        log::info!("⏰ Starting collection scheduler (interval: {}s)", self.interval.as_secs());

        let mut shutdown = self.shutdown.clone();
        let mut timer = interval(self.interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<CycleOutcome>> = None;

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if let TriggerOutcome::Started(handle) = self.trigger() {
                        in_flight = Some(handle);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if let Some(handle) = in_flight {
            if !handle.is_finished() {
                log::info!("⏳ Waiting for in-flight cycle to reach a safe point...");
            }
            if let Err(e) = handle.await {
                log::error!("❌ In-flight cycle task failed: {}", e);
            }
        }
        log::info!("✅ Collection scheduler stopped");
    }
}
