use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::PilotConfig;
use crate::driver::{self, PageDriver};
use crate::events::{AppEvent, EventBus, EventKind, Subscription};
use crate::state::{AppJob, StoreHandle};

/// Where the scheduler is within one activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Idle,
    RunningOne,
    Settling,
}

impl std::fmt::Display for SchedulerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerPhase::Idle => write!(f, "idle"),
            SchedulerPhase::RunningOne => write!(f, "running"),
            SchedulerPhase::Settling => write!(f, "settling"),
        }
    }
}

/// What a single `AppStart` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// Busy or stopped, and no on-demand job was given
    Suppressed,
    /// Nothing to run
    Empty,
    /// The job was marked active and driven
    Ran { job_id: String },
    /// The job was marked active but the driver failed or timed out
    DriverFailed { job_id: String, error: String },
    /// The job could not be marked active
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub activation: Activation,
    /// Whether another `AppStart` was emitted to continue the chain
    pub continued: bool,
}

/// Runs queued jobs one at a time.
///
/// Each `AppStart` is handled to completion before the next is read, so a
/// follow-up job is never activated before the previous settle delay ends.
/// The persisted `activeJob` is the busy flag: while it is set, queue-driven
/// starts are suppressed and only on-demand jobs get through.
pub struct ApplyScheduler {
    store: StoreHandle,
    bus: Arc<EventBus>,
    driver: Arc<dyn PageDriver>,
    settle_delay: Duration,
    driver_timeout: Duration,
    phase_tx: watch::Sender<SchedulerPhase>,
}

impl ApplyScheduler {
    pub fn new(
        store: StoreHandle,
        bus: Arc<EventBus>,
        driver: Arc<dyn PageDriver>,
        config: &PilotConfig,
    ) -> Self {
        let (phase_tx, _) = watch::channel(SchedulerPhase::Idle);
        Self {
            store,
            bus,
            driver,
            settle_delay: config.settle_delay(),
            driver_timeout: config.driver_timeout(),
            phase_tx,
        }
    }

    /// Observe phase changes.
    pub fn phase(&self) -> watch::Receiver<SchedulerPhase> {
        self.phase_tx.subscribe()
    }

    /// Subscribe to `AppStart` and run the loop on a new task.
    ///
    /// The subscription is taken before returning, so events emitted right
    /// after `spawn` are not missed.
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        let events = self.bus.on(EventKind::AppStart);
        tokio::spawn(async move { self.run(events, shutdown).await })
    }

    pub async fn run(self, mut events: Subscription, shutdown: CancellationToken) {
        tracing::info!(
            settle_delay_ms = millis(self.settle_delay),
            driver_timeout_ms = millis(self.driver_timeout),
            "Apply scheduler started"
        );

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    let AppEvent::AppStart(on_demand) = event else { continue };

                    tokio::select! {
                        _ = self.handle_start(on_demand) => {}
                        _ = shutdown.cancelled() => break,
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        self.phase_tx.send_replace(SchedulerPhase::Idle);
        tracing::info!("Apply scheduler stopped");
    }

    /// Handle one `AppStart`.
    pub async fn handle_start(&self, on_demand: Option<AppJob>) -> CycleReport {
        let state = match self.store.read().await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!(error = %e, "Cannot read state, activation skipped");
                return CycleReport {
                    activation: Activation::Failed {
                        error: e.to_string(),
                    },
                    continued: false,
                };
            }
        };

        let cant_run = state.cant_run();
        if cant_run && on_demand.is_none() {
            tracing::debug!(
                active_job = ?state.active_job.as_ref().map(|j| j.id.as_str()),
                is_app_running = state.is_app_running,
                "Activation suppressed"
            );
            return CycleReport {
                activation: Activation::Suppressed,
                continued: false,
            };
        }

        let picked = on_demand.or_else(|| state.next_pending().cloned());
        let started = picked.as_ref().map(|j| j.id.clone());
        let activation = self.activate(picked).await;
        self.phase_tx.send_replace(SchedulerPhase::Idle);

        // Chain on queue depth, not on the outcome of this activation
        let continued = !cant_run && self.continue_chain(started.as_deref()).await;

        CycleReport {
            activation,
            continued,
        }
    }

    async fn activate(&self, picked: Option<AppJob>) -> Activation {
        let Some(job) = picked else {
            tracing::debug!("No job to run");
            return Activation::Empty;
        };
        let job_id = job.id.clone();
        self.phase_tx.send_replace(SchedulerPhase::RunningOne);

        let active = job.clone();
        let commit = self
            .store
            .update(move |state| {
                state.activate(active);
                true
            })
            .await;

        match commit {
            Ok(commit) if commit.persisted => {}
            Ok(_) => {
                tracing::error!(job_id = %job_id, "Active job could not be persisted, not driving it");
                return Activation::Failed {
                    error: "active job not persisted".to_string(),
                };
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to mark job active");
                return Activation::Failed {
                    error: e.to_string(),
                };
            }
        }

        tracing::info!(job_id = %job_id, company = %job.company, title = %job.title, "Job active");

        let result =
            driver::with_timeout(self.driver_timeout, self.driver.goto_app_page(&job)).await;

        self.phase_tx.send_replace(SchedulerPhase::Settling);
        tokio::time::sleep(self.settle_delay).await;

        match result {
            Ok(()) => Activation::Ran { job_id },
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Page driver failed");
                Activation::DriverFailed {
                    job_id,
                    error: e.to_string(),
                }
            }
        }
    }

    /// Emit another `AppStart` if a queued job other than `started` waits.
    async fn continue_chain(&self, started: Option<&str>) -> bool {
        match self.store.read().await {
            Ok(state) if state.has_follow_up(started) => {
                tracing::debug!(queued = state.jobs.len(), "Continuing apply chain");
                self.bus.emit(AppEvent::AppStart(None));
                true
            }
            Ok(_) => false,
            Err(e) => {
                tracing::error!(error = %e, "Cannot read state, apply chain stopped");
                false
            }
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
