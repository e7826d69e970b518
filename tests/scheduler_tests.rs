//! Apply scheduler tests: activation, chaining, suppression and the
//! on-demand bypass.


use std::sync::Arc;
use std::time::{Duration, Instant};

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use apply_pilot::commands::CommandSurface;
use apply_pilot::config::PilotConfig;
use apply_pilot::events::{AppEvent, EventBus, EventKind};
use apply_pilot::scheduler::{
    Activation, ApplyScheduler, CycleReport, ListingScheduler, SchedulerPhase,
};
use apply_pilot::state::{FileStore, PilotState, StoreActor, StoreHandle};
use test_harness::{
    app, assert_eventually, job, queued_state, test_config, RecordingDriver, TestPilot,
    TEST_SETTLE_MS,
};

/// Scheduler wired to a store and bus but not subscribed, so each
/// activation is driven explicitly through `handle_start`.
struct Rig {
    scheduler: Arc<ApplyScheduler>,
    commands: CommandSurface,
    store: StoreHandle,
    bus: Arc<EventBus>,
    driver: Arc<RecordingDriver>,
    shutdown: CancellationToken,
    _dir: TempDir,
}

impl Rig {
    async fn new(seed: PilotState) -> Self {
        Self::build(seed, RecordingDriver::new(), |c| c).await
    }

    async fn build(
        seed: PilotState,
        driver: RecordingDriver,
        tune: impl FnOnce(PilotConfig) -> PilotConfig,
    ) -> Self {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileStore::new(dir.path()).save(&seed).await);
        let config = tune(test_config(dir.path()));

        let shutdown = CancellationToken::new();
        let (store, _) = StoreActor::spawn(FileStore::new(dir.path()), shutdown.clone()).await;
        let bus = Arc::new(EventBus::default());
        let driver = Arc::new(driver);

        let scheduler = ApplyScheduler::new(store.clone(), bus.clone(), driver.clone(), &config);
        let listing = ListingScheduler::new(store.clone(), bus.clone(), driver.clone(), &config);
        let commands = CommandSurface::new(store.clone(), bus.clone(), listing);

        Self {
            scheduler: Arc::new(scheduler),
            commands,
            store,
            bus,
            driver,
            shutdown,
            _dir: dir,
        }
    }

    async fn state(&self) -> PilotState {
        self.store.read().await.unwrap()
    }
}

impl Drop for Rig {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn ran(id: &str, continued: bool) -> CycleReport {
    CycleReport {
        activation: Activation::Ran {
            job_id: id.to_string(),
        },
        continued,
    }
}

#[tokio::test]
async fn test_single_job_chain_terminates() {
    let rig = Rig::new(queued_state(&["1"], true)).await;
    let mut starts = rig.bus.on(EventKind::AppStart);

    let report = rig.scheduler.handle_start(None).await;

    assert_eq!(report, ran("1", false));
    let state = rig.state().await;
    assert_eq!(state.active_job, Some(job("1")));
    assert!(state.is_app_running);
    assert_eq!(rig.driver.app_pages(), vec!["1"]);
    assert!(starts.try_recv().is_none(), "no follow-up start expected");
}

#[tokio::test]
async fn test_two_job_chain_continues_after_resolution() {
    let rig = Rig::new(queued_state(&["1", "2"], true)).await;
    let mut starts = rig.bus.on(EventKind::AppStart);

    let report = rig.scheduler.handle_start(None).await;
    assert_eq!(report, ran("1", true));
    assert_eq!(starts.try_recv(), Some(AppEvent::AppStart(None)));

    // Re-emitted start is blocked while job 1 is still active
    let blocked = rig.scheduler.handle_start(None).await;
    assert_eq!(blocked.activation, Activation::Suppressed);
    assert!(!blocked.continued);

    rig.commands.skip(Some(app("1"))).await.unwrap();

    let report = rig.scheduler.handle_start(None).await;
    assert_eq!(report, ran("2", false));
    assert_eq!(rig.state().await.active_job, Some(job("2")));
    assert_eq!(rig.driver.app_pages(), vec!["1", "2"]);
}

#[tokio::test]
async fn test_on_demand_bypasses_stopped_run() {
    let rig = Rig::new(queued_state(&["1", "2"], false)).await;
    let mut starts = rig.bus.on(EventKind::AppStart);

    let report = rig.scheduler.handle_start(Some(job("od"))).await;

    // On-demand activations never continue the queue chain
    assert_eq!(report, ran("od", false));
    let state = rig.state().await;
    assert_eq!(state.active_job, Some(job("od")));
    assert!(state.is_app_running);
    assert!(starts.try_recv().is_none());
}

#[tokio::test]
async fn test_on_demand_bypasses_active_job() {
    let mut seed = queued_state(&["1", "2"], true);
    seed.active_job = Some(job("1"));
    let rig = Rig::new(seed).await;

    let report = rig.scheduler.handle_start(Some(job("od"))).await;

    assert_eq!(report, ran("od", false));
    assert_eq!(rig.state().await.active_job, Some(job("od")));
}

#[tokio::test]
async fn test_queue_start_suppressed_when_stopped() {
    let seed = queued_state(&["1"], false);
    let rig = Rig::new(seed.clone()).await;

    let report = rig.scheduler.handle_start(None).await;

    assert_eq!(report.activation, Activation::Suppressed);
    assert!(!report.continued);
    assert!(rig.driver.app_pages().is_empty());
    assert_eq!(rig.state().await, seed);
}

#[tokio::test]
async fn test_queue_start_suppressed_when_busy() {
    let mut seed = queued_state(&["1", "2"], true);
    seed.active_job = Some(job("1"));
    let rig = Rig::new(seed).await;
    let mut starts = rig.bus.on(EventKind::AppStart);

    let report = rig.scheduler.handle_start(None).await;

    assert_eq!(report.activation, Activation::Suppressed);
    assert!(starts.try_recv().is_none());
    assert!(rig.driver.app_pages().is_empty());
}

#[tokio::test]
async fn test_empty_queue_stays_idle() {
    let rig = Rig::new(queued_state(&[], true)).await;

    let report = rig.scheduler.handle_start(None).await;

    assert_eq!(report.activation, Activation::Empty);
    assert!(!report.continued);
    assert!(rig.state().await.active_job.is_none());
}

#[tokio::test]
async fn test_driver_failure_still_continues_chain() {
    let rig = Rig::build(
        queued_state(&["1", "2"], true),
        RecordingDriver::failing(&["1"]),
        |c| c,
    )
    .await;
    let mut starts = rig.bus.on(EventKind::AppStart);

    let report = rig.scheduler.handle_start(None).await;

    match report.activation {
        Activation::DriverFailed { job_id, error } => {
            assert_eq!(job_id, "1");
            assert!(error.contains("cannot open 1"), "unexpected error: {}", error);
        }
        other => panic!("expected driver failure, got {:?}", other),
    }
    assert!(report.continued);
    assert_eq!(starts.try_recv(), Some(AppEvent::AppStart(None)));
    // Left active until the user skips or completes it
    assert_eq!(rig.state().await.active_job, Some(job("1")));
}

#[tokio::test]
async fn test_driver_timeout_is_a_failure() {
    let rig = Rig::build(
        queued_state(&["slow"], true),
        RecordingDriver::slow(Duration::from_secs(5)),
        |c| c.with_driver_timeout_ms(100),
    )
    .await;

    let started = Instant::now();
    let report = rig.scheduler.handle_start(None).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    match report.activation {
        Activation::DriverFailed { job_id, error } => {
            assert_eq!(job_id, "slow");
            assert!(error.contains("timed out after 100ms"), "unexpected error: {}", error);
        }
        other => panic!("expected timeout, got {:?}", other),
    }
}

#[tokio::test]
async fn test_settle_delay_follows_every_activation() {
    let rig = Rig::new(queued_state(&["1"], true)).await;

    let started = Instant::now();
    rig.scheduler.handle_start(None).await;

    assert!(started.elapsed() >= Duration::from_millis(TEST_SETTLE_MS));
}

#[tokio::test]
async fn test_phase_transitions() {
    let rig = Rig::build(
        queued_state(&["1"], true),
        RecordingDriver::slow(Duration::from_millis(300)),
        |c| c.with_settle_delay_ms(300),
    )
    .await;
    let phase = rig.scheduler.phase();
    assert_eq!(*phase.borrow(), SchedulerPhase::Idle);

    let scheduler = rig.scheduler.clone();
    let cycle = tokio::spawn(async move { scheduler.handle_start(None).await });

    assert_eventually(
        || {
            let phase = phase.clone();
            async move {
                let current = *phase.borrow();
                current == SchedulerPhase::RunningOne
            }
        },
        Duration::from_millis(250),
        "scheduler should be running the job",
    )
    .await;
    assert_eventually(
        || {
            let phase = phase.clone();
            async move {
                let current = *phase.borrow();
                current == SchedulerPhase::Settling
            }
        },
        Duration::from_millis(500),
        "scheduler should be settling",
    )
    .await;

    let report = cycle.await.unwrap();
    assert_eq!(report, ran("1", false));
    assert_eq!(*phase.borrow(), SchedulerPhase::Idle);
}

#[tokio::test]
async fn test_on_demand_jobs_do_not_start_queue_run() {
    let rig = Rig::new(queued_state(&["a", "b"], false)).await;
    let mut starts = rig.bus.on(EventKind::AppStart);

    let report = rig.scheduler.handle_start(Some(job("od1"))).await;
    assert_eq!(report, ran("od1", false));
    rig.commands.skip(Some(app("od1"))).await.unwrap();

    let state = rig.state().await;
    assert!(!state.is_app_running);
    assert!(state.active_job.is_none());

    let report = rig.scheduler.handle_start(Some(job("od2"))).await;
    assert_eq!(report, ran("od2", false));
    rig.commands.complete(Some(app("od2"))).await.unwrap();
    assert!(!rig.state().await.is_app_running);

    assert!(starts.try_recv().is_none(), "no queue start expected");
    let report = rig.scheduler.handle_start(None).await;
    assert_eq!(report.activation, Activation::Suppressed);
    assert_eq!(rig.driver.app_pages(), vec!["od1", "od2"]);
    assert_eq!(rig.state().await.jobs, vec![job("a"), job("b")]);
}

#[tokio::test]
async fn test_on_demand_during_run_keeps_run() {
    let rig = Rig::new(queued_state(&["1"], true)).await;

    rig.scheduler.handle_start(Some(job("od"))).await;
    rig.commands.skip(Some(app("od"))).await.unwrap();

    assert!(rig.state().await.is_app_running);
    assert_eq!(rig.scheduler.handle_start(None).await, ran("1", false));
}

#[tokio::test]
async fn test_chain_continues_when_job_resolved_while_settling() {
    let pilot = TestPilot::with_config(
        RecordingDriver::new(),
        Some(queued_state(&["1", "2"], false)),
        |c| c.with_settle_delay_ms(400),
    )
    .await;
    let phase = pilot.node.phase();

    pilot.node.commands.start(None).await.unwrap();
    assert_eventually(
        || {
            let phase = phase.clone();
            async move {
                let current = *phase.borrow();
                current == SchedulerPhase::Settling
            }
        },
        Duration::from_secs(2),
        "job 1 should be settling",
    )
    .await;
    assert_eq!(pilot.active_job_id().await.as_deref(), Some("1"));

    pilot.node.commands.skip(Some(app("1"))).await.unwrap();

    // No further command: the lookahead start picks up job 2
    assert_eventually(
        || async { pilot.active_job_id().await.as_deref() == Some("2") },
        Duration::from_secs(3),
        "job 2 should become active without another start",
    )
    .await;
    assert_eventually(
        || async { pilot.driver.app_pages().len() == 2 },
        Duration::from_secs(1),
        "job 2 should be driven",
    )
    .await;
    assert_eq!(pilot.driver.app_pages(), vec!["1", "2"]);

    pilot.stop().await;
}

#[tokio::test]
async fn test_node_runs_chain_through_commands() {
    let pilot = TestPilot::seeded(queued_state(&["1", "2"], false)).await;

    pilot.node.commands.start(None).await.unwrap();

    assert_eventually(
        || async { pilot.active_job_id().await.as_deref() == Some("1") },
        Duration::from_secs(2),
        "job 1 should become active",
    )
    .await;

    // The re-emitted start is suppressed while job 1 is active
    tokio::time::sleep(Duration::from_millis(TEST_SETTLE_MS * 4)).await;
    assert_eq!(pilot.driver.app_pages(), vec!["1"]);

    pilot.node.commands.complete(Some(app("1"))).await.unwrap();
    pilot.node.commands.start(None).await.unwrap();

    assert_eventually(
        || async { pilot.active_job_id().await.as_deref() == Some("2") },
        Duration::from_secs(2),
        "job 2 should become active",
    )
    .await;

    let state = pilot.state().await;
    assert_eq!(state.applied, vec![job("1")]);
    assert_eq!(state.jobs, vec![job("2")]);
    assert_eq!(pilot.disk_state().await.active_job, Some(job("2")));

    pilot.stop().await;
}

#[tokio::test]
async fn test_node_handles_starts_in_order() {
    let pilot = TestPilot::new().await;

    pilot.node.commands.start(Some(job("a"))).await.unwrap();
    pilot.node.commands.start(Some(job("b"))).await.unwrap();
    pilot.node.commands.start(Some(job("c"))).await.unwrap();

    assert_eventually(
        || async { pilot.driver.app_pages().len() == 3 },
        Duration::from_secs(2),
        "all on-demand jobs should be driven",
    )
    .await;

    assert_eq!(pilot.driver.app_pages(), vec!["a", "b", "c"]);
    assert_eventually(
        || async { pilot.active_job_id().await.as_deref() == Some("c") },
        Duration::from_secs(1),
        "last on-demand job should be active",
    )
    .await;

    pilot.stop().await;
}

#[tokio::test]
async fn test_node_stop_ends_scheduler() {
    let pilot = TestPilot::seeded(queued_state(&["1"], true)).await;
    let token = pilot.node.shutdown_token();

    tokio::time::timeout(Duration::from_secs(2), pilot.stop())
        .await
        .expect("node should stop promptly");
    assert!(token.is_cancelled());
}
