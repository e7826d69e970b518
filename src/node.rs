use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::commands::CommandSurface;
use crate::config::PilotConfig;
use crate::dashboard::{run_dashboard, DashboardState};
use crate::driver::PageDriver;
use crate::error::Result;
use crate::events::EventBus;
use crate::scheduler::{ApplyScheduler, ListingScheduler, SchedulerPhase};
use crate::state::{FileStore, StoreActor, StoreHandle};

/// Wires the store, the event bus, both schedulers and the command surface.
pub struct Node {
    pub config: PilotConfig,
    pub store: StoreHandle,
    pub bus: Arc<EventBus>,
    pub commands: CommandSurface,
    phase: watch::Receiver<SchedulerPhase>,
    shutdown: CancellationToken,
    store_handle: JoinHandle<()>,
    scheduler_handle: JoinHandle<()>,
}

impl Node {
    /// Start all components.
    ///
    /// 1. Loads `state.json` and spawns the store actor
    /// 2. Builds the event bus
    /// 3. Spawns the apply scheduler, subscribed before anything can emit
    /// 4. Builds the listing scheduler and the command surface
    ///
    /// # Errors
    ///
    /// Returns an error if the state directory cannot be resolved.
    pub async fn start(
        config: PilotConfig,
        driver: Arc<dyn PageDriver>,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        let data_dir = config.resolve_data_dir()?;
        let (store, store_handle) =
            StoreActor::spawn(FileStore::new(data_dir), shutdown.clone()).await;

        let bus = Arc::new(EventBus::new(config.event_capacity));

        let scheduler = ApplyScheduler::new(store.clone(), bus.clone(), driver.clone(), &config);
        let phase = scheduler.phase();
        let scheduler_handle = scheduler.spawn(shutdown.clone());

        let listing = ListingScheduler::new(store.clone(), bus.clone(), driver, &config);
        let commands = CommandSurface::new(store.clone(), bus.clone(), listing);

        Ok(Self {
            config,
            store,
            bus,
            commands,
            phase,
            shutdown,
            store_handle,
            scheduler_handle,
        })
    }

    /// Observe the apply scheduler's phase.
    pub fn phase(&self) -> watch::Receiver<SchedulerPhase> {
        self.phase.clone()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serve the command surface (if configured) until shutdown, then wait
    /// for the background tasks to finish.
    pub async fn run(self) {
        if let Some(addr) = self.config.listen_addr {
            let state = DashboardState {
                commands: self.commands.clone(),
            };
            run_dashboard(addr, state, self.shutdown.clone()).await;
        }

        self.shutdown.cancelled().await;
        self.join().await;
    }

    /// Cancel all tasks and wait for them.
    pub async fn stop(self) {
        self.shutdown.cancel();
        self.join().await;
    }

    async fn join(self) {
        if let Err(e) = self.scheduler_handle.await {
            tracing::warn!(error = %e, "Apply scheduler task ended abnormally");
        }
        if let Err(e) = self.store_handle.await {
            tracing::warn!(error = %e, "State store task ended abnormally");
        }
        tracing::info!("Node stopped");
    }
}
