use std::sync::Arc;
use std::time::Duration;

use crate::config::PilotConfig;
use crate::driver::{self, PageDriver};
use crate::error::Result;
use crate::events::{AppEvent, EventBus};
use crate::state::StoreHandle;

/// Start/stop control for the listing crawl. No queue and no chaining: the
/// crawl driver watches for `ListStop` on its own.
#[derive(Clone)]
pub struct ListingScheduler {
    store: StoreHandle,
    bus: Arc<EventBus>,
    driver: Arc<dyn PageDriver>,
    driver_timeout: Duration,
}

impl ListingScheduler {
    pub fn new(
        store: StoreHandle,
        bus: Arc<EventBus>,
        driver: Arc<dyn PageDriver>,
        config: &PilotConfig,
    ) -> Self {
        Self {
            store,
            bus,
            driver,
            driver_timeout: config.driver_timeout(),
        }
    }

    /// Mark the crawl running and open the listing page at `url`.
    ///
    /// A driver failure is logged and does not unset the flag.
    pub async fn start(&self, url: &str) -> Result<bool> {
        self.set_running(true).await?;
        tracing::info!(url, "Listing started");

        if let Err(e) =
            driver::with_timeout(self.driver_timeout, self.driver.goto_main_page(url)).await
        {
            tracing::warn!(url, error = %e, "Failed to open listing page");
        }
        Ok(true)
    }

    /// Mark the crawl stopped and tell the crawl driver to halt.
    pub async fn stop(&self) -> Result<bool> {
        self.set_running(false).await?;
        self.bus.emit(AppEvent::ListStop);
        tracing::info!("Listing stopped");
        Ok(true)
    }

    async fn set_running(&self, running: bool) -> Result<()> {
        let commit = self
            .store
            .update(move |state| {
                let changed = state.is_list_running != running;
                state.is_list_running = running;
                changed
            })
            .await?;
        if !commit.persisted {
            tracing::warn!(running, "Listing flag not persisted");
        }
        Ok(())
    }
}
