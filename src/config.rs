use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{PilotError, Result};

pub const DEFAULT_APP_NAME: &str = "apply-pilot";
pub const STATE_FILENAME: &str = "state.json";

/// How the page driver is provided.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DriverConfig {
    /// Log each navigation without performing it.
    #[default]
    Log,
    /// Run an external program for every navigation.
    ///
    /// The program is invoked as `<program> apply` with the job JSON in the
    /// `APPLY_PILOT_JOB` environment variable, or `<program> list <url>`.
    Command { program: PathBuf },
}

#[derive(Debug, Clone)]
pub struct PilotConfig {
    /// Directory name under the platform application-data location
    pub app_name: String,
    /// Explicit state directory. When unset the platform location is used.
    pub data_dir: Option<PathBuf>,
    /// Pause after each driven job before the next activation may run
    pub settle_delay_ms: u64,
    /// Upper bound for a single page-driver call
    pub driver_timeout_ms: u64,
    /// Buffer size of the event bus
    pub event_capacity: usize,
    /// Address for the HTTP command surface (optional)
    pub listen_addr: Option<SocketAddr>,
    pub driver: DriverConfig,
}

impl Default for PilotConfig {
    fn default() -> Self {
        Self {
            app_name: DEFAULT_APP_NAME.to_string(),
            data_dir: None,
            settle_delay_ms: 1000,
            driver_timeout_ms: 120_000,
            event_capacity: 1024,
            listen_addr: None,
            driver: DriverConfig::default(),
        }
    }
}

impl PilotConfig {
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn with_settle_delay_ms(mut self, ms: u64) -> Self {
        self.settle_delay_ms = ms;
        self
    }

    pub fn with_driver_timeout_ms(mut self, ms: u64) -> Self {
        self.driver_timeout_ms = ms;
        self
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn driver_timeout(&self) -> Duration {
        Duration::from_millis(self.driver_timeout_ms)
    }

    /// Resolve the directory holding `state.json`.
    pub fn resolve_data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => app_data_dir(&self.app_name),
        }
    }
}

/// Platform application-data directory for `app_name`.
///
/// - macOS: `$HOME/Library/Application Support/<app>`
/// - Windows: `%APPDATA%\<app>`
/// - other unix: `$HOME/.<app>`
pub fn app_data_dir(app_name: &str) -> Result<PathBuf> {
    if cfg!(target_os = "macos") {
        let home = env_dir("HOME")?;
        Ok(home
            .join("Library")
            .join("Application Support")
            .join(app_name))
    } else if cfg!(windows) {
        Ok(env_dir("APPDATA")?.join(app_name))
    } else if cfg!(unix) {
        Ok(env_dir("HOME")?.join(format!(".{}", app_name)))
    } else {
        Err(PilotError::Config(
            "unsupported platform for application data".to_string(),
        ))
    }
}

fn env_dir(var: &str) -> Result<PathBuf> {
    std::env::var_os(var)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| PilotError::Config(format!("environment variable {} is not set", var)))
}
