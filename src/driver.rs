//! Page automation seam.
//!
//! The schedulers never automate pages themselves; they call a
//! [`PageDriver`] and only care that the call eventually settles.
//!
//! - [`CommandDriver`]: hands each navigation to an external program
//! - [`LogDriver`]: records navigations in the log and does nothing else

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::config::DriverConfig;
use crate::error::{PilotError, Result};
use crate::state::AppJob;

pub const JOB_ENV_VAR: &str = "APPLY_PILOT_JOB";

#[async_trait]
pub trait PageDriver: Send + Sync {
    /// Open the application page for `job` and run the form automation.
    async fn goto_app_page(&self, job: &AppJob) -> Result<()>;

    /// Open the listing page at `url` and start crawling.
    async fn goto_main_page(&self, url: &str) -> Result<()>;
}

/// Build the driver described by `config`.
pub fn from_config(config: &DriverConfig) -> Arc<dyn PageDriver> {
    match config {
        DriverConfig::Log => Arc::new(LogDriver),
        DriverConfig::Command { program } => Arc::new(CommandDriver::new(program.clone())),
    }
}

/// Bound a driver call by `limit`.
pub async fn with_timeout<F>(limit: Duration, call: F) -> Result<()>
where
    F: std::future::Future<Output = Result<()>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(PilotError::DriverTimeout(
            u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        )),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LogDriver;

#[async_trait]
impl PageDriver for LogDriver {
    async fn goto_app_page(&self, job: &AppJob) -> Result<()> {
        tracing::info!(job_id = %job.id, company = %job.company, title = %job.title, "Opening application page");
        Ok(())
    }

    async fn goto_main_page(&self, url: &str) -> Result<()> {
        tracing::info!(url, "Opening listing page");
        Ok(())
    }
}

/// Runs an external automation program for every navigation.
#[derive(Debug, Clone)]
pub struct CommandDriver {
    program: PathBuf,
}

impl CommandDriver {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn run(&self, command: &mut Command) -> Result<()> {
        let output = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                PilotError::Driver(format!("failed to run {}: {}", self.program.display(), e))
            })?;

        Self::process_output(output)
    }

    fn process_output(output: std::process::Output) -> Result<()> {
        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            if !stdout.trim().is_empty() {
                tracing::debug!(output = %stdout.trim(), "Driver output");
            }
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        Err(PilotError::Driver(if stderr.is_empty() {
            format!("exit code: {:?}", output.status.code())
        } else {
            stderr
        }))
    }
}

#[async_trait]
impl PageDriver for CommandDriver {
    async fn goto_app_page(&self, job: &AppJob) -> Result<()> {
        let payload = serde_json::to_string(job)?;
        tracing::info!(job_id = %job.id, program = %self.program.display(), "Driving application page");

        let mut command = Command::new(&self.program);
        command.arg("apply").env(JOB_ENV_VAR, payload);
        self.run(&mut command).await
    }

    async fn goto_main_page(&self, url: &str) -> Result<()> {
        tracing::info!(url, program = %self.program.display(), "Driving listing page");

        let mut command = Command::new(&self.program);
        command.arg("list").arg(url);
        self.run(&mut command).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_driver_always_succeeds() {
        let driver = LogDriver;
        let job = AppJob::new("1", "Acme", "Dev", true);
        assert!(driver.goto_app_page(&job).await.is_ok());
        assert!(driver.goto_main_page("https://example.com/jobs").await.is_ok());
    }

    #[tokio::test]
    async fn with_timeout_reports_elapsed_limit() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(PilotError::DriverTimeout(10))));
    }

    #[tokio::test]
    async fn command_driver_missing_program_fails() {
        let driver = CommandDriver::new("/nonexistent/apply-pilot-driver");
        let job = AppJob::new("1", "Acme", "Dev", true);
        let result = driver.goto_app_page(&job).await;
        assert!(matches!(result, Err(PilotError::Driver(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_driver_succeeds_on_zero_exit() {
        let driver = CommandDriver::new("true");
        let job = AppJob::new("42", "Acme", "Dev", false);
        assert!(driver.goto_app_page(&job).await.is_ok());
        assert!(driver.goto_main_page("https://example.com").await.is_ok());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_driver_reports_exit_code_on_failure() {
        let driver = CommandDriver::new("false");
        let err = driver.goto_main_page("https://example.com").await.unwrap_err();
        assert!(err.to_string().contains("exit code"));
    }
}
