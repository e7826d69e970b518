//! Operations the UI invokes to drive the schedulers.
//!
//! Every operation is one atomic update through the store actor followed by
//! at most one event. [`CommandSurface::invoke`] exposes them by name with a
//! JSON argument, which is how the HTTP surface reaches them.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::{PilotError, Result};
use crate::events::{AppEvent, EventBus};
use crate::scheduler::ListingScheduler;
use crate::state::{
    AppJob, Application, AuthOutcome, Commit, PilotState, Question, QuestionEntry, Settings,
    StoreHandle,
};

/// Names accepted by [`CommandSurface::invoke`].
pub const COMMAND_NAMES: &[&str] = &[
    "state",
    "app:skip",
    "app:complete",
    "app:start",
    "app:start:ondemand",
    "app:stop",
    "list:start",
    "list:stop",
    "change:speed",
    "speed:default",
    "settings:save",
    "jobs:add",
    "questions:save",
    "questions:read",
    "questions:getall",
    "resume:get",
    "resume:save",
    "auth:record",
    "logout",
];

#[derive(Clone)]
pub struct CommandSurface {
    store: StoreHandle,
    bus: Arc<EventBus>,
    listing: ListingScheduler,
}

impl CommandSurface {
    pub fn new(store: StoreHandle, bus: Arc<EventBus>, listing: ListingScheduler) -> Self {
        Self {
            store,
            bus,
            listing,
        }
    }

    pub async fn state(&self) -> Result<PilotState> {
        self.store.read().await
    }

    /// Record `app` as skipped and release the active job.
    ///
    /// `None` is a no-op. Skipping a job id that is already skipped returns
    /// the current state without emitting anything.
    pub async fn skip(&self, app: Option<Application>) -> Result<Option<PilotState>> {
        let Some(app) = app else {
            return Ok(None);
        };
        let job_id = app.job.id.clone();

        let commit = self
            .store
            .update(move |state| {
                if state.is_skipped(&app.job.id) {
                    return false;
                }
                state.dequeue(&app.job.id);
                state.skipped_apps.push(app.resolve());
                state.clear_active();
                true
            })
            .await?;

        if !commit.changed {
            tracing::debug!(job_id = %job_id, "Job already skipped");
            return Ok(Some(commit.state));
        }

        log_unpersisted(&commit, "skip");
        tracing::info!(job_id = %job_id, "Job skipped");
        self.bus.emit(AppEvent::AppStop(job_id));
        Ok(Some(commit.state))
    }

    /// Record `app` as completed: applied, no longer skipped, dequeued.
    pub async fn complete(&self, app: Option<Application>) -> Result<Option<PilotState>> {
        let Some(app) = app else {
            return Ok(None);
        };
        let job_id = app.job.id.clone();

        let commit = self
            .store
            .update(move |state| {
                let id = app.job.id.clone();
                state.add_applied(app.job.clone());
                state.skipped_apps.retain(|a| a.job.id != id);
                if !state.is_completed(&id) {
                    state.completed_apps.push(app.resolve());
                }
                state.dequeue(&id);
                state.release_active(&id);
                true
            })
            .await?;

        log_unpersisted(&commit, "complete");
        tracing::info!(job_id = %job_id, "Job completed");
        self.bus.emit(AppEvent::AppStop(job_id));
        Ok(Some(commit.state))
    }

    /// Start processing.
    ///
    /// Without a job this turns the queue run on and pulls from the queue.
    /// With a job the job runs on demand and the run flag is left alone.
    pub async fn start(&self, on_demand: Option<AppJob>) -> Result<bool> {
        if let Some(job) = on_demand {
            tracing::info!(job_id = %job.id, "On-demand start requested");
            self.bus.emit(AppEvent::AppStart(Some(job)));
            return Ok(true);
        }

        let commit = self.set_app_running(true).await?;
        log_unpersisted(&commit, "start");
        tracing::info!(queued = commit.state.jobs.len(), "Apply run started");
        self.bus.emit(AppEvent::AppStart(None));
        Ok(true)
    }

    /// Stop the queue run. A job already handed to the driver is not aborted.
    pub async fn stop_all(&self, app: Option<Application>) -> Result<bool> {
        let commit = self.set_app_running(false).await?;
        log_unpersisted(&commit, "stop");

        let job_id = app.map(|a| a.job.id).unwrap_or_default();
        tracing::info!(job_id = %job_id, "Apply run stopped");
        self.bus.emit(AppEvent::AppStop(job_id));
        Ok(true)
    }

    async fn set_app_running(&self, running: bool) -> Result<Commit> {
        self.store
            .update(move |state| {
                state.set_app_running(running);
                true
            })
            .await
    }

    pub async fn set_speed(&self, is_app: bool, value: u32) -> Result<PilotState> {
        let commit = self
            .store
            .update(move |state| {
                if is_app {
                    state.settings.speed_apply = value;
                } else {
                    state.settings.speed_jobs = value;
                }
                true
            })
            .await?;
        log_unpersisted(&commit, "change:speed");
        Ok(commit.state)
    }

    pub async fn reset_speed(&self) -> Result<PilotState> {
        let commit = self
            .store
            .update(|state| {
                state.settings.reset_speed();
                true
            })
            .await?;
        log_unpersisted(&commit, "speed:default");
        Ok(commit.state)
    }

    /// Shallow-merge `patch` into the settings.
    pub async fn save_settings(&self, patch: Map<String, Value>) -> Result<PilotState> {
        // Known keys must have the right type regardless of current values
        Settings::default()
            .merge(patch.clone())
            .map_err(|e| invalid("settings:save", e))?;

        let commit = self
            .store
            .update(move |state| state.settings.merge(patch).is_ok())
            .await?;
        log_unpersisted(&commit, "settings:save");
        Ok(commit.state)
    }

    /// Append crawled jobs to the queue, skipping ids already queued.
    pub async fn enqueue_jobs(&self, jobs: Vec<AppJob>) -> Result<PilotState> {
        let commit = self
            .store
            .update(move |state| {
                let mut added = false;
                for job in jobs {
                    added |= state.add_job(job);
                }
                added
            })
            .await?;
        if commit.changed {
            log_unpersisted(&commit, "jobs:add");
            tracing::debug!(queued = commit.state.jobs.len(), "Jobs enqueued");
        }
        Ok(commit.state)
    }

    pub async fn list_start(&self, url: &str) -> Result<bool> {
        self.listing.start(url).await
    }

    pub async fn list_stop(&self) -> Result<bool> {
        self.listing.stop().await
    }

    pub async fn save_question(&self, question: Question) -> Result<Question> {
        let saved = question.clone();
        let commit = self
            .store
            .update(move |state| {
                state.save_question(question);
                true
            })
            .await?;
        log_unpersisted(&commit, "questions:save");
        Ok(saved)
    }

    pub async fn read_question(&self, id: &str) -> Result<Option<Question>> {
        Ok(self.state().await?.question(id).cloned())
    }

    pub async fn all_questions(&self) -> Result<Vec<QuestionEntry>> {
        Ok(self.state().await?.questions)
    }

    pub async fn save_resume(&self, resume: String) -> Result<bool> {
        let commit = self
            .store
            .update(move |state| {
                state.resume = Some(resume);
                true
            })
            .await?;
        log_unpersisted(&commit, "resume:save");
        Ok(commit.persisted)
    }

    pub async fn resume(&self) -> Result<Option<String>> {
        Ok(self.state().await?.resume)
    }

    /// Merge the outcome of an auth exchange into `auth`.
    pub async fn record_auth(&self, outcome: AuthOutcome) -> Result<PilotState> {
        let commit = self
            .store
            .update(move |state| {
                state.apply_auth(outcome);
                true
            })
            .await?;
        log_unpersisted(&commit, "auth:record");
        Ok(commit.state)
    }

    /// Forget the stored credentials.
    pub async fn logout(&self) -> Result<bool> {
        let commit = self
            .store
            .update(|state| {
                let changed = !state.auth.is_empty();
                state.auth = Default::default();
                changed
            })
            .await?;
        log_unpersisted(&commit, "logout");
        Ok(true)
    }

    /// Run the operation called `name` with a JSON argument.
    pub async fn invoke(&self, name: &str, arg: Value) -> Result<Value> {
        tracing::debug!(command = name, "Invoking command");

        let result = match name {
            "state" => to_value(self.state().await?)?,
            "app:skip" => to_value(self.skip(lenient(arg)).await?)?,
            "app:complete" => to_value(self.complete(lenient(arg)).await?)?,
            "app:start" => Value::Bool(self.start(None).await?),
            "app:start:ondemand" => {
                let job: AppJob = parse(name, arg)?;
                Value::Bool(self.start(Some(job)).await?)
            }
            "app:stop" => Value::Bool(self.stop_all(lenient(arg)).await?),
            "list:start" => {
                let url: String = parse(name, arg)?;
                Value::Bool(self.list_start(&url).await?)
            }
            "list:stop" => Value::Bool(self.list_stop().await?),
            "change:speed" => {
                let (is_app, value): (bool, u32) = parse(name, arg)?;
                to_value(self.set_speed(is_app, value).await?)?
            }
            "speed:default" => to_value(self.reset_speed().await?)?,
            "settings:save" => {
                let patch: Map<String, Value> = parse(name, arg)?;
                to_value(self.save_settings(patch).await?)?
            }
            "jobs:add" => {
                let jobs = match arg {
                    Value::Array(_) => parse::<Vec<AppJob>>(name, arg)?,
                    other => vec![parse::<AppJob>(name, other)?],
                };
                to_value(self.enqueue_jobs(jobs).await?)?
            }
            "questions:save" => {
                let question: Question = parse(name, arg)?;
                to_value(self.save_question(question).await?)?
            }
            "questions:read" => {
                let id = match arg {
                    Value::Object(mut map) => map.remove("id").unwrap_or(Value::Null),
                    other => other,
                };
                let id: String = parse(name, id)?;
                to_value(self.read_question(&id).await?)?
            }
            "questions:getall" => to_value(self.all_questions().await?)?,
            "resume:get" => to_value(self.resume().await?)?,
            "resume:save" => {
                let resume: String = parse(name, arg)?;
                Value::Bool(self.save_resume(resume).await?)
            }
            "auth:record" => {
                let outcome: AuthOutcome = parse(name, arg)?;
                to_value(self.record_auth(outcome).await?)?
            }
            "logout" => Value::Bool(self.logout().await?),
            _ => return Err(PilotError::UnknownCommand(name.to_string())),
        };

        Ok(result)
    }
}

fn log_unpersisted(commit: &Commit, command: &str) {
    if commit.changed && !commit.persisted {
        tracing::warn!(command, "State change was not persisted");
    }
}

/// Malformed input for skip/complete/stop is treated as absent.
fn lenient<T: DeserializeOwned>(arg: Value) -> Option<T> {
    serde_json::from_value(arg).ok()
}

fn parse<T: DeserializeOwned>(command: &str, arg: Value) -> Result<T> {
    serde_json::from_value(arg).map_err(|e| invalid(command, e))
}

fn invalid(command: &str, e: impl std::fmt::Display) -> PilotError {
    PilotError::InvalidArgument {
        command: command.to_string(),
        reason: e.to_string(),
    }
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}
