use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::config::STATE_FILENAME;
use crate::error::Result;
use crate::state::model::{AppJob, PilotState};

/// Whole-document JSON persistence for [`PilotState`].
///
/// Reads never fail: anything unreadable yields the default state. Writes
/// report failure as `false` and leave the previous file in place.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(STATE_FILENAME)
    }

    /// Load the stored document, or the default state.
    pub async fn load(&self) -> PilotState {
        let path = self.path();
        match self.try_load(&path).await {
            Ok(Some(state)) => state,
            Ok(None) => PilotState::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Unreadable state file, using defaults");
                PilotState::default()
            }
        }
    }

    async fn try_load(&self, path: &Path) -> Result<Option<PilotState>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let doc = match serde_json::from_slice::<Value>(&bytes)? {
            Value::Object(map) if !map.is_empty() => map,
            Value::Null | Value::Object(_) => return Ok(None),
            other => {
                // Not a document at all; decoding reports the type error
                return Ok(Some(serde_json::from_value(other)?));
            }
        };

        let (state, rejected) = PilotState::from_document(doc);
        if !rejected.is_empty() {
            tracing::warn!(
                path = %path.display(),
                fields = ?rejected,
                "Ignoring state fields with unexpected types"
            );
        }
        Ok(Some(state))
    }

    /// Persist the whole document. Returns `false` on any failure.
    pub async fn save(&self, state: &PilotState) -> bool {
        match self.try_save(state).await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(path = %self.path().display(), error = %e, "Failed to save state");
                false
            }
        }
    }

    async fn try_save(&self, state: &PilotState) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let body = serde_json::to_vec_pretty(state)?;
        // Write beside the target and rename so a crash never leaves a torn file
        let tmp = self.dir.join(format!("{}.tmp", STATE_FILENAME));
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, self.path()).await?;
        Ok(())
    }

    /// Read, record `job` as applied (deduplicated by id), write.
    pub async fn add_applied(&self, job: AppJob) -> PilotState {
        let mut state = self.load().await;
        state.add_applied(job);
        self.save(&state).await;
        state
    }

    /// Read, append `job` to the pending queue (deduplicated by id), write.
    pub async fn add_job(&self, job: AppJob) -> PilotState {
        let mut state = self.load().await;
        state.add_job(job);
        self.save(&state).await;
        state
    }
}
