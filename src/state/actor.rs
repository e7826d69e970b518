use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{PilotError, Result};
use crate::state::model::PilotState;
use crate::state::store::FileStore;

const CHANNEL_CAPACITY: usize = 256;

/// A whole-document edit. Returns `true` when the document changed and must
/// be written.
pub type Mutation = Box<dyn FnOnce(&mut PilotState) -> bool + Send>;

/// Messages handled by the store actor loop
pub enum StoreMessage {
    Read {
        response_tx: oneshot::Sender<PilotState>,
    },
    Update {
        apply: Mutation,
        response_tx: oneshot::Sender<Commit>,
    },
}

/// Result of an update round-trip.
#[derive(Debug, Clone)]
pub struct Commit {
    /// Document as produced by the mutation
    pub state: PilotState,
    /// Whether the mutation changed anything
    pub changed: bool,
    /// Whether the change reached disk. When `false` the store keeps serving
    /// the last successfully saved document.
    pub persisted: bool,
}

/// Single writer owning the persisted document.
///
/// Every read-modify-write goes through one loop, so two callers can never
/// interleave their load and save and lose an update.
pub struct StoreActor {
    store: FileStore,
    state: PilotState,
}

impl StoreActor {
    /// Load the document and start the actor loop.
    pub async fn spawn(
        store: FileStore,
        shutdown: CancellationToken,
    ) -> (StoreHandle, JoinHandle<()>) {
        let state = store.load().await;
        tracing::info!(
            path = %store.path().display(),
            queued = state.jobs.len(),
            active_job = ?state.active_job.as_ref().map(|j| j.id.as_str()),
            "State store loaded"
        );

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let actor = Self { store, state };
        let handle = tokio::spawn(actor.run(rx, shutdown));

        (StoreHandle { tx }, handle)
    }

    async fn run(mut self, mut rx: mpsc::Receiver<StoreMessage>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                msg = rx.recv() => {
                    let Some(msg) = msg else { break };
                    match msg {
                        StoreMessage::Read { response_tx } => {
                            let _ = response_tx.send(self.state.clone());
                        }
                        StoreMessage::Update { apply, response_tx } => {
                            let commit = self.apply(apply).await;
                            let _ = response_tx.send(commit);
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    tracing::debug!("State store shutting down");
                    break;
                }
            }
        }
    }

    async fn apply(&mut self, apply: Mutation) -> Commit {
        let mut working = self.state.clone();
        let changed = apply(&mut working);
        if !changed {
            return Commit {
                state: working,
                changed,
                persisted: true,
            };
        }

        let persisted = self.store.save(&working).await;
        if persisted {
            self.state = working.clone();
        } else {
            tracing::warn!("State change not persisted, keeping last saved document");
        }

        Commit {
            state: working,
            changed,
            persisted,
        }
    }
}

/// Cloneable client for the store actor.
#[derive(Debug, Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreMessage>,
}

impl StoreHandle {
    /// Current document.
    pub async fn read(&self) -> Result<PilotState> {
        let (response_tx, rx) = oneshot::channel();
        self.tx
            .send(StoreMessage::Read { response_tx })
            .await
            .map_err(|_| PilotError::StoreUnavailable)?;
        rx.await.map_err(|_| PilotError::StoreUnavailable)
    }

    /// Apply `f` to the document atomically and persist the result.
    pub async fn update<F>(&self, f: F) -> Result<Commit>
    where
        F: FnOnce(&mut PilotState) -> bool + Send + 'static,
    {
        let (response_tx, rx) = oneshot::channel();
        self.tx
            .send(StoreMessage::Update {
                apply: Box::new(f),
                response_tx,
            })
            .await
            .map_err(|_| PilotError::StoreUnavailable)?;
        rx.await.map_err(|_| PilotError::StoreUnavailable)
    }
}

impl std::fmt::Debug for StoreMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreMessage::Read { .. } => write!(f, "Read"),
            StoreMessage::Update { .. } => write!(f, "Update"),
        }
    }
}
