//! Persisted application state.
//!
//! - [`model`]: the JSON document and its pure helpers
//! - [`store`]: load-or-default and whole-document save to `state.json`
//! - [`actor`]: single-writer loop that serializes every read-modify-write

pub mod actor;
pub mod model;
pub mod store;

pub use actor::{Commit, StoreActor, StoreHandle};
pub use model::{
    AppJob, Application, AuthOutcome, AuthResult, AuthState, PilotState, Question, QuestionEntry,
    QuestionKind, Settings,
};
pub use store::FileStore;
