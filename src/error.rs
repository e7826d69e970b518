use thiserror::Error;

#[derive(Error, Debug)]
pub enum PilotError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Page driver failed: {0}")]
    Driver(String),

    #[error("Page driver timed out after {0}ms")]
    DriverTimeout(u64),

    #[error("State store is not running")]
    StoreUnavailable,

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid argument for {command}: {reason}")]
    InvalidArgument { command: String, reason: String },
}

pub type Result<T> = std::result::Result<T, PilotError>;
