pub mod commands;
pub mod config;
pub mod dashboard;
pub mod driver;
pub mod error;
pub mod events;
pub mod node;
pub mod scheduler;
pub mod shutdown;
pub mod state;
