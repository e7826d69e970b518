pub mod apply;
pub mod listing;

pub use apply::{Activation, ApplyScheduler, CycleReport, SchedulerPhase};
pub use listing::ListingScheduler;
