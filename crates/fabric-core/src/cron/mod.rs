//! Cron scheduling: schedule parsing (component G), job persistence
//! (component H), and the Cron Manager actor that ticks and executes due
//! jobs (component I).

pub mod manager;
pub mod schedule;
pub mod store;

pub use manager::{AddJobParams, CronManager, UpdateJobParams};
pub use store::{CronStore, ListRunsOpts};
