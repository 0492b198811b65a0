//! Coordinator: dispatches narration jobs with bounded concurrency.

pub mod scheduler;

pub use scheduler::{JobScheduler, SchedulerOptions};
