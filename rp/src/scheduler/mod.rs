//! Batch scheduling and the worker pool

mod core;
mod queue;

pub use core::{BatchScheduler, RunSummary, partition};
pub use queue::{Job, WorkQueue};
