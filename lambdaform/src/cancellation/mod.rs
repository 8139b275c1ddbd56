//! Structured cancellation utilities.
//!
//! This module provides:
//! - `CancellationToken` for cooperative cancellation of a reconciliation run
//! - `TaskGroup` for joining independent stages that fail together

mod task_group;
mod token;

pub use task_group::TaskGroup;
pub use token::{CancelCallback, CancellationToken};
