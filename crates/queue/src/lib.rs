//! Coalescing task queue.
//!
//! [`MergingTaskQueue`] accepts [`QueueTask`]s from any thread, merges pending
//! work of the same concrete type when the task's own merge predicate agrees,
//! and hands tasks out one at a time as [`QueuedTask`] handles. Every submitted
//! task is disposed exactly once, whether it ran, merged away, or was cancelled.
//!
//! On top of the queue:
//! * [`drain_queue`] runs the consumer loop under a [`DrainBudget`],
//! * [`SyncTaskQueue`] runs work on the calling thread and defers nested
//!   submissions instead of recursing,
//! * [`QueueExecutor`] drains a queue in the background on a tokio runtime.

mod drain;
mod error;
mod executor;
mod queue;
mod receipt;
mod sync_queue;
mod task;
mod token;

#[cfg(test)]
mod test_support;

pub use drain::{DrainBudget, DrainReport, drain_queue};
pub use error::{ExecutorError, TaskError};
pub use executor::{ExecutorSpec, ExecutorStatus, QueueExecutor, ShutdownMode};
pub use queue::{MergingTaskQueue, QueuedTask};
pub use receipt::{Submission, SubmissionReceipt, SubmitOutcome, TaskId};
pub use sync_queue::{SyncRun, SyncTaskQueue};
pub use task::{BoxedTask, MergeOutcome, QueueTask, downcast_task};
pub use token::TaskToken;
