//! Error types for task execution and background draining.

use thiserror::Error;

/// Outcome of a task body that did not complete normally.
#[derive(Debug, Error)]
pub enum TaskError {
	/// The task observed a cancellation request and aborted.
	///
	/// Not a failure: cancelled tasks are still disposed exactly once.
	#[error("task cancelled")]
	Cancelled,

	/// The task body failed.
	#[error("task failed: {0}")]
	Failed(#[from] anyhow::Error),
}

impl TaskError {
	/// Builds a [`TaskError::Failed`] from a plain message.
	pub fn failed(msg: impl std::fmt::Display + std::fmt::Debug + Send + Sync + 'static) -> Self {
		Self::Failed(anyhow::Error::msg(msg))
	}

	/// Returns true for [`TaskError::Cancelled`].
	pub fn is_cancelled(&self) -> bool {
		matches!(self, Self::Cancelled)
	}
}

/// Errors raised by [`crate::QueueExecutor`].
#[derive(Debug, Error)]
pub enum ExecutorError {
	/// `QueueExecutor::spawn` was called outside a tokio runtime.
	#[error("queue executor requires a running tokio runtime")]
	NoRuntime,

	/// The background worker task could not be joined.
	#[error("queue executor worker failed: {0}")]
	Join(String),
}
