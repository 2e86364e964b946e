use std::sync::Arc;

use super::QueueInner;
use crate::receipt::{SubmissionReceipt, TaskId};
use crate::task::BoxedTask;
use crate::{TaskError, TaskToken};

/// Extracted task, owned by the consumer until executed or closed.
///
/// The task is disposed exactly once: at the end of [`QueuedTask::execute_task`]
/// on every exit path, or by [`QueuedTask::close`] / `Drop` if it never ran.
pub struct QueuedTask {
	queue: Arc<QueueInner>,
	id: TaskId,
	task: Option<BoxedTask>,
	token: TaskToken,
	receipt: SubmissionReceipt,
}

impl QueuedTask {
	pub(super) fn new(queue: Arc<QueueInner>, id: TaskId, task: BoxedTask, token: TaskToken, receipt: SubmissionReceipt) -> Self {
		Self {
			queue,
			id,
			task: Some(task),
			token,
			receipt,
		}
	}

	pub fn task_id(&self) -> TaskId {
		self.id
	}

	/// Receipt of the latest submission merged into this task.
	pub fn receipt(&self) -> SubmissionReceipt {
		self.receipt
	}

	/// Token passed to `perform`; cancelling it aborts the task cooperatively.
	pub fn token(&self) -> &TaskToken {
		&self.token
	}

	pub fn label(&self) -> &str {
		self.task.as_ref().map_or("", |task| task.label())
	}

	/// Runs the task on the calling thread, then disposes it.
	///
	/// `perform` is skipped when the token is already cancelled. A token
	/// cancelled at any point before `perform` returns turns the result into
	/// `Err(TaskError::Cancelled)`. If `perform` panics, the unwinding drop of
	/// this handle still disposes the task.
	pub fn execute_task(mut self) -> Result<(), TaskError> {
		let result = match self.task.as_mut() {
			Some(_) if self.token.is_cancelled() => {
				tracing::trace!(task_id = %self.id, "queue.execute.skipped");
				Err(TaskError::Cancelled)
			}
			Some(task) => match task.perform(&self.token) {
				Ok(()) if self.token.is_cancelled() => Err(TaskError::Cancelled),
				other => other,
			},
			None => Ok(()),
		};
		tracing::trace!(task_id = %self.id, ok = result.is_ok(), "queue.execute");
		self.finish();
		result
	}

	/// Disposes the task without running it.
	pub fn close(mut self) {
		self.finish();
	}

	fn finish(&mut self) {
		if let Some(mut task) = self.task.take() {
			self.queue.release(self.id);
			task.dispose();
		}
	}
}

impl Drop for QueuedTask {
	fn drop(&mut self) {
		self.finish();
	}
}

impl std::fmt::Debug for QueuedTask {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("QueuedTask")
			.field("id", &self.id)
			.field("label", &self.label())
			.field("receipt", &self.receipt)
			.field("cancelled", &self.token.is_cancelled())
			.finish()
	}
}
