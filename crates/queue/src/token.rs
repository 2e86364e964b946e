use tokio_util::sync::CancellationToken;

use crate::TaskError;
use crate::receipt::TaskId;

/// Task-scoped cancellation token handed to [`crate::QueueTask::perform`].
///
/// Cloning shares the underlying flag, so the queue keeps one clone to signal
/// cancellation while the task body polls another.
#[derive(Debug, Clone)]
pub struct TaskToken {
	task: TaskId,
	cancel: CancellationToken,
}

impl TaskToken {
	/// Creates a fresh, uncancelled token for one task.
	pub fn new(task: TaskId) -> Self {
		Self {
			task,
			cancel: CancellationToken::new(),
		}
	}

	/// Returns the id of the task this token belongs to.
	pub const fn task_id(&self) -> TaskId {
		self.task
	}

	/// Returns true when cancellation is requested.
	pub fn is_cancelled(&self) -> bool {
		self.cancel.is_cancelled()
	}

	/// Requests cancellation.
	pub fn cancel(&self) {
		self.cancel.cancel();
	}

	/// Returns `Err(TaskError::Cancelled)` once cancellation is requested.
	///
	/// Lets task bodies bail out with `token.check()?` between steps.
	pub fn check(&self) -> Result<(), TaskError> {
		if self.is_cancelled() { Err(TaskError::Cancelled) } else { Ok(()) }
	}

	/// Future resolving when cancellation is requested.
	pub async fn cancelled(&self) {
		self.cancel.cancelled().await;
	}

	/// Creates a child token for the same task.
	///
	/// Cancelling the parent cancels the child; not the other way round.
	pub fn child(&self) -> Self {
		Self {
			task: self.task,
			cancel: self.cancel.child_token(),
		}
	}
}
