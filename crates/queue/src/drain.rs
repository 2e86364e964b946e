use std::time::{Duration, Instant};

use crate::receipt::{SubmissionReceipt, TaskId};
use crate::{MergingTaskQueue, QueuedTask, TaskError};

/// Bounds for one drain pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainBudget {
	pub duration: Duration,
	/// Tasks handled per pass, whatever their outcome.
	pub max_completions: usize,
}

impl DrainBudget {
	/// Drains until the queue is empty.
	pub const fn unbounded() -> Self {
		Self {
			duration: Duration::MAX,
			max_completions: usize::MAX,
		}
	}
}

impl Default for DrainBudget {
	fn default() -> Self {
		Self::unbounded()
	}
}

/// Summary of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
	pub completed: u64,
	pub cancelled: u64,
	pub failed: u64,
	/// Slots still pending when the pass ended.
	pub pending: usize,
	/// The pass stopped on its budget rather than on an empty queue.
	pub budget_exhausted: bool,
}

impl DrainReport {
	/// Tasks extracted and executed during the pass.
	pub fn handled(&self) -> u64 {
		self.completed + self.cancelled + self.failed
	}

	/// Folds a later pass into this report.
	pub(crate) fn absorb(&mut self, later: Self) {
		self.completed += later.completed;
		self.cancelled += later.cancelled;
		self.failed += later.failed;
		self.pending = later.pending;
		self.budget_exhausted = later.budget_exhausted;
	}

	fn record(&mut self, id: TaskId, result: Result<(), TaskError>) {
		match result {
			Ok(()) => self.completed += 1,
			Err(TaskError::Cancelled) => {
				self.cancelled += 1;
				tracing::debug!(task_id = %id, "queue.drain.cancelled");
			}
			Err(TaskError::Failed(error)) => {
				self.failed += 1;
				tracing::warn!(task_id = %id, error = %error, "queue.drain.failed");
			}
		}
	}
}

/// Runs the consumer loop on the calling thread until the queue is empty or
/// `budget` runs out.
///
/// Failed and cancelled tasks are counted and the loop moves on. A panic in a
/// task body propagates; that task is disposed during unwinding and the rest
/// stay queued.
pub fn drain_queue(queue: &MergingTaskQueue, budget: DrainBudget) -> DrainReport {
	run_pass(queue, budget, || queue.extract_next_task())
}

/// Unbudgeted pass that only extracts slots whose latest submission is not
/// after `through()`. The bound is re-read before every extraction.
pub(crate) fn drain_through(queue: &MergingTaskQueue, through: impl Fn() -> SubmissionReceipt) -> DrainReport {
	run_pass(queue, DrainBudget::unbounded(), || queue.extract_next_task_through(through()))
}

fn run_pass(queue: &MergingTaskQueue, budget: DrainBudget, mut next: impl FnMut() -> Option<QueuedTask>) -> DrainReport {
	if budget.max_completions == 0 {
		return DrainReport {
			pending: queue.pending_len(),
			budget_exhausted: true,
			..DrainReport::default()
		};
	}

	let deadline = Instant::now().checked_add(budget.duration);
	let mut report = DrainReport::default();

	loop {
		if report.handled() >= budget.max_completions as u64 || deadline.is_some_and(|deadline| Instant::now() >= deadline) {
			report.budget_exhausted = true;
			break;
		}
		let Some(task) = next() else {
			break;
		};
		let id = task.task_id();
		report.record(id, task.execute_task());
	}

	report.pending = queue.pending_len();
	tracing::trace!(
		completed = report.completed,
		cancelled = report.cancelled,
		failed = report.failed,
		pending = report.pending,
		budget_exhausted = report.budget_exhausted,
		"queue.drain"
	);
	report
}
