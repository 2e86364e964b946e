//! Synchronous "run now or queue" front end.
//!
//! A call from outside any running task drains the queue on the caller's
//! thread. A call made from inside a task that this queue is currently running
//! only submits; the outer drain picks the work up once the current task
//! returns. Nested submissions therefore never grow the stack, and bursts of
//! them get a chance to coalesce.
//!
//! Callers never wait for one another. A call that finds another thread
//! draining hands its submission to that drain and returns at once.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::drain::{DrainReport, drain_through};
use crate::receipt::{Submission, SubmissionReceipt};
use crate::{BoxedTask, MergingTaskQueue, QueueTask};

thread_local! {
	/// Identities of queues currently draining on this thread.
	static DRAINING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

fn is_draining(queue: usize) -> bool {
	DRAINING.with(|draining| draining.borrow().contains(&queue))
}

/// Marks a queue as draining on the current thread until dropped.
struct DrainingGuard(usize);

impl DrainingGuard {
	fn enter(queue: usize) -> Self {
		DRAINING.with(|draining| draining.borrow_mut().push(queue));
		Self(queue)
	}
}

impl Drop for DrainingGuard {
	fn drop(&mut self) {
		DRAINING.with(|draining| {
			let mut draining = draining.borrow_mut();
			if let Some(idx) = draining.iter().rposition(|queue| *queue == self.0) {
				draining.remove(idx);
			}
		});
	}
}

/// What [`SyncTaskQueue::run_task_synchronously`] did with a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncRun {
	/// The queue was drained on the calling thread.
	Drained(DrainReport),
	/// Another drain of this queue was active, either further up this
	/// thread's stack or on another thread; that drain runs the work.
	Deferred(Submission),
}

impl SyncRun {
	pub fn is_deferred(&self) -> bool {
		matches!(self, Self::Deferred(_))
	}
}

/// Reentrancy-safe synchronous runner over a [`MergingTaskQueue`].
#[derive(Debug, Clone, Default)]
pub struct SyncTaskQueue {
	queue: MergingTaskQueue,
	/// Held by the one active drain.
	drain: Arc<Mutex<()>>,
	/// Stamp of the latest submission made through this front end. The active
	/// drain runs everything up to it.
	handoff: Arc<AtomicU64>,
}

impl SyncTaskQueue {
	pub fn new() -> Self {
		Self::default()
	}

	/// Wraps an existing queue.
	pub fn with_queue(queue: MergingTaskQueue) -> Self {
		Self {
			queue,
			drain: Arc::new(Mutex::new(())),
			handoff: Arc::new(AtomicU64::new(0)),
		}
	}

	pub fn queue(&self) -> &MergingTaskQueue {
		&self.queue
	}

	/// Returns true while the calling thread is inside this queue's drain loop.
	pub fn is_draining_on_current_thread(&self) -> bool {
		is_draining(self.queue.identity())
	}

	/// Runs `task` now, or defers it to a drain that is already active.
	///
	/// The drain covers the work submitted through this front end up to the
	/// moment it finishes, including submissions deferred to it by other
	/// threads. Tasks added directly with [`MergingTaskQueue::add_task`] after
	/// this call started are left for the next consumer. A group that such a
	/// later `add_task` merges into runs with that later submission.
	pub fn run_task_synchronously<T: QueueTask>(&self, task: T) -> SyncRun {
		self.run_boxed(Box::new(task))
	}

	/// Boxed form of [`Self::run_task_synchronously`].
	pub fn run_boxed(&self, task: BoxedTask) -> SyncRun {
		let identity = self.queue.identity();
		let submission = self.queue.submit_boxed(task);
		// Published before probing the drain lock, so a drain that is about to
		// release it still sees this submission.
		self.handoff.fetch_max(submission.receipt.stamp(), Ordering::SeqCst);

		let held = if is_draining(identity) { None } else { self.drain.try_lock() };
		let Some(held) = held else {
			tracing::trace!(
				task_id = %submission.task_id,
				stamp = submission.receipt.stamp(),
				outcome = ?submission.outcome,
				"sync_queue.deferred"
			);
			return SyncRun::Deferred(submission);
		};

		let _guard = DrainingGuard::enter(identity);
		let mut report = DrainReport::default();
		let mut held = Some(held);
		while let Some(lock) = held.take() {
			report.absorb(drain_through(&self.queue, || self.through()));
			drop(lock);
			// Work handed off just before the release is still this caller's.
			if self.queue.has_pending_through(self.through()) {
				held = self.drain.try_lock();
			}
		}
		tracing::trace!(completed = report.completed, cancelled = report.cancelled, failed = report.failed, "sync_queue.drained");
		SyncRun::Drained(report)
	}

	fn through(&self) -> SubmissionReceipt {
		SubmissionReceipt::from_stamp(self.handoff.load(Ordering::SeqCst))
	}
}
