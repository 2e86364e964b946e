//! Coalescing task queue.
//!
//! Producers on any thread submit tasks; one consumer loop extracts and runs
//! them in submission order. A submission whose concrete type matches a
//! pending slot, and whose [`QueueTask::try_merge_with`] accepts that slot's
//! representative, merges into it instead of occupying a new slot. The merged
//! slot moves to the tail, so a group runs no earlier than its latest
//! contributing submission.
//!
//! All bookkeeping happens under one lock that is never held across
//! [`QueueTask::perform`] or [`QueueTask::dispose`].

use std::any::TypeId;
use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::receipt::{Submission, SubmissionReceipt, SubmitOutcome, TaskId};
use crate::task::{BoxedTask, MergeOutcome, QueueTask, task_type_id};
use crate::token::TaskToken;

mod handle;

pub use handle::QueuedTask;

/// Pending merge group.
struct Slot {
	id: TaskId,
	type_id: TypeId,
	task: BoxedTask,
	/// Receipt of the latest submission that contributed to this slot.
	receipt: SubmissionReceipt,
	/// Cancelled by `cancel_all_tasks` while the slot waits.
	token: TaskToken,
}

#[derive(Default)]
struct QueueState {
	slots: VecDeque<Slot>,
	/// Tokens of extracted tasks whose handles are still open.
	running: HashMap<TaskId, TaskToken>,
	latest: SubmissionReceipt,
	next_id: u64,
}

impl QueueState {
	fn mint_receipt(&mut self) -> SubmissionReceipt {
		let receipt = SubmissionReceipt::from_stamp(self.latest.stamp().wrapping_add(1));
		self.latest = receipt;
		receipt
	}

	fn mint_id(&mut self) -> TaskId {
		self.next_id = self.next_id.wrapping_add(1);
		TaskId::from_raw(self.next_id)
	}

	/// Finds the first slot the incoming task merges with.
	fn find_merge(&self, task: &dyn QueueTask, type_id: TypeId) -> Option<(usize, MergeOutcome)> {
		self.slots
			.iter()
			.enumerate()
			.filter(|(_, slot)| slot.type_id == type_id)
			.find_map(|(idx, slot)| task.try_merge_with(slot.task.as_ref()).map(|outcome| (idx, outcome)))
	}
}

pub(crate) struct QueueInner {
	state: Mutex<QueueState>,
}

impl QueueInner {
	/// Drops the running registration of a closed handle.
	fn release(&self, id: TaskId) {
		self.state.lock().running.remove(&id);
	}
}

/// Thread-safe coalescing task queue.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct MergingTaskQueue {
	inner: Arc<QueueInner>,
}

impl Default for MergingTaskQueue {
	fn default() -> Self {
		Self::new()
	}
}

impl std::fmt::Debug for MergingTaskQueue {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.inner.state.lock();
		f.debug_struct("MergingTaskQueue")
			.field("pending", &state.slots.len())
			.field("running", &state.running.len())
			.field("latest", &state.latest)
			.finish()
	}
}

impl MergingTaskQueue {
	/// Creates an empty queue.
	pub fn new() -> Self {
		Self {
			inner: Arc::new(QueueInner {
				state: Mutex::new(QueueState::default()),
			}),
		}
	}

	/// Submits a task and returns its receipt.
	pub fn add_task<T: QueueTask>(&self, task: T) -> SubmissionReceipt {
		self.submit_boxed(Box::new(task)).receipt
	}

	/// Submits a task, reporting its slot id and whether it coalesced.
	pub fn submit<T: QueueTask>(&self, task: T) -> Submission {
		self.submit_boxed(Box::new(task))
	}

	/// Submits an already boxed task.
	///
	/// Superseded tasks are disposed before this returns.
	pub fn submit_boxed(&self, task: BoxedTask) -> Submission {
		let mut superseded: Vec<BoxedTask> = Vec::new();
		let submission = {
			let mut state = self.inner.state.lock();
			let type_id = task_type_id(task.as_ref());
			let decision = catch_unwind(AssertUnwindSafe(|| state.find_merge(task.as_ref(), type_id)));
			let found = match decision {
				Ok(found) => found,
				Err(payload) => {
					drop(state);
					tracing::warn!(label = task.label(), "queue.merge.panicked");
					dispose_task(task);
					resume_unwind(payload);
				}
			};
			// Minted only once the submission is certain to land.
			let receipt = state.mint_receipt();
			let merge = found.and_then(|(idx, outcome)| state.slots.remove(idx).map(|slot| (slot, outcome)));

			match merge {
				Some((mut slot, outcome)) => {
					match outcome {
						MergeOutcome::KeepIncoming => superseded.push(std::mem::replace(&mut slot.task, task)),
						MergeOutcome::KeepExisting => superseded.push(task),
						MergeOutcome::Replace(fresh) => {
							superseded.push(std::mem::replace(&mut slot.task, fresh));
							superseded.push(task);
						}
					}
					slot.type_id = task_type_id(slot.task.as_ref());
					slot.receipt = receipt;
					slot.token = TaskToken::new(slot.id);
					let task_id = slot.id;
					tracing::trace!(
						task_id = %task_id,
						stamp = receipt.stamp(),
						label = slot.task.label(),
						pending = state.slots.len() + 1,
						"queue.coalesce"
					);
					state.slots.push_back(slot);
					Submission {
						receipt,
						task_id,
						outcome: SubmitOutcome::Coalesced,
					}
				}
				None => {
					let task_id = state.mint_id();
					tracing::trace!(
						task_id = %task_id,
						stamp = receipt.stamp(),
						label = task.label(),
						pending = state.slots.len() + 1,
						"queue.add_task"
					);
					state.slots.push_back(Slot {
						id: task_id,
						type_id,
						task,
						receipt,
						token: TaskToken::new(task_id),
					});
					Submission {
						receipt,
						task_id,
						outcome: SubmitOutcome::Enqueued,
					}
				}
			}
		};

		dispose_all(superseded);
		submission
	}

	/// Pops the head slot, or returns `None` when nothing is pending.
	///
	/// The returned handle owns the task until it is executed or closed.
	pub fn extract_next_task(&self) -> Option<QueuedTask> {
		self.extract_where(|_| true)
	}

	/// Like [`Self::extract_next_task`], but leaves the head in place when its
	/// latest contributing submission is after `through`.
	///
	/// Slots are ordered by receipt, so this stops at the first later one.
	pub(crate) fn extract_next_task_through(&self, through: SubmissionReceipt) -> Option<QueuedTask> {
		self.extract_where(|receipt| !receipt.is_after(through))
	}

	/// Returns true when the head slot would be extracted by
	/// [`Self::extract_next_task_through`].
	pub(crate) fn has_pending_through(&self, through: SubmissionReceipt) -> bool {
		self.inner.state.lock().slots.front().is_some_and(|slot| !slot.receipt.is_after(through))
	}

	fn extract_where(&self, admit: impl FnOnce(SubmissionReceipt) -> bool) -> Option<QueuedTask> {
		let mut state = self.inner.state.lock();
		if !admit(state.slots.front()?.receipt) {
			return None;
		}
		let slot = state.slots.pop_front()?;
		let token = TaskToken::new(slot.id);
		if slot.token.is_cancelled() {
			token.cancel();
		}
		state.running.insert(slot.id, token.clone());
		tracing::trace!(
			task_id = %slot.id,
			stamp = slot.receipt.stamp(),
			label = slot.task.label(),
			pending = state.slots.len(),
			"queue.extract"
		);
		Some(QueuedTask::new(Arc::clone(&self.inner), slot.id, slot.task, token, slot.receipt))
	}

	/// Cancels one merge group.
	///
	/// A pending group is removed and disposed right away. An extracted one only
	/// has its token cancelled; disposal happens when its handle closes.
	/// Returns false for ids that are neither pending nor running.
	pub fn cancel_task(&self, id: TaskId) -> bool {
		let mut state = self.inner.state.lock();
		if let Some(token) = state.running.get(&id) {
			token.cancel();
			tracing::debug!(task_id = %id, "queue.cancel_task.running");
			return true;
		}
		let Some(idx) = state.slots.iter().position(|slot| slot.id == id) else {
			return false;
		};
		let slot = state.slots.remove(idx);
		drop(state);

		if let Some(slot) = slot {
			tracing::debug!(task_id = %id, label = slot.task.label(), "queue.cancel_task.pending");
			slot.token.cancel();
			dispose_task(slot.task);
		}
		true
	}

	/// Cancels the tokens of every pending and every running task.
	///
	/// Nothing is removed or disposed.
	pub fn cancel_all_tasks(&self) {
		let state = self.inner.state.lock();
		for slot in &state.slots {
			slot.token.cancel();
		}
		for token in state.running.values() {
			token.cancel();
		}
		tracing::debug!(pending = state.slots.len(), running = state.running.len(), "queue.cancel_all");
	}

	/// Cancels running tasks and disposes every pending one.
	///
	/// Running tasks are not disposed here; their handles do that once
	/// `perform` returns. Returns the number of pending tasks disposed.
	pub fn dispose_pending_tasks(&self) -> usize {
		let slots: Vec<Slot> = {
			let mut state = self.inner.state.lock();
			for token in state.running.values() {
				token.cancel();
			}
			tracing::debug!(pending = state.slots.len(), running = state.running.len(), "queue.dispose_pending");
			state.slots.drain(..).collect()
		};

		let disposed = slots.len();
		dispose_all(slots.into_iter().map(|slot| {
			slot.token.cancel();
			slot.task
		}));
		disposed
	}

	/// Returns the receipt of the latest submission.
	pub fn latest_submission_receipt(&self) -> SubmissionReceipt {
		self.inner.state.lock().latest
	}

	/// Returns true when no slot is pending.
	pub fn is_empty(&self) -> bool {
		self.inner.state.lock().slots.is_empty()
	}

	/// Returns the number of pending slots.
	pub fn pending_len(&self) -> usize {
		self.inner.state.lock().slots.len()
	}

	/// Returns the number of extracted tasks whose handles are still open.
	pub fn running_len(&self) -> usize {
		self.inner.state.lock().running.len()
	}

	/// Returns the labels of pending tasks, head first.
	pub fn pending_labels(&self) -> Vec<String> {
		self.inner.state.lock().slots.iter().map(|slot| slot.task.label().to_owned()).collect()
	}

	/// Address-based identity, unique among live queues.
	pub(crate) fn identity(&self) -> usize {
		Arc::as_ptr(&self.inner) as usize
	}
}

fn dispose_task(mut task: BoxedTask) {
	tracing::trace!(label = task.label(), "queue.dispose");
	task.dispose();
}

/// Disposes every task even if some `dispose` panics; the first panic resumes
/// after the rest are done.
fn dispose_all(tasks: impl IntoIterator<Item = BoxedTask>) {
	let mut panicked = None;
	for task in tasks {
		if let Err(payload) = catch_unwind(AssertUnwindSafe(|| dispose_task(task))) {
			panicked.get_or_insert(payload);
		}
	}
	if let Some(payload) = panicked {
		resume_unwind(payload);
	}
}
