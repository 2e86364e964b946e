use std::sync::Arc;

use parking_lot::Mutex;

use crate::{MergeOutcome, QueueTask, TaskError, TaskToken, downcast_task};

/// Shared record of task callbacks.
#[derive(Default)]
pub(crate) struct TaskLog {
	performed: Mutex<Vec<u32>>,
	disposed: Mutex<Vec<u32>>,
}

impl TaskLog {
	pub(crate) fn shared() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub(crate) fn performed(&self) -> Vec<u32> {
		self.performed.lock().clone()
	}

	pub(crate) fn disposed(&self) -> Vec<u32> {
		self.disposed.lock().clone()
	}

	pub(crate) fn record_perform(&self, id: u32) {
		self.performed.lock().push(id);
	}

	pub(crate) fn record_dispose(&self, id: u32) {
		self.disposed.lock().push(id);
	}
}

/// Task that merges with queued tasks of the same key; the incoming one wins.
pub(crate) struct KeyedTask {
	pub(crate) id: u32,
	pub(crate) key: u32,
	log: Arc<TaskLog>,
	fail: bool,
}

impl KeyedTask {
	pub(crate) fn new(id: u32, key: u32, log: &Arc<TaskLog>) -> Self {
		Self {
			id,
			key,
			log: Arc::clone(log),
			fail: false,
		}
	}

	pub(crate) fn failing(mut self) -> Self {
		self.fail = true;
		self
	}
}

impl QueueTask for KeyedTask {
	fn perform(&mut self, _token: &TaskToken) -> Result<(), TaskError> {
		self.log.record_perform(self.id);
		if self.fail { Err(TaskError::failed(format!("task {} failed", self.id))) } else { Ok(()) }
	}

	fn dispose(&mut self) {
		self.log.record_dispose(self.id);
	}

	fn try_merge_with(&self, existing: &dyn QueueTask) -> Option<MergeOutcome> {
		let existing = downcast_task::<Self>(existing)?;
		(existing.key == self.key).then_some(MergeOutcome::KeepIncoming)
	}

	fn label(&self) -> &str {
		"keyed"
	}
}
