use std::fmt;

/// Point in a queue's submission timeline.
///
/// Every `add_task` mints a receipt strictly after all earlier ones, so
/// receipts answer "was this queue state produced after that submission?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SubmissionReceipt {
	stamp: u64,
}

impl SubmissionReceipt {
	/// Receipt preceding every submission.
	pub const INITIAL: Self = Self { stamp: 0 };

	pub(crate) const fn from_stamp(stamp: u64) -> Self {
		Self { stamp }
	}

	/// Returns the raw stamp.
	pub const fn stamp(self) -> u64 {
		self.stamp
	}

	/// Returns true when `self` was minted strictly after `other`.
	pub const fn is_after(self, other: Self) -> bool {
		self.stamp > other.stamp
	}
}

impl fmt::Display for SubmissionReceipt {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.stamp)
	}
}

/// Identity of one merge group.
///
/// Stays the same while submissions merge into the group and follows the
/// task into its [`crate::QueuedTask`] handle after extraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u64);

impl TaskId {
	/// Wraps a raw id. Mostly useful in tests.
	pub const fn from_raw(raw: u64) -> Self {
		Self(raw)
	}

	/// Returns the raw id.
	pub const fn raw(self) -> u64 {
		self.0
	}
}

impl fmt::Display for TaskId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "task-{}", self.0)
	}
}

/// How a submission entered the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
	/// A new slot was appended at the tail.
	Enqueued,
	/// The task merged into an existing slot, which moved to the tail.
	Coalesced,
}

/// Full result of one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
	pub receipt: SubmissionReceipt,
	pub task_id: TaskId,
	pub outcome: SubmitOutcome,
}
