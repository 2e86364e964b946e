//! Task contract consumed by the queue.

use std::any::{Any, TypeId};

use crate::{TaskError, TaskToken};

/// Owned, type-erased queue task.
pub type BoxedTask = Box<dyn QueueTask>;

/// Result of a successful merge between an incoming and a queued task.
pub enum MergeOutcome {
	/// The incoming task represents both; the queued one is superseded.
	KeepIncoming,
	/// The queued task represents both; the incoming one is superseded.
	KeepExisting,
	/// A fresh task represents both; both inputs are superseded.
	Replace(BoxedTask),
}

impl std::fmt::Debug for MergeOutcome {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::KeepIncoming => f.write_str("KeepIncoming"),
			Self::KeepExisting => f.write_str("KeepExisting"),
			Self::Replace(task) => f.debug_tuple("Replace").field(&task.label()).finish(),
		}
	}
}

/// Unit of mergeable background work.
///
/// The queue calls [`QueueTask::dispose`] exactly once for every instance it
/// was handed, whether the task ran, was merged away, or was cancelled.
/// [`QueueTask::try_merge_with`] is only consulted for candidates of the exact
/// same concrete type, so implementations can downcast `existing` with
/// [`downcast_task`] and treat a failed downcast as "not mergeable".
pub trait QueueTask: Any + Send {
	/// Runs the task body.
	///
	/// Long bodies should poll `token` and return `Err(TaskError::Cancelled)`
	/// (usually via [`TaskToken::check`]) once cancellation is requested.
	fn perform(&mut self, token: &TaskToken) -> Result<(), TaskError>;

	/// Releases resources held by the task.
	fn dispose(&mut self) {}

	/// Attempts to merge `self` (incoming) with `existing` (queued).
	///
	/// Runs while the queue lock is held: implementations must not call back
	/// into the queue. If this panics, the incoming task is disposed and the
	/// panic resumes in the submitter.
	fn try_merge_with(&self, _existing: &dyn QueueTask) -> Option<MergeOutcome> {
		None
	}

	/// Short human-readable name used in logs.
	fn label(&self) -> &str {
		std::any::type_name::<Self>()
	}
}

/// Downcasts a type-erased task to its concrete type.
pub fn downcast_task<T: QueueTask>(task: &dyn QueueTask) -> Option<&T> {
	let any: &dyn Any = task;
	any.downcast_ref::<T>()
}

/// Returns the concrete type id behind a type-erased task.
pub(crate) fn task_type_id(task: &dyn QueueTask) -> TypeId {
	let any: &dyn Any = task;
	any.type_id()
}

#[cfg(test)]
mod tests {
	use super::*;

	struct Alpha(u32);
	struct Beta;

	impl QueueTask for Alpha {
		fn perform(&mut self, _token: &TaskToken) -> Result<(), TaskError> {
			Ok(())
		}
	}

	impl QueueTask for Beta {
		fn perform(&mut self, _token: &TaskToken) -> Result<(), TaskError> {
			Ok(())
		}

		fn label(&self) -> &str {
			"beta"
		}
	}

	#[test]
	fn type_id_sees_through_the_box() {
		let a: BoxedTask = Box::new(Alpha(1));
		let b: BoxedTask = Box::new(Beta);
		assert_eq!(task_type_id(a.as_ref()), TypeId::of::<Alpha>());
		assert_ne!(task_type_id(a.as_ref()), task_type_id(b.as_ref()));
	}

	#[test]
	fn downcast_matches_concrete_type_only() {
		let a: BoxedTask = Box::new(Alpha(5));
		assert_eq!(downcast_task::<Alpha>(a.as_ref()).map(|t| t.0), Some(5));
		assert!(downcast_task::<Beta>(a.as_ref()).is_none());
	}

	#[test]
	fn label_defaults_to_type_name() {
		assert!(Alpha(0).label().ends_with("Alpha"));
		assert_eq!(Beta.label(), "beta");
	}
}
