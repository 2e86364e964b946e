use std::sync::Arc;

use coalesce_queue::{MergeOutcome, MergingTaskQueue, QueueTask, SyncRun, SyncTaskQueue, TaskError, TaskToken, downcast_task};
use parking_lot::Mutex;

#[derive(Default)]
struct Journal {
	performed: Mutex<Vec<(char, u32)>>,
	disposed: Mutex<Vec<(char, u32)>>,
}

/// Reindex request; equivalent requests share a key.
struct Reindex {
	id: u32,
	key: &'static str,
	journal: Arc<Journal>,
}

impl QueueTask for Reindex {
	fn perform(&mut self, token: &TaskToken) -> Result<(), TaskError> {
		token.check()?;
		self.journal.performed.lock().push(('r', self.id));
		Ok(())
	}

	fn dispose(&mut self) {
		self.journal.disposed.lock().push(('r', self.id));
	}

	fn try_merge_with(&self, existing: &dyn QueueTask) -> Option<MergeOutcome> {
		let existing = downcast_task::<Self>(existing)?;
		(existing.key == self.key).then_some(MergeOutcome::KeepIncoming)
	}
}

/// Refresh request using the same keys as [`Reindex`] but never merging across kinds.
struct Refresh {
	id: u32,
	key: &'static str,
	journal: Arc<Journal>,
}

impl QueueTask for Refresh {
	fn perform(&mut self, _token: &TaskToken) -> Result<(), TaskError> {
		self.journal.performed.lock().push(('f', self.id));
		Ok(())
	}

	fn dispose(&mut self) {
		self.journal.disposed.lock().push(('f', self.id));
	}

	fn try_merge_with(&self, existing: &dyn QueueTask) -> Option<MergeOutcome> {
		let existing = downcast_task::<Self>(existing)?;
		(existing.key == self.key).then_some(MergeOutcome::KeepIncoming)
	}
}

fn drain(queue: &MergingTaskQueue) {
	while let Some(task) = queue.extract_next_task() {
		let _ = task.execute_task();
	}
}

#[test]
fn hundred_equivalent_submissions_run_the_last_one() {
	let journal = Arc::new(Journal::default());
	let queue = MergingTaskQueue::new();
	for id in 0..100 {
		queue.add_task(Reindex {
			id,
			key: "project",
			journal: Arc::clone(&journal),
		});
	}

	drain(&queue);
	assert_eq!(*journal.performed.lock(), vec![('r', 99)]);
	let disposed = journal.disposed.lock();
	assert_eq!(disposed.len(), 100);
	assert_eq!(disposed.last(), Some(&('r', 99)));
}

#[test]
fn same_key_different_kinds_both_run() {
	let journal = Arc::new(Journal::default());
	let queue = MergingTaskQueue::new();
	queue.add_task(Reindex {
		id: 1,
		key: "module",
		journal: Arc::clone(&journal),
	});
	queue.add_task(Refresh {
		id: 2,
		key: "module",
		journal: Arc::clone(&journal),
	});

	drain(&queue);
	assert_eq!(*journal.performed.lock(), vec![('r', 1), ('f', 2)]);
	assert_eq!(journal.disposed.lock().len(), 2);
}

#[test]
fn interleaved_groups_keep_their_own_positions() {
	let journal = Arc::new(Journal::default());
	let queue = MergingTaskQueue::new();
	let reindex = |id, key| Reindex {
		id,
		key,
		journal: Arc::clone(&journal),
	};
	queue.add_task(reindex(1, "a"));
	queue.add_task(reindex(2, "b"));
	queue.add_task(reindex(3, "a"));
	queue.add_task(reindex(4, "c"));
	queue.add_task(reindex(5, "b"));

	drain(&queue);
	assert_eq!(*journal.performed.lock(), vec![('r', 3), ('r', 4), ('r', 5)]);
}

/// Requests a burst of reindexing from inside its own body.
struct Burst {
	sync: SyncTaskQueue,
	journal: Arc<Journal>,
	deferred: Arc<Mutex<usize>>,
}

impl QueueTask for Burst {
	fn perform(&mut self, _token: &TaskToken) -> Result<(), TaskError> {
		for id in 0..100 {
			let run = self.sync.run_task_synchronously(Reindex {
				id,
				key: "burst",
				journal: Arc::clone(&self.journal),
			});
			if let SyncRun::Deferred(_) = run {
				*self.deferred.lock() += 1;
			}
		}
		Ok(())
	}
}

#[test]
fn nested_synchronous_submissions_coalesce() {
	let journal = Arc::new(Journal::default());
	let deferred = Arc::new(Mutex::new(0));
	let sync = SyncTaskQueue::new();

	sync.run_task_synchronously(Burst {
		sync: sync.clone(),
		journal: Arc::clone(&journal),
		deferred: Arc::clone(&deferred),
	});

	assert_eq!(*deferred.lock(), 100);
	assert_eq!(*journal.performed.lock(), vec![('r', 99)]);
	assert_eq!(journal.disposed.lock().len(), 100);
}

#[test]
fn dispose_pending_leaves_nothing_behind() {
	let journal = Arc::new(Journal::default());
	let queue = MergingTaskQueue::new();
	for id in 0..10 {
		queue.add_task(Refresh {
			id,
			key: if id % 2 == 0 { "even" } else { "odd" },
			journal: Arc::clone(&journal),
		});
	}

	assert_eq!(queue.dispose_pending_tasks(), 2);
	assert!(queue.extract_next_task().is_none());
	assert!(journal.performed.lock().is_empty());
	assert_eq!(journal.disposed.lock().len(), 10);
}
