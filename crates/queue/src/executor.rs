//! Background drain loop for hosts running tokio.
//!
//! The worker sleeps on a wake signal, then runs one bounded
//! [`drain_queue`] pass on the blocking pool, since task bodies are plain
//! blocking code. Passes repeat while work remains.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::drain::{DrainBudget, DrainReport, drain_queue};
use crate::receipt::{Submission, SubmissionReceipt};
use crate::{ExecutorError, MergingTaskQueue, QueueTask};

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorSpec {
	name: String,
	budget: DrainBudget,
}

impl ExecutorSpec {
	/// Creates a spec with a per-pass budget of 64 tasks or 50ms.
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			budget: DrainBudget {
				duration: Duration::from_millis(50),
				max_completions: 64,
			},
		}
	}

	/// Sets the budget of one drain pass.
	pub fn budget(mut self, budget: DrainBudget) -> Self {
		self.budget = budget;
		self
	}

	pub fn name(&self) -> &str {
		&self.name
	}
}

/// Cumulative executor counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutorStatus {
	pub passes: u64,
	pub completed: u64,
	pub cancelled: u64,
	pub failed: u64,
	/// Latest receipt observed at the start of a pass that emptied the queue.
	pub idle_through: SubmissionReceipt,
	pub stopped: bool,
}

impl ExecutorStatus {
	fn absorb(&mut self, report: &DrainReport) {
		self.passes += 1;
		self.completed += report.completed;
		self.cancelled += report.cancelled;
		self.failed += report.failed;
	}
}

/// How [`QueueExecutor::shutdown`] treats remaining work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownMode {
	/// Drain what was submitted so far, then stop. Falls back to
	/// [`ShutdownMode::Immediate`] after `timeout`.
	Graceful { timeout: Duration },
	/// Dispose pending work, cancel running work, then stop.
	Immediate,
}

/// Background consumer of one [`MergingTaskQueue`].
pub struct QueueExecutor {
	queue: MergingTaskQueue,
	name: Arc<str>,
	wake: Arc<Notify>,
	cancel: CancellationToken,
	status: watch::Receiver<ExecutorStatus>,
	worker: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for QueueExecutor {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("QueueExecutor")
			.field("name", &self.name)
			.field("queue", &self.queue)
			.field("status", &*self.status.borrow())
			.finish()
	}
}

impl QueueExecutor {
	/// Starts the worker on the current tokio runtime.
	pub fn spawn(queue: MergingTaskQueue, spec: ExecutorSpec) -> Result<Self, ExecutorError> {
		let runtime = tokio::runtime::Handle::try_current().map_err(|_| ExecutorError::NoRuntime)?;
		let name: Arc<str> = Arc::from(spec.name.as_str());
		let wake = Arc::new(Notify::new());
		let cancel = CancellationToken::new();
		let (status_tx, status_rx) = watch::channel(ExecutorStatus::default());

		let worker = runtime.spawn(run_worker(
			queue.clone(),
			Arc::clone(&name),
			spec.budget,
			Arc::clone(&wake),
			cancel.clone(),
			status_tx,
		));
		tracing::debug!(executor = %name, "executor.spawn");
		// Pick up anything submitted before the executor existed.
		wake.notify_one();

		Ok(Self {
			queue,
			name,
			wake,
			cancel,
			status: status_rx,
			worker: Some(worker),
		})
	}

	pub fn queue(&self) -> &MergingTaskQueue {
		&self.queue
	}

	/// Submits a task and wakes the worker.
	pub fn submit<T: QueueTask>(&self, task: T) -> Submission {
		let submission = self.queue.submit(task);
		self.wake.notify_one();
		submission
	}

	/// Wakes the worker, e.g. after submitting through [`Self::queue`] directly.
	pub fn wake(&self) {
		self.wake.notify_one();
	}

	pub fn status(&self) -> ExecutorStatus {
		*self.status.borrow()
	}

	/// Resolves once everything submitted before this call has been drained,
	/// or the executor stopped.
	pub async fn wait_idle(&self) {
		let target = self.queue.latest_submission_receipt();
		self.wake.notify_one();
		let mut status = self.status.clone();
		let _ = status.wait_for(|status| status.stopped || !target.is_after(status.idle_through)).await;
	}

	/// Stops the worker and returns the final status.
	pub async fn shutdown(mut self, mode: ShutdownMode) -> Result<ExecutorStatus, ExecutorError> {
		if let ShutdownMode::Graceful { timeout } = mode
			&& tokio::time::timeout(timeout, self.wait_idle()).await.is_err()
		{
			tracing::debug!(executor = %self.name, "executor.shutdown.timeout");
		}

		let disposed = self.queue.dispose_pending_tasks();
		self.cancel.cancel();
		if let Some(worker) = self.worker.take() {
			worker.await.map_err(|err| ExecutorError::Join(err.to_string()))?;
		}
		let status = self.status();
		tracing::debug!(executor = %self.name, disposed, completed = status.completed, "executor.shutdown");
		Ok(status)
	}
}

impl Drop for QueueExecutor {
	fn drop(&mut self) {
		self.cancel.cancel();
	}
}

async fn run_worker(
	queue: MergingTaskQueue,
	name: Arc<str>,
	budget: DrainBudget,
	wake: Arc<Notify>,
	cancel: CancellationToken,
	status: watch::Sender<ExecutorStatus>,
) {
	loop {
		tokio::select! {
			biased;
			_ = cancel.cancelled() => break,
			_ = wake.notified() => {}
		}

		let observed = queue.latest_submission_receipt();
		let pass_queue = queue.clone();
		let report = match tokio::task::spawn_blocking(move || drain_queue(&pass_queue, budget)).await {
			Ok(report) => report,
			Err(err) => {
				tracing::warn!(executor = %name, error = %err, "executor.pass.panicked");
				DrainReport {
					failed: 1,
					pending: queue.pending_len(),
					..DrainReport::default()
				}
			}
		};

		status.send_modify(|status| {
			status.absorb(&report);
			if report.pending == 0 && observed.is_after(status.idle_through) {
				status.idle_through = observed;
			}
		});
		tracing::trace!(
			executor = %name,
			completed = report.completed,
			pending = report.pending,
			stamp = observed.stamp(),
			"executor.pass"
		);

		if report.pending > 0 {
			wake.notify_one();
		}
	}

	status.send_modify(|status| status.stopped = true);
	tracing::debug!(executor = %name, "executor.stopped");
}
