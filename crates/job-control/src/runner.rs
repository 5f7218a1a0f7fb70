use std::{
	any::Any,
	panic::{self, AssertUnwindSafe},
	sync::Arc,
};

use tokio::{runtime::Handle, sync::Semaphore};
use tracing::{error, trace, warn, Instrument};

use super::{error::WorkError, future::JobFuture};

/// A type-erased work function, as stored by job controllers.
pub(crate) type BoxedWork<T> = Box<dyn FnOnce(JobFuture<T>) -> Result<(), WorkError> + Send>;

/// Runs work functions on tokio's blocking pool, one worker thread per submission, with at
/// most `max_workers` of them running at once.
#[derive(Debug, Clone)]
pub struct AsyncRunner {
	handle: Handle,
	permits: Arc<Semaphore>,
}

impl AsyncRunner {
	#[must_use]
	pub fn new(handle: Handle, max_workers: usize) -> Self {
		Self {
			handle,
			permits: Arc::new(Semaphore::new(max_workers.max(1))),
		}
	}

	#[must_use]
	pub const fn handle(&self) -> &Handle {
		&self.handle
	}

	/// Submits `work` and returns the future it reports into.
	pub fn run<T, E>(
		&self,
		work: impl FnOnce(JobFuture<T>) -> Result<(), E> + Send + 'static,
	) -> JobFuture<T>
	where
		T: Send + 'static,
		E: std::error::Error + Send + Sync + 'static,
	{
		let future = JobFuture::new();
		self.run_with(
			future.clone(),
			Box::new(move |future| work(future).map_err(WorkError::failed)),
		);

		future
	}

	pub(crate) fn run_with<T: Send + 'static>(&self, future: JobFuture<T>, work: BoxedWork<T>) {
		let permits = Arc::clone(&self.permits);
		let handle = self.handle.clone();

		self.handle.spawn(
			async move {
				let Ok(_permit) = permits.acquire_owned().await else {
					warn!("Async runner closed, dropping submitted work;");
					future.cancel_unfinished();
					return;
				};

				if future.should_cancel() {
					trace!("Work canceled while queued;");
				}

				if let Err(e) = handle.spawn_blocking(move || run_work(&future, work)).await {
					error!(?e, "Worker thread failed;");
				}
			}
			.in_current_span(),
		);
	}
}

/// Drives one work function to completion on the current thread.
///
/// Canceled-before-start futures never invoke `work`. Errors and panics are stored on the
/// future, and the future is always finished when this returns.
pub(crate) fn run_work<T>(
	future: &JobFuture<T>,
	work: impl FnOnce(JobFuture<T>) -> Result<(), WorkError>,
) {
	if !future.report_started() {
		trace!(state = %future.state(), "Skipping work function, future won't run;");
		return;
	}

	match panic::catch_unwind(AssertUnwindSafe(|| work(future.clone()))) {
		Ok(Ok(())) => {}
		Ok(Err(e)) => {
			if !future.is_canceled() {
				warn!(%e, "Work function failed;");
			}
			future.report_error(e);
		}
		Err(payload) => {
			let message = panic_message(payload.as_ref());
			error!(%message, "Work function panicked;");
			future.report_error(WorkError::Panicked(message));
		}
	}

	if future.is_paused() {
		trace!("Work function returned while paused, waiting for resume;");
		future.wait_for_resume();
	}

	future.report_finished();
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
	payload
		.downcast_ref::<&str>()
		.map(ToString::to_string)
		.or_else(|| payload.downcast_ref::<String>().cloned())
		.unwrap_or_else(|| "unknown panic payload".to_string())
}
