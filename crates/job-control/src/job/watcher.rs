use std::pin::pin;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug_span, trace, Instrument};

use crate::future::{FutureEvent, JobFuture};

use super::{controller::JobController, Job};

/// Forwards a future's events to its controller, on the runner's runtime, until `Finished`.
///
/// Holds a strong handle to the controller, so a fire-and-forget job stays alive for as long
/// as its work runs.
pub(super) struct Watcher {
	_handle: JoinHandle<()>,
}

impl Watcher {
	pub(super) fn spawn<T: Send + 'static>(controller: JobController<T>, future: &JobFuture<T>) -> Self {
		let events = future.subscribe();
		let span = debug_span!("job_watcher", job_id = %controller.id());

		let handle = controller.runner().handle().clone().spawn(
			async move {
				let mut events = pin!(events);

				while let Some(event) = events.next().await {
					let finished = event == FutureEvent::Finished;
					controller.handle_future_event(event);
					if finished {
						break;
					}
				}

				trace!("Watcher done;");
			}
			.instrument(span),
		);

		Self { _handle: handle }
	}
}
