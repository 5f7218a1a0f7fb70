use std::{
	fmt,
	sync::{Arc, Mutex},
	time::Duration,
};

use async_channel as chan;
use async_trait::async_trait;
use futures::StreamExt;
use tokio::{
	task::JoinHandle,
	time::{interval_at, Instant},
};
use tokio_stream::wrappers::IntervalStream;
use tracing::{debug, error, instrument, trace, warn, Instrument};

use crate::{
	error::ErrorCode,
	future::{CancelOutcome, FutureEvent, JobFuture},
	id::JobId,
	lock,
	progress_info::{Description, ProgressInfo},
	runner::{AsyncRunner, BoxedWork},
	unit::Unit,
};

use super::{
	base::{JobBase, KillGate},
	speed::SpeedEstimator,
	watcher::Watcher,
	Capabilities, Job, JobNotification, JobOutput, KillVerbosity,
};

const KILLED_TEXT: &str = "Job killed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
	/// The controller owns the work function and submits it on `start`.
	Owned,
	/// The controller wraps a future someone else already submitted.
	Adopted,
}

pub(crate) struct ControllerParams {
	pub(crate) id: JobId,
	pub(crate) capabilities: Capabilities,
	pub(crate) auto_delete: bool,
	pub(crate) progress_unit: Unit,
	pub(crate) speed_interval: Duration,
}

struct Inner<T> {
	base: JobBase,
	runner: AsyncRunner,
	origin: Origin,
	speed_interval: Duration,
	future: Mutex<Option<JobFuture<T>>>,
	work: Mutex<Option<BoxedWork<T>>>,
	watcher: Mutex<Option<Watcher>>,
	speed: Mutex<SpeedEstimator>,
	speed_timer: Mutex<Option<JoinHandle<()>>>,
}

/// Job controller bound to a [`JobFuture`] producing `T`s.
///
/// Translates the future's events into [`JobNotification`]s, keeps the amounts, speed and error
/// bookkeeping, and implements kill, suspend and resume on top of the future's cancel and pause.
/// Cheap to clone, all clones drive the same job.
pub struct JobController<T> {
	inner: Arc<Inner<T>>,
}

impl<T> Clone for JobController<T> {
	fn clone(&self) -> Self {
		Self {
			inner: Arc::clone(&self.inner),
		}
	}
}

impl<T> fmt::Debug for JobController<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("JobController")
			.field("id", self.inner.base.id())
			.field("origin", &self.inner.origin)
			.finish_non_exhaustive()
	}
}

impl<T: Send + 'static> JobController<T> {
	fn new(
		runner: AsyncRunner,
		params: ControllerParams,
		origin: Origin,
		future: JobFuture<T>,
		work: Option<BoxedWork<T>>,
	) -> Self {
		let ControllerParams {
			id,
			capabilities,
			auto_delete,
			progress_unit,
			speed_interval,
		} = params;

		Self {
			inner: Arc::new(Inner {
				base: JobBase::new(id, capabilities, auto_delete, progress_unit),
				runner,
				origin,
				speed_interval,
				future: Mutex::new(Some(future)),
				work: Mutex::new(work),
				watcher: Mutex::new(None),
				speed: Mutex::new(SpeedEstimator::default()),
				speed_timer: Mutex::new(None),
			}),
		}
	}

	pub(crate) fn with_work(runner: AsyncRunner, params: ControllerParams, work: BoxedWork<T>) -> Self {
		Self::new(runner, params, Origin::Owned, JobFuture::new(), Some(work))
	}

	/// Wraps an already submitted future. The watcher is attached right away, so events the
	/// future published before this call are replayed to it.
	pub(crate) fn adopting(runner: AsyncRunner, params: ControllerParams, future: JobFuture<T>) -> Self {
		let this = Self::new(runner, params, Origin::Adopted, future.clone(), None);

		this.inner.base.begin_start();
		this.install_watcher(&future);
		this.start_speed_timer();

		this
	}

	/// The future this job reports into, `None` once an autodelete job released itself.
	#[must_use]
	pub fn future(&self) -> Option<JobFuture<T>> {
		lock(&self.inner.future).clone()
	}

	/// Drains the results reported so far.
	#[must_use]
	pub fn take_results(&self) -> Vec<T> {
		self.future()
			.map(|future| future.take_results())
			.unwrap_or_default()
	}

	/// Whether an autodelete job already released its internals after finishing.
	#[must_use]
	pub fn is_released(&self) -> bool {
		self.inner.base.is_released()
	}

	/// A channel of every notification from now on. Closed once the job finished and its
	/// `Finished` and `Result` notifications were delivered.
	#[must_use]
	pub fn subscribe(&self) -> chan::Receiver<JobNotification> {
		self.inner.base.subscribe()
	}

	/// Registers `observer` for every notification, delivered one at a time and in order.
	///
	/// Observers run during delivery and must not suspend or resume the job themselves.
	pub fn on_notification(
		&self,
		observer: impl Fn(&dyn Job, &JobNotification) + Send + Sync + 'static,
	) {
		self.inner.base.add_observer(Arc::new(observer));
	}

	pub fn on_finished(&self, observer: impl Fn(&dyn Job) + Send + Sync + 'static) {
		self.on_notification(move |job, notification| {
			if matches!(notification, JobNotification::Finished) {
				observer(job);
			}
		});
	}

	pub fn on_result(&self, observer: impl Fn(&dyn Job) + Send + Sync + 'static) {
		self.on_notification(move |job, notification| {
			if matches!(notification, JobNotification::Result) {
				observer(job);
			}
		});
	}

	pub fn on_description(&self, observer: impl Fn(&dyn Job, &Description) + Send + Sync + 'static) {
		self.on_notification(move |job, notification| {
			if let JobNotification::Description(description) = notification {
				observer(job, description);
			}
		});
	}

	/// `observer` receives the plain and rich variants of each info message.
	pub fn on_info_message(&self, observer: impl Fn(&dyn Job, &str, &str) + Send + Sync + 'static) {
		self.on_notification(move |job, notification| {
			if let JobNotification::InfoMessage { plain, rich } = notification {
				observer(job, plain, rich);
			}
		});
	}

	/// `observer` receives the plain and rich variants of each warning.
	pub fn on_warning(&self, observer: impl Fn(&dyn Job, &str, &str) + Send + Sync + 'static) {
		self.on_notification(move |job, notification| {
			if let JobNotification::Warning { plain, rich } = notification {
				observer(job, plain, rich);
			}
		});
	}

	pub fn on_speed(&self, observer: impl Fn(&dyn Job, u64) + Send + Sync + 'static) {
		self.on_notification(move |job, notification| {
			if let JobNotification::Speed(speed) = notification {
				observer(job, *speed);
			}
		});
	}

	pub(super) fn runner(&self) -> &AsyncRunner {
		&self.inner.runner
	}

	fn install_watcher(&self, future: &JobFuture<T>) {
		let watcher = Watcher::spawn(self.clone(), future);
		if lock(&self.inner.watcher).replace(watcher).is_some() {
			warn!(job_id = %self.id(), "Replaced an existing watcher;");
		}
	}

	fn start_speed_timer(&self) {
		let period = self.inner.speed_interval;
		let weak = Arc::downgrade(&self.inner);

		let timer = self.inner.runner.handle().spawn(
			async move {
				let mut ticks = IntervalStream::new(interval_at(Instant::now() + period, period));

				while ticks.next().await.is_some() {
					let Some(inner) = weak.upgrade() else {
						break;
					};

					let controller = Self { inner };
					if controller.is_finished() {
						break;
					}
					controller.update_speed(period);
				}
			}
			.in_current_span(),
		);

		if let Some(previous) = lock(&self.inner.speed_timer).replace(timer) {
			previous.abort();
		}
	}

	fn stop_speed_timer(&self) {
		if let Some(timer) = lock(&self.inner.speed_timer).take() {
			timer.abort();
		}
	}

	fn update_speed(&self, elapsed: Duration) {
		let processed = self.inner.base.processed_size();
		let speed = lock(&self.inner.speed).update(processed, elapsed);
		self.inner.base.set_speed(self, speed);
	}

	pub(super) fn handle_future_event(&self, event: FutureEvent) {
		if self.inner.base.is_finished() {
			trace!(job_id = %self.id(), ?event, "Ignoring future event, job already finished;");
			return;
		}

		let base = &self.inner.base;

		match event {
			FutureEvent::Started => debug!(job_id = %self.id(), "Work started;"),

			FutureEvent::Paused | FutureEvent::Resumed => {
				trace!(job_id = %self.id(), ?event, "Work pause state changed;");
			}

			FutureEvent::Canceled => {
				debug!(job_id = %self.id(), "Work canceled, waiting for it to finish;");
			}

			FutureEvent::ProgressRange { min, max } => {
				base.set_total_amount_and_size(self, base.progress_unit(), max.saturating_sub(min));
			}

			FutureEvent::ProgressValue(value) => {
				base.set_processed_amount_and_size(self, base.progress_unit(), value);
			}

			FutureEvent::ProgressText(text) => self.handle_progress_text(&text),

			FutureEvent::ResultsReady { begin, end } => {
				base.notify(self, JobNotification::ResultsReady { begin, end });
			}

			FutureEvent::Finished => self.handle_future_finished(),
		}
	}

	fn handle_progress_text(&self, text: &str) {
		let base = &self.inner.base;

		match ProgressInfo::decode(text) {
			Some(ProgressInfo::Description(description)) => {
				base.notify(self, JobNotification::Description(description));
			}
			Some(ProgressInfo::InfoMessage { plain, rich }) => {
				base.notify(self, JobNotification::InfoMessage { plain, rich });
			}
			Some(ProgressInfo::Warning { plain, rich }) => {
				base.notify(self, JobNotification::Warning { plain, rich });
			}
			Some(ProgressInfo::SetProgressUnit(unit)) => base.set_progress_unit(self, unit),
			None => warn!(job_id = %self.id(), %text, "Unknown progress text;"),
		}
	}

	fn handle_future_finished(&self) {
		let Some(future) = self.future() else {
			return;
		};

		if !self.inner.base.begin_completion() {
			trace!(job_id = %self.id(), "Kill in flight, leaving the finish to it;");
			return;
		}

		if future.is_canceled() {
			self.inner.base.set_error(ErrorCode::Killed, KILLED_TEXT);
		} else if let Some(e) = future.error() {
			self.inner.base.set_error(
				ErrorCode::UserDefined,
				format!("Unknown, non-killed job error on job <id='{}'>: {e}", self.id()),
			);
		} else {
			self.inner.base.set_error(ErrorCode::NoError, String::new());
		}

		self.finish_job(true);
	}

	fn finish_job(&self, emit_result: bool) {
		self.stop_speed_timer();

		if !self.inner.base.finish(self, emit_result) {
			return;
		}

		if self.is_auto_delete() {
			self.release();
		} else {
			self.inner.base.close_subscribers();
		}
	}

	fn release(&self) {
		debug!(job_id = %self.id(), "Releasing finished autodelete job;");

		lock(&self.inner.future).take();
		lock(&self.inner.work).take();
		lock(&self.inner.watcher).take();
		self.inner.base.release();
	}

	#[instrument(skip(self), fields(job_id = %self.id()))]
	fn start_job(&self) {
		if self.inner.origin == Origin::Adopted {
			trace!("Adopted job is already running;");
			return;
		}

		if !self.inner.base.begin_start() {
			return;
		}

		let (Some(future), Some(work)) = (self.future(), lock(&self.inner.work).take()) else {
			warn!("Job has nothing left to run;");
			return;
		};

		self.install_watcher(&future);
		self.start_speed_timer();
		self.inner.runner.run_with(future, work);
	}

	/// Cancels the future, marks the job killed and waits for the worker to stop.
	///
	/// Returns `None` when there is nothing left to kill or the wait failed. A future that
	/// already finished on its own is left untouched and keeps its outcome.
	async fn do_kill(&self) -> Option<CancelOutcome> {
		self.stop_speed_timer();

		// A local handle keeps the future alive through the wait, whatever happens to the job
		let future = self.future()?;

		let outcome = future.cancel_unfinished();
		if outcome == CancelOutcome::AlreadyFinished {
			return Some(outcome);
		}

		self.inner.base.set_error(ErrorCode::Killed, KILLED_TEXT);

		if outcome == CancelOutcome::Canceled {
			if let Err(e) = self
				.inner
				.runner
				.handle()
				.spawn_blocking(move || future.wait_for_finished())
				.await
			{
				error!(?e, "Failed to wait for the killed job's worker;");
				return None;
			}
		}

		Some(outcome)
	}

	#[instrument(skip(self), fields(job_id = %self.id()))]
	async fn kill_job(&self, verbosity: KillVerbosity) -> bool {
		match self.inner.base.begin_kill() {
			KillGate::AlreadyFinished => {
				trace!("Job already finished or finishing;");
				self.wait_finished().await;
				return true;
			}
			KillGate::InProgress => {
				warn!("Job is already being killed, ignoring kill request;");
				return false;
			}
			KillGate::Proceed => {}
		}

		match self.do_kill().await {
			None => {
				self.inner.base.abort_kill();
				false
			}

			Some(CancelOutcome::AlreadyFinished) => {
				debug!("Work completed before the kill request, finishing the job as is;");
				self.inner.base.abort_kill();
				self.handle_future_finished();
				self.wait_finished().await;
				true
			}

			Some(CancelOutcome::FinishedUnstarted | CancelOutcome::Canceled) => {
				debug!(?verbosity, "Job killed;");
				self.finish_job(verbosity == KillVerbosity::EmitResult);
				true
			}
		}
	}

	/// Waits until the job finished and every notification of it was delivered.
	pub async fn wait_finished(&self) {
		let notifications = self.subscribe();
		while notifications.recv().await.is_ok() {}
	}
}

#[async_trait]
impl<T: Send + 'static> Job for JobController<T> {
	fn id(&self) -> &JobId {
		self.inner.base.id()
	}

	fn start(&self) {
		self.start_job();
	}

	async fn kill(&self, verbosity: KillVerbosity) -> bool {
		assert!(
			self.capabilities().contains(Capabilities::KILLABLE),
			"tried to kill job <id='{}'> which isn't killable",
			self.id()
		);

		self.kill_job(verbosity).await
	}

	fn suspend(&self) -> bool {
		assert!(
			self.capabilities().contains(Capabilities::SUSPENDABLE),
			"tried to suspend job <id='{}'> which isn't suspendable",
			self.id()
		);

		if !self.inner.base.begin_suspend() {
			return false;
		}

		if let Some(future) = self.future() {
			future.set_paused(true);
		}
		self.inner.base.notify(self, JobNotification::Suspended);

		true
	}

	fn resume(&self) -> bool {
		assert!(
			self.capabilities().contains(Capabilities::SUSPENDABLE),
			"tried to resume job <id='{}'> which isn't suspendable",
			self.id()
		);

		if !self.inner.base.begin_resume() {
			return false;
		}

		if let Some(future) = self.future() {
			future.set_paused(false);
		}
		self.inner.base.notify(self, JobNotification::Resumed);

		true
	}

	async fn exec(&self) -> bool {
		if !self.is_finished() {
			self.start();
			self.wait_finished().await;
		}

		self.error() == ErrorCode::NoError
	}

	fn error(&self) -> ErrorCode {
		self.inner.base.error()
	}

	fn error_text(&self) -> String {
		self.inner.base.error_text()
	}

	fn capabilities(&self) -> Capabilities {
		self.inner.base.capabilities()
	}

	fn is_auto_delete(&self) -> bool {
		self.inner.base.is_auto_delete()
	}

	fn set_auto_delete(&self, auto_delete: bool) {
		self.inner.base.set_auto_delete(auto_delete);
	}

	fn is_finished(&self) -> bool {
		self.inner.base.is_finished()
	}

	fn is_suspended(&self) -> bool {
		self.inner.base.is_suspended()
	}

	fn progress_unit(&self) -> Unit {
		self.inner.base.progress_unit()
	}

	fn total_amount(&self, unit: Unit) -> u64 {
		self.inner.base.total_amount(unit)
	}

	fn processed_amount(&self, unit: Unit) -> u64 {
		self.inner.base.processed_amount(unit)
	}

	fn total_size(&self) -> u64 {
		self.inner.base.total_size()
	}

	fn processed_size(&self) -> u64 {
		self.inner.base.processed_size()
	}

	fn percent(&self) -> u64 {
		self.inner.base.percent()
	}

	fn speed(&self) -> u64 {
		self.inner.base.speed()
	}

	fn take_output(&self) -> JobOutput {
		let results = self.take_results();
		if results.is_empty() {
			JobOutput::Empty
		} else {
			JobOutput::Out(Box::new(results))
		}
	}
}
