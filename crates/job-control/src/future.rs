use std::{
	fmt, mem,
	sync::{
		atomic::{AtomicU8, Ordering},
		Arc, Condvar, Mutex, MutexGuard, PoisonError,
	},
	time::Duration,
};

use async_channel as chan;
use tracing::trace;

use super::{
	error::WorkError,
	progress_info::{Description, ProgressInfo},
	unit::Unit,
};

const STARTED: u8 = 1 << 0;
const RUNNING: u8 = 1 << 1;
const PAUSED: u8 = 1 << 2;
const CANCELED: u8 = 1 << 3;
const FINISHED: u8 = 1 << 4;

/// Snapshot of a [`JobFuture`]'s state flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FutureState(u8);

impl FutureState {
	#[must_use]
	pub const fn is_started(self) -> bool {
		self.0 & STARTED != 0
	}

	#[must_use]
	pub const fn is_running(self) -> bool {
		self.0 & RUNNING != 0
	}

	#[must_use]
	pub const fn is_paused(self) -> bool {
		self.0 & PAUSED != 0
	}

	#[must_use]
	pub const fn is_canceled(self) -> bool {
		self.0 & CANCELED != 0
	}

	#[must_use]
	pub const fn is_finished(self) -> bool {
		self.0 & FINISHED != 0
	}
}

impl fmt::Display for FutureState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.0 == 0 {
			return f.write_str("Created");
		}

		let names = [
			(STARTED, "Started"),
			(RUNNING, "Running"),
			(PAUSED, "Paused"),
			(CANCELED, "Canceled"),
			(FINISHED, "Finished"),
		];

		let mut first = true;
		for (flag, name) in names {
			if self.0 & flag != 0 {
				if !first {
					f.write_str("|")?;
				}
				f.write_str(name)?;
				first = false;
			}
		}

		Ok(())
	}
}

/// State transitions and progress updates published by a [`JobFuture`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FutureEvent {
	Started,
	Paused,
	Resumed,
	Canceled,
	Finished,
	ProgressRange { min: u64, max: u64 },
	ProgressValue(u64),
	ProgressText(String),
	ResultsReady { begin: usize, end: usize },
}

/// What a kill request did to a future, see [`JobFuture::cancel_unfinished`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CancelOutcome {
	/// The future finished before the request, its outcome stands.
	AlreadyFinished,
	/// Nobody started the future, it was canceled and finished right away.
	FinishedUnstarted,
	/// The future is canceled, its worker still has to finish it.
	Canceled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Progress {
	pub min: u64,
	pub max: u64,
	pub value: u64,
	pub text: String,
}

struct Inner<T> {
	results: Vec<T>,
	reported_count: usize,
	progress: Progress,
	error: Option<WorkError>,
	watchers: Vec<chan::Sender<FutureEvent>>,
}

impl<T> Inner<T> {
	fn emit(&mut self, event: &FutureEvent) {
		self.watchers
			.retain(|watcher| watcher.try_send(event.clone()).is_ok());
	}
}

struct Shared<T> {
	flags: AtomicU8,
	inner: Mutex<Inner<T>>,
	state_changed: Condvar,
}

/// Shared handle to the eventual outcome of a work function.
///
/// The producer (a worker thread) reports results, progress and state transitions;
/// any number of clones observe them, cancel, or pause. All handles see the same state.
pub struct JobFuture<T> {
	shared: Arc<Shared<T>>,
}

impl<T> Clone for JobFuture<T> {
	fn clone(&self) -> Self {
		Self {
			shared: Arc::clone(&self.shared),
		}
	}
}

impl<T> fmt::Debug for JobFuture<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("JobFuture")
			.field("state", &self.state().to_string())
			.finish_non_exhaustive()
	}
}

impl<T> Default for JobFuture<T> {
	fn default() -> Self {
		Self::new()
	}
}

impl<T> JobFuture<T> {
	/// A future in the `Created` state.
	#[must_use]
	pub fn new() -> Self {
		Self {
			shared: Arc::new(Shared {
				flags: AtomicU8::new(0),
				inner: Mutex::new(Inner {
					results: Vec::new(),
					reported_count: 0,
					progress: Progress::default(),
					error: None,
					watchers: Vec::new(),
				}),
				state_changed: Condvar::new(),
			}),
		}
	}

	fn lock(&self) -> MutexGuard<'_, Inner<T>> {
		self.shared
			.inner
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
	}

	fn flags(&self) -> u8 {
		self.shared.flags.load(Ordering::Acquire)
	}

	// Flags are only ever written with the inner lock held, so waiters on the condvar
	// never miss a transition.
	fn set_flags(&self, _guard: &MutexGuard<'_, Inner<T>>, set: u8, clear: u8) {
		let current = self.shared.flags.load(Ordering::Acquire);
		self.shared
			.flags
			.store((current | set) & !clear, Ordering::Release);
	}

	#[must_use]
	pub fn state(&self) -> FutureState {
		FutureState(self.flags())
	}

	#[must_use]
	pub fn is_started(&self) -> bool {
		self.state().is_started()
	}

	#[must_use]
	pub fn is_running(&self) -> bool {
		self.state().is_running()
	}

	#[must_use]
	pub fn is_paused(&self) -> bool {
		self.state().is_paused()
	}

	#[must_use]
	pub fn is_canceled(&self) -> bool {
		self.state().is_canceled()
	}

	#[must_use]
	pub fn is_finished(&self) -> bool {
		self.state().is_finished()
	}

	/// Cheap poll for work functions: a single atomic load.
	#[must_use]
	pub fn should_cancel(&self) -> bool {
		self.is_canceled()
	}

	/// Moves the future to `Started | Running`.
	///
	/// Returns `false` without running anything if the future was already started or finished.
	/// A future canceled before ever starting is moved straight to `Started | Canceled | Finished`.
	pub fn report_started(&self) -> bool {
		let mut inner = self.lock();
		let flags = self.flags();

		if flags & (STARTED | FINISHED) != 0 {
			return false;
		}

		if flags & CANCELED != 0 {
			self.set_flags(&inner, STARTED | FINISHED, RUNNING | PAUSED);
			inner.emit(&FutureEvent::Started);
			Self::finish_locked(&mut inner);
			self.shared.state_changed.notify_all();
			return false;
		}

		self.set_flags(&inner, STARTED | RUNNING, 0);
		inner.emit(&FutureEvent::Started);

		true
	}

	pub fn report_result(&self, value: T) {
		self.report_results([value]);
	}

	/// Appends results. Ignored once the future is canceled or finished.
	pub fn report_results(&self, values: impl IntoIterator<Item = T>) {
		let mut inner = self.lock();
		if self.flags() & (CANCELED | FINISHED) != 0 {
			return;
		}

		let before = inner.results.len();
		inner.results.extend(values);
		let added = inner.results.len() - before;
		if added == 0 {
			return;
		}

		let begin = inner.reported_count;
		let end = begin + added;
		inner.reported_count = end;

		inner.emit(&FutureEvent::ResultsReady { begin, end });
	}

	/// Moves the future to `Finished`. Only the first call has any effect, later calls return `false`.
	pub fn report_finished(&self) -> bool {
		let mut inner = self.lock();
		if self.flags() & FINISHED != 0 {
			return false;
		}

		self.set_flags(&inner, FINISHED, RUNNING | PAUSED);
		Self::finish_locked(&mut inner);
		self.shared.state_changed.notify_all();

		true
	}

	fn finish_locked(inner: &mut Inner<T>) {
		inner.emit(&FutureEvent::Finished);
		// No event ever follows Finished, dropping the senders lets watchers drain and stop
		inner.watchers.clear();
	}

	/// Stores the work function's failure. The first error wins.
	pub fn report_error(&self, error: WorkError) {
		let mut inner = self.lock();
		if inner.error.is_none() {
			inner.error = Some(error);
		}
	}

	#[must_use]
	pub fn error(&self) -> Option<WorkError> {
		self.lock().error.clone()
	}

	/// Requests cancellation. Valid in any state, also after the future finished.
	/// Clears a pending pause so a paused worker wakes up and sees the request.
	pub fn cancel(&self) {
		let mut inner = self.lock();
		let flags = self.flags();
		if flags & CANCELED != 0 {
			return;
		}

		self.set_flags(&inner, CANCELED, PAUSED);
		if flags & FINISHED == 0 {
			inner.emit(&FutureEvent::Canceled);
		}
		self.shared.state_changed.notify_all();
	}

	/// Cancels the future unless it already finished, finishing it on the spot when no worker
	/// ever started it. A future that completed on its own keeps its outcome.
	pub(crate) fn cancel_unfinished(&self) -> CancelOutcome {
		let mut inner = self.lock();
		let flags = self.flags();

		if flags & FINISHED != 0 {
			return CancelOutcome::AlreadyFinished;
		}

		if flags & STARTED == 0 {
			self.set_flags(&inner, STARTED | CANCELED | FINISHED, RUNNING | PAUSED);
			inner.emit(&FutureEvent::Started);
			inner.emit(&FutureEvent::Canceled);
			Self::finish_locked(&mut inner);
			self.shared.state_changed.notify_all();

			return CancelOutcome::FinishedUnstarted;
		}

		if flags & CANCELED == 0 {
			self.set_flags(&inner, CANCELED, PAUSED);
			inner.emit(&FutureEvent::Canceled);
			self.shared.state_changed.notify_all();
		}

		CancelOutcome::Canceled
	}

	/// Sets or clears the pause request. Ignored on canceled or finished futures.
	pub fn set_paused(&self, paused: bool) {
		let mut inner = self.lock();
		let flags = self.flags();
		if flags & (CANCELED | FINISHED) != 0 || (flags & PAUSED != 0) == paused {
			return;
		}

		if paused {
			self.set_flags(&inner, PAUSED, 0);
			inner.emit(&FutureEvent::Paused);
		} else {
			self.set_flags(&inner, 0, PAUSED);
			inner.emit(&FutureEvent::Resumed);
		}
		self.shared.state_changed.notify_all();
	}

	/// Blocks the calling thread while the future is paused.
	/// Returns early when the future gets canceled.
	pub fn wait_for_resume(&self) {
		let inner = self.lock();
		let _inner = self
			.shared
			.state_changed
			.wait_while(inner, |_| self.flags() & PAUSED != 0)
			.unwrap_or_else(PoisonError::into_inner);
	}

	/// The safe-point call for work functions: waits out a pause, then reports whether the
	/// work should stop.
	pub fn handle_pause_and_should_cancel(&self) -> bool {
		if self.is_paused() {
			trace!("Work paused, waiting for resume");
			self.wait_for_resume();
		}

		self.should_cancel()
	}

	/// Blocks the calling thread until the future is finished.
	pub fn wait_for_finished(&self) {
		let inner = self.lock();
		let _inner = self
			.shared
			.state_changed
			.wait_while(inner, |_| self.flags() & FINISHED == 0)
			.unwrap_or_else(PoisonError::into_inner);
	}

	/// Like [`Self::wait_for_finished`] but gives up after `timeout`, returning whether the
	/// future finished.
	pub fn wait_for_finished_timeout(&self, timeout: Duration) -> bool {
		let inner = self.lock();
		let (_inner, res) = self
			.shared
			.state_changed
			.wait_timeout_while(inner, timeout, |_| self.flags() & FINISHED == 0)
			.unwrap_or_else(PoisonError::into_inner);

		!res.timed_out()
	}

	fn update_progress(&self, update: impl FnOnce(&mut Progress) -> Option<FutureEvent>) {
		let mut inner = self.lock();
		if self.flags() & (CANCELED | FINISHED) != 0 {
			return;
		}

		if let Some(event) = update(&mut inner.progress) {
			inner.emit(&event);
		}
	}

	pub fn set_progress_range(&self, min: u64, max: u64) {
		let max = max.max(min);
		self.update_progress(|progress| {
			progress.min = min;
			progress.max = max;
			Some(FutureEvent::ProgressRange { min, max })
		});
	}

	pub fn set_progress_value(&self, value: u64) {
		self.update_progress(|progress| {
			(progress.value != value).then(|| {
				progress.value = value;
				FutureEvent::ProgressValue(value)
			})
		});
	}

	pub fn set_progress_text(&self, text: impl Into<String>) {
		let text = text.into();
		self.update_progress(|progress| {
			progress.text.clone_from(&text);
			Some(FutureEvent::ProgressText(text))
		});
	}

	#[must_use]
	pub fn progress(&self) -> Progress {
		self.lock().progress.clone()
	}

	pub fn report_progress_info(&self, info: &ProgressInfo) {
		self.set_progress_text(info.encode());
	}

	pub fn report_description(&self, description: Description) {
		self.report_progress_info(&ProgressInfo::Description(description));
	}

	pub fn report_info_message(&self, plain: impl Into<String>, rich: impl Into<String>) {
		self.report_progress_info(&ProgressInfo::InfoMessage {
			plain: plain.into(),
			rich: rich.into(),
		});
	}

	pub fn report_warning(&self, plain: impl Into<String>, rich: impl Into<String>) {
		self.report_progress_info(&ProgressInfo::Warning {
			plain: plain.into(),
			rich: rich.into(),
		});
	}

	pub fn set_progress_unit(&self, unit: Unit) {
		self.report_progress_info(&ProgressInfo::SetProgressUnit(unit));
	}

	/// Total number of results ever reported, including already taken ones.
	#[must_use]
	pub fn result_count(&self) -> usize {
		self.lock().reported_count
	}

	/// Drains the results held by the future.
	pub fn take_results(&self) -> Vec<T> {
		mem::take(&mut self.lock().results)
	}

	/// Subscribes to this future's events.
	///
	/// The receiver first gets a replay of the current state, so a subscriber attached after
	/// the work started (or even finished) still observes every transition that matters.
	pub fn subscribe(&self) -> chan::Receiver<FutureEvent> {
		let (tx, rx) = chan::unbounded();
		let mut inner = self.lock();
		let state = self.state();

		let mut replay = Vec::with_capacity(8);
		if state.is_started() {
			replay.push(FutureEvent::Started);
		}
		let progress = &inner.progress;
		if (progress.min, progress.max) != (0, 0) {
			replay.push(FutureEvent::ProgressRange {
				min: progress.min,
				max: progress.max,
			});
		}
		if progress.value != 0 {
			replay.push(FutureEvent::ProgressValue(progress.value));
		}
		if !progress.text.is_empty() {
			replay.push(FutureEvent::ProgressText(progress.text.clone()));
		}
		if inner.reported_count > 0 {
			replay.push(FutureEvent::ResultsReady {
				begin: 0,
				end: inner.reported_count,
			});
		}
		if state.is_paused() {
			replay.push(FutureEvent::Paused);
		}
		if state.is_canceled() {
			replay.push(FutureEvent::Canceled);
		}
		if state.is_finished() {
			replay.push(FutureEvent::Finished);
		}

		for event in replay {
			// Unbounded with a live receiver, can't fail
			let _ = tx.try_send(event);
		}

		if !state.is_finished() {
			inner.watchers.push(tx);
		}

		rx
	}
}

impl<T: Clone> JobFuture<T> {
	/// Clones the results currently held by the future.
	#[must_use]
	pub fn results(&self) -> Vec<T> {
		self.lock().results.clone()
	}
}
