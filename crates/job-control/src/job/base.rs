use std::{
	collections::HashMap,
	mem,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc, Mutex,
	},
};

use async_channel as chan;
use tracing::{trace, warn};

use crate::{error::ErrorCode, id::JobId, lock, unit::Unit};

use super::{Capabilities, Job, JobNotification};

pub(super) type Observer = dyn Fn(&dyn Job, &JobNotification) + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Lifecycle {
	#[default]
	Idle,
	Running,
	Suspended,
	Finished,
}

pub(super) enum KillGate {
	Proceed,
	AlreadyFinished,
	InProgress,
}

#[derive(Default)]
struct State {
	lifecycle: Lifecycle,
	killing: bool,
	completing: bool,
	error: ErrorCode,
	error_text: String,
	progress_unit: Unit,
	total_amounts: HashMap<Unit, u64>,
	processed_amounts: HashMap<Unit, u64>,
	total_size: u64,
	processed_size: u64,
	percent: u64,
	speed: u64,
	observers: Vec<Arc<Observer>>,
	subscribers: Vec<chan::Sender<JobNotification>>,
	subscribers_closed: bool,
	released: bool,
}

impl State {
	fn set_total_size(&mut self, size: u64, pending: &mut Vec<JobNotification>) {
		if self.total_size != size {
			self.total_size = size;
			pending.push(JobNotification::TotalSize(size));
		}
		self.refresh_percent(pending);
	}

	fn set_processed_size(&mut self, size: u64, pending: &mut Vec<JobNotification>) {
		if self.processed_size != size {
			self.processed_size = size;
			pending.push(JobNotification::ProcessedSize(size));
		}
		self.refresh_percent(pending);
	}

	fn refresh_percent(&mut self, pending: &mut Vec<JobNotification>) {
		let percent = if self.total_size == 0 {
			0
		} else {
			u64::try_from(
				(u128::from(self.processed_size) * 100 / u128::from(self.total_size)).min(100),
			)
			.unwrap_or(100)
		};

		if self.percent != percent {
			self.percent = percent;
			pending.push(JobNotification::Percent(percent));
		}
	}
}

/// Type-independent half of a job controller: lifecycle, amounts, error slot and
/// notification delivery.
pub(super) struct JobBase {
	id: JobId,
	capabilities: Capabilities,
	auto_delete: AtomicBool,
	state: Mutex<State>,
	/// Held while notifications are handed out, so they reach everyone in one order and
	/// nothing follows `Finished` but `Result`.
	delivery: Mutex<()>,
}

impl JobBase {
	pub(super) fn new(
		id: JobId,
		capabilities: Capabilities,
		auto_delete: bool,
		progress_unit: Unit,
	) -> Self {
		Self {
			id,
			capabilities,
			auto_delete: AtomicBool::new(auto_delete),
			state: Mutex::new(State {
				progress_unit,
				..Default::default()
			}),
			delivery: Mutex::new(()),
		}
	}

	pub(super) const fn id(&self) -> &JobId {
		&self.id
	}

	pub(super) const fn capabilities(&self) -> Capabilities {
		self.capabilities
	}

	pub(super) fn is_auto_delete(&self) -> bool {
		self.auto_delete.load(Ordering::Acquire)
	}

	pub(super) fn set_auto_delete(&self, auto_delete: bool) {
		self.auto_delete.store(auto_delete, Ordering::Release);
	}

	pub(super) fn error(&self) -> ErrorCode {
		lock(&self.state).error
	}

	pub(super) fn error_text(&self) -> String {
		lock(&self.state).error_text.clone()
	}

	pub(super) fn set_error(&self, error: ErrorCode, text: impl Into<String>) {
		let mut state = lock(&self.state);
		state.error = error;
		state.error_text = text.into();
	}

	pub(super) fn progress_unit(&self) -> Unit {
		lock(&self.state).progress_unit
	}

	pub(super) fn total_amount(&self, unit: Unit) -> u64 {
		lock(&self.state)
			.total_amounts
			.get(&unit)
			.copied()
			.unwrap_or(0)
	}

	pub(super) fn processed_amount(&self, unit: Unit) -> u64 {
		lock(&self.state)
			.processed_amounts
			.get(&unit)
			.copied()
			.unwrap_or(0)
	}

	pub(super) fn total_size(&self) -> u64 {
		lock(&self.state).total_size
	}

	pub(super) fn processed_size(&self) -> u64 {
		lock(&self.state).processed_size
	}

	pub(super) fn percent(&self) -> u64 {
		lock(&self.state).percent
	}

	pub(super) fn speed(&self) -> u64 {
		lock(&self.state).speed
	}

	pub(super) fn is_finished(&self) -> bool {
		lock(&self.state).lifecycle == Lifecycle::Finished
	}

	pub(super) fn is_suspended(&self) -> bool {
		lock(&self.state).lifecycle == Lifecycle::Suspended
	}

	pub(super) fn is_released(&self) -> bool {
		lock(&self.state).released
	}

	pub(super) fn add_observer(&self, observer: Arc<Observer>) {
		let mut state = lock(&self.state);
		if state.released {
			warn!(job_id = %self.id, "Ignoring observer added to a released job;");
			return;
		}
		state.observers.push(observer);
	}

	pub(super) fn subscribe(&self) -> chan::Receiver<JobNotification> {
		let (tx, rx) = chan::unbounded();

		let mut state = lock(&self.state);
		if !state.subscribers_closed {
			state.subscribers.push(tx);
		}

		rx
	}

	/// Delivers `notification` unless the job already finished.
	pub(super) fn notify(&self, job: &dyn Job, notification: JobNotification) {
		let _delivery = lock(&self.delivery);

		if lock(&self.state).lifecycle == Lifecycle::Finished {
			trace!(job_id = %self.id, ?notification, "Dropping notification, job already finished;");
			return;
		}

		self.deliver(job, &notification);
	}

	/// Callers must hold the delivery lock.
	fn deliver(&self, job: &dyn Job, notification: &JobNotification) {
		let observers = {
			let mut state = lock(&self.state);
			state
				.subscribers
				.retain(|tx| tx.try_send(notification.clone()).is_ok());
			state.observers.clone()
		};

		for observer in &observers {
			observer(job, notification);
		}
	}

	fn update(&self, job: &dyn Job, f: impl FnOnce(&mut State, &mut Vec<JobNotification>)) {
		let _delivery = lock(&self.delivery);

		let mut pending = Vec::with_capacity(4);
		{
			let mut state = lock(&self.state);
			if state.lifecycle == Lifecycle::Finished {
				return;
			}
			f(&mut state, &mut pending);
		}

		for notification in &pending {
			self.deliver(job, notification);
		}
	}

	/// Sets the total amount for `unit` and mirrors it into the canonical size.
	pub(super) fn set_total_amount_and_size(&self, job: &dyn Job, unit: Unit, amount: u64) {
		self.update(job, |state, pending| {
			state.total_amounts.insert(unit, amount);
			pending.push(JobNotification::TotalAmount { unit, amount });
			state.set_total_size(amount, pending);
		});
	}

	/// Sets the processed amount for `unit` and mirrors it into the canonical size.
	pub(super) fn set_processed_amount_and_size(&self, job: &dyn Job, unit: Unit, amount: u64) {
		self.update(job, |state, pending| {
			state.processed_amounts.insert(unit, amount);
			pending.push(JobNotification::ProcessedAmount { unit, amount });
			state.set_processed_size(amount, pending);
		});
	}

	/// Switches the unit progress is measured in, the canonical size follows that unit's amounts.
	pub(super) fn set_progress_unit(&self, job: &dyn Job, unit: Unit) {
		self.update(job, |state, pending| {
			state.progress_unit = unit;
			let total = state.total_amounts.get(&unit).copied().unwrap_or(0);
			let processed = state.processed_amounts.get(&unit).copied().unwrap_or(0);
			state.set_total_size(total, pending);
			state.set_processed_size(processed, pending);
		});
	}

	pub(super) fn set_speed(&self, job: &dyn Job, speed: u64) {
		self.update(job, |state, pending| {
			state.speed = speed;
			pending.push(JobNotification::Speed(speed));
		});
	}

	pub(super) fn begin_start(&self) -> bool {
		let mut state = lock(&self.state);
		if state.lifecycle != Lifecycle::Idle {
			warn!(
				job_id = %self.id,
				lifecycle = ?state.lifecycle,
				"Job was already started, ignoring start request;"
			);
			return false;
		}

		state.lifecycle = Lifecycle::Running;
		true
	}

	pub(super) fn begin_suspend(&self) -> bool {
		let mut state = lock(&self.state);
		if state.lifecycle != Lifecycle::Running || state.killing {
			return false;
		}

		state.lifecycle = Lifecycle::Suspended;
		true
	}

	pub(super) fn begin_resume(&self) -> bool {
		let mut state = lock(&self.state);
		if state.lifecycle != Lifecycle::Suspended {
			return false;
		}

		state.lifecycle = Lifecycle::Running;
		true
	}

	pub(super) fn begin_kill(&self) -> KillGate {
		let mut state = lock(&self.state);
		if state.lifecycle == Lifecycle::Finished || state.completing {
			KillGate::AlreadyFinished
		} else if state.killing {
			KillGate::InProgress
		} else {
			state.killing = true;
			KillGate::Proceed
		}
	}

	pub(super) fn abort_kill(&self) {
		lock(&self.state).killing = false;
	}

	/// Claims the right to finish the job from the worker's side. Fails while a kill is in
	/// flight, as the kill finishes the job itself.
	pub(super) fn begin_completion(&self) -> bool {
		let mut state = lock(&self.state);
		if state.lifecycle == Lifecycle::Finished || state.killing || state.completing {
			return false;
		}

		state.completing = true;
		true
	}

	/// Delivers `Finished`, then `Result` when asked to. Returns `false` if the job was
	/// already finished, in which case nothing is delivered.
	pub(super) fn finish(&self, job: &dyn Job, emit_result: bool) -> bool {
		let _delivery = lock(&self.delivery);

		{
			let mut state = lock(&self.state);
			if state.lifecycle == Lifecycle::Finished {
				trace!(job_id = %self.id, "Job already finished;");
				return false;
			}
			state.lifecycle = Lifecycle::Finished;
			state.killing = false;
			state.completing = false;
		}

		self.deliver(job, &JobNotification::Finished);
		if emit_result {
			self.deliver(job, &JobNotification::Result);
		}

		true
	}

	/// Closes every subscriber channel, no notification follows.
	pub(super) fn close_subscribers(&self) {
		let mut state = lock(&self.state);
		state.subscribers_closed = true;
		state.subscribers.clear();
	}

	pub(super) fn release(&self) {
		let observers = {
			let mut state = lock(&self.state);
			state.released = true;
			mem::take(&mut state.observers)
		};

		// Observers may own handles to this very job, drop them outside the lock
		drop(observers);

		self.close_subscribers();
	}
}
