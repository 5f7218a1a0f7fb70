use std::{fmt, ops::BitOr};

use async_trait::async_trait;
use downcast_rs::{impl_downcast, Downcast};

use super::{error::ErrorCode, id::JobId, progress_info::Description, unit::Unit};

mod base;
mod controller;
mod speed;
mod watcher;

pub use controller::JobController;

pub(crate) use controller::ControllerParams;

/// What a job allows its owner to do with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Capabilities(u8);

impl Capabilities {
	pub const NONE: Self = Self(0);
	pub const KILLABLE: Self = Self(1 << 0);
	pub const SUSPENDABLE: Self = Self(1 << 1);

	#[must_use]
	pub const fn contains(self, other: Self) -> bool {
		self.0 & other.0 == other.0
	}
}

impl BitOr for Capabilities {
	type Output = Self;

	fn bitor(self, rhs: Self) -> Self::Output {
		Self(self.0 | rhs.0)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KillVerbosity {
	/// Only `Finished` is delivered.
	Quietly,
	/// `Finished` then `Result` are delivered.
	EmitResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobNotification {
	Description(Description),
	InfoMessage { plain: String, rich: String },
	Warning { plain: String, rich: String },
	TotalAmount { unit: Unit, amount: u64 },
	ProcessedAmount { unit: Unit, amount: u64 },
	TotalSize(u64),
	ProcessedSize(u64),
	Percent(u64),
	Speed(u64),
	Suspended,
	Resumed,
	ResultsReady { begin: usize, end: usize },
	Finished,
	Result,
}

/// Type-erased job outputs, recovered with [`JobOutput::into_results`].
pub trait AnyJobOutput: Downcast + Send + 'static {}

impl_downcast!(AnyJobOutput);

impl<T: Send + 'static> AnyJobOutput for Vec<T> {}

impl fmt::Debug for dyn AnyJobOutput {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<job output>")
	}
}

#[derive(Debug)]
pub enum JobOutput {
	Out(Box<dyn AnyJobOutput>),
	Empty,
}

impl JobOutput {
	/// Recovers the typed results. Returns `None` when `T` isn't the job's result type.
	#[must_use]
	pub fn into_results<T: Send + 'static>(self) -> Option<Vec<T>> {
		match self {
			Self::Out(out) => out.downcast::<Vec<T>>().ok().map(|results| *results),
			Self::Empty => Some(Vec::new()),
		}
	}
}

/// Type-erased job controller, the interface observers and trackers work with.
#[async_trait]
pub trait Job: Downcast + Send + Sync + 'static {
	fn id(&self) -> &JobId;

	/// Submits the work. Controllers adopting a running future ignore this.
	fn start(&self);

	/// Cancels the work, waits for the worker to stop, then finishes the job.
	///
	/// Work that already completed when the request arrives is finished as completed, with
	/// its own outcome and a `Result`. Returns `true` once the job is finished and its
	/// `Finished` notification delivered.
	///
	/// # Panics
	/// Panics if the job isn't [`Capabilities::KILLABLE`].
	async fn kill(&self, verbosity: KillVerbosity) -> bool;

	/// # Panics
	/// Panics if the job isn't [`Capabilities::SUSPENDABLE`].
	fn suspend(&self) -> bool;

	/// # Panics
	/// Panics if the job isn't [`Capabilities::SUSPENDABLE`].
	fn resume(&self) -> bool;

	/// Starts the job and waits for it to finish, returning whether it finished without error.
	async fn exec(&self) -> bool;

	fn error(&self) -> ErrorCode;

	fn error_text(&self) -> String;

	fn capabilities(&self) -> Capabilities;

	fn is_auto_delete(&self) -> bool;

	fn set_auto_delete(&self, auto_delete: bool);

	fn is_finished(&self) -> bool;

	fn is_suspended(&self) -> bool;

	fn progress_unit(&self) -> Unit;

	fn total_amount(&self, unit: Unit) -> u64;

	fn processed_amount(&self, unit: Unit) -> u64;

	fn total_size(&self) -> u64;

	fn processed_size(&self) -> u64;

	fn percent(&self) -> u64;

	fn speed(&self) -> u64;

	/// Drains the results reported so far.
	fn take_output(&self) -> JobOutput;
}

impl_downcast!(Job);
