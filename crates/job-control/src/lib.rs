//!
//! # Job Control
//!
//! Bridges blocking work functions running on worker threads with job controllers that
//! observers can track, suspend and kill.
//!
//! A work function receives a [`JobFuture`], reports results and progress into it and polls it
//! for cancellation and pause requests. A [`JobController`] watches that future and turns its
//! events into [`JobNotification`]s: descriptions, info messages, warnings, amounts, percent and
//! speed, and finally exactly one `Finished` (followed by `Result`, unless killed quietly).
//!
//! ## Basic example
//!
//! ```
//! use sd_job_control::{Job, JobFuture, JobSystem, JobSystemConfig, Unit};
//! use std::convert::Infallible;
//!
//! #[tokio::main]
//! async fn main() {
//!     let system = JobSystem::new(JobSystemConfig::default()).unwrap();
//!
//!     let job = system
//!         .job("count_to_three")
//!         .with_progress_unit(Unit::Items)
//!         .with_auto_delete(false)
//!         .build(|future: JobFuture<u32>| {
//!             future.set_progress_range(0, 3);
//!             for i in 1..=3 {
//!                 if future.handle_pause_and_should_cancel() {
//!                     break;
//!                 }
//!                 future.report_result(i);
//!                 future.set_progress_value(u64::from(i));
//!             }
//!             Ok::<_, Infallible>(())
//!         });
//!
//!     assert!(job.exec().await);
//!     assert_eq!(job.take_results(), vec![1, 2, 3]);
//!     assert_eq!(job.percent(), 100);
//! }
//! ```

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

use std::sync::{Mutex, MutexGuard, PoisonError};

mod config;
mod error;
mod future;
mod id;
mod job;
mod progress_info;
mod runner;
mod system;
mod unit;

pub use config::JobSystemConfig;
pub use error::{ErrorCode, SystemError, WorkError};
pub use future::{FutureEvent, FutureState, JobFuture, Progress};
pub use id::{IdAllocator, JobId};
pub use job::{
	AnyJobOutput, Capabilities, Job, JobController, JobNotification, JobOutput, KillVerbosity,
};
pub use progress_info::{Description, ProgressInfo, ProgressInfoKind};
pub use runner::AsyncRunner;
pub use system::{init, init_logging, JobBuilder, JobSystem};
pub use unit::{UnknownUnitError, Unit};

/// Raw access to the progress-info codec, for producers that build messages by hand.
pub mod codec {
	pub use super::progress_info::{decode, encode};
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
	mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
