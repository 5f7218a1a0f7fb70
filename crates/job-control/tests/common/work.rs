use std::{convert::Infallible, thread, time::Duration};

use sd_job_control::JobFuture;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SampleError {
	#[error("sample error")]
	SampleError,
}

/// Reports `count` results, one every `interval`, stopping early on cancel.
pub fn incremental(
	interval: Duration,
	count: u32,
) -> impl FnOnce(JobFuture<u32>) -> Result<(), Infallible> + Send + 'static {
	move |future| {
		future.set_progress_range(0, u64::from(count));

		for i in 0..count {
			thread::sleep(interval);
			if future.handle_pause_and_should_cancel() {
				break;
			}
			future.report_result(i);
			future.set_progress_value(u64::from(i + 1));
		}

		Ok(())
	}
}

/// Bumps its progress value every few milliseconds until canceled, honoring pauses.
pub fn never_ending(future: JobFuture<u32>) -> Result<(), Infallible> {
	let mut counter = 0;

	while !future.handle_pause_and_should_cancel() {
		counter += 1;
		future.set_progress_value(counter);
		thread::sleep(Duration::from_millis(5));
	}

	Ok(())
}

pub fn failing(future: JobFuture<u32>) -> Result<(), SampleError> {
	future.report_result(1);
	Err(SampleError::SampleError)
}

pub fn panicking(_future: JobFuture<u32>) -> Result<(), Infallible> {
	panic!("work function blew up");
}

/// Reports progress and a result as fast as it can until canceled.
pub fn spinning(future: JobFuture<u32>) -> Result<(), Infallible> {
	let mut i = 0;

	while !future.should_cancel() {
		future.set_progress_value(u64::from(i));
		future.report_result(i);
		i = i.wrapping_add(1);
	}

	Ok(())
}

/// Reports one result and returns right away.
pub fn instant(future: JobFuture<u32>) -> Result<(), Infallible> {
	future.set_progress_range(0, 1);
	future.report_result(7);
	future.set_progress_value(1);

	Ok(())
}

fn wait_for_cancel(future: &JobFuture<u32>) {
	while !future.should_cancel() {
		thread::sleep(Duration::from_millis(5));
	}
}

/// Fails, but only after being asked to stop.
pub fn failing_once_canceled(future: JobFuture<u32>) -> Result<(), SampleError> {
	wait_for_cancel(&future);
	Err(SampleError::SampleError)
}

/// Panics, but only after being asked to stop.
pub fn panicking_once_canceled(future: JobFuture<u32>) -> Result<(), Infallible> {
	wait_for_cancel(&future);
	panic!("work function blew up while stopping");
}
