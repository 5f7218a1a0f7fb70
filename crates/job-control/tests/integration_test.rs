use sd_job_control::{
	Capabilities, Description, ErrorCode, Job, JobController, JobFuture, JobNotification,
	JobSystem, JobSystemConfig, KillVerbosity, Unit, WorkError,
};

use std::{
	convert::Infallible,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc, Mutex,
	},
	thread,
	time::Duration,
};

use futures_concurrency::future::Join;
use tokio::time::{sleep, timeout};
use tracing_test::traced_test;

mod common;

use common::work::{
	failing, failing_once_canceled, incremental, instant, never_ending, panicking,
	panicking_once_canceled, spinning,
};

fn system() -> JobSystem {
	JobSystem::new(JobSystemConfig::default()).expect("failed to create job system")
}

#[derive(Debug, Default, Clone)]
struct Counters {
	finished: Arc<AtomicUsize>,
	results: Arc<AtomicUsize>,
}

impl Counters {
	fn watch<T: Send + 'static>(job: &JobController<T>) -> Self {
		let counters = Self::default();

		job.on_finished({
			let finished = Arc::clone(&counters.finished);
			move |_| {
				finished.fetch_add(1, Ordering::SeqCst);
			}
		});
		job.on_result({
			let results = Arc::clone(&counters.results);
			move |_| {
				results.fetch_add(1, Ordering::SeqCst);
			}
		});

		counters
	}

	fn finished(&self) -> usize {
		self.finished.load(Ordering::SeqCst)
	}

	fn results(&self) -> usize {
		self.results.load(Ordering::SeqCst)
	}
}

async fn wait_finished<T: Send + 'static>(job: &JobController<T>) {
	timeout(Duration::from_secs(10), job.wait_finished())
		.await
		.expect("job didn't finish in time");
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn incremental_results_while_running() {
	let system = system();

	let job = system
		.job("incremental")
		.with_auto_delete(false)
		.build(incremental(Duration::from_millis(100), 10));
	let counters = Counters::watch(&job);
	let future = job.future().expect("job has a future before finishing");

	job.start();
	sleep(Duration::from_millis(550)).await;

	assert_eq!(future.result_count(), 5);
	assert!(future.is_running());
	assert!(!job.is_finished());

	wait_finished(&job).await;

	assert_eq!(job.error(), ErrorCode::NoError);
	assert_eq!(job.take_results(), (0..10).collect::<Vec<_>>());
	assert_eq!(counters.finished(), 1);
	assert_eq!(counters.results(), 1);
	assert_eq!(job.percent(), 100);
}

#[tokio::test]
#[traced_test]
async fn kill_before_start_finishes_once() {
	let system = system();

	let job = system
		.job("never_started")
		.with_auto_delete(false)
		.build(never_ending);
	let counters = Counters::watch(&job);
	let future = job.future().expect("job has a future before finishing");

	assert!(job.kill(KillVerbosity::Quietly).await);

	assert_eq!(job.error(), ErrorCode::Killed);
	assert_eq!(job.error_text(), "Job killed");
	assert_eq!(counters.finished(), 1);
	assert_eq!(counters.results(), 0);
	assert!(future.is_canceled() && future.is_finished());

	// Starting a killed job does nothing
	job.start();
	sleep(Duration::from_millis(50)).await;
	assert_eq!(counters.finished(), 1);
	assert!(!future.is_running());
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn kill_running_job_emits_result() {
	let system = system();

	let job = system
		.job("slow")
		.with_auto_delete(false)
		.build(incremental(Duration::from_secs(1), 5));
	let counters = Counters::watch(&job);
	let future = job.future().expect("job has a future before finishing");

	job.start();
	sleep(Duration::from_millis(1200)).await;

	assert!(job.kill(KillVerbosity::EmitResult).await);

	assert_eq!(job.error(), ErrorCode::Killed);
	assert_eq!(counters.finished(), 1);
	assert_eq!(counters.results(), 1);
	assert!(future.is_canceled());
	assert!(future.is_finished());
	assert_eq!(job.take_results(), vec![0]);
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn quiet_kill_skips_result() {
	let system = system();

	let job = system
		.job("quiet")
		.with_auto_delete(false)
		.build(never_ending);
	let counters = Counters::watch(&job);

	job.start();
	sleep(Duration::from_millis(50)).await;

	assert!(job.kill(KillVerbosity::Quietly).await);
	sleep(Duration::from_millis(100)).await;

	assert_eq!(job.error(), ErrorCode::Killed);
	assert_eq!(counters.finished(), 1);
	assert_eq!(counters.results(), 0);
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn second_kill_while_waiting_is_noop() {
	let system = system();

	let job = system
		.job("double_kill")
		.with_auto_delete(false)
		.build(incremental(Duration::from_millis(200), 50));
	let counters = Counters::watch(&job);

	job.start();
	sleep(Duration::from_millis(50)).await;

	let (first, second) = (
		job.kill(KillVerbosity::EmitResult),
		job.kill(KillVerbosity::EmitResult),
	)
		.join()
		.await;

	// Exactly one of them did the killing
	assert!(first ^ second);
	assert_eq!(job.error(), ErrorCode::Killed);
	assert_eq!(counters.finished(), 1);

	// Killing a finished job is fine and changes nothing
	assert!(job.kill(KillVerbosity::EmitResult).await);
	assert_eq!(counters.finished(), 1);
	assert_eq!(counters.results(), 1);
}

#[tokio::test]
#[should_panic(expected = "isn't killable")]
async fn kill_unkillable_job_panics() {
	let system = system();

	let job = system
		.job("unkillable")
		.with_capabilities(Capabilities::NONE)
		.build(never_ending);

	job.kill(KillVerbosity::Quietly).await;
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn failing_work_is_user_defined() {
	let system = system();

	let job = system
		.job("failing")
		.with_auto_delete(false)
		.build(failing);
	let counters = Counters::watch(&job);

	assert!(!job.exec().await);

	assert_eq!(job.error(), ErrorCode::UserDefined);
	assert!(job.error_text().contains("sample error"));
	assert_eq!(job.take_results(), vec![1]);
	assert_eq!(counters.finished(), 1);
	assert_eq!(counters.results(), 1);
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn panicking_work_is_user_defined() {
	let system = system();

	let job = system
		.job("panicking")
		.with_auto_delete(false)
		.build(panicking);

	assert!(!job.exec().await);

	assert_eq!(job.error(), ErrorCode::UserDefined);
	assert!(job.error_text().contains("work function blew up"));
	assert!(job.future().is_some_and(|future| future.is_finished()));
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn suspend_and_resume() {
	let system = system();

	let job = system
		.job("suspendable")
		.with_capabilities(Capabilities::KILLABLE | Capabilities::SUSPENDABLE)
		.with_auto_delete(false)
		.build(never_ending);
	let future = job.future().expect("job has a future before finishing");

	job.start();
	sleep(Duration::from_millis(100)).await;

	assert!(job.suspend());
	assert!(!job.suspend());
	assert!(job.is_suspended());
	assert!(future.is_paused());

	// Give the worker time to reach its safe point
	sleep(Duration::from_millis(50)).await;
	let paused_at = future.progress().value;
	sleep(Duration::from_millis(100)).await;
	assert_eq!(future.progress().value, paused_at);

	assert!(job.resume());
	assert!(!job.resume());
	sleep(Duration::from_millis(100)).await;
	assert!(future.progress().value > paused_at);

	assert!(job.kill(KillVerbosity::Quietly).await);
	assert!(future.is_finished());
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn kill_while_suspended() {
	let system = system();

	let job = system
		.job("suspended_kill")
		.with_capabilities(Capabilities::KILLABLE | Capabilities::SUSPENDABLE)
		.with_auto_delete(false)
		.build(never_ending);

	job.start();
	sleep(Duration::from_millis(50)).await;
	assert!(job.suspend());

	assert!(
		timeout(Duration::from_secs(5), job.kill(KillVerbosity::EmitResult))
			.await
			.expect("kill of a suspended job hung")
	);
	assert_eq!(job.error(), ErrorCode::Killed);
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn progress_info_reaches_observers() {
	let system = system();

	let job = system
		.job("chatty")
		.with_auto_delete(false)
		.build(|future: JobFuture<()>| {
			future.set_progress_unit(Unit::Files);
			future.report_description(
				Description::new("Scanning")
					.with_field1("Root", "/music")
					.with_field2("Current file", ""),
			);
			future.set_progress_range(0, 4);
			future.report_info_message("File: /music/a.flac", "");
			future.report_warning("Can't read /music/b^c", "");
			future.set_progress_value(2);
			future.set_progress_text("not a structured message");
			Ok::<_, Infallible>(())
		});

	let descriptions = Arc::new(Mutex::new(vec![]));
	job.on_description({
		let descriptions = Arc::clone(&descriptions);
		move |_, description| {
			descriptions
				.lock()
				.expect("lock poisoned")
				.push(description.clone());
		}
	});

	let notifications = job.subscribe();

	assert!(job.exec().await);

	let mut received = vec![];
	while let Ok(notification) = notifications.recv().await {
		received.push(notification);
	}

	assert_eq!(
		*descriptions.lock().expect("lock poisoned"),
		vec![Description::new("Scanning")
			.with_field1("Root", "/music")
			.with_field2("Current file", "")]
	);
	assert!(received.contains(&JobNotification::InfoMessage {
		plain: "File: /music/a.flac".to_string(),
		rich: String::new(),
	}));
	assert!(received.contains(&JobNotification::Warning {
		plain: "Can't read /music/b^c".to_string(),
		rich: String::new(),
	}));
	assert!(received.contains(&JobNotification::Percent(50)));
	assert_eq!(received.last(), Some(&JobNotification::Result));
	assert_eq!(
		received
			.iter()
			.filter(|n| **n == JobNotification::Finished)
			.count(),
		1
	);

	assert_eq!(job.progress_unit(), Unit::Files);
	assert_eq!(job.total_amount(Unit::Files), 4);
	assert_eq!(job.processed_amount(Unit::Files), 2);
	assert_eq!(job.total_size(), 4);
	assert_eq!(job.processed_size(), 2);
	assert_eq!(job.percent(), 50);
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn speed_is_estimated() {
	let system = JobSystem::new(JobSystemConfig {
		speed_interval_ms: 50,
		..Default::default()
	})
	.expect("failed to create job system");

	let job = system
		.job("fast")
		.with_auto_delete(false)
		.build(|future: JobFuture<()>| {
			future.set_progress_range(0, 30_000);
			for i in 1..=30 {
				thread::sleep(Duration::from_millis(10));
				future.set_progress_value(i * 1000);
			}
			Ok::<_, Infallible>(())
		});

	let speeds = Arc::new(Mutex::new(vec![]));
	job.on_speed({
		let speeds = Arc::clone(&speeds);
		move |_, speed| speeds.lock().expect("lock poisoned").push(speed)
	});

	assert!(job.exec().await);

	assert!(speeds
		.lock()
		.expect("lock poisoned")
		.iter()
		.any(|speed| *speed > 0));
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn adopted_future_reports_through_controller() {
	let system = system();

	let future = system
		.runner()
		.run(incremental(Duration::from_millis(10), 5));
	let job = system
		.job("adopted")
		.with_auto_delete(false)
		.adopt(future.clone());

	// Already running, start is a no-op
	job.start();
	wait_finished(&job).await;

	assert_eq!(job.error(), ErrorCode::NoError);
	assert_eq!(job.take_results(), vec![0, 1, 2, 3, 4]);
	assert_eq!(job.total_size(), 5);
	assert_eq!(job.processed_size(), 5);
	assert!(future.is_finished());
}

#[tokio::test]
#[traced_test]
async fn adopting_finished_future_replays() {
	let system = system();

	let done = JobFuture::new();
	done.report_started();
	done.report_result("only");
	done.report_finished();

	let job = system.job("done").with_auto_delete(false).adopt(done);
	wait_finished(&job).await;

	assert_eq!(job.error(), ErrorCode::NoError);
	assert_eq!(job.take_results(), vec!["only"]);

	let canceled = JobFuture::<()>::new();
	canceled.cancel();
	assert!(!canceled.report_started());

	let job = system.job("canceled").with_auto_delete(false).adopt(canceled);
	wait_finished(&job).await;

	assert_eq!(job.error(), ErrorCode::Killed);
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn autodelete_releases_after_result() {
	let system = system();

	let job = system
		.job("fire_and_forget")
		.with_auto_delete(true)
		.build(incremental(Duration::from_millis(5), 3));
	assert!(job.is_auto_delete());

	let collected = Arc::new(Mutex::new(None));
	job.on_result({
		let collected = Arc::clone(&collected);
		move |job| {
			*collected.lock().expect("lock poisoned") = job.take_output().into_results::<u32>();
		}
	});

	assert!(job.exec().await);

	assert_eq!(
		*collected.lock().expect("lock poisoned"),
		Some(vec![0, 1, 2])
	);
	assert!(job.is_released());
	assert!(job.future().is_none());
	assert!(job.take_output().into_results::<u32>().is_some_and(|r| r.is_empty()));
	assert_eq!(job.error(), ErrorCode::NoError);
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn output_downcast_needs_the_right_type() {
	let system = system();

	let job = system
		.job("typed")
		.with_auto_delete(false)
		.build(incremental(Duration::from_millis(1), 2));
	assert!(job.exec().await);

	let erased: &dyn Job = &job;
	assert!(erased.downcast_ref::<JobController<u32>>().is_some());
	assert!(erased.take_output().into_results::<String>().is_none());
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn many_jobs_run_concurrently() {
	let system = JobSystem::new(JobSystemConfig {
		max_workers: 2,
		..Default::default()
	})
	.expect("failed to create job system");

	let jobs = (0..6)
		.map(|_| {
			system
				.job("batch")
				.with_auto_delete(false)
				.build(incremental(Duration::from_millis(20), 3))
		})
		.collect::<Vec<_>>();

	let names = jobs
		.iter()
		.map(|job| job.id().to_string())
		.collect::<Vec<_>>();
	assert_eq!(names[0], "batch_0");
	assert_eq!(names[5], "batch_5");

	let outcomes = jobs.iter().map(|job| job.exec()).collect::<Vec<_>>().join().await;
	assert!(outcomes.into_iter().all(|ok| ok));

	for job in &jobs {
		assert_eq!(job.take_results(), vec![0, 1, 2]);
	}
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn kill_queued_job_never_runs_it() {
	let system = JobSystem::new(JobSystemConfig {
		max_workers: 1,
		..Default::default()
	})
	.expect("failed to create job system");

	let blocker = system
		.job("blocker")
		.with_auto_delete(false)
		.build(never_ending);
	let queued = system
		.job("queued")
		.with_auto_delete(false)
		.build(|future: JobFuture<u32>| {
			future.report_result(42);
			Ok::<_, Infallible>(())
		});
	let queued_future = queued.future().expect("job has a future before finishing");

	blocker.start();
	queued.start();
	sleep(Duration::from_millis(50)).await;
	assert!(!queued_future.is_started());

	assert!(queued.kill(KillVerbosity::EmitResult).await);
	assert!(blocker.kill(KillVerbosity::Quietly).await);
	sleep(Duration::from_millis(50)).await;

	assert_eq!(queued.error(), ErrorCode::Killed);
	assert_eq!(queued_future.result_count(), 0);
}

fn record<T: Send + 'static>(job: &JobController<T>) -> Arc<Mutex<Vec<JobNotification>>> {
	let notifications = Arc::new(Mutex::new(Vec::new()));

	job.on_notification({
		let notifications = Arc::clone(&notifications);
		move |_, notification| {
			notifications
				.lock()
				.expect("lock poisoned")
				.push(notification.clone());
		}
	});

	notifications
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn nothing_but_result_follows_finished() {
	let system = system();

	for _ in 0..50 {
		let job = system
			.job("spinning")
			.with_auto_delete(false)
			.build(spinning);
		let notifications = record(&job);

		job.start();
		sleep(Duration::from_millis(2)).await;
		assert!(job.kill(KillVerbosity::EmitResult).await);

		// Late progress from the watcher would land by now
		sleep(Duration::from_millis(10)).await;

		let notifications = notifications.lock().expect("lock poisoned");
		let finished_at = notifications
			.iter()
			.position(|notification| *notification == JobNotification::Finished)
			.expect("job finished");
		assert_eq!(
			&notifications[finished_at + 1..],
			[JobNotification::Result]
		);
	}
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn killed_work_failing_on_its_way_out_is_killed() {
	let system = system();

	let failing = system
		.job("failing_on_cancel")
		.with_auto_delete(false)
		.build(failing_once_canceled);
	let panicking = system
		.job("panicking_on_cancel")
		.with_auto_delete(false)
		.build(panicking_once_canceled);

	for job in [&failing, &panicking] {
		let counters = Counters::watch(job);
		let future = job.future().expect("job has a future before finishing");

		job.start();
		sleep(Duration::from_millis(30)).await;
		assert!(job.kill(KillVerbosity::EmitResult).await);

		assert_eq!(job.error(), ErrorCode::Killed);
		assert_eq!(job.error_text(), "Job killed");
		assert_eq!(counters.finished(), 1);
		assert_eq!(counters.results(), 1);
		assert!(future.is_canceled() && future.error().is_some());
	}
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn adopted_future_canceled_from_outside_is_killed() {
	let system = system();

	let failing = system.runner().run(failing_once_canceled);
	let job = system
		.job("adopted_failing")
		.with_auto_delete(false)
		.adopt(failing.clone());

	sleep(Duration::from_millis(30)).await;
	failing.cancel();
	wait_finished(&job).await;

	assert_eq!(job.error(), ErrorCode::Killed);
	assert!(matches!(failing.error(), Some(WorkError::Failed(_))));

	let panicking = system.runner().run(panicking_once_canceled);
	let job = system
		.job("adopted_panicking")
		.with_auto_delete(false)
		.adopt(panicking.clone());

	sleep(Duration::from_millis(30)).await;
	panicking.cancel();
	wait_finished(&job).await;

	assert_eq!(job.error(), ErrorCode::Killed);
	assert!(matches!(panicking.error(), Some(WorkError::Panicked(_))));
}

#[tokio::test(flavor = "multi_thread")]
#[traced_test]
async fn kill_after_completion_keeps_the_outcome() {
	let system = system();

	for _ in 0..50 {
		let job = system
			.job("instant")
			.with_auto_delete(false)
			.build(instant);
		let counters = Counters::watch(&job);
		let future = job.future().expect("job has a future before finishing");

		job.start();

		// The watcher may or may not have seen the completion when the kill arrives
		let waiter = future.clone();
		tokio::task::spawn_blocking(move || waiter.wait_for_finished())
			.await
			.expect("failed to wait for the worker");

		assert!(job.kill(KillVerbosity::Quietly).await);

		// Kill only returns once Finished was delivered
		assert_eq!(counters.finished(), 1);
		assert_eq!(counters.results(), 1);
		assert!(!future.is_canceled());
		assert_eq!(job.error(), ErrorCode::NoError);
		assert_eq!(job.take_results(), vec![7]);
	}
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn speed_follows_the_clock() {
	let system = system();

	let future = JobFuture::<()>::new();
	assert!(future.report_started());

	let job = system
		.job("clocked")
		.with_auto_delete(false)
		.adopt(future.clone());

	let speeds = Arc::new(Mutex::new(vec![]));
	job.on_speed({
		let speeds = Arc::clone(&speeds);
		move |_, speed| speeds.lock().expect("lock poisoned").push(speed)
	});

	future.set_progress_range(0, 1000);
	future.set_progress_value(400);
	sleep(Duration::from_millis(1001)).await;

	future.set_progress_value(800);
	sleep(Duration::from_millis(1000)).await;

	assert_eq!(*speeds.lock().expect("lock poisoned"), vec![100, 175]);
	assert_eq!(job.speed(), 175);

	future.report_finished();
	wait_finished(&job).await;

	assert_eq!(job.error(), ErrorCode::NoError);
}
