use tokio::runtime::Handle;
use tracing::{debug, trace};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use super::{
	config::JobSystemConfig,
	error::{SystemError, WorkError},
	future::JobFuture,
	id::IdAllocator,
	job::{Capabilities, ControllerParams, JobController},
	runner::AsyncRunner,
	unit::Unit,
};

/// Sets up logging, then builds a [`JobSystem`] on the current tokio runtime.
pub fn init(config: JobSystemConfig) -> Result<JobSystem, SystemError> {
	init_logging(&config.log_filter);
	JobSystem::new(config)
}

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, or by `default_filter` when that isn't set.
///
/// Does nothing if a global subscriber is already installed.
pub fn init_logging(default_filter: &str) {
	let installed = tracing_subscriber::registry()
		.with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
		.with(fmt::layer())
		.try_init();

	if let Err(e) = installed {
		trace!(%e, "Global subscriber already installed;");
	}
}

/// Entry point for creating jobs: owns the runner, the id allocator and the configuration.
#[derive(Debug)]
pub struct JobSystem {
	config: JobSystemConfig,
	runner: AsyncRunner,
	ids: IdAllocator,
}

impl JobSystem {
	pub fn new(config: JobSystemConfig) -> Result<Self, SystemError> {
		Self::with_handle(config, Handle::try_current()?)
	}

	pub fn with_handle(config: JobSystemConfig, handle: Handle) -> Result<Self, SystemError> {
		config.validate()?;

		let workers_count = config.workers_count();
		debug!(workers_count, "Starting job system;");

		Ok(Self {
			runner: AsyncRunner::new(handle, workers_count),
			ids: IdAllocator::new(),
			config,
		})
	}

	#[must_use]
	pub const fn config(&self) -> &JobSystemConfig {
		&self.config
	}

	#[must_use]
	pub const fn runner(&self) -> &AsyncRunner {
		&self.runner
	}

	#[must_use]
	pub const fn ids(&self) -> &IdAllocator {
		&self.ids
	}

	/// Starts describing a new job of the given kind.
	#[must_use]
	pub fn job(&self, kind: &'static str) -> JobBuilder<'_> {
		JobBuilder {
			system: self,
			kind,
			capabilities: Capabilities::KILLABLE,
			auto_delete: self.config.auto_delete,
			progress_unit: Unit::default(),
		}
	}
}

#[derive(Debug)]
#[must_use = "a job builder does nothing until built"]
pub struct JobBuilder<'system> {
	system: &'system JobSystem,
	kind: &'static str,
	capabilities: Capabilities,
	auto_delete: bool,
	progress_unit: Unit,
}

impl JobBuilder<'_> {
	pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
		self.capabilities = capabilities;
		self
	}

	pub fn with_auto_delete(mut self, auto_delete: bool) -> Self {
		self.auto_delete = auto_delete;
		self
	}

	pub fn with_progress_unit(mut self, progress_unit: Unit) -> Self {
		self.progress_unit = progress_unit;
		self
	}

	fn params(&self) -> ControllerParams {
		ControllerParams {
			id: self.system.ids.allocate(self.kind),
			capabilities: self.capabilities,
			auto_delete: self.auto_delete,
			progress_unit: self.progress_unit,
			speed_interval: self.system.config.speed_interval(),
		}
	}

	/// Builds a job that owns `work` and submits it on [`Job::start`](crate::Job::start).
	pub fn build<T, E>(
		self,
		work: impl FnOnce(JobFuture<T>) -> Result<(), E> + Send + 'static,
	) -> JobController<T>
	where
		T: Send + 'static,
		E: std::error::Error + Send + Sync + 'static,
	{
		JobController::with_work(
			self.system.runner.clone(),
			self.params(),
			Box::new(move |future| work(future).map_err(WorkError::failed)),
		)
	}

	/// Builds a job around a future that is already submitted (or even finished).
	pub fn adopt<T: Send + 'static>(self, future: JobFuture<T>) -> JobController<T> {
		JobController::adopting(self.system.runner.clone(), self.params(), future)
	}
}
