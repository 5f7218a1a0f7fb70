use std::{fs, path::Path, thread::available_parallelism, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::error;

use super::error::SystemError;

/// Job system settings, usually loaded from a JSON file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobSystemConfig {
	/// How many work functions may run at once, 0 means one per available core.
	pub max_workers: usize,
	/// Period of the speed estimator, in milliseconds.
	pub speed_interval_ms: u64,
	/// Autodelete flag given to newly built jobs.
	pub auto_delete: bool,
	/// Logging filter used when `RUST_LOG` isn't set.
	pub log_filter: String,
}

impl Default for JobSystemConfig {
	fn default() -> Self {
		Self {
			max_workers: 0,
			speed_interval_ms: 1000,
			auto_delete: true,
			log_filter: "info".to_string(),
		}
	}
}

impl JobSystemConfig {
	pub fn load(path: impl AsRef<Path>) -> Result<Self, SystemError> {
		let path = path.as_ref();

		let bytes = fs::read(path).map_err(|source| SystemError::ConfigRead {
			path: path.into(),
			source,
		})?;

		let config = serde_json::from_slice::<Self>(&bytes)?;
		config.validate()?;

		Ok(config)
	}

	pub fn validate(&self) -> Result<(), SystemError> {
		if self.speed_interval_ms == 0 {
			return Err(SystemError::InvalidConfig(
				"speed_interval_ms must be greater than zero",
			));
		}

		Ok(())
	}

	#[must_use]
	pub const fn speed_interval(&self) -> Duration {
		Duration::from_millis(self.speed_interval_ms)
	}

	#[must_use]
	pub fn workers_count(&self) -> usize {
		if self.max_workers > 0 {
			return self.max_workers;
		}

		available_parallelism().map_or_else(
			|e| {
				error!(?e, "Failed to get available parallelism in the job system;");
				1
			},
			|non_zero| non_zero.get(),
		)
	}
}
