use std::{error::Error as StdError, io, path::Path, sync::Arc};

use thiserror::Error;

/// Outcome classification of a finished job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ErrorCode {
	#[default]
	NoError,
	/// The job was killed before its work function completed.
	Killed,
	/// The work function failed or panicked.
	UserDefined,
}

impl ErrorCode {
	#[must_use]
	pub const fn is_error(self) -> bool {
		!matches!(self, Self::NoError)
	}
}

/// Failure stored on a [`JobFuture`](crate::JobFuture) when its work function doesn't complete normally.
#[derive(Debug, Clone, Error)]
pub enum WorkError {
	#[error("work function failed: {0}")]
	Failed(Arc<dyn StdError + Send + Sync>),
	#[error("work function panicked: {0}")]
	Panicked(String),
}

impl WorkError {
	pub fn failed(e: impl StdError + Send + Sync + 'static) -> Self {
		Self::Failed(Arc::new(e))
	}
}

#[derive(Debug, Error)]
pub enum SystemError {
	#[error("failed to read job system config <path='{}'>: {source}", .path.display())]
	ConfigRead {
		path: Box<Path>,
		#[source]
		source: io::Error,
	},
	#[error("failed to parse job system config: {0}")]
	ConfigParse(#[from] serde_json::Error),
	#[error("invalid job system config: {0}")]
	InvalidConfig(&'static str),
	#[error("job system must be created inside a tokio runtime: {0}")]
	NoRuntime(#[from] tokio::runtime::TryCurrentError),
}
