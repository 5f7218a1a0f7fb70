use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unit in which a job measures its progress amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
	#[default]
	Bytes,
	Files,
	Directories,
	Items,
}

impl Unit {
	pub const ALL: [Self; 4] = [Self::Bytes, Self::Files, Self::Directories, Self::Items];

	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Bytes => "bytes",
			Self::Files => "files",
			Self::Directories => "directories",
			Self::Items => "items",
		}
	}
}

impl fmt::Display for Unit {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Error)]
#[error("unknown progress unit: '{0}'")]
pub struct UnknownUnitError(pub String);

impl FromStr for Unit {
	type Err = UnknownUnitError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::ALL
			.into_iter()
			.find(|unit| unit.as_str() == s)
			.ok_or_else(|| UnknownUnitError(s.to_string()))
	}
}
