use sd_job_control::{Capabilities, Description, JobController, JobFuture, JobSystem, Unit};

use std::{
	collections::HashMap,
	fs::{self, Metadata},
	io,
	ops::BitOr,
	path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, trace, warn};
use walkdir::WalkDir;

/// Image files that count as the artwork of the directory they sit in.
const ART_FILE_NAMES: [&str; 6] = [
	"folder.jpg",
	"folder.png",
	"cover.jpg",
	"cover.png",
	"front.jpg",
	"front.png",
];

const CUE_SHEET_EXTENSION: &str = "cue";

#[derive(Debug, Error)]
pub enum DirScanError {
	#[error("invalid name filter <pattern='{pattern}'>: {source}")]
	Filter {
		pattern: String,
		#[source]
		source: globset::Error,
	},
	#[error("failed to read scan root <path='{}'>: {source}", .path.display())]
	Root {
		path: Box<Path>,
		#[source]
		source: io::Error,
	},
	#[error("scan root is not a directory <path='{}'>", .0.display())]
	RootNotADirectory(Box<Path>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirScanParams {
	pub root: PathBuf,
	/// Case-insensitive globs matched against file names, empty matches every file.
	pub name_filters: Vec<String>,
	pub follow_symlinks: bool,
}

impl DirScanParams {
	pub const MUSIC_FILTERS: [&'static str; 10] = [
		"*.flac", "*.mp3", "*.ogg", "*.oga", "*.opus", "*.m4a", "*.wav", "*.wv", "*.ape", "*.aac",
	];

	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self {
			root: root.into(),
			name_filters: Self::MUSIC_FILTERS.iter().map(ToString::to_string).collect(),
			follow_symlinks: false,
		}
	}

	#[must_use]
	pub fn with_name_filters(mut self, filters: impl IntoIterator<Item = impl Into<String>>) -> Self {
		self.name_filters = filters.into_iter().map(Into::into).collect();
		self
	}

	#[must_use]
	pub fn following_symlinks(mut self, follow_symlinks: bool) -> Self {
		self.follow_symlinks = follow_symlinks;
		self
	}
}

/// Properties of the directory a scanned file lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct DirProps(u8);

impl DirProps {
	pub const NONE: Self = Self(0);
	/// A `.cue` sheet with the file's stem sits next to it.
	pub const HAS_SIDECAR_CUE_SHEET: Self = Self(1 << 0);
	/// The directory holds a well known artwork image.
	pub const HAS_ART: Self = Self(1 << 1);

	#[must_use]
	pub const fn contains(self, other: Self) -> bool {
		self.0 & other.0 == other.0
	}
}

impl BitOr for DirProps {
	type Output = Self;

	fn bitor(self, rhs: Self) -> Self::Output {
		Self(self.0 | rhs.0)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileModificationInfo {
	pub size: u64,
	pub last_modified: Option<DateTime<Utc>>,
	pub metadata_changed: Option<DateTime<Utc>>,
}

impl From<&Metadata> for FileModificationInfo {
	fn from(metadata: &Metadata) -> Self {
		Self {
			size: metadata.len(),
			last_modified: metadata.modified().ok().map(DateTime::<Utc>::from),
			metadata_changed: metadata_changed(metadata),
		}
	}
}

#[cfg(unix)]
fn metadata_changed(metadata: &Metadata) -> Option<DateTime<Utc>> {
	use std::os::unix::fs::MetadataExt;

	DateTime::from_timestamp(metadata.ctime(), u32::try_from(metadata.ctime_nsec()).ok()?)
}

#[cfg(not(unix))]
fn metadata_changed(_metadata: &Metadata) -> Option<DateTime<Utc>> {
	None
}

/// A media file found by a directory scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirScanResult {
	pub media_path: PathBuf,
	pub dir_path: PathBuf,
	pub cue_path: Option<PathBuf>,
	pub props: DirProps,
	pub file_info: FileModificationInfo,
}

impl DirScanResult {
	fn new(media_path: &Path, metadata: &Metadata, dir_has_art: &mut HashMap<PathBuf, bool>) -> Self {
		let dir_path = media_path.parent().map(Path::to_path_buf).unwrap_or_default();

		let mut props = DirProps::NONE;

		let cue_path = sidecar_cue_sheet(media_path);
		if cue_path.is_some() {
			props = props | DirProps::HAS_SIDECAR_CUE_SHEET;
		}

		let has_art = *dir_has_art
			.entry(dir_path.clone())
			.or_insert_with_key(|dir| ART_FILE_NAMES.iter().any(|name| dir.join(name).is_file()));
		if has_art {
			props = props | DirProps::HAS_ART;
		}

		Self {
			media_path: media_path.to_path_buf(),
			dir_path,
			cue_path,
			props,
			file_info: metadata.into(),
		}
	}
}

fn sidecar_cue_sheet(media_path: &Path) -> Option<PathBuf> {
	let is_cue = media_path
		.extension()
		.is_some_and(|ext| ext.eq_ignore_ascii_case(CUE_SHEET_EXTENSION));
	if is_cue {
		return None;
	}

	let cue_path = media_path.with_extension(CUE_SHEET_EXTENSION);
	cue_path.is_file().then_some(cue_path)
}

fn build_filters(patterns: &[String]) -> Result<GlobSet, DirScanError> {
	let mut builder = GlobSetBuilder::new();

	for pattern in patterns {
		builder.add(
			GlobBuilder::new(pattern)
				.case_insensitive(true)
				.literal_separator(true)
				.build()
				.map_err(|source| DirScanError::Filter {
					pattern: pattern.clone(),
					source,
				})?,
		);
	}

	builder.build().map_err(|source| DirScanError::Filter {
		pattern: patterns.join(","),
		source,
	})
}

fn count_entries(dir: &Path) -> u64 {
	fs::read_dir(dir).map_or(0, |entries| entries.count() as u64)
}

/// Walks `params.root` reporting one [`DirScanResult`] per matching file.
///
/// The progress range is kept above the number of files found while walking, and is settled
/// to exactly that number once the walk completes without being canceled.
#[instrument(skip_all, fields(root = %params.root.display()), err)]
pub fn scan_directory(
	future: &JobFuture<DirScanResult>,
	params: &DirScanParams,
) -> Result<(), DirScanError> {
	let filters = build_filters(&params.name_filters)?;
	let root = params.root.as_path();

	let root_metadata = fs::metadata(root).map_err(|source| DirScanError::Root {
		path: root.into(),
		source,
	})?;
	if !root_metadata.is_dir() {
		return Err(DirScanError::RootNotADirectory(root.into()));
	}

	future.set_progress_unit(Unit::Files);
	future.report_description(
		Description::new("Scanning for music files")
			.with_field1("Root URL", root.display().to_string())
			.with_field2("Current file", ""),
	);
	future.set_progress_range(0, 0);

	let mut found = 0_u64;
	let mut possible = 0_u64;
	let mut dir_has_art = HashMap::new();

	for entry in WalkDir::new(root)
		.follow_links(params.follow_symlinks)
		.sort_by_file_name()
	{
		match entry {
			Ok(entry) if entry.file_type().is_dir() => {
				possible += count_entries(entry.path());
				future.set_progress_range(0, possible.max(found) + 1);
			}

			Ok(entry)
				if entry.file_type().is_file()
					&& (filters.is_empty() || filters.is_match(entry.file_name())) =>
			{
				let path = entry.path();

				match entry.metadata() {
					Ok(metadata) => {
						found += 1;
						future.report_info_message(format!("File: {}", path.display()), "");

						if possible <= found {
							possible = found + 1;
							future.set_progress_range(0, possible);
						}
						future.set_progress_value(found);
						future.report_result(DirScanResult::new(path, &metadata, &mut dir_has_art));
					}
					Err(e) => {
						warn!(path = %path.display(), ?e, "Failed to read file metadata;");
						future.report_warning(format!("Can't read {}: {e}", path.display()), "");
					}
				}
			}

			Ok(entry) => trace!(path = %entry.path().display(), "Skipping entry;"),

			Err(e) => {
				let path = e
					.path()
					.map_or_else(|| root.display().to_string(), |path| path.display().to_string());
				warn!(%path, ?e, "Failed to read directory entry;");
				future.report_warning(format!("Can't read {path}: {e}"), "");
			}
		}

		if future.handle_pause_and_should_cancel() {
			debug!(found, "Directory scan canceled;");
			break;
		}
	}

	if !future.is_canceled() {
		future.set_progress_range(0, found);
		future.set_progress_value(found);
		debug!(found, "Directory scan done;");
	}

	Ok(())
}

/// Job scanning a directory tree for media files, see [`scan_directory`].
pub struct DirectoryScanJob;

impl DirectoryScanJob {
	pub const KIND: &'static str = "directory_scan";

	#[must_use]
	pub fn build(system: &JobSystem, params: DirScanParams) -> JobController<DirScanResult> {
		system
			.job(Self::KIND)
			.with_capabilities(Capabilities::KILLABLE | Capabilities::SUSPENDABLE)
			.with_progress_unit(Unit::Files)
			.build(move |future| scan_directory(&future, &params))
	}
}
