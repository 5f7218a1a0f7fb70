//!
//! # Media Jobs
//!
//! Leaf jobs of the music library built on [`sd_job_control`]: scanning directory trees for
//! media files and pulling embedded cover art out of audio files.
//!

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

pub mod cover_art;
pub mod directory_scan;

pub use cover_art::{CoverArtError, CoverArtJob};
pub use directory_scan::{
	DirProps, DirScanError, DirScanParams, DirScanResult, DirectoryScanJob, FileModificationInfo,
};
