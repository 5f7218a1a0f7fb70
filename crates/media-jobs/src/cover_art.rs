use sd_job_control::{Capabilities, Description, JobController, JobFuture, JobSystem, Unit};

use std::path::{Path, PathBuf};

use lofty::{
	error::LoftyError,
	file::TaggedFileExt,
	picture::PictureType,
	probe::Probe,
	tag::Tag,
};
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Error)]
pub enum CoverArtError {
	#[error("failed to read tags <path='{}'>: {source}", .path.display())]
	Tags {
		path: Box<Path>,
		#[source]
		source: LoftyError,
	},
}

/// Picks the front cover among `pictures`, falling back to the first picture of any kind.
pub fn pick_cover<'a>(
	pictures: impl IntoIterator<Item = (PictureType, &'a [u8])>,
) -> Option<&'a [u8]> {
	let mut first = None;

	for (kind, data) in pictures {
		if kind == PictureType::CoverFront {
			return Some(data);
		}
		first.get_or_insert(data);
	}

	first
}

fn pictures(tag: &Tag) -> impl Iterator<Item = (PictureType, &[u8])> + '_ {
	tag.pictures()
		.iter()
		.map(|picture| (picture.pic_type(), picture.data()))
}

/// Reads the embedded cover image of an audio file, empty when the file carries no art.
///
/// The primary tag is looked at first, then every other tag of the file.
pub fn extract_cover_art(path: &Path) -> Result<Vec<u8>, CoverArtError> {
	let tagged = Probe::open(path)
		.and_then(Probe::read)
		.map_err(|source| CoverArtError::Tags {
			path: path.into(),
			source,
		})?;

	let cover = tagged
		.primary_tag()
		.and_then(|tag| pick_cover(pictures(tag)))
		.or_else(|| tagged.tags().iter().find_map(|tag| pick_cover(pictures(tag))));

	Ok(cover.map(<[u8]>::to_vec).unwrap_or_default())
}

/// Work function of [`CoverArtJob`]: reports exactly one result, the image bytes.
#[instrument(skip_all, fields(path = %path.display()), err)]
pub fn load_cover_art(future: &JobFuture<Vec<u8>>, path: &Path) -> Result<(), CoverArtError> {
	future.set_progress_unit(Unit::Items);
	future.report_description(
		Description::new("Loading cover image")
			.with_field1("Audio file", path.display().to_string()),
	);
	future.set_progress_range(0, 1);

	if future.should_cancel() {
		return Ok(());
	}

	let art = extract_cover_art(path)?;
	debug!(bytes = art.len(), "Cover art loaded;");

	future.report_result(art);
	future.set_progress_value(1);

	Ok(())
}

/// Job extracting the cover art embedded in an audio file, see [`load_cover_art`].
pub struct CoverArtJob;

impl CoverArtJob {
	pub const KIND: &'static str = "cover_art";

	#[must_use]
	pub fn build(system: &JobSystem, path: impl Into<PathBuf>) -> JobController<Vec<u8>> {
		let path = path.into();

		system
			.job(Self::KIND)
			.with_capabilities(Capabilities::KILLABLE)
			.with_progress_unit(Unit::Items)
			.build(move |future| load_cover_art(&future, &path))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn front_cover_wins() {
		let back: &[u8] = b"back";
		let front: &[u8] = b"front";

		assert_eq!(
			pick_cover([(PictureType::CoverBack, back), (PictureType::CoverFront, front)]),
			Some(front)
		);
	}

	#[test]
	fn falls_back_to_first_picture() {
		let artist: &[u8] = b"artist";
		let other: &[u8] = b"other";

		assert_eq!(
			pick_cover([(PictureType::Artist, artist), (PictureType::Other, other)]),
			Some(artist)
		);
		assert_eq!(pick_cover(std::iter::empty()), None);
	}

	#[test]
	fn unreadable_file_is_an_error() {
		let file = tempfile::NamedTempFile::new().expect("failed to create temp file");
		std::fs::write(file.path(), b"definitely not audio").expect("failed to write");

		assert!(matches!(
			extract_cover_art(file.path()),
			Err(CoverArtError::Tags { .. })
		));
	}
}
