//! Structured progress events carried through a [`JobFuture`](crate::JobFuture)'s progress text.
//!
//! A future only has a single free-form progress text slot, so descriptions, info messages,
//! warnings and progress unit changes are encoded as `TAG:field^field^...`. Backslash escapes
//! both itself and the field separator, so any field content survives a round trip.

use std::mem;

use tracing::warn;

use super::unit::Unit;

const FIELD_SEPARATOR: char = '^';
const ESCAPE: char = '\\';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressInfoKind {
	Description,
	InfoMessage,
	Warning,
	SetProgressUnit,
	Unknown,
}

impl ProgressInfoKind {
	const KNOWN: [Self; 4] = [
		Self::Description,
		Self::InfoMessage,
		Self::Warning,
		Self::SetProgressUnit,
	];

	#[must_use]
	pub const fn tag(self) -> &'static str {
		match self {
			Self::Description => "DESC",
			Self::InfoMessage => "INFO",
			Self::Warning => "WARN",
			Self::SetProgressUnit => "SET_PROGRESS_UNIT",
			Self::Unknown => "UNKNOWN",
		}
	}

	/// Number of fields a well-formed message of this kind carries.
	#[must_use]
	pub const fn field_count(self) -> Option<usize> {
		match self {
			Self::Description => Some(5),
			Self::InfoMessage | Self::Warning => Some(2),
			Self::SetProgressUnit => Some(1),
			Self::Unknown => None,
		}
	}
}

/// Encodes `fields` under the tag of `kind`.
///
/// An empty field list encodes as the bare tag, so it stays distinct from a single empty field.
pub fn encode<S: AsRef<str>>(kind: ProgressInfoKind, fields: &[S]) -> String {
	let mut out = String::with_capacity(
		kind.tag().len() + 1 + fields.iter().map(|f| f.as_ref().len() + 1).sum::<usize>(),
	);

	out.push_str(kind.tag());
	if fields.is_empty() {
		return out;
	}
	out.push(':');

	for (idx, field) in fields.iter().enumerate() {
		if idx > 0 {
			out.push(FIELD_SEPARATOR);
		}

		for c in field.as_ref().chars() {
			if c == ESCAPE || c == FIELD_SEPARATOR {
				out.push(ESCAPE);
			}
			out.push(c);
		}
	}

	out
}

/// Decodes a progress text. Text without a known tag yields [`ProgressInfoKind::Unknown`]
/// and no fields.
#[must_use]
pub fn decode(text: &str) -> (ProgressInfoKind, Vec<String>) {
	ProgressInfoKind::KNOWN
		.into_iter()
		.find_map(|kind| {
			text.strip_prefix(kind.tag()).and_then(|rest| {
				if rest.is_empty() {
					Some((kind, Vec::new()))
				} else {
					rest.strip_prefix(':').map(|rest| (kind, split_fields(rest)))
				}
			})
		})
		.unwrap_or((ProgressInfoKind::Unknown, Vec::new()))
}

fn split_fields(encoded: &str) -> Vec<String> {
	let mut fields = Vec::new();
	let mut current = String::new();
	let mut chars = encoded.chars();

	while let Some(c) = chars.next() {
		match c {
			// A dangling escape at the very end is kept literally
			ESCAPE => current.push(chars.next().unwrap_or(ESCAPE)),
			FIELD_SEPARATOR => fields.push(mem::take(&mut current)),
			_ => current.push(c),
		}
	}

	fields.push(current);

	fields
}

/// A job description: a title plus two labeled fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Description {
	pub title: String,
	pub field1: (String, String),
	pub field2: (String, String),
}

impl Description {
	pub fn new(title: impl Into<String>) -> Self {
		Self {
			title: title.into(),
			..Default::default()
		}
	}

	#[must_use]
	pub fn with_field1(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.field1 = (name.into(), value.into());
		self
	}

	#[must_use]
	pub fn with_field2(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
		self.field2 = (name.into(), value.into());
		self
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressInfo {
	Description(Description),
	InfoMessage { plain: String, rich: String },
	Warning { plain: String, rich: String },
	SetProgressUnit(Unit),
}

impl ProgressInfo {
	#[must_use]
	pub const fn kind(&self) -> ProgressInfoKind {
		match self {
			Self::Description(_) => ProgressInfoKind::Description,
			Self::InfoMessage { .. } => ProgressInfoKind::InfoMessage,
			Self::Warning { .. } => ProgressInfoKind::Warning,
			Self::SetProgressUnit(_) => ProgressInfoKind::SetProgressUnit,
		}
	}

	#[must_use]
	pub fn encode(&self) -> String {
		match self {
			Self::Description(Description {
				title,
				field1: (name1, value1),
				field2: (name2, value2),
			}) => encode(self.kind(), &[title, name1, value1, name2, value2]),
			Self::InfoMessage { plain, rich } | Self::Warning { plain, rich } => {
				encode(self.kind(), &[plain, rich])
			}
			Self::SetProgressUnit(unit) => encode(self.kind(), &[unit.as_str()]),
		}
	}

	/// Decodes a progress text, returning `None` for unknown tags or malformed payloads.
	#[must_use]
	pub fn decode(text: &str) -> Option<Self> {
		let (kind, fields) = decode(text);

		if kind.field_count() != Some(fields.len()) {
			if kind != ProgressInfoKind::Unknown {
				warn!(
					?kind,
					fields_count = fields.len(),
					"Malformed progress info, wrong number of fields;"
				);
			}
			return None;
		}

		let mut fields = fields.into_iter();
		let mut next = || fields.next().unwrap_or_default();

		match kind {
			ProgressInfoKind::Description => Some(Self::Description(Description {
				title: next(),
				field1: (next(), next()),
				field2: (next(), next()),
			})),
			ProgressInfoKind::InfoMessage => Some(Self::InfoMessage {
				plain: next(),
				rich: next(),
			}),
			ProgressInfoKind::Warning => Some(Self::Warning {
				plain: next(),
				rich: next(),
			}),
			ProgressInfoKind::SetProgressUnit => next()
				.parse()
				.map(Self::SetProgressUnit)
				.map_err(|e| warn!(%e, "Malformed progress unit;"))
				.ok(),
			ProgressInfoKind::Unknown => None,
		}
	}
}
