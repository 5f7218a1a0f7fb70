use std::{
	collections::HashMap,
	fmt,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc, Mutex,
	},
};

use super::lock;

/// Identity of a job: a process-wide sequence number plus a readable name unique per kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId {
	seq: u64,
	name: Arc<str>,
}

impl JobId {
	#[must_use]
	pub const fn seq(&self) -> u64 {
		self.seq
	}

	#[must_use]
	pub fn name(&self) -> &str {
		&self.name
	}
}

impl fmt::Display for JobId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.name)
	}
}

#[derive(Debug, Default)]
pub struct IdAllocator {
	next_seq: AtomicU64,
	per_kind: Mutex<HashMap<&'static str, u64>>,
}

impl IdAllocator {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn allocate(&self, kind: &'static str) -> JobId {
		let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

		let n = {
			let mut per_kind = lock(&self.per_kind);
			let counter = per_kind.entry(kind).or_insert(0);
			let n = *counter;
			*counter += 1;
			n
		};

		JobId {
			seq,
			name: format!("{kind}_{n}").into(),
		}
	}

	/// How many ids were handed out for `kind` so far.
	pub fn allocated(&self, kind: &'static str) -> u64 {
		lock(&self.per_kind)
			.get(kind)
			.copied()
			.unwrap_or(0)
	}
}
