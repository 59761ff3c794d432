#![forbid(unsafe_code)]

use dashmap::DashSet;
use jukebox_domain::TrackId;

/// Track ids already announced in the current session.
#[derive(Debug, Default)]
pub struct PostedTracks {
	seen: DashSet<TrackId>,
}

impl PostedTracks {
	/// Atomically mark `id`; `false` means it was already marked.
	pub fn mark(&self, id: &TrackId) -> bool {
		self.seen.insert(id.clone())
	}

	pub fn clear(&self) {
		self.seen.clear();
	}

	pub fn len(&self) -> usize {
		self.seen.len()
	}
}
