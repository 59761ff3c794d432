#![forbid(unsafe_code)]

use std::sync::Arc;

use jukebox_domain::TopicId;
use parking_lot::RwLock;

/// The active session topic. Only the coordinator writes it; anyone may take a snapshot.
#[derive(Debug, Clone, Default)]
pub struct TopicCell(Arc<RwLock<Option<TopicId>>>);

impl TopicCell {
	pub fn load(&self) -> Option<TopicId> {
		self.0.read().clone()
	}

	pub(crate) fn store(&self, topic: TopicId) {
		*self.0.write() = Some(topic);
	}

	pub(crate) fn clear(&self) -> Option<TopicId> {
		self.0.write().take()
	}
}
