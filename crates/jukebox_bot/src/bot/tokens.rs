#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use jukebox_domain::{ListenerToken, UserId};
use jukebox_platform::ListenerService;
use tokio::sync::OnceCell;
use tracing::info;

use super::commands::CommandFailure;

/// Listener tokens per chat user, kept for the life of the process.
///
/// Concurrent first requests from one user share a single `join` call. A failed
/// join leaves the slot empty so the next request tries again.
#[derive(Debug, Default)]
pub struct TokenCache {
	slots: DashMap<UserId, Arc<OnceCell<ListenerToken>>>,
}

impl TokenCache {
	pub fn get(&self, user: &UserId) -> Option<ListenerToken> {
		self.slots.get(user).and_then(|slot| slot.get().cloned())
	}

	pub async fn resolve(
		&self,
		service: &dyn ListenerService,
		user: &UserId,
		display_name: &str,
		join_timeout: Duration,
	) -> Result<ListenerToken, CommandFailure> {
		// Clone the slot out so no map shard stays locked across the await.
		let slot = Arc::clone(&self.slots.entry(user.clone()).or_default());

		let token = slot
			.get_or_try_init(|| async {
				let token = tokio::time::timeout(join_timeout, service.join(display_name, user))
					.await
					.map_err(|_| CommandFailure::Timeout("join", join_timeout))?
					.map_err(CommandFailure::Join)?;
				metrics::counter!("jukebox_bot_joins_total").increment(1);
				info!(user_id = %user, "listener joined");
				Ok::<_, CommandFailure>(token)
			})
			.await?;

		Ok(token.clone())
	}
}
