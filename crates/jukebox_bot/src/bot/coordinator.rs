#![forbid(unsafe_code)]

use std::ops::ControlFlow;
use std::sync::Arc;

use anyhow::anyhow;
use chrono::Local;
use jukebox_domain::{SessionInfo, TrackInfo};
use jukebox_platform::{ChatPlatform, Notification};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::dedup::PostedTracks;
use super::messages::{self, GuildIcon};
use super::topic::TopicCell;

/// What happened to a now-playing post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NowPlaying {
	Posted,
	/// The track was already announced in this session.
	Duplicate,
	/// No session topic to post into; the track stays unmarked.
	NoTopic,
}

/// Single consumer of the notification queue; the only writer of the session topic.
pub struct LifecycleCoordinator {
	platform: Arc<dyn ChatPlatform>,
	topic: TopicCell,
	posted: Arc<PostedTracks>,
	guild_icon: GuildIcon,
	fatal_tx: mpsc::Sender<anyhow::Error>,
}

impl LifecycleCoordinator {
	pub fn new(
		platform: Arc<dyn ChatPlatform>,
		topic: TopicCell,
		posted: Arc<PostedTracks>,
		guild_icon: GuildIcon,
		fatal_tx: mpsc::Sender<anyhow::Error>,
	) -> Self {
		Self {
			platform,
			topic,
			posted,
			guild_icon,
			fatal_tx,
		}
	}

	/// Consume notifications in order until cancelled, the queue closes, or the stream ends.
	pub async fn run(mut self, mut notifications: mpsc::Receiver<Notification>, cancel: CancellationToken) {
		info!("lifecycle coordinator started");
		loop {
			let notification = tokio::select! {
				biased;
				_ = cancel.cancelled() => break,
				n = notifications.recv() => match n {
					Some(n) => n,
					None => {
						debug!("notification queue closed");
						break;
					}
				},
			};

			if self.handle(notification).await.is_break() {
				break;
			}
		}
		info!("lifecycle coordinator stopped");
	}

	pub async fn handle(&mut self, notification: Notification) -> ControlFlow<()> {
		debug!(kind = notification.kind(), "handling notification");
		match notification {
			Notification::SessionStart { session, track } => {
				self.on_session_start(&session, track.as_ref()).await;
			}
			Notification::SessionEnd { session } => self.on_session_end(&session).await,
			Notification::TrackStart { session, track } => self.report_now_playing(&track, &session).await,
			Notification::StreamClosed => {
				self.report_fatal(anyhow!("notification stream closed by server"));
				return ControlFlow::Break(());
			}
			Notification::StreamError(e) => {
				self.report_fatal(e.context("notification stream failed"));
				return ControlFlow::Break(());
			}
		}
		ControlFlow::Continue(())
	}

	async fn on_session_start(&mut self, session: &SessionInfo, track: Option<&TrackInfo>) {
		if let Some(topic) = self.topic.load() {
			warn!(topic_id = %topic, "session already has a topic; ignoring session start");
			return;
		}

		let title = messages::topic_title(Local::now());
		let message = messages::session_start_message(session, self.guild_icon.get());
		match self.platform.create_topic(&title, &message).await {
			Ok(topic) => {
				metrics::counter!("jukebox_bot_topics_created_total").increment(1);
				info!(topic_id = %topic, %title, playlist = %session.playlist_name, "session topic created");
				self.topic.store(topic);
			}
			Err(e) => {
				metrics::counter!("jukebox_bot_topics_failed_total").increment(1);
				error!(error = ?e, %title, "failed to create session topic");
			}
		}

		if let Some(track) = track
			&& track.state.is_now_playing()
		{
			self.report_now_playing(track, session).await;
		}
	}

	async fn on_session_end(&mut self, session: &SessionInfo) {
		let Some(topic) = self.topic.load() else {
			debug!("no active topic; ignoring session end");
			return;
		};

		let message = messages::session_end_message(session, self.guild_icon.get());
		if let Err(e) = self.platform.send_to_topic(&topic, &message).await {
			error!(error = ?e, topic_id = %topic, "failed to post session end");
		}

		self.topic.clear();
		let cleared = self.posted.len();
		self.posted.clear();
		metrics::counter!("jukebox_bot_session_ends_total").increment(1);
		info!(topic_id = %topic, cleared, "session closed");
	}

	async fn report_now_playing(&self, track: &TrackInfo, session: &SessionInfo) {
		match self.post_now_playing(track, session).await {
			Ok(NowPlaying::Posted) => {
				metrics::counter!("jukebox_bot_now_playing_total", "result" => "posted").increment(1);
			}
			Ok(NowPlaying::Duplicate) => {
				metrics::counter!("jukebox_bot_now_playing_total", "result" => "duplicate").increment(1);
				warn!(track_id = %track.id, "track already announced; skipping");
			}
			Ok(NowPlaying::NoTopic) => {
				metrics::counter!("jukebox_bot_now_playing_total", "result" => "no_topic").increment(1);
				warn!(track_id = %track.id, "no active topic; skipping now playing");
			}
			Err(e) => {
				metrics::counter!("jukebox_bot_now_playing_total", "result" => "failed").increment(1);
				error!(error = ?e, track_id = %track.id, "failed to post now playing");
			}
		}
	}

	/// Announce a track at most once per session.
	///
	/// The dedup marker is only taken when a topic exists, and is kept even if the
	/// send fails.
	pub async fn post_now_playing(&self, track: &TrackInfo, session: &SessionInfo) -> anyhow::Result<NowPlaying> {
		let Some(topic) = self.topic.load() else {
			return Ok(NowPlaying::NoTopic);
		};
		if !self.posted.mark(&track.id) {
			return Ok(NowPlaying::Duplicate);
		}

		let message = messages::now_playing_message(track, session);
		let message_id = self.platform.send_to_topic(&topic, &message).await?;
		info!(track_id = %track.id, track = %track.name, %message_id, "now playing posted");
		Ok(NowPlaying::Posted)
	}

	fn report_fatal(&self, err: anyhow::Error) {
		error!(error = ?err, "notification stream terminated");
		if self.fatal_tx.try_send(err).is_err() {
			debug!("fatal error already pending; dropping");
		}
	}
}
