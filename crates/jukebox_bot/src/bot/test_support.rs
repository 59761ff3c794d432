#![forbid(unsafe_code)]

use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use futures_util::stream;
use jukebox_domain::{ListenerToken, Requester, SessionInfo, SessionState, TopicId, TrackId, TrackInfo, TrackState, UserId};
use jukebox_platform::{
	ChatPlatform, CommandInvocation, CommandOption, CommandSpec, InteractionRef, ListenerService, OutgoingMessage,
	RequestOutcome, SecretToken, WireNotificationStream,
};
use jukebox_protocol::v1;
use parking_lot::Mutex;
use tokio::sync::mpsc;

static LOG_INIT: OnceLock<()> = OnceLock::new();

pub(crate) fn init_test_logging() {
	LOG_INIT.get_or_init(|| {
		if std::env::var_os("JUKEBOX_TEST_LOG").is_none() {
			return;
		}

		let _ = tracing_subscriber::fmt()
			.with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "debug".to_string()))
			.with_target(false)
			.try_init();
	});
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PlatformCall {
	CreateTopic { title: String, message: OutgoingMessage },
	Send { topic: String, message: OutgoingMessage },
	GuildIcon,
	Register { application_id: String, command: String },
	Unregister { application_id: String },
	Defer { interaction_id: String },
	Edit { interaction_id: String, content: String },
}

/// Records every platform call; failures are switched on per operation.
#[derive(Default)]
pub(crate) struct RecordingPlatform {
	pub calls: Mutex<Vec<PlatformCall>>,
	pub fail_create: AtomicBool,
	pub fail_send: AtomicBool,
	pub fail_defer: AtomicBool,
	pub fail_guild: AtomicBool,
	pub next_topic: AtomicUsize,
}

impl RecordingPlatform {
	pub fn calls(&self) -> Vec<PlatformCall> {
		self.calls.lock().clone()
	}

	pub fn created_topics(&self) -> Vec<(String, OutgoingMessage)> {
		self.calls()
			.into_iter()
			.filter_map(|c| match c {
				PlatformCall::CreateTopic { title, message } => Some((title, message)),
				_ => None,
			})
			.collect()
	}

	pub fn sent(&self) -> Vec<(String, OutgoingMessage)> {
		self.calls()
			.into_iter()
			.filter_map(|c| match c {
				PlatformCall::Send { topic, message } => Some((topic, message)),
				_ => None,
			})
			.collect()
	}

	pub fn edits(&self) -> Vec<String> {
		self.calls()
			.into_iter()
			.filter_map(|c| match c {
				PlatformCall::Edit { content, .. } => Some(content),
				_ => None,
			})
			.collect()
	}
}

#[async_trait::async_trait]
impl ChatPlatform for RecordingPlatform {
	async fn create_topic(&self, title: &str, message: &OutgoingMessage) -> anyhow::Result<TopicId> {
		self.calls.lock().push(PlatformCall::CreateTopic {
			title: title.to_string(),
			message: message.clone(),
		});
		if self.fail_create.load(Ordering::SeqCst) {
			return Err(anyhow!("discord POST forum thread failed: status=500"));
		}
		let n = self.next_topic.fetch_add(1, Ordering::SeqCst) + 1;
		Ok(TopicId::new(format!("thread-{n}"))?)
	}

	async fn send_to_topic(&self, topic: &TopicId, message: &OutgoingMessage) -> anyhow::Result<String> {
		self.calls.lock().push(PlatformCall::Send {
			topic: topic.to_string(),
			message: message.clone(),
		});
		if self.fail_send.load(Ordering::SeqCst) {
			return Err(anyhow!("discord POST message failed: status=500"));
		}
		Ok("msg".to_string())
	}

	async fn guild_icon_url(&self) -> anyhow::Result<Option<String>> {
		self.calls.lock().push(PlatformCall::GuildIcon);
		if self.fail_guild.load(Ordering::SeqCst) {
			return Err(anyhow!("discord GET guild failed: status=403"));
		}
		Ok(Some("https://cdn.discordapp.com/icons/g/icon.png?size=1024".to_string()))
	}

	async fn register_command(&self, application_id: &str, spec: &CommandSpec) -> anyhow::Result<()> {
		self.calls.lock().push(PlatformCall::Register {
			application_id: application_id.to_string(),
			command: spec.name.clone(),
		});
		Ok(())
	}

	async fn unregister_commands(&self, application_id: &str) -> anyhow::Result<()> {
		self.calls.lock().push(PlatformCall::Unregister {
			application_id: application_id.to_string(),
		});
		Ok(())
	}

	async fn defer_response(&self, interaction: &InteractionRef) -> anyhow::Result<()> {
		self.calls.lock().push(PlatformCall::Defer {
			interaction_id: interaction.id.clone(),
		});
		if self.fail_defer.load(Ordering::SeqCst) {
			return Err(anyhow!("discord POST interaction callback failed: status=404"));
		}
		Ok(())
	}

	async fn edit_response(&self, interaction: &InteractionRef, content: &str) -> anyhow::Result<()> {
		self.calls.lock().push(PlatformCall::Edit {
			interaction_id: interaction.id.clone(),
			content: content.to_string(),
		});
		Ok(())
	}
}

/// Fake playback service: joins hand out `token-N`; notifications come from a channel.
pub(crate) struct RecordingService {
	pub joins: Mutex<Vec<(String, UserId)>>,
	pub requests: Mutex<Vec<(ListenerToken, String)>>,
	pub join_delay: Duration,
	pub failing_joins: AtomicUsize,
	pub outcome: RequestOutcome,
	pub fail_subscribe: AtomicBool,
	pub notifications: Mutex<Option<mpsc::Receiver<anyhow::Result<v1::Notification>>>>,
	pub issued: AtomicUsize,
}

impl Default for RecordingService {
	fn default() -> Self {
		Self {
			joins: Mutex::new(Vec::new()),
			requests: Mutex::new(Vec::new()),
			join_delay: Duration::ZERO,
			failing_joins: AtomicUsize::new(0),
			outcome: RequestOutcome {
				success: true,
				message: "リクエストを受け付けました".to_string(),
				code: "OK".to_string(),
			},
			fail_subscribe: AtomicBool::new(false),
			notifications: Mutex::new(None),
			issued: AtomicUsize::new(0),
		}
	}
}

impl RecordingService {
	/// Wire up the notification stream; the returned sender feeds it.
	pub fn with_notifications(&self) -> mpsc::Sender<anyhow::Result<v1::Notification>> {
		let (tx, rx) = mpsc::channel(16);
		*self.notifications.lock() = Some(rx);
		tx
	}

	pub fn join_count(&self) -> usize {
		self.joins.lock().len()
	}

	pub fn request_count(&self) -> usize {
		self.requests.lock().len()
	}
}

#[async_trait::async_trait]
impl ListenerService for RecordingService {
	async fn join(&self, display_name: &str, external_user_id: &UserId) -> anyhow::Result<ListenerToken> {
		self.joins.lock().push((display_name.to_string(), external_user_id.clone()));
		if !self.join_delay.is_zero() {
			tokio::time::sleep(self.join_delay).await;
		}
		if self
			.failing_joins
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
			.is_ok()
		{
			return Err(anyhow!("connect unary Join failed: status=503 body=unavailable"));
		}
		let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
		Ok(ListenerToken::new(format!("token-{n}"))?)
	}

	async fn request_track(&self, token: &ListenerToken, track_ref: &str) -> anyhow::Result<RequestOutcome> {
		self.requests.lock().push((token.clone(), track_ref.to_string()));
		Ok(self.outcome.clone())
	}

	async fn subscribe_notifications(&self) -> anyhow::Result<WireNotificationStream> {
		if self.fail_subscribe.load(Ordering::SeqCst) {
			return Err(anyhow!("connect stream SubscribeNotifications failed: status=503"));
		}
		let rx = self
			.notifications
			.lock()
			.take()
			.ok_or_else(|| anyhow!("no notification stream configured"))?;
		Ok(Box::pin(stream::unfold(rx, |mut rx| async move {
			rx.recv().await.map(|item| (item, rx))
		})))
	}
}

pub(crate) fn session(keywords: &[&str], end: Option<&str>) -> SessionInfo {
	SessionInfo {
		state: SessionState::Running,
		playlist_name: "Lo-fi".to_string(),
		playlist_url: "https://open.spotify.com/playlist/p".to_string(),
		scheduled_end_time: end.map(str::to_string),
		keywords: keywords.iter().map(|k| k.to_string()).collect(),
	}
}

pub(crate) fn track(id: &str, name: &str, state: TrackState) -> TrackInfo {
	TrackInfo {
		id: TrackId::new(id).unwrap(),
		name: name.to_string(),
		artists: vec!["Artist".to_string()],
		url: format!("https://open.spotify.com/track/{id}"),
		album_art_url: String::new(),
		requester: Requester::Named("alice".to_string()),
		state,
	}
}

pub(crate) fn invocation(id: &str, user: Option<&str>, url: Option<&str>) -> CommandInvocation {
	CommandInvocation {
		interaction: InteractionRef {
			id: id.to_string(),
			application_id: "app1".to_string(),
			token: SecretToken(format!("itok-{id}")),
		},
		name: "req".to_string(),
		user_id: user.map(|u| UserId::new(u).unwrap()),
		display_name: "Alice".to_string(),
		options: url
			.map(|u| {
				vec![CommandOption {
					name: "url".to_string(),
					value: u.to_string(),
				}]
			})
			.unwrap_or_default(),
	}
}
