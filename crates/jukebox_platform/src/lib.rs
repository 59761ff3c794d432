#![forbid(unsafe_code)]

pub mod discord;
pub mod jukebox;

use std::fmt;
use std::pin::Pin;

use futures_util::Stream;
use jukebox_domain::{ListenerToken, SessionInfo, TopicId, TrackInfo, UserId};
use jukebox_protocol::v1;

/// Typed notification delivered to the lifecycle consumer.
#[derive(Debug)]
pub enum Notification {
	/// A session is running; may already carry the track being played.
	SessionStart {
		session: SessionInfo,
		track: Option<TrackInfo>,
	},

	/// The session terminated.
	SessionEnd {
		session: SessionInfo,
	},

	/// A new track started playing.
	TrackStart {
		session: SessionInfo,
		track: TrackInfo,
	},

	/// The server closed the stream cleanly. Always the last notification.
	StreamClosed,

	/// The stream failed. Always the last notification.
	StreamError(anyhow::Error),
}

impl Notification {
	pub fn kind(&self) -> &'static str {
		match self {
			Self::SessionStart { .. } => "session_start",
			Self::SessionEnd { .. } => "session_end",
			Self::TrackStart { .. } => "track_start",
			Self::StreamClosed => "stream_closed",
			Self::StreamError(_) => "stream_error",
		}
	}
}

impl fmt::Display for Notification {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.kind())
	}
}

/// Wrapper that redacts in logs.
#[derive(Clone)]
pub struct SecretString(String);

impl SecretString {
	pub fn new(s: impl Into<String>) -> Self {
		Self(s.into())
	}

	/// Access the inner secret string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	pub fn is_empty(&self) -> bool {
		self.0.trim().is_empty()
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretString(<redacted>)")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("<redacted>")
	}
}

impl<'de> serde::Deserialize<'de> for SecretString {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		Ok(SecretString::new(s))
	}
}

/// Result of a track request, as reported by the playback service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOutcome {
	pub success: bool,
	pub message: String,
	pub code: String,
}

/// Raw server-streamed notifications.
pub type WireNotificationStream = Pin<Box<dyn Stream<Item = anyhow::Result<v1::Notification>> + Send>>;

/// The remote playback service.
#[async_trait::async_trait]
pub trait ListenerService: Send + Sync + 'static {
	/// Register a chat user as a listener; returns the listener token.
	async fn join(&self, display_name: &str, external_user_id: &UserId) -> anyhow::Result<ListenerToken>;

	/// Ask for a track on behalf of a listener.
	async fn request_track(&self, token: &ListenerToken, track_ref: &str) -> anyhow::Result<RequestOutcome>;

	/// Open the notification stream. Errors here mean no subscription was established.
	async fn subscribe_notifications(&self) -> anyhow::Result<WireNotificationStream>;
}

/// Message posted to a topic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
	pub content: String,
	pub embed: Option<Embed>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Embed {
	pub title: String,
	pub description: Option<String>,
	pub url: String,
	pub color: u32,
	pub thumbnail_url: Option<String>,
	pub footer: Option<EmbedFooter>,
	pub fields: Vec<EmbedField>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbedFooter {
	pub text: String,
	pub icon_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbedField {
	pub name: String,
	pub value: String,
}

/// Slash command with a single required string option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
	pub name: String,
	pub description: String,
	pub option_name: String,
	pub option_description: String,
}

/// Handle needed to answer one command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionRef {
	pub id: String,
	pub application_id: String,
	pub token: SecretToken,
}

/// Interaction tokens are short-lived credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretToken(pub String);

impl fmt::Debug for SecretToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("SecretToken(<redacted>)")
	}
}

/// One inbound command invocation.
#[derive(Debug, Clone)]
pub struct CommandInvocation {
	pub interaction: InteractionRef,
	pub name: String,
	/// Invoking user; `None` when the platform did not attach one.
	pub user_id: Option<UserId>,
	pub display_name: String,
	pub options: Vec<CommandOption>,
}

impl CommandInvocation {
	/// First string option with the given name, when non-empty.
	pub fn string_option(&self, name: &str) -> Option<&str> {
		self.options
			.iter()
			.find(|o| o.name == name)
			.map(|o| o.value.trim())
			.filter(|v| !v.is_empty())
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOption {
	pub name: String,
	pub value: String,
}

/// The chat forum surface.
#[async_trait::async_trait]
pub trait ChatPlatform: Send + Sync + 'static {
	/// Start a forum thread with an initial message.
	async fn create_topic(&self, title: &str, message: &OutgoingMessage) -> anyhow::Result<TopicId>;

	/// Post into an existing thread; returns the message id.
	async fn send_to_topic(&self, topic: &TopicId, message: &OutgoingMessage) -> anyhow::Result<String>;

	/// Icon of the configured guild, if it has one.
	async fn guild_icon_url(&self) -> anyhow::Result<Option<String>>;

	async fn register_command(&self, application_id: &str, spec: &CommandSpec) -> anyhow::Result<()>;

	/// Remove every guild command of the application.
	async fn unregister_commands(&self, application_id: &str) -> anyhow::Result<()>;

	/// Acknowledge an invocation privately; the final text follows via `edit_response`.
	async fn defer_response(&self, interaction: &InteractionRef) -> anyhow::Result<()>;

	async fn edit_response(&self, interaction: &InteractionRef, content: &str) -> anyhow::Result<()>;
}
