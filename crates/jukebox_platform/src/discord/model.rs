#![forbid(unsafe_code)]

use jukebox_domain::UserId;
use serde::{Deserialize, Serialize};

use crate::{CommandInvocation, CommandOption, CommandSpec, Embed, InteractionRef, OutgoingMessage, SecretToken};

pub(crate) const CHANNEL_MESSAGE_FLAG_EPHEMERAL: u64 = 1 << 6;
pub(crate) const INTERACTION_CALLBACK_DEFERRED_CHANNEL_MESSAGE: u8 = 5;
pub(crate) const INTERACTION_TYPE_APPLICATION_COMMAND: u8 = 2;
pub(crate) const COMMAND_TYPE_CHAT_INPUT: u8 = 1;
pub(crate) const OPTION_TYPE_STRING: u8 = 3;
pub(crate) const FORUM_AUTO_ARCHIVE_MINUTES: u32 = 1440;

#[derive(Debug, Serialize)]
pub(crate) struct MessageCreate<'a> {
	pub content: &'a str,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub embeds: Vec<EmbedPayload<'a>>,
}

impl<'a> From<&'a OutgoingMessage> for MessageCreate<'a> {
	fn from(m: &'a OutgoingMessage) -> Self {
		Self {
			content: &m.content,
			embeds: m.embed.iter().map(EmbedPayload::from).collect(),
		}
	}
}

#[derive(Debug, Serialize)]
pub(crate) struct EmbedPayload<'a> {
	pub title: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description: Option<&'a str>,
	#[serde(skip_serializing_if = "str::is_empty")]
	pub url: &'a str,
	pub color: u32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub thumbnail: Option<UrlPayload<'a>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub footer: Option<FooterPayload<'a>>,
	#[serde(skip_serializing_if = "Vec::is_empty")]
	pub fields: Vec<FieldPayload<'a>>,
}

impl<'a> From<&'a Embed> for EmbedPayload<'a> {
	fn from(e: &'a Embed) -> Self {
		Self {
			title: &e.title,
			description: e.description.as_deref(),
			url: &e.url,
			color: e.color,
			thumbnail: e
				.thumbnail_url
				.as_deref()
				.filter(|u| !u.is_empty())
				.map(|url| UrlPayload { url }),
			footer: e.footer.as_ref().map(|f| FooterPayload {
				text: &f.text,
				icon_url: f.icon_url.as_deref(),
			}),
			fields: e
				.fields
				.iter()
				.map(|f| FieldPayload {
					name: &f.name,
					value: &f.value,
					inline: false,
				})
				.collect(),
		}
	}
}

#[derive(Debug, Serialize)]
pub(crate) struct UrlPayload<'a> {
	pub url: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct FooterPayload<'a> {
	pub text: &'a str,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub icon_url: Option<&'a str>,
}

#[derive(Debug, Serialize)]
pub(crate) struct FieldPayload<'a> {
	pub name: &'a str,
	pub value: &'a str,
	pub inline: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct ForumThreadCreate<'a> {
	pub name: &'a str,
	pub auto_archive_duration: u32,
	pub message: MessageCreate<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ApplicationCommandCreate<'a> {
	pub name: &'a str,
	pub description: &'a str,
	#[serde(rename = "type")]
	pub kind: u8,
	pub options: Vec<ApplicationCommandOptionPayload<'a>>,
}

impl<'a> From<&'a CommandSpec> for ApplicationCommandCreate<'a> {
	fn from(spec: &'a CommandSpec) -> Self {
		Self {
			name: &spec.name,
			description: &spec.description,
			kind: COMMAND_TYPE_CHAT_INPUT,
			options: vec![ApplicationCommandOptionPayload {
				kind: OPTION_TYPE_STRING,
				name: &spec.option_name,
				description: &spec.option_description,
				required: true,
			}],
		}
	}
}

#[derive(Debug, Serialize)]
pub(crate) struct ApplicationCommandOptionPayload<'a> {
	#[serde(rename = "type")]
	pub kind: u8,
	pub name: &'a str,
	pub description: &'a str,
	pub required: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct InteractionCallback {
	#[serde(rename = "type")]
	pub kind: u8,
	pub data: InteractionCallbackData,
}

#[derive(Debug, Serialize)]
pub(crate) struct InteractionCallbackData {
	pub flags: u64,
}

impl InteractionCallback {
	pub(crate) fn deferred_ephemeral() -> Self {
		Self {
			kind: INTERACTION_CALLBACK_DEFERRED_CHANNEL_MESSAGE,
			data: InteractionCallbackData {
				flags: CHANNEL_MESSAGE_FLAG_EPHEMERAL,
			},
		}
	}
}

#[derive(Debug, Serialize)]
pub(crate) struct WebhookEdit<'a> {
	pub content: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChannelResponse {
	pub id: String,
	#[serde(default)]
	pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MessageResponse {
	pub id: String,
	#[serde(default)]
	pub channel_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct GuildResponse {
	pub id: String,
	#[serde(default)]
	pub icon: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApplicationCommandResponse {
	pub id: String,
	pub name: String,
}

/// Icon URL in the form the CDN serves it.
pub(crate) fn guild_icon_url(guild_id: &str, icon_hash: &str, size: u32) -> String {
	let ext = if icon_hash.starts_with("a_") { "gif" } else { "png" };
	format!("https://cdn.discordapp.com/icons/{guild_id}/{icon_hash}.{ext}?size={size}")
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct User {
	pub id: String,
	#[serde(default)]
	pub username: String,
	#[serde(default)]
	pub global_name: Option<String>,
}

impl User {
	/// Global display name, falling back to the username.
	pub(crate) fn display_name(&self) -> &str {
		self.global_name
			.as_deref()
			.filter(|n| !n.is_empty())
			.unwrap_or(&self.username)
	}
}

#[derive(Debug, Deserialize)]
pub(crate) struct Member {
	#[serde(default)]
	pub user: Option<User>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ReadyPayload {
	pub user: User,
	pub application: PartialApplication,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PartialApplication {
	pub id: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InteractionCreatePayload {
	pub id: String,
	pub application_id: String,
	#[serde(rename = "type")]
	pub kind: u8,
	pub token: String,
	#[serde(default)]
	pub data: Option<InteractionData>,
	#[serde(default)]
	pub user: Option<User>,
	#[serde(default)]
	pub member: Option<Member>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InteractionData {
	pub name: String,
	#[serde(default)]
	pub options: Vec<InteractionDataOption>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct InteractionDataOption {
	pub name: String,
	#[serde(default)]
	pub value: Option<serde_json::Value>,
}

impl InteractionCreatePayload {
	/// Application-command interactions only.
	pub(crate) fn into_invocation(self) -> Option<CommandInvocation> {
		if self.kind != INTERACTION_TYPE_APPLICATION_COMMAND {
			return None;
		}
		let data = self.data?;

		// DM invocations carry `user`; guild invocations carry `member.user`.
		let user = self.user.or_else(|| self.member.and_then(|m| m.user));
		let (user_id, display_name) = match user {
			Some(u) => (UserId::new(u.id.clone()).ok(), u.display_name().to_string()),
			None => (None, String::new()),
		};

		let options = data
			.options
			.into_iter()
			.filter_map(|o| {
				let value = match o.value? {
					serde_json::Value::String(s) => s,
					other => other.to_string(),
				};
				Some(CommandOption { name: o.name, value })
			})
			.collect();

		Some(CommandInvocation {
			interaction: InteractionRef {
				id: self.id,
				application_id: self.application_id,
				token: SecretToken(self.token),
			},
			name: data.name,
			user_id,
			display_name,
			options,
		})
	}
}
