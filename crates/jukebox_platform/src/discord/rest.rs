#![forbid(unsafe_code)]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, anyhow};
use jukebox_domain::TopicId;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};

use super::model::{
	ApplicationCommandCreate, ApplicationCommandResponse, ChannelResponse, FORUM_AUTO_ARCHIVE_MINUTES, ForumThreadCreate,
	GuildResponse, InteractionCallback, MessageCreate, MessageResponse, WebhookEdit, guild_icon_url,
};
use crate::{ChatPlatform, CommandSpec, InteractionRef, OutgoingMessage, SecretString};

pub const DEFAULT_API_BASE: &str = "https://discord.com/api/v10";
const GUILD_ICON_SIZE: u32 = 1024;

/// Longest rate-limit wait honoured in-line; anything longer fails the call instead.
pub(super) const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

pub(super) fn retry_delay_from_headers(headers: &HeaderMap) -> Option<Duration> {
	let delay = retry_after(headers).or_else(|| rate_limit_reset(headers))?;
	(delay <= MAX_RETRY_DELAY).then_some(delay)
}

fn retry_after(headers: &HeaderMap) -> Option<Duration> {
	let secs = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse::<f64>().ok()?;
	Duration::try_from_secs_f64(secs).ok()
}

fn rate_limit_reset(headers: &HeaderMap) -> Option<Duration> {
	let reset_unix = headers
		.get("X-RateLimit-Reset")?
		.to_str()
		.ok()?
		.trim()
		.parse::<f64>()
		.ok()?;
	let now = SystemTime::now().duration_since(UNIX_EPOCH).ok()?.as_secs_f64();
	Duration::try_from_secs_f64(reset_unix - now).ok()
}

async fn send_with_retry(req: reqwest::RequestBuilder, label: &str) -> anyhow::Result<reqwest::Response> {
	let retry_builder = req.try_clone();
	let resp = req.send().await.with_context(|| format!("discord {label} send"))?;
	let status = resp.status();

	if status == StatusCode::UNAUTHORIZED {
		let body = resp.text().await.unwrap_or_default();
		anyhow::bail!("discord auth failed (status={status}) body={body}");
	}

	if status == StatusCode::TOO_MANY_REQUESTS {
		let Some(delay) = retry_delay_from_headers(resp.headers()) else {
			warn!(label, "discord rate limited beyond retry window; giving up");
			return Ok(resp);
		};
		let Some(retry) = retry_builder else {
			return Ok(resp);
		};

		debug!(label, ?delay, "discord rate limited; retrying once");
		tokio::time::sleep(delay).await;
		let retry_resp = retry.send().await.with_context(|| format!("discord {label} retry send"))?;
		return Ok(retry_resp);
	}

	if status.is_server_error()
		&& let Some(retry) = retry_builder
	{
		tokio::time::sleep(Duration::from_millis(250)).await;
		let retry_resp = retry.send().await.with_context(|| format!("discord {label} retry send"))?;
		return Ok(retry_resp);
	}

	Ok(resp)
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response, label: &str) -> anyhow::Result<T> {
	let status = resp.status();
	let body = resp.text().await.with_context(|| format!("discord {label} read body"))?;

	if !status.is_success() {
		anyhow::bail!("discord {label} failed: status={status} body={body}");
	}

	serde_json::from_str(&body).with_context(|| format!("discord {label} parse json"))
}

async fn expect_success(resp: reqwest::Response, label: &str) -> anyhow::Result<()> {
	let status = resp.status();
	if status.is_success() {
		return Ok(());
	}
	let body = resp.text().await.unwrap_or_default();
	Err(anyhow!("discord {label} failed: status={status} body={body}"))
}

#[derive(Debug, Clone)]
pub struct DiscordRestConfig {
	pub api_base: String,
	pub token: SecretString,
	pub guild_id: String,
	pub forum_id: String,
}

/// Discord REST client scoped to one guild and one forum channel.
#[derive(Debug, Clone)]
pub struct DiscordRest {
	http: reqwest::Client,
	cfg: DiscordRestConfig,
}

impl DiscordRest {
	pub fn new(cfg: DiscordRestConfig) -> anyhow::Result<Self> {
		if cfg.token.is_empty() {
			return Err(anyhow!("missing discord bot token"));
		}

		let http = reqwest::Client::builder()
			.user_agent("DiscordBot (https://github.com/jukebox-bot, 0.1)")
			.timeout(Duration::from_secs(15))
			.build()
			.context("build reqwest client")?;

		Ok(Self { http, cfg })
	}

	fn url(&self, path: &str) -> String {
		format!("{}{}", self.cfg.api_base.trim_end_matches('/'), path)
	}

	fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
		req.header("Authorization", format!("Bot {}", self.cfg.token.expose()))
	}

	async fn list_commands(&self, application_id: &str) -> anyhow::Result<Vec<ApplicationCommandResponse>> {
		let path = format!("/applications/{application_id}/guilds/{}/commands", self.cfg.guild_id);
		let resp = send_with_retry(self.authed(self.http.get(self.url(&path))), "GET guild commands").await?;
		read_json(resp, "GET guild commands").await
	}

	async fn delete_command(&self, application_id: &str, command_id: &str) -> anyhow::Result<()> {
		let path = format!(
			"/applications/{application_id}/guilds/{}/commands/{command_id}",
			self.cfg.guild_id
		);
		let resp = send_with_retry(self.authed(self.http.delete(self.url(&path))), "DELETE guild command").await?;
		expect_success(resp, "DELETE guild command").await
	}
}

#[async_trait::async_trait]
impl ChatPlatform for DiscordRest {
	async fn create_topic(&self, title: &str, message: &OutgoingMessage) -> anyhow::Result<TopicId> {
		let path = format!("/channels/{}/threads", self.cfg.forum_id);
		let body = ForumThreadCreate {
			name: title,
			auto_archive_duration: FORUM_AUTO_ARCHIVE_MINUTES,
			message: MessageCreate::from(message),
		};

		let resp = send_with_retry(self.authed(self.http.post(self.url(&path))).json(&body), "POST forum thread").await?;
		let thread: ChannelResponse = read_json(resp, "POST forum thread").await?;
		info!(thread_id = %thread.id, name = thread.name.as_deref().unwrap_or(title), "created forum topic");

		TopicId::new(thread.id).context("discord returned an empty thread id")
	}

	async fn send_to_topic(&self, topic: &TopicId, message: &OutgoingMessage) -> anyhow::Result<String> {
		let path = format!("/channels/{topic}/messages");
		let body = MessageCreate::from(message);

		let resp = send_with_retry(self.authed(self.http.post(self.url(&path))).json(&body), "POST message").await?;
		let msg: MessageResponse = read_json(resp, "POST message").await?;
		info!(message_id = %msg.id, channel_id = msg.channel_id.as_deref().unwrap_or(topic.as_str()), "sent message to topic");

		Ok(msg.id)
	}

	async fn guild_icon_url(&self) -> anyhow::Result<Option<String>> {
		let path = format!("/guilds/{}", self.cfg.guild_id);
		let resp = send_with_retry(self.authed(self.http.get(self.url(&path))), "GET guild").await?;
		let guild: GuildResponse = read_json(resp, "GET guild").await?;

		Ok(guild
			.icon
			.filter(|hash| !hash.is_empty())
			.map(|hash| guild_icon_url(&guild.id, &hash, GUILD_ICON_SIZE)))
	}

	async fn register_command(&self, application_id: &str, spec: &CommandSpec) -> anyhow::Result<()> {
		let path = format!("/applications/{application_id}/guilds/{}/commands", self.cfg.guild_id);
		let body = ApplicationCommandCreate::from(spec);

		info!(command = %spec.name, "registering command");
		let resp = send_with_retry(self.authed(self.http.post(self.url(&path))).json(&body), "POST guild command").await?;
		let created: ApplicationCommandResponse = read_json(resp, "POST guild command").await?;
		info!(command = %created.name, command_id = %created.id, "command registered");
		Ok(())
	}

	async fn unregister_commands(&self, application_id: &str) -> anyhow::Result<()> {
		let commands = self.list_commands(application_id).await?;
		for cmd in commands {
			match self.delete_command(application_id, &cmd.id).await {
				Ok(()) => info!(command = %cmd.name, "command unregistered"),
				Err(e) => error!(command = %cmd.name, error = ?e, "command unregistration failed"),
			}
		}
		Ok(())
	}

	async fn defer_response(&self, interaction: &InteractionRef) -> anyhow::Result<()> {
		let path = format!("/interactions/{}/{}/callback", interaction.id, interaction.token.0);
		let resp = send_with_retry(
			self.http.post(self.url(&path)).json(&InteractionCallback::deferred_ephemeral()),
			"POST interaction callback",
		)
		.await?;
		expect_success(resp, "POST interaction callback").await
	}

	async fn edit_response(&self, interaction: &InteractionRef, content: &str) -> anyhow::Result<()> {
		let path = format!(
			"/webhooks/{}/{}/messages/@original",
			interaction.application_id, interaction.token.0
		);
		let resp = send_with_retry(
			self.http.patch(self.url(&path)).json(&WebhookEdit { content }),
			"PATCH original response",
		)
		.await?;
		expect_success(resp, "PATCH original response").await
	}
}
