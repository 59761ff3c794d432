#![forbid(unsafe_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use jukebox_platform::SecretString;
use serde::Deserialize;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:8080";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_NOTIFICATION_BUFFER: usize = 10;

/// Default config path: `~/.jukebox-bot/config.toml`.
pub fn default_config_path() -> anyhow::Result<PathBuf> {
	let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
	Ok(home.join(".jukebox-bot").join("config.toml"))
}

/// Load the bot config from TOML, then env, then command-line overrides.
///
/// Returns the names of the settings that the environment overrode, so the
/// caller can log them once logging is up.
pub fn load_bot_config_from_path(path: &Path, cli: &CliOverrides) -> anyhow::Result<(BotConfig, Vec<&'static str>)> {
	let file_cfg = read_toml_if_exists(path)
		.with_context(|| format!("read config from {}", path.display()))?
		.unwrap_or_default();

	let mut cfg = BotConfig::from_file(file_cfg);
	let overridden = apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
	cli.apply(&mut cfg);

	Ok((cfg, overridden))
}

/// Bot config (v1).
#[derive(Debug, Clone)]
pub struct BotConfig {
	/// Base URL of the jukebox server.
	pub server_url: String,
	pub verbose: bool,
	/// `None` logs to stdout; `"stderr"` logs to stderr; anything else is a file path.
	pub logfile: Option<String>,
	/// Bound on each remote call made for a command.
	pub request_timeout: Duration,
	/// Queue depth between the notification receive loop and the coordinator.
	pub notification_buffer: usize,
	/// Optional metrics exporter bind address (host:port).
	pub metrics_bind: Option<String>,
	/// Optional health/readiness HTTP bind address (host:port).
	pub health_bind: Option<String>,
	pub discord: DiscordSettings,
}

/// Discord settings loaded by the bot.
#[derive(Debug, Clone, Default)]
pub struct DiscordSettings {
	pub token: Option<SecretString>,
	pub guild_id: Option<String>,
	/// Forum channel that hosts one thread per session.
	pub forum_id: Option<String>,
	/// REST API base URL override.
	pub api_base: Option<String>,
	/// Gateway websocket URL override.
	pub gateway_url: Option<String>,
}

impl Default for BotConfig {
	fn default() -> Self {
		Self {
			server_url: DEFAULT_SERVER_URL.to_string(),
			verbose: false,
			logfile: None,
			request_timeout: DEFAULT_REQUEST_TIMEOUT,
			notification_buffer: DEFAULT_NOTIFICATION_BUFFER,
			metrics_bind: None,
			health_bind: None,
			discord: DiscordSettings::default(),
		}
	}
}

impl BotConfig {
	fn from_file(file: FileConfig) -> Self {
		let defaults = Self::default();

		Self {
			server_url: non_empty(file.server_url).unwrap_or(defaults.server_url),
			verbose: file.verbose.unwrap_or(false),
			logfile: non_empty(file.logfile),
			request_timeout: file
				.request_timeout_secs
				.filter(|v| *v > 0)
				.map(Duration::from_secs)
				.unwrap_or(defaults.request_timeout),
			notification_buffer: file
				.notification_buffer
				.filter(|v| *v > 0)
				.unwrap_or(defaults.notification_buffer),
			metrics_bind: non_empty(file.metrics_bind),
			health_bind: non_empty(file.health_bind),
			discord: DiscordSettings {
				token: non_empty(file.discord.token).map(SecretString::new),
				guild_id: non_empty(file.discord.guild_id),
				forum_id: non_empty(file.discord.forum_id),
				api_base: non_empty(file.discord.api_base),
				gateway_url: non_empty(file.discord.gateway_url),
			},
		}
	}

	/// Check that everything needed to connect is present.
	pub fn validate(&self) -> anyhow::Result<()> {
		if self.server_url.trim().is_empty() {
			return Err(anyhow!("jukebox server URL is empty (--server or JUKEBOX_SERVER_URL)"));
		}
		if self.discord.token.as_ref().is_none_or(SecretString::is_empty) {
			return Err(anyhow!("discord bot token is required (--token or DISCORD_BOT_TOKEN)"));
		}
		if self.discord.guild_id.is_none() {
			return Err(anyhow!("discord guild id is required (--guild-id or DISCORD_GUILD_ID)"));
		}
		if self.discord.forum_id.is_none() {
			return Err(anyhow!("discord forum channel id is required (--forum-id or DISCORD_FORUM_ID)"));
		}
		Ok(())
	}
}

/// Values given on the command line; they win over file and env.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
	pub config_path: Option<PathBuf>,
	pub server_url: Option<String>,
	pub verbose: bool,
	pub logfile: Option<String>,
	pub token: Option<String>,
	pub guild_id: Option<String>,
	pub forum_id: Option<String>,
}

impl CliOverrides {
	pub fn apply(&self, cfg: &mut BotConfig) {
		if let Some(v) = non_empty(self.server_url.clone()) {
			cfg.server_url = v;
		}
		if self.verbose {
			cfg.verbose = true;
		}
		if let Some(v) = non_empty(self.logfile.clone()) {
			cfg.logfile = Some(v);
		}
		if let Some(v) = non_empty(self.token.clone()) {
			cfg.discord.token = Some(SecretString::new(v));
		}
		if let Some(v) = non_empty(self.guild_id.clone()) {
			cfg.discord.guild_id = Some(v);
		}
		if let Some(v) = non_empty(self.forum_id.clone()) {
			cfg.discord.forum_id = Some(v);
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileConfig {
	server_url: Option<String>,
	verbose: Option<bool>,
	logfile: Option<String>,
	request_timeout_secs: Option<u64>,
	notification_buffer: Option<usize>,
	metrics_bind: Option<String>,
	health_bind: Option<String>,

	#[serde(default)]
	discord: FileDiscordSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct FileDiscordSettings {
	token: Option<String>,
	guild_id: Option<String>,
	forum_id: Option<String>,
	api_base: Option<String>,
	gateway_url: Option<String>,
}

fn non_empty(v: Option<String>) -> Option<String> {
	v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn parse_env_bool(v: &str) -> Option<bool> {
	match v.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

fn read_toml_if_exists(path: &Path) -> anyhow::Result<Option<FileConfig>> {
	match fs::read_to_string(path) {
		Ok(s) => {
			let cfg: FileConfig = toml::from_str(&s).context("parse TOML")?;
			Ok(Some(cfg))
		}
		Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
		Err(e) => Err(anyhow!(e).context("read config file")),
	}
}

fn apply_env_overrides(cfg: &mut BotConfig, env: impl Fn(&str) -> Option<String>) -> Vec<&'static str> {
	let mut overridden = Vec::new();
	let var = |key: &str| non_empty(env(key));

	if let Some(v) = var("JUKEBOX_SERVER_URL") {
		cfg.server_url = v;
		overridden.push("server_url");
	}

	if let Some(v) = var("VERBOSE")
		&& let Some(verbose) = parse_env_bool(&v)
	{
		cfg.verbose = verbose;
		overridden.push("verbose");
	}

	if let Some(v) = var("LOGFILE") {
		cfg.logfile = Some(v);
		overridden.push("logfile");
	}

	if let Some(v) = var("JUKEBOX_REQUEST_TIMEOUT_SECS")
		&& let Ok(secs) = v.parse::<u64>()
		&& secs > 0
	{
		cfg.request_timeout = Duration::from_secs(secs);
		overridden.push("request_timeout");
	}

	if let Some(v) = var("JUKEBOX_NOTIFICATION_BUFFER")
		&& let Ok(buffer) = v.parse::<usize>()
		&& buffer > 0
	{
		cfg.notification_buffer = buffer;
		overridden.push("notification_buffer");
	}

	if let Some(v) = var("JUKEBOX_METRICS_BIND") {
		cfg.metrics_bind = Some(v);
		overridden.push("metrics_bind");
	}

	if let Some(v) = var("JUKEBOX_HEALTH_BIND") {
		cfg.health_bind = Some(v);
		overridden.push("health_bind");
	}

	if let Some(v) = var("DISCORD_BOT_TOKEN") {
		cfg.discord.token = Some(SecretString::new(v));
		overridden.push("discord.token");
	}

	if let Some(v) = var("DISCORD_GUILD_ID") {
		cfg.discord.guild_id = Some(v);
		overridden.push("discord.guild_id");
	}

	if let Some(v) = var("DISCORD_FORUM_ID") {
		cfg.discord.forum_id = Some(v);
		overridden.push("discord.forum_id");
	}

	if let Some(v) = var("DISCORD_API_BASE") {
		cfg.discord.api_base = Some(v);
		overridden.push("discord.api_base");
	}

	if let Some(v) = var("DISCORD_GATEWAY_URL") {
		cfg.discord.gateway_url = Some(v);
		overridden.push("discord.gateway_url");
	}

	overridden
}
