#![forbid(unsafe_code)]

mod bot;
mod config;
mod health;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use jukebox_platform::discord::{DEFAULT_API_BASE, DiscordRest, DiscordRestConfig, GatewayConfig, Presence};
use jukebox_platform::jukebox::JukeboxClient;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::bot::messages::{ACTIVITY_NAME, ACTIVITY_STATE};
use crate::bot::{Bot, BotSettings};
use crate::config::{BotConfig, CliOverrides};
use crate::health::{HealthState, spawn_health_server};

fn usage_and_exit() -> ! {
	eprintln!(
		"Usage: jukebox_bot [start] [options]\n\
\n\
Relays 19box jukebox sessions into a Discord forum channel.\n\
\n\
Options:\n\
\t--server <url>       Jukebox server URL (default: http://localhost:8080)\n\
\t-v, --verbose        Debug logging\n\
\t--logfile <path>     Log to a file, or \"stderr\" (default: stdout)\n\
\t--token <token>      Discord bot token\n\
\t--guild-id <id>      Discord guild id\n\
\t--forum-id <id>      Discord forum channel id\n\
\t--config <path>      Config file (default: ~/.jukebox-bot/config.toml)\n\
\t--help               Show this help\n\
"
	);
	std::process::exit(2)
}

fn parse_args() -> CliOverrides {
	let mut cli = CliOverrides::default();
	let mut seen_subcommand = false;

	let mut it = std::env::args().skip(1);
	while let Some(arg) = it.next() {
		let mut value = |flag: &str| {
			let v = it.next().unwrap_or_else(|| usage_and_exit());
			if v.trim().is_empty() {
				eprintln!("{flag} must be non-empty");
				usage_and_exit();
			}
			v
		};

		match arg.as_str() {
			"--help" | "-h" => usage_and_exit(),
			"start" if !seen_subcommand => seen_subcommand = true,
			"-v" | "--verbose" => cli.verbose = true,
			"--server" => cli.server_url = Some(value("--server")),
			"--logfile" => cli.logfile = Some(value("--logfile")),
			"--token" => cli.token = Some(value("--token")),
			"--guild-id" => cli.guild_id = Some(value("--guild-id")),
			"--forum-id" => cli.forum_id = Some(value("--forum-id")),
			"--config" => cli.config_path = Some(PathBuf::from(value("--config"))),
			other => {
				eprintln!("Unknown argument: {other}");
				usage_and_exit();
			}
		}
	}

	cli
}

fn log_writer(logfile: Option<&str>) -> (BoxMakeWriter, bool) {
	match logfile {
		None => (BoxMakeWriter::new(std::io::stdout), false),
		Some("stderr") => (BoxMakeWriter::new(std::io::stderr), false),
		Some(path) => match std::fs::OpenOptions::new().create(true).append(true).open(path) {
			Ok(file) => (BoxMakeWriter::new(std::sync::Mutex::new(file)), true),
			Err(e) => {
				eprintln!("failed to open log file {path}: {e}; logging to stdout");
				(BoxMakeWriter::new(std::io::stdout), false)
			}
		},
	}
}

fn init_tracing(verbose: bool, logfile: Option<&str>) {
	let default_level = if verbose { "debug" } else { "info" };
	let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.to_string());

	let (writer, to_file) = log_writer(logfile);
	let fmt_layer = tracing_subscriber::fmt::layer()
		.with_writer(writer)
		.with_ansi(!to_file)
		.with_target(to_file)
		.with_file(to_file)
		.with_line_number(to_file);

	let otlp_endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
		.ok()
		.map(|v| v.trim().to_string())
		.filter(|v| !v.is_empty());
	let base = tracing_subscriber::registry()
		.with(tracing_subscriber::EnvFilter::new(filter))
		.with(fmt_layer);

	if let Some(endpoint) = otlp_endpoint {
		use opentelemetry::global;
		use opentelemetry::trace::TracerProvider as _;
		use opentelemetry_otlp::WithExportConfig;

		match opentelemetry_otlp::SpanExporter::builder()
			.with_tonic()
			.with_endpoint(endpoint.clone())
			.build()
		{
			Ok(exporter) => {
				let tracer_provider = opentelemetry_sdk::trace::SdkTracerProvider::builder()
					.with_batch_exporter(exporter)
					.build();
				let tracer = tracer_provider.tracer("jukebox_bot");
				global::set_tracer_provider(tracer_provider);

				let otel_layer = tracing_opentelemetry::layer().with_tracer(tracer);
				base.with(otel_layer).init();
				info!(endpoint = %endpoint, "otlp tracing enabled");
			}
			Err(e) => {
				base.init();
				warn!(error = %e, "failed to initialize otlp tracing");
			}
		}
	} else {
		base.init();
	}
}

fn init_metrics(bind: Option<&str>) {
	let Some(bind) = bind else {
		return;
	};

	match bind.parse::<std::net::SocketAddr>() {
		Ok(addr) => {
			if let Err(e) = metrics_exporter_prometheus::PrometheusBuilder::new()
				.with_http_listener(addr)
				.install()
			{
				warn!(error = %e, "failed to start metrics exporter");
			} else {
				info!(%addr, "metrics exporter listening");
			}
		}
		Err(e) => {
			warn!(error = %e, %bind, "invalid metrics bind address (expected host:port)");
		}
	}
}

fn exit_with_config_error(err: &anyhow::Error) -> ! {
	eprintln!("error: {err:#}");
	eprintln!("hint: set it in the config file, the environment, or on the command line (see --help)");
	std::process::exit(1)
}

fn build_bot(cfg: &BotConfig) -> anyhow::Result<Bot> {
	// `validate` ran already; these are present.
	let token = cfg.discord.token.clone().context("discord bot token")?;
	let guild_id = cfg.discord.guild_id.clone().context("discord guild id")?;
	let forum_id = cfg.discord.forum_id.clone().context("discord forum id")?;

	let service = JukeboxClient::new(&cfg.server_url).context("build jukebox client")?;
	let platform = DiscordRest::new(DiscordRestConfig {
		api_base: cfg
			.discord
			.api_base
			.clone()
			.unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
		token: token.clone(),
		guild_id,
		forum_id,
	})
	.context("build discord client")?;

	let mut gateway = GatewayConfig::new(
		token,
		Presence {
			name: ACTIVITY_NAME.to_string(),
			state: ACTIVITY_STATE.to_string(),
		},
	);
	if let Some(url) = cfg.discord.gateway_url.clone() {
		gateway.url = url;
	}

	Ok(Bot::new(
		Arc::new(service),
		Arc::new(platform),
		BotSettings {
			gateway,
			notification_capacity: cfg.notification_buffer,
			request_timeout: cfg.request_timeout,
		},
	))
}

async fn shutdown_signal() {
	#[cfg(unix)]
	{
		match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
			Ok(mut sigterm) => {
				tokio::select! {
					_ = tokio::signal::ctrl_c() => {}
					_ = sigterm.recv() => {}
				}
			}
			Err(e) => {
				warn!(error = %e, "failed to install SIGTERM handler");
				let _ = tokio::signal::ctrl_c().await;
			}
		}
	}

	#[cfg(not(unix))]
	{
		let _ = tokio::signal::ctrl_c().await;
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let _ = dotenvy::dotenv();

	let cli = parse_args();

	let config_path = match cli.config_path.clone() {
		Some(path) => path,
		None => crate::config::default_config_path()?,
	};
	let (cfg, env_overrides) = crate::config::load_bot_config_from_path(&config_path, &cli)
		.unwrap_or_else(|e| exit_with_config_error(&e));

	init_tracing(cfg.verbose, cfg.logfile.as_deref());
	info!(
		path = %config_path.display(),
		?env_overrides,
		"loaded bot config (toml + env + flags)"
	);

	if let Err(e) = cfg.validate() {
		error!(error = %e, "invalid configuration");
		exit_with_config_error(&e);
	}

	init_metrics(cfg.metrics_bind.as_deref());

	let health_state = HealthState::new();
	if let Some(bind) = cfg.health_bind.as_deref() {
		match bind.parse::<std::net::SocketAddr>() {
			Ok(addr) => {
				spawn_health_server(addr, health_state.clone());
				info!(%addr, "health server listening");
			}
			Err(e) => warn!(error = %e, %bind, "invalid health bind address (expected host:port)"),
		}
	}

	let bot = build_bot(&cfg)?;
	info!(server = %cfg.server_url, "starting jukebox bot");
	bot.start().await.context("start bot")?;
	health_state.mark_ready();
	info!("jukebox bot running; press Ctrl+C to exit");

	let result = tokio::select! {
		_ = shutdown_signal() => {
			info!("shutdown signal received");
			Ok(())
		}
		err = bot.wait_fatal() => {
			error!(error = ?err, "fatal error; shutting down");
			Err(err)
		}
	};

	health_state.mark_not_ready();
	if let Some(topic) = bot.current_topic() {
		info!(topic_id = %topic, "leaving session topic open");
	}
	bot.stop().await;
	result
}
