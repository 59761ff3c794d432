#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::{Context, anyhow};
use futures_util::{SinkExt, StreamExt};
use metrics::counter;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep, sleep_until};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::model::{InteractionCreatePayload, ReadyPayload};
use crate::{CommandInvocation, SecretString};

pub const DEFAULT_GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

/// Guild create/update/delete events only.
pub const INTENT_GUILDS: u64 = 1 << 0;

const OP_DISPATCH: u8 = 0;
const OP_HEARTBEAT: u8 = 1;
const OP_IDENTIFY: u8 = 2;
const OP_RECONNECT: u8 = 7;
const OP_INVALID_SESSION: u8 = 9;
const OP_HELLO: u8 = 10;
const OP_HEARTBEAT_ACK: u8 = 11;

const ACTIVITY_TYPE_LISTENING: u8 = 2;

pub(crate) type GatewayWs =
	tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Close codes after which re-identifying cannot succeed.
pub fn is_fatal_close_code(code: u16) -> bool {
	matches!(code, 4004 | 4010..=4014)
}

#[derive(Debug, Clone)]
pub struct Presence {
	pub name: String,
	pub state: String,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
	pub url: String,
	pub token: SecretString,
	pub intents: u64,
	pub presence: Presence,
	pub reconnect_min_delay: Duration,
	pub reconnect_max_delay: Duration,
}

impl GatewayConfig {
	pub fn new(token: SecretString, presence: Presence) -> Self {
		Self {
			url: DEFAULT_GATEWAY_URL.to_string(),
			token,
			intents: INTENT_GUILDS,
			presence,
			reconnect_min_delay: Duration::from_millis(500),
			reconnect_max_delay: Duration::from_secs(30),
		}
	}
}

/// Identity of the bot, delivered on every READY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyInfo {
	pub user_id: String,
	pub username: String,
	pub application_id: String,
}

#[derive(Debug, Clone)]
pub enum GatewayEvent {
	Ready(ReadyInfo),
	Command(CommandInvocation),
}

#[derive(Debug, Deserialize)]
struct GatewayPayload {
	op: u8,
	#[serde(default)]
	d: Option<serde_json::Value>,
	#[serde(default)]
	s: Option<u64>,
	#[serde(default)]
	t: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HelloPayload {
	heartbeat_interval: u64,
}

#[derive(Debug)]
enum SessionEnd {
	Cancelled,
	Reconnect(String),
	Fatal { code: u16, reason: String },
}

/// A gateway connection that re-identifies on every disconnect.
pub struct GatewaySession {
	cfg: GatewayConfig,
	ws: Option<GatewayWs>,
}

impl GatewaySession {
	/// Open the first connection. Failure here is returned to the caller.
	pub async fn connect(cfg: GatewayConfig) -> anyhow::Result<Self> {
		let ws = connect_ws(&cfg.url).await?;
		info!(url = %cfg.url, "gateway connected");
		Ok(Self { cfg, ws: Some(ws) })
	}

	fn backoff_delay(attempt: u32, min: Duration, max: Duration) -> Duration {
		let pow = attempt.min(16);
		let ms = min.as_millis().saturating_mul(1u128 << pow);
		let d = Duration::from_millis(ms.min(u64::MAX as u128) as u64);
		d.min(max).max(min)
	}

	/// Run until cancelled, the consumer goes away, or a non-recoverable close.
	pub async fn run(mut self, events_tx: mpsc::Sender<GatewayEvent>, cancel: CancellationToken) -> anyhow::Result<()> {
		let mut reconnect_attempt: u32 = 0;

		loop {
			let mut ws = match self.ws.take() {
				Some(ws) => ws,
				None => {
					let delay =
						Self::backoff_delay(reconnect_attempt, self.cfg.reconnect_min_delay, self.cfg.reconnect_max_delay);
					info!(?delay, attempt = reconnect_attempt, "gateway reconnecting");
					tokio::select! {
						_ = cancel.cancelled() => return Ok(()),
						_ = sleep(delay) => {}
					}

					match connect_ws(&self.cfg.url).await {
						Ok(ws) => ws,
						Err(e) => {
							reconnect_attempt = reconnect_attempt.saturating_add(1);
							warn!(error = ?e, "gateway connect failed");
							continue;
						}
					}
				}
			};

			let (end, ready_seen) = self.session_loop(&mut ws, &events_tx, &cancel).await;
			counter!("jukebox_gateway_sessions_ended_total").increment(1);

			match end {
				SessionEnd::Cancelled => {
					let _ = ws.close(None).await;
					info!("gateway closed");
					return Ok(());
				}
				SessionEnd::Fatal { code, reason } => {
					return Err(anyhow!("gateway closed with non-recoverable code={code} reason={reason}"));
				}
				SessionEnd::Reconnect(reason) => {
					warn!(%reason, "gateway session ended");
					let _ = ws.close(None).await;
					reconnect_attempt = if ready_seen {
						0
					} else {
						reconnect_attempt.saturating_add(1)
					};
				}
			}
		}
	}

	async fn session_loop(
		&self,
		ws: &mut GatewayWs,
		events_tx: &mpsc::Sender<GatewayEvent>,
		cancel: &CancellationToken,
	) -> (SessionEnd, bool) {
		let mut seq: Option<u64> = None;
		let mut heartbeat_every: Option<Duration> = None;
		let mut next_heartbeat = Instant::now();
		let mut awaiting_ack = false;
		let mut ready_seen = false;

		loop {
			tokio::select! {
				biased;

				_ = cancel.cancelled() => return (SessionEnd::Cancelled, ready_seen),

				_ = sleep_until(next_heartbeat), if heartbeat_every.is_some() => {
					if awaiting_ack {
						return (SessionEnd::Reconnect("heartbeat ack missed".to_string()), ready_seen);
					}
					if let Err(e) = send_op(ws, OP_HEARTBEAT, json!(seq)).await {
						return (SessionEnd::Reconnect(format!("heartbeat send failed: {e:#}")), ready_seen);
					}
					awaiting_ack = true;
					if let Some(every) = heartbeat_every {
						next_heartbeat = Instant::now() + every;
					}
				}

				msg = ws.next() => {
					let Some(msg) = msg else {
						return (SessionEnd::Reconnect("gateway ws ended".to_string()), ready_seen);
					};
					let msg = match msg {
						Ok(m) => m,
						Err(e) => return (SessionEnd::Reconnect(format!("gateway ws read error: {e}")), ready_seen),
					};

					match msg {
						Message::Text(t) => {
							let payload: GatewayPayload = match serde_json::from_str(&t) {
								Ok(p) => p,
								Err(e) => {
									warn!(error = %e, "ignoring malformed gateway payload");
									continue;
								}
							};

							match payload.op {
								OP_HELLO => {
									let hello: HelloPayload = match payload.d.map(serde_json::from_value::<HelloPayload>).transpose() {
										Ok(Some(h)) => h,
										_ => return (SessionEnd::Reconnect("malformed hello".to_string()), ready_seen),
									};
									let every = Duration::from_millis(hello.heartbeat_interval.max(1));
									heartbeat_every = Some(every);
									next_heartbeat = Instant::now() + every;
									debug!(?every, "gateway hello");

									if let Err(e) = send_op(ws, OP_IDENTIFY, self.identify_payload()).await {
										return (SessionEnd::Reconnect(format!("identify send failed: {e:#}")), ready_seen);
									}
								}
								OP_HEARTBEAT => {
									if let Err(e) = send_op(ws, OP_HEARTBEAT, json!(seq)).await {
										return (SessionEnd::Reconnect(format!("heartbeat send failed: {e:#}")), ready_seen);
									}
								}
								OP_HEARTBEAT_ACK => {
									awaiting_ack = false;
								}
								OP_RECONNECT => {
									return (SessionEnd::Reconnect("server requested reconnect".to_string()), ready_seen);
								}
								OP_INVALID_SESSION => {
									return (SessionEnd::Reconnect("invalid session".to_string()), ready_seen);
								}
								OP_DISPATCH => {
									if payload.s.is_some() {
										seq = payload.s;
									}
									let event = match dispatch_event(payload.t.as_deref(), payload.d) {
										Ok(Some(ev)) => ev,
										Ok(None) => continue,
										Err(e) => {
											warn!(error = ?e, "failed to handle gateway dispatch");
											continue;
										}
									};
									if matches!(event, GatewayEvent::Ready(_)) {
										ready_seen = true;
									}
									if events_tx.send(event).await.is_err() {
										debug!("gateway event consumer dropped");
										return (SessionEnd::Cancelled, ready_seen);
									}
								}
								other => debug!(op = other, "ignoring gateway opcode"),
							}
						}

						Message::Ping(p) => {
							let _ = ws.send(Message::Pong(p)).await;
						}

						Message::Close(frame) => {
							let (code, reason) = frame
								.map(|f| (u16::from(f.code), f.reason.as_str().to_string()))
								.unwrap_or((1000, String::new()));
							if is_fatal_close_code(code) {
								return (SessionEnd::Fatal { code, reason }, ready_seen);
							}
							return (SessionEnd::Reconnect(format!("gateway closed: code={code} reason={reason}")), ready_seen);
						}

						_ => {}
					}
				}
			}
		}
	}

	fn identify_payload(&self) -> serde_json::Value {
		json!({
			"token": self.cfg.token.expose(),
			"intents": self.cfg.intents,
			"properties": {
				"os": std::env::consts::OS,
				"browser": "jukebox-bot",
				"device": "jukebox-bot",
			},
			"presence": {
				"since": null,
				"activities": [{
					"name": self.cfg.presence.name,
					"type": ACTIVITY_TYPE_LISTENING,
					"state": self.cfg.presence.state,
				}],
				"status": "online",
				"afk": false,
			},
		})
	}
}

async fn connect_ws(url: &str) -> anyhow::Result<GatewayWs> {
	let (ws, _resp) = tokio_tungstenite::connect_async(url)
		.await
		.context("connect_async to discord gateway")?;
	Ok(ws)
}

async fn send_op(ws: &mut GatewayWs, op: u8, d: serde_json::Value) -> anyhow::Result<()> {
	let text = json!({ "op": op, "d": d }).to_string();
	ws.send(Message::Text(text.into())).await.context("gateway ws send")
}

fn dispatch_event(kind: Option<&str>, data: Option<serde_json::Value>) -> anyhow::Result<Option<GatewayEvent>> {
	let Some(data) = data else {
		return Ok(None);
	};

	match kind {
		Some("READY") => {
			let ready: ReadyPayload = serde_json::from_value(data).context("parse READY")?;
			info!(user = %ready.user.username, user_id = %ready.user.id, "logged in");
			Ok(Some(GatewayEvent::Ready(ReadyInfo {
				user_id: ready.user.id,
				username: ready.user.username,
				application_id: ready.application.id,
			})))
		}
		Some("INTERACTION_CREATE") => {
			let interaction: InteractionCreatePayload =
				serde_json::from_value(data).context("parse INTERACTION_CREATE")?;
			Ok(interaction.into_invocation().map(GatewayEvent::Command))
		}
		_ => Ok(None),
	}
}
