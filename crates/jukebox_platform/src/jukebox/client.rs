#![forbid(unsafe_code)]

use std::time::Duration;

use anyhow::{Context, anyhow};
use bytes::{Bytes, BytesMut};
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use jukebox_domain::{ListenerToken, UserId};
use jukebox_protocol::v1::{
	self, ConnectError, EndStreamMessage, JoinRequest, JoinResponse, RequestTrackRequest, RequestTrackResponse,
	SubscribeNotificationsRequest, procedures,
};
use jukebox_protocol::version::{CONNECT_PROTOCOL_VERSION, STREAM_JSON_CONTENT_TYPE, UNARY_JSON_CONTENT_TYPE};
use jukebox_protocol::{DEFAULT_MAX_ENVELOPE_SIZE, encode_envelope_default, try_decode_envelope_from_buffer};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::{ListenerService, RequestOutcome, WireNotificationStream};

const CONNECT_PROTOCOL_VERSION_HEADER: &str = "Connect-Protocol-Version";

/// Connect (JSON) client for `jukebox.v1.ListenerService`.
#[derive(Debug, Clone)]
pub struct JukeboxClient {
	base_url: String,
	http: reqwest::Client,
}

impl JukeboxClient {
	pub fn new(base_url: &str) -> anyhow::Result<Self> {
		let parsed = Url::parse(base_url).with_context(|| format!("invalid jukebox server url: {base_url}"))?;
		if !matches!(parsed.scheme(), "http" | "https") {
			return Err(anyhow!("jukebox server url must be http(s): {base_url}"));
		}

		let http = reqwest::Client::builder()
			.user_agent("jukebox-bot/0.x (connect)")
			.connect_timeout(Duration::from_secs(10))
			.build()
			.context("build reqwest client")?;

		Ok(Self {
			base_url: base_url.trim_end_matches('/').to_string(),
			http,
		})
	}

	fn url(&self, procedure: &str) -> String {
		format!("{}{}", self.base_url, procedure)
	}

	async fn unary<Req, Resp>(&self, procedure: &'static str, req: &Req) -> anyhow::Result<Resp>
	where
		Req: Serialize + Sync,
		Resp: DeserializeOwned,
	{
		let resp = self
			.http
			.post(self.url(procedure))
			.header(CONNECT_PROTOCOL_VERSION_HEADER, CONNECT_PROTOCOL_VERSION)
			.header(CONTENT_TYPE, UNARY_JSON_CONTENT_TYPE)
			.header(ACCEPT, UNARY_JSON_CONTENT_TYPE)
			.json(req)
			.send()
			.await
			.with_context(|| format!("jukebox {procedure} send"))?;

		let status = resp.status();
		let body = resp
			.text()
			.await
			.with_context(|| format!("jukebox {procedure} read body"))?;

		if !status.is_success() {
			return match serde_json::from_str::<ConnectError>(&body) {
				Ok(err) if !err.code.is_empty() => Err(anyhow!("jukebox {procedure} failed: status={status} error={err}")),
				_ => Err(anyhow!("jukebox {procedure} failed: status={status} body={body}")),
			};
		}

		serde_json::from_str(&body).with_context(|| format!("jukebox {procedure} parse json"))
	}
}

#[async_trait::async_trait]
impl ListenerService for JukeboxClient {
	async fn join(&self, display_name: &str, external_user_id: &UserId) -> anyhow::Result<ListenerToken> {
		let req = JoinRequest {
			display_name: display_name.to_string(),
			external_user_id: external_user_id.to_string(),
		};
		let resp: JoinResponse = self.unary(procedures::JOIN, &req).await?;
		debug!(user_id = %external_user_id, display_name, "jukebox join ok");

		ListenerToken::new(resp.listener_id).context("jukebox join returned an empty listener id")
	}

	async fn request_track(&self, token: &ListenerToken, track_ref: &str) -> anyhow::Result<RequestOutcome> {
		let req = RequestTrackRequest {
			listener_id: token.to_string(),
			track_id: track_ref.to_string(),
		};
		let resp: RequestTrackResponse = self.unary(procedures::REQUEST_TRACK, &req).await?;
		debug!(track_ref, message = %resp.message, code = %resp.code, "jukebox request track result");

		Ok(RequestOutcome {
			success: resp.success,
			message: resp.message,
			code: resp.code,
		})
	}

	async fn subscribe_notifications(&self) -> anyhow::Result<WireNotificationStream> {
		let procedure = procedures::SUBSCRIBE_NOTIFICATIONS;
		let body = encode_envelope_default(&SubscribeNotificationsRequest::default())
			.context("encode subscribe request envelope")?;

		let resp = self
			.http
			.post(self.url(procedure))
			.header(CONNECT_PROTOCOL_VERSION_HEADER, CONNECT_PROTOCOL_VERSION)
			.header(CONTENT_TYPE, STREAM_JSON_CONTENT_TYPE)
			.header(ACCEPT, STREAM_JSON_CONTENT_TYPE)
			.body(body)
			.send()
			.await
			.with_context(|| format!("jukebox {procedure} send"))?;

		let status = resp.status();
		if !status.is_success() {
			let body = resp.text().await.unwrap_or_default();
			return Err(anyhow!("jukebox {procedure} failed: status={status} body={body}"));
		}

		Ok(decode_notification_stream(resp.bytes_stream(), DEFAULT_MAX_ENVELOPE_SIZE))
	}
}

struct DecodeState {
	body: BoxStream<'static, anyhow::Result<Bytes>>,
	buf: BytesMut,
	max_envelope_size: usize,
}

/// Turn a chunked Connect streaming body into notifications.
///
/// The stream ends cleanly on an end-of-stream trailer without error, or on EOF at an
/// envelope boundary. Anything else yields one final `Err`.
pub fn decode_notification_stream<S, E>(body: S, max_envelope_size: usize) -> WireNotificationStream
where
	S: Stream<Item = Result<Bytes, E>> + Send + 'static,
	E: std::error::Error + Send + Sync + 'static,
{
	let state = DecodeState {
		body: body.map(|chunk| chunk.map_err(anyhow::Error::new)).boxed(),
		buf: BytesMut::new(),
		max_envelope_size,
	};

	futures_util::stream::unfold(Some(state), |state| async move {
		let mut st = state?;
		loop {
			match try_decode_envelope_from_buffer(&mut st.buf, st.max_envelope_size) {
				Ok(Some(envelope)) if envelope.is_end_stream() => {
					let trailer: EndStreamMessage = match envelope.decode_json() {
						Ok(t) => t,
						Err(e) => return Some((Err(anyhow::Error::new(e).context("decode end-of-stream trailer")), None)),
					};
					return trailer
						.error
						.map(|err| (Err(anyhow::Error::new(err).context("notification stream ended with error")), None));
				}
				Ok(Some(envelope)) => {
					return match envelope.decode_json::<v1::Notification>() {
						Ok(n) => Some((Ok(n), Some(st))),
						Err(e) => Some((Err(anyhow::Error::new(e).context("decode notification")), None)),
					};
				}
				Ok(None) => {}
				Err(e) => return Some((Err(anyhow::Error::new(e).context("decode notification envelope")), None)),
			}

			match st.body.next().await {
				Some(Ok(chunk)) => st.buf.extend_from_slice(&chunk),
				Some(Err(e)) => return Some((Err(e.context("read notification stream")), None)),
				None if st.buf.is_empty() => return None,
				None => {
					let len = st.buf.len();
					return Some((Err(anyhow!("notification stream truncated: trailing_bytes={len}")), None));
				}
			}
		}
	})
	.boxed()
}
