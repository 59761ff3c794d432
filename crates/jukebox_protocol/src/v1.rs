#![forbid(unsafe_code)]

//! JSON (protojson) messages of `jukebox.v1.ListenerService`.

use core::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Fully-qualified service name.
pub const LISTENER_SERVICE: &str = "jukebox.v1.ListenerService";

/// Procedure paths, relative to the service base URL.
pub mod procedures {
	pub const JOIN: &str = "/jukebox.v1.ListenerService/Join";
	pub const REQUEST_TRACK: &str = "/jukebox.v1.ListenerService/RequestTrack";
	pub const SUBSCRIBE_NOTIFICATIONS: &str = "/jukebox.v1.ListenerService/SubscribeNotifications";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
	pub display_name: String,
	pub external_user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JoinResponse {
	#[serde(default)]
	pub listener_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestTrackRequest {
	pub listener_id: String,
	pub track_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RequestTrackResponse {
	#[serde(default)]
	pub success: bool,
	#[serde(default)]
	pub message: String,
	#[serde(default)]
	pub code: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscribeNotificationsRequest {}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum NotificationType {
	#[serde(rename = "NOTIFICATION_TYPE_INITIAL_STATE")]
	InitialState,
	#[serde(rename = "NOTIFICATION_TYPE_CHANGE_STATE")]
	ChangeState,
	#[serde(rename = "NOTIFICATION_TYPE_CHANGE_TRACK")]
	ChangeTrack,
	#[default]
	#[serde(other, rename = "NOTIFICATION_TYPE_UNSPECIFIED")]
	Unspecified,
}

impl NotificationType {
	/// Initial snapshot or a session state transition.
	pub const fn is_state_event(self) -> bool {
		matches!(self, NotificationType::InitialState | NotificationType::ChangeState)
	}
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum SessionState {
	#[serde(rename = "SESSION_STATE_RUNNING")]
	Running,
	#[serde(rename = "SESSION_STATE_TERMINATED")]
	Terminated,
	#[default]
	#[serde(other, rename = "SESSION_STATE_UNSPECIFIED")]
	Unspecified,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum TrackState {
	#[serde(rename = "TRACK_STATE_STARTED")]
	Started,
	#[serde(rename = "TRACK_STATE_PLAYING")]
	Playing,
	#[serde(rename = "TRACK_STATE_ENDED")]
	Ended,
	#[default]
	#[serde(other, rename = "TRACK_STATE_UNSPECIFIED")]
	Unspecified,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionInfo {
	pub state: SessionState,
	pub playlist_name: String,
	pub playlist_url: String,
	pub scheduled_end_time: String,
	pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackInfo {
	pub track_id: String,
	pub name: String,
	pub artists: Vec<String>,
	pub url: String,
	pub album_art_url: String,
	pub requester_name: String,
	pub requester_external_user_id: String,
	pub state: TrackState,
}

/// One server-streamed notification.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", default)]
pub struct Notification {
	#[serde(deserialize_with = "deserialize_int64")]
	pub sequence_no: i64,
	#[serde(rename = "type")]
	pub r#type: NotificationType,
	pub session_info: Option<SessionInfo>,
	pub track_info: Option<TrackInfo>,
}

impl Notification {
	pub fn session_state(&self) -> SessionState {
		self.session_info.as_ref().map(|s| s.state).unwrap_or_default()
	}

	pub fn track_state(&self) -> TrackState {
		self.track_info.as_ref().map(|t| t.state).unwrap_or_default()
	}
}

/// Connect error payload (unary error body and end-of-stream `error`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConnectError {
	pub code: String,
	pub message: Option<String>,
}

impl fmt::Display for ConnectError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.message {
			Some(message) => write!(f, "{}: {message}", self.code),
			None => f.write_str(&self.code),
		}
	}
}

impl std::error::Error for ConnectError {}

/// Trailer carried by the envelope flagged `FLAG_END_STREAM`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndStreamMessage {
	pub error: Option<ConnectError>,
	pub metadata: Option<serde_json::Value>,
}

/// protojson encodes int64 as a string, but numbers are accepted too.
fn deserialize_int64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
	D: Deserializer<'de>,
{
	#[derive(Deserialize)]
	#[serde(untagged)]
	enum Int64 {
		Num(i64),
		Str(String),
	}

	match Int64::deserialize(deserializer)? {
		Int64::Num(n) => Ok(n),
		Int64::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
	}
}
