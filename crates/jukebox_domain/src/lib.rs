#![forbid(unsafe_code)]

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors for parsing identifiers from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseIdError {
	#[error("empty value")]
	Empty,
	#[error("invalid format: {0}")]
	InvalidFormat(String),
}

macro_rules! string_id {
	($(#[$meta:meta])* $name:ident) => {
		$(#[$meta])*
		#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(String);

		impl $name {
			/// Create a non-empty id.
			pub fn new(id: impl Into<String>) -> Result<Self, ParseIdError> {
				let id = id.into();
				if id.trim().is_empty() {
					return Err(ParseIdError::Empty);
				}
				Ok(Self(id))
			}

			pub fn as_str(&self) -> &str {
				&self.0
			}

			pub fn into_string(self) -> String {
				self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str(&self.0)
			}
		}

		impl FromStr for $name {
			type Err = ParseIdError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s.to_string())
			}
		}
	};
}

string_id!(
	/// Chat-forum thread identifier of the active session topic.
	TopicId
);

string_id!(
	/// Track instance identifier, unique within one session.
	TrackId
);

string_id!(
	/// Stable chat-platform user identifier.
	UserId
);

string_id!(
	/// Listener id issued by the playback service on join.
	ListenerToken
);

/// Session lifecycle state as reported by the playback service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
	#[default]
	Unspecified,
	Running,
	Terminated,
}

/// Playback state of a single track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackState {
	#[default]
	Unspecified,
	Started,
	Playing,
	Other,
}

impl TrackState {
	/// Whether the track is audible right now (just started or mid-play).
	pub const fn is_now_playing(self) -> bool {
		matches!(self, TrackState::Started | TrackState::Playing)
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			TrackState::Unspecified => "unspecified",
			TrackState::Started => "started",
			TrackState::Playing => "playing",
			TrackState::Other => "other",
		}
	}
}

impl fmt::Display for TrackState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Playlist metadata of one session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
	pub state: SessionState,
	pub playlist_name: String,
	pub playlist_url: String,
	/// RFC 3339 timestamp; `None` means the end time is undetermined.
	pub scheduled_end_time: Option<String>,
	pub keywords: Vec<String>,
}

impl SessionInfo {
	pub fn keywords_joined(&self) -> String {
		self.keywords.join(", ")
	}
}

/// Who asked for a track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Requester {
	/// A user of the chat platform; rendered as a mention.
	ExternalUser(UserId),
	/// A free-text display name (possibly empty).
	Named(String),
}

impl Requester {
	/// Prefer the external user id when present, otherwise fall back to the display name.
	pub fn from_parts(external_user_id: &str, display_name: &str) -> Self {
		match UserId::new(external_user_id.to_string()) {
			Ok(id) => Requester::ExternalUser(id),
			Err(_) => Requester::Named(display_name.to_string()),
		}
	}
}

impl Default for Requester {
	fn default() -> Self {
		Requester::Named(String::new())
	}
}

/// Metadata of one track instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackInfo {
	pub id: TrackId,
	pub name: String,
	pub artists: Vec<String>,
	pub url: String,
	pub album_art_url: String,
	pub requester: Requester,
	pub state: TrackState,
}

impl TrackInfo {
	pub fn artists_joined(&self) -> String {
		self.artists.join(", ")
	}
}
