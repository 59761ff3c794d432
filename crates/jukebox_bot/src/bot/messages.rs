#![forbid(unsafe_code)]

use std::sync::Arc;

use chrono::{DateTime, Local};
use jukebox_domain::{Requester, SessionInfo, TrackInfo};
use jukebox_platform::{CommandSpec, Embed, EmbedField, EmbedFooter, OutgoingMessage};
use parking_lot::RwLock;

pub const SPOTIFY_COLOR: u32 = 0x1DB954;
const SPOTIFY_FOOTER_TEXT: &str = "Spotify";
const SPOTIFY_FOOTER_ICON: &str =
	"https://storage.googleapis.com/pr-newsroom-wp/1/2023/05/Spotify_Primary_Logo_RGB_Green.png";

pub const MSG_INTERNAL_ERROR: &str = "受付に失敗しました(内部エラー)";
pub const MSG_SESSION_END_BODY: &str = "🔊 セッションは終了しました。\n\n本日のプレイリストはコチラです。\n";
const MSG_TIME_UNDETERMINED: &str = "終了時間未定";
const KEYWORD_FIELD: &str = "Keyword";

pub const ACTIVITY_NAME: &str = "19box Discord Bot";
pub const ACTIVITY_STATE: &str = "🎵 Spotifyの曲を共有中";

pub const REQ_COMMAND: &str = "req";
pub const REQ_OPTION: &str = "url";
const REQ_COMMAND_DESCRIPTION: &str = "楽曲リクエスト受付コマンド";
const REQ_OPTION_DESCRIPTION: &str = "Spotifyの楽曲URLを入力してください";

const TOPIC_TITLE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M";
const DISPLAY_TIME_FORMAT: &str = "%H:%M";

/// Guild icon shown as the thumbnail of session messages; refreshed on every READY.
#[derive(Debug, Clone, Default)]
pub struct GuildIcon(Arc<RwLock<Option<String>>>);

impl GuildIcon {
	pub fn set(&self, url: Option<String>) {
		*self.0.write() = url;
	}

	pub fn get(&self) -> Option<String> {
		self.0.read().clone()
	}
}

pub fn command_spec() -> CommandSpec {
	CommandSpec {
		name: REQ_COMMAND.to_string(),
		description: REQ_COMMAND_DESCRIPTION.to_string(),
		option_name: REQ_OPTION.to_string(),
		option_description: REQ_OPTION_DESCRIPTION.to_string(),
	}
}

pub fn topic_title(now: DateTime<Local>) -> String {
	format!("🎵 session({})", now.format(TOPIC_TITLE_TIME_FORMAT))
}

/// `"HH:MM終了予定"` in local time, or `"終了時間未定"` when absent or unparsable.
pub fn format_scheduled_end(end_time: Option<&str>) -> String {
	end_time
		.map(str::trim)
		.filter(|s| !s.is_empty())
		.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
		.map(|t| format!("{}終了予定", t.with_timezone(&Local).format(DISPLAY_TIME_FORMAT)))
		.unwrap_or_else(|| MSG_TIME_UNDETERMINED.to_string())
}

pub fn session_start_message(session: &SessionInfo, guild_icon: Option<String>) -> OutgoingMessage {
	let content = format!(
		"🔊 セッションを開始しました。\n\n🔚: {}\n",
		format_scheduled_end(session.scheduled_end_time.as_deref())
	);
	session_message(content, session, guild_icon)
}

pub fn session_end_message(session: &SessionInfo, guild_icon: Option<String>) -> OutgoingMessage {
	session_message(MSG_SESSION_END_BODY.to_string(), session, guild_icon)
}

fn session_message(content: String, session: &SessionInfo, guild_icon: Option<String>) -> OutgoingMessage {
	OutgoingMessage {
		content,
		embed: Some(Embed {
			title: format!("🎶 {}", session.playlist_name),
			description: None,
			url: session.playlist_url.clone(),
			color: SPOTIFY_COLOR,
			thumbnail_url: guild_icon,
			footer: Some(spotify_footer()),
			fields: keyword_fields(session),
		}),
	}
}

pub fn now_playing_message(track: &TrackInfo, session: &SessionInfo) -> OutgoingMessage {
	let artists = track.artists_joined();
	let requester = match &track.requester {
		Requester::ExternalUser(id) => format!("selected by <@{id}>"),
		Requester::Named(name) => format!("selected by {name}"),
	};

	OutgoingMessage {
		content: format!("🎙️ nowplaying「{}」{artists}\n\n{requester}\n", track.name),
		embed: Some(Embed {
			title: format!("🎵 {}", track.name),
			description: Some(format!("🎤 {artists}")),
			url: track.url.clone(),
			color: SPOTIFY_COLOR,
			thumbnail_url: Some(track.album_art_url.clone()).filter(|u| !u.is_empty()),
			footer: Some(spotify_footer()),
			fields: keyword_fields(session),
		}),
	}
}

fn spotify_footer() -> EmbedFooter {
	EmbedFooter {
		text: SPOTIFY_FOOTER_TEXT.to_string(),
		icon_url: Some(SPOTIFY_FOOTER_ICON.to_string()),
	}
}

fn keyword_fields(session: &SessionInfo) -> Vec<EmbedField> {
	let keywords = session.keywords_joined();
	if keywords.is_empty() {
		return Vec::new();
	}
	vec![EmbedField {
		name: KEYWORD_FIELD.to_string(),
		value: keywords,
	}]
}
