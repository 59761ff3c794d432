#![forbid(unsafe_code)]

use std::sync::Arc;

use futures_util::StreamExt;
use jukebox_domain::{Requester, SessionInfo, SessionState, TrackId, TrackInfo, TrackState};
use jukebox_protocol::v1;
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{ListenerService, Notification, WireNotificationStream};

/// Queue depth between the receive loop and its consumer.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 10;

/// An established notification subscription.
#[derive(Debug)]
pub struct Subscription {
	/// Closed after the terminal notification, or when the subscription is cancelled.
	pub notifications: mpsc::Receiver<Notification>,
	pub handle: SubscriptionHandle,
}

/// Owns the receive loop of a subscription.
#[derive(Debug)]
pub struct SubscriptionHandle {
	cancel: CancellationToken,
	task: JoinHandle<()>,
}

impl SubscriptionHandle {
	/// Stop the receive loop and wait for it to exit.
	pub async fn unsubscribe(self) {
		self.cancel.cancel();
		if let Err(e) = self.task.await {
			warn!(error = %e, "notification receive loop panicked");
		}
	}
}

/// Subscribe to the playback service and spawn the receive loop.
///
/// The loop stops when `cancel` fires; it then emits nothing further.
pub async fn subscribe(
	service: Arc<dyn ListenerService>,
	cancel: &CancellationToken,
	capacity: usize,
) -> anyhow::Result<Subscription> {
	let stream = service.subscribe_notifications().await?;
	info!(capacity, "notification subscription established");

	let (tx, rx) = mpsc::channel(capacity.max(1));
	let cancel = cancel.child_token();
	let task = tokio::spawn(receive_loop(stream, tx, cancel.clone()));

	Ok(Subscription {
		notifications: rx,
		handle: SubscriptionHandle { cancel, task },
	})
}

async fn receive_loop(mut stream: WireNotificationStream, tx: mpsc::Sender<Notification>, cancel: CancellationToken) {
	info!("receiving notifications");

	let terminal = loop {
		let next = tokio::select! {
			biased;
			_ = cancel.cancelled() => {
				info!("stopped receiving notifications");
				return;
			}
			next = stream.next() => next,
		};

		match next {
			Some(Ok(wire)) => {
				info!(
					sequence_no = wire.sequence_no,
					kind = ?wire.r#type,
					session_state = ?wire.session_state(),
					track_state = ?wire.track_state(),
					"received notification"
				);

				let Some(notification) = classify(wire) else {
					continue;
				};
				if !forward(&tx, &cancel, notification).await {
					return;
				}
			}
			Some(Err(e)) => {
				error!(error = ?e, "notification stream failed");
				break Notification::StreamError(e.context("error receiving notification"));
			}
			None => {
				warn!("notification stream closed by server");
				break Notification::StreamClosed;
			}
		}
	};

	counter!("jukebox_notification_stream_terminated_total", "kind" => terminal.kind()).increment(1);
	forward(&tx, &cancel, terminal).await;
	info!("stopped receiving notifications");
}

/// Blocking enqueue; gives up only on cancellation or when the consumer is gone.
async fn forward(tx: &mpsc::Sender<Notification>, cancel: &CancellationToken, notification: Notification) -> bool {
	let kind = notification.kind();
	tokio::select! {
		biased;
		_ = cancel.cancelled() => false,
		res = tx.send(notification) => {
			if res.is_err() {
				debug!(kind, "notification consumer dropped");
				return false;
			}
			counter!("jukebox_notifications_total", "kind" => kind).increment(1);
			true
		}
	}
}

/// Map a wire notification onto the closed notification set.
///
/// Combinations with no meaning to the relay (including unknown enum values) map to `None`.
pub fn classify(wire: v1::Notification) -> Option<Notification> {
	let session_state = wire.session_state();
	let track_state = wire.track_state();
	let session = wire.session_info.map(session_from_wire).unwrap_or_default();

	if wire.r#type.is_state_event() {
		return match session_state {
			v1::SessionState::Running => Some(Notification::SessionStart {
				session,
				track: wire.track_info.and_then(track_from_wire),
			}),
			v1::SessionState::Terminated => Some(Notification::SessionEnd { session }),
			v1::SessionState::Unspecified => None,
		};
	}

	if wire.r#type == v1::NotificationType::ChangeTrack && track_state == v1::TrackState::Started {
		let track = wire.track_info.and_then(track_from_wire)?;
		return Some(Notification::TrackStart { session, track });
	}

	None
}

fn session_from_wire(s: v1::SessionInfo) -> SessionInfo {
	let state = match s.state {
		v1::SessionState::Running => SessionState::Running,
		v1::SessionState::Terminated => SessionState::Terminated,
		v1::SessionState::Unspecified => SessionState::Unspecified,
	};
	let scheduled_end_time = Some(s.scheduled_end_time).filter(|t| !t.trim().is_empty());

	SessionInfo {
		state,
		playlist_name: s.playlist_name,
		playlist_url: s.playlist_url,
		scheduled_end_time,
		keywords: s.keywords,
	}
}

fn track_from_wire(t: v1::TrackInfo) -> Option<TrackInfo> {
	let id = match TrackId::new(t.track_id) {
		Ok(id) => id,
		Err(_) => {
			warn!(name = %t.name, "dropping track without id");
			return None;
		}
	};
	let state = match t.state {
		v1::TrackState::Started => TrackState::Started,
		v1::TrackState::Playing => TrackState::Playing,
		v1::TrackState::Ended => TrackState::Other,
		v1::TrackState::Unspecified => TrackState::Unspecified,
	};

	Some(TrackInfo {
		id,
		requester: Requester::from_parts(&t.requester_external_user_id, &t.requester_name),
		name: t.name,
		artists: t.artists,
		url: t.url,
		album_art_url: t.album_art_url,
		state,
	})
}
