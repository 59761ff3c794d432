#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::anyhow;
use jukebox_domain::TrackState;
use jukebox_platform::Notification;
use proptest::prelude::*;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::coordinator::{LifecycleCoordinator, NowPlaying};
use super::dedup::PostedTracks;
use super::messages::GuildIcon;
use super::test_support::{PlatformCall, RecordingPlatform, init_test_logging, session, track};
use super::topic::TopicCell;

struct Harness {
	platform: Arc<RecordingPlatform>,
	topic: TopicCell,
	posted: Arc<PostedTracks>,
	fatal_rx: mpsc::Receiver<anyhow::Error>,
	coordinator: LifecycleCoordinator,
}

fn harness() -> Harness {
	init_test_logging();
	let platform = Arc::new(RecordingPlatform::default());
	let topic = TopicCell::default();
	let posted = Arc::new(PostedTracks::default());
	let (fatal_tx, fatal_rx) = mpsc::channel(1);
	let coordinator = LifecycleCoordinator::new(
		platform.clone(),
		topic.clone(),
		Arc::clone(&posted),
		GuildIcon::default(),
		fatal_tx,
	);
	Harness {
		platform,
		topic,
		posted,
		fatal_rx,
		coordinator,
	}
}

fn session_start(keywords: &[&str]) -> Notification {
	Notification::SessionStart {
		session: session(keywords, None),
		track: None,
	}
}

fn track_start(id: &str, name: &str) -> Notification {
	Notification::TrackStart {
		session: session(&["chill", "study"], None),
		track: track(id, name, TrackState::Started),
	}
}

fn session_end() -> Notification {
	Notification::SessionEnd {
		session: session(&["chill", "study"], None),
	}
}

#[tokio::test]
async fn session_with_repeated_track() {
	let mut h = harness();

	assert!(h.coordinator.handle(session_start(&["chill", "study"])).await.is_continue());
	let topics = h.platform.created_topics();
	assert_eq!(topics.len(), 1);
	assert!(topics[0].0.starts_with("🎵 session("));
	assert!(topics[0].1.content.contains("終了時間未定"));
	assert_eq!(h.topic.load().map(|t| t.to_string()).as_deref(), Some("thread-1"));

	let _ = h.coordinator.handle(track_start("t1", "Song A")).await;
	let sent = h.platform.sent();
	assert_eq!(sent.len(), 1);
	assert_eq!(sent[0].0, "thread-1");
	assert!(sent[0].1.content.contains("「Song A」"));

	let _ = h.coordinator.handle(track_start("t1", "Song A")).await;
	assert_eq!(h.platform.sent().len(), 1);

	let _ = h.coordinator.handle(session_end()).await;
	let sent = h.platform.sent();
	assert_eq!(sent.len(), 2);
	assert!(sent[1].1.content.contains("セッションは終了しました"));
	assert!(h.topic.load().is_none());
	assert_eq!(h.posted.len(), 0);
}

#[tokio::test]
async fn session_end_when_idle_makes_no_calls() {
	let mut h = harness();
	let _ = h.coordinator.handle(session_end()).await;
	assert!(h.platform.calls().is_empty());
}

#[tokio::test]
async fn duplicate_session_start_keeps_one_topic() {
	let mut h = harness();
	let _ = h.coordinator.handle(session_start(&[])).await;
	let _ = h.coordinator.handle(session_start(&[])).await;
	assert_eq!(h.platform.created_topics().len(), 1);
}

#[tokio::test]
async fn new_session_after_end_gets_new_topic() {
	let mut h = harness();
	let _ = h.coordinator.handle(session_start(&[])).await;
	let _ = h.coordinator.handle(track_start("t1", "Song A")).await;
	let _ = h.coordinator.handle(session_end()).await;

	let _ = h.coordinator.handle(session_start(&[])).await;
	assert_eq!(h.topic.load().map(|t| t.to_string()).as_deref(), Some("thread-2"));

	// Dedup was reset with the previous session.
	let _ = h.coordinator.handle(track_start("t1", "Song A")).await;
	let sent = h.platform.sent();
	assert_eq!(sent.last().map(|(topic, _)| topic.as_str()), Some("thread-2"));
}

#[tokio::test]
async fn embedded_playing_track_is_posted_once() {
	let mut h = harness();
	let start = || Notification::SessionStart {
		session: session(&["chill"], None),
		track: Some(track("t9", "Song Z", TrackState::Playing)),
	};

	let _ = h.coordinator.handle(start()).await;
	let _ = h.coordinator.handle(track_start("t9", "Song Z")).await;

	assert_eq!(h.platform.created_topics().len(), 1);
	assert_eq!(h.platform.sent().len(), 1);
}

#[tokio::test]
async fn embedded_track_in_other_state_is_not_posted() {
	let mut h = harness();
	let _ = h
		.coordinator
		.handle(Notification::SessionStart {
			session: session(&[], None),
			track: Some(track("t9", "Song Z", TrackState::Unspecified)),
		})
		.await;
	assert!(h.platform.sent().is_empty());
}

#[tokio::test]
async fn track_without_topic_is_skipped_and_left_unmarked() {
	let h = harness();
	let outcome = h
		.coordinator
		.post_now_playing(&track("t1", "Song A", TrackState::Started), &session(&[], None))
		.await
		.unwrap();
	assert_eq!(outcome, NowPlaying::NoTopic);
	assert!(h.platform.calls().is_empty());
	assert_eq!(h.posted.len(), 0);
}

#[tokio::test]
async fn failed_topic_creation_stays_idle_and_continues() {
	let mut h = harness();
	h.platform.fail_create.store(true, Ordering::SeqCst);

	let flow = h
		.coordinator
		.handle(Notification::SessionStart {
			session: session(&[], None),
			track: Some(track("t1", "Song A", TrackState::Started)),
		})
		.await;
	assert!(flow.is_continue());
	assert!(h.topic.load().is_none());
	assert!(h.platform.sent().is_empty());

	// Once creation works again the same track can still be announced.
	h.platform.fail_create.store(false, Ordering::SeqCst);
	let _ = h
		.coordinator
		.handle(Notification::SessionStart {
			session: session(&[], None),
			track: Some(track("t1", "Song A", TrackState::Started)),
		})
		.await;
	assert_eq!(h.platform.sent().len(), 1);
}

#[tokio::test]
async fn failed_send_keeps_dedup_marker() {
	let mut h = harness();
	let _ = h.coordinator.handle(session_start(&[])).await;

	h.platform.fail_send.store(true, Ordering::SeqCst);
	let err = h
		.coordinator
		.post_now_playing(&track("t1", "Song A", TrackState::Started), &session(&[], None))
		.await
		.unwrap_err();
	assert!(err.to_string().contains("status=500"));

	h.platform.fail_send.store(false, Ordering::SeqCst);
	let outcome = h
		.coordinator
		.post_now_playing(&track("t1", "Song A", TrackState::Started), &session(&[], None))
		.await
		.unwrap();
	assert_eq!(outcome, NowPlaying::Duplicate);
	assert_eq!(h.platform.sent().len(), 1);
}

#[tokio::test]
async fn session_end_clears_topic_even_when_post_fails() {
	let mut h = harness();
	let _ = h.coordinator.handle(session_start(&[])).await;
	h.platform.fail_send.store(true, Ordering::SeqCst);

	let _ = h.coordinator.handle(session_end()).await;
	assert!(h.topic.load().is_none());
}

#[tokio::test]
async fn stream_termination_is_reported_once() {
	let mut h = harness();
	let flow = h
		.coordinator
		.handle(Notification::StreamError(anyhow!("connection reset")))
		.await;
	assert!(flow.is_break());

	let err = h.fatal_rx.recv().await.expect("fatal");
	assert!(format!("{err:#}").contains("connection reset"));
	assert!(h.fatal_rx.try_recv().is_err());
}

#[tokio::test]
async fn run_processes_queue_in_order_until_stream_closes() {
	let Harness {
		platform,
		topic,
		mut fatal_rx,
		coordinator,
		..
	} = harness();

	let (tx, rx) = mpsc::channel(4);
	let run = tokio::spawn(coordinator.run(rx, CancellationToken::new()));

	for n in [
		session_start(&["chill", "study"]),
		track_start("t1", "Song A"),
		track_start("t1", "Song A"),
		session_end(),
		Notification::StreamClosed,
	] {
		tx.send(n).await.expect("queue");
	}

	timeout(Duration::from_secs(2), run).await.expect("timeout").expect("join");
	assert_eq!(
		platform
			.calls()
			.iter()
			.filter(|c| matches!(c, PlatformCall::CreateTopic { .. }))
			.count(),
		1
	);
	assert_eq!(platform.sent().len(), 2);
	assert!(topic.load().is_none());

	let err = fatal_rx.recv().await.expect("fatal");
	assert!(err.to_string().contains("closed"));
}

#[tokio::test]
async fn run_stops_on_cancel() {
	let h = harness();
	let (_tx, rx) = mpsc::channel::<Notification>(1);
	let cancel = CancellationToken::new();
	let run = tokio::spawn(h.coordinator.run(rx, cancel.clone()));

	cancel.cancel();
	timeout(Duration::from_secs(1), run).await.expect("timeout").expect("join");
	assert!(h.platform.calls().is_empty());
}

#[derive(Debug, Clone)]
enum Step {
	Start(Option<u8>),
	Track(u8),
	End,
}

fn step() -> impl Strategy<Value = Step> {
	prop_oneof![
		proptest::option::of(0u8..3).prop_map(Step::Start),
		(0u8..3).prop_map(Step::Track),
		Just(Step::End),
	]
}

fn step_notification(step: &Step) -> Notification {
	match step {
		Step::Start(embedded) => Notification::SessionStart {
			session: session(&["chill"], None),
			track: embedded.map(|n| track(&format!("t{n}"), &format!("Song {n}"), TrackState::Playing)),
		},
		Step::Track(n) => track_start(&format!("t{n}"), &format!("Song {n}")),
		Step::End => session_end(),
	}
}

fn announced_track(content: &str) -> Option<&str> {
	let start = content.find('「')? + '「'.len_utf8();
	let len = content[start..].find('」')?;
	Some(&content[start..start + len])
}

proptest! {
	#[test]
	fn any_sequence_keeps_one_topic_and_one_post_per_track(steps in proptest::collection::vec(step(), 1..24)) {
		let rt = tokio::runtime::Builder::new_current_thread()
			.enable_all()
			.build()
			.expect("runtime");

		rt.block_on(async {
			let mut h = harness();
			let mut activations = 0;

			for step in &steps {
				let was_active = h.topic.load().is_some();
				let created_before = h.platform.created_topics().len();

				assert!(h.coordinator.handle(step_notification(step)).await.is_continue());

				let created = h.platform.created_topics().len();
				if was_active {
					assert_eq!(created, created_before, "topic created while one was active: {steps:?}");
				}
				if !was_active && h.topic.load().is_some() {
					activations += 1;
				}
				assert!(created <= activations, "{created} topics for {activations} activations: {steps:?}");

				let mut posts: HashMap<(String, String), usize> = HashMap::new();
				for (topic, message) in h.platform.sent() {
					if let Some(name) = announced_track(&message.content) {
						*posts.entry((topic, name.to_string())).or_default() += 1;
					}
				}
				assert!(posts.values().all(|&n| n == 1), "track posted twice in one session: {posts:?} {steps:?}");
			}
		});
	}
}
