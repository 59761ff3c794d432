#![forbid(unsafe_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use jukebox_domain::UserId;

use super::commands::{CommandFailure, CommandHandler};
use super::messages::MSG_INTERNAL_ERROR;
use super::test_support::{PlatformCall, RecordingPlatform, RecordingService, init_test_logging, invocation};
use super::tokens::TokenCache;

const TRACK_URL: &str = "https://open.spotify.com/track/abc";

fn handler(service: Arc<RecordingService>, platform: Arc<RecordingPlatform>, timeout: Duration) -> CommandHandler {
	init_test_logging();
	CommandHandler::new(service, platform, Arc::new(TokenCache::default()), timeout)
}

#[tokio::test]
async fn request_reply_passes_remote_message_through() {
	let service = Arc::new(RecordingService::default());
	let platform = Arc::new(RecordingPlatform::default());
	let h = handler(service.clone(), platform.clone(), Duration::from_secs(10));

	h.handle(invocation("i1", Some("u1"), Some(TRACK_URL))).await;

	assert_eq!(
		platform.calls(),
		vec![
			PlatformCall::Defer {
				interaction_id: "i1".to_string()
			},
			PlatformCall::Edit {
				interaction_id: "i1".to_string(),
				content: "リクエストを受け付けました".to_string(),
			},
		]
	);
	let joins = service.joins.lock().clone();
	assert_eq!(joins, vec![("Alice".to_string(), UserId::new("u1").unwrap())]);
	let requests = service.requests.lock().clone();
	assert_eq!(requests[0].0.as_str(), "token-1");
	assert_eq!(requests[0].1, TRACK_URL);
}

#[tokio::test]
async fn business_rejection_is_not_an_internal_error() {
	let service = Arc::new(RecordingService {
		outcome: jukebox_platform::RequestOutcome {
			success: false,
			message: "URLが不正です".to_string(),
			code: "INVALID_URL".to_string(),
		},
		..RecordingService::default()
	});
	let platform = Arc::new(RecordingPlatform::default());
	let h = handler(service, platform.clone(), Duration::from_secs(10));

	h.handle(invocation("i1", Some("u1"), Some("not a url"))).await;
	assert_eq!(platform.edits(), vec!["URLが不正です".to_string()]);
}

#[tokio::test]
async fn token_is_reused_for_later_requests() {
	let service = Arc::new(RecordingService::default());
	let h = handler(service.clone(), Arc::new(RecordingPlatform::default()), Duration::from_secs(10));

	h.execute(&invocation("i1", Some("u1"), Some(TRACK_URL))).await.unwrap();
	h.execute(&invocation("i2", Some("u1"), Some(TRACK_URL))).await.unwrap();
	h.execute(&invocation("i3", Some("u2"), Some(TRACK_URL))).await.unwrap();

	assert_eq!(service.join_count(), 2);
	let tokens: Vec<String> = service
		.requests
		.lock()
		.iter()
		.map(|(t, _)| t.as_str().to_string())
		.collect();
	assert_eq!(tokens, vec!["token-1", "token-1", "token-2"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_requests_share_one_join() {
	let service = Arc::new(RecordingService {
		join_delay: Duration::from_millis(50),
		..RecordingService::default()
	});
	let h = handler(service.clone(), Arc::new(RecordingPlatform::default()), Duration::from_secs(10));

	let a = {
		let h = h.clone();
		tokio::spawn(async move { h.execute(&invocation("i1", Some("u1"), Some(TRACK_URL))).await })
	};
	let b = {
		let h = h.clone();
		tokio::spawn(async move { h.execute(&invocation("i2", Some("u1"), Some(TRACK_URL))).await })
	};
	a.await.unwrap().unwrap();
	b.await.unwrap().unwrap();

	assert_eq!(service.join_count(), 1);
	let requests = service.requests.lock().clone();
	assert_eq!(requests.len(), 2);
	assert_eq!(requests[0].0, requests[1].0);
}

#[tokio::test]
async fn missing_option_makes_no_remote_calls() {
	let service = Arc::new(RecordingService::default());
	let platform = Arc::new(RecordingPlatform::default());
	let h = handler(service.clone(), platform.clone(), Duration::from_secs(10));

	let err = h.execute(&invocation("i1", Some("u1"), Some("   "))).await.unwrap_err();
	assert!(matches!(err, CommandFailure::MissingOption("url")));

	h.handle(invocation("i2", Some("u1"), None)).await;
	assert_eq!(platform.edits(), vec![MSG_INTERNAL_ERROR.to_string()]);
	assert_eq!(service.join_count(), 0);
	assert_eq!(service.request_count(), 0);
}

#[tokio::test]
async fn missing_user_makes_no_remote_calls() {
	let service = Arc::new(RecordingService::default());
	let platform = Arc::new(RecordingPlatform::default());
	let h = handler(service.clone(), platform.clone(), Duration::from_secs(10));

	h.handle(invocation("i1", None, Some(TRACK_URL))).await;
	assert_eq!(platform.edits(), vec![MSG_INTERNAL_ERROR.to_string()]);
	assert_eq!(service.join_count(), 0);
}

#[tokio::test]
async fn failed_join_is_retried_on_next_command() {
	let service = Arc::new(RecordingService {
		failing_joins: AtomicUsize::new(1),
		..RecordingService::default()
	});
	let platform = Arc::new(RecordingPlatform::default());
	let h = handler(service.clone(), platform.clone(), Duration::from_secs(10));

	h.handle(invocation("i1", Some("u1"), Some(TRACK_URL))).await;
	assert_eq!(platform.edits(), vec![MSG_INTERNAL_ERROR.to_string()]);
	assert_eq!(service.request_count(), 0);

	h.handle(invocation("i2", Some("u1"), Some(TRACK_URL))).await;
	assert_eq!(service.join_count(), 2);
	assert_eq!(service.request_count(), 1);
	assert_eq!(platform.edits()[1], "リクエストを受け付けました");
	assert_eq!(service.failing_joins.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn slow_join_times_out() {
	let service = Arc::new(RecordingService {
		join_delay: Duration::from_secs(5),
		..RecordingService::default()
	});
	let h = handler(service.clone(), Arc::new(RecordingPlatform::default()), Duration::from_millis(50));

	let err = h.execute(&invocation("i1", Some("u1"), Some(TRACK_URL))).await.unwrap_err();
	assert!(matches!(err, CommandFailure::Timeout("join", _)), "got {err}");
	assert_eq!(service.request_count(), 0);
}

#[tokio::test]
async fn failed_acknowledgement_drops_invocation() {
	let service = Arc::new(RecordingService::default());
	let platform = Arc::new(RecordingPlatform::default());
	platform.fail_defer.store(true, Ordering::SeqCst);
	let h = handler(service.clone(), platform.clone(), Duration::from_secs(10));

	h.handle(invocation("i1", Some("u1"), Some(TRACK_URL))).await;
	assert!(platform.edits().is_empty());
	assert_eq!(service.join_count(), 0);
}

#[tokio::test]
async fn dispatch_ignores_other_commands() {
	let h = handler(
		Arc::new(RecordingService::default()),
		Arc::new(RecordingPlatform::default()),
		Duration::from_secs(10),
	);
	let mut inv = invocation("i1", Some("u1"), Some(TRACK_URL));
	inv.name = "ping".to_string();
	assert!(h.dispatch(inv).is_none());

	let task = h.dispatch(invocation("i2", Some("u1"), Some(TRACK_URL))).expect("spawned");
	task.await.unwrap();
}
