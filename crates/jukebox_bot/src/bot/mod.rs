#![forbid(unsafe_code)]

pub mod commands;
pub mod coordinator;
pub mod dedup;
pub mod messages;
pub mod tokens;
pub mod topic;

#[cfg(test)]
mod commands_tests;
#[cfg(test)]
mod coordinator_tests;
#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context as _, anyhow};
use jukebox_domain::TopicId;
use jukebox_platform::discord::{GatewayConfig, GatewayEvent, GatewaySession, ReadyInfo};
use jukebox_platform::jukebox::{Subscription, SubscriptionHandle, subscribe};
use jukebox_platform::{ChatPlatform, ListenerService, Notification};
use parking_lot::RwLock;
use tokio::sync::{Mutex, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use self::commands::CommandHandler;
use self::coordinator::LifecycleCoordinator;
use self::dedup::PostedTracks;
use self::messages::GuildIcon;
use self::tokens::TokenCache;
use self::topic::TopicCell;

const GATEWAY_EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct BotSettings {
	pub gateway: GatewayConfig,
	pub notification_capacity: usize,
	pub request_timeout: Duration,
}

struct Running {
	cancel: CancellationToken,
	tasks: JoinSet<()>,
	subscription: SubscriptionHandle,
}

/// Relays jukebox notifications into a Discord forum and serves `/req`.
pub struct Bot {
	service: Arc<dyn ListenerService>,
	platform: Arc<dyn ChatPlatform>,
	settings: BotSettings,
	topic: TopicCell,
	posted: Arc<PostedTracks>,
	tokens: Arc<TokenCache>,
	guild_icon: GuildIcon,
	application_id: Arc<RwLock<Option<String>>>,
	started: AtomicBool,
	running: Mutex<Option<Running>>,
	fatal_tx: mpsc::Sender<anyhow::Error>,
	fatal_rx: Mutex<mpsc::Receiver<anyhow::Error>>,
}

impl Bot {
	pub fn new(service: Arc<dyn ListenerService>, platform: Arc<dyn ChatPlatform>, settings: BotSettings) -> Self {
		// Single slot: the first fatal condition wins.
		let (fatal_tx, fatal_rx) = mpsc::channel(1);
		Self {
			service,
			platform,
			settings,
			topic: TopicCell::default(),
			posted: Arc::new(PostedTracks::default()),
			tokens: Arc::new(TokenCache::default()),
			guild_icon: GuildIcon::default(),
			application_id: Arc::new(RwLock::new(None)),
			started: AtomicBool::new(false),
			running: Mutex::new(None),
			fatal_tx,
			fatal_rx: Mutex::new(fatal_rx),
		}
	}

	/// Snapshot of the active session topic.
	pub fn current_topic(&self) -> Option<TopicId> {
		self.topic.load()
	}

	/// Subscribe to notifications and connect the gateway.
	///
	/// Fails if either cannot be established, or if the bot was already started.
	pub async fn start(&self) -> anyhow::Result<()> {
		if self.started.swap(true, Ordering::SeqCst) {
			return Err(anyhow!("bot already started"));
		}

		let cancel = CancellationToken::new();
		let Subscription { notifications, handle } = subscribe(
			Arc::clone(&self.service),
			&cancel,
			self.settings.notification_capacity,
		)
		.await
		.context("subscribe to jukebox notifications")?;

		let session = match GatewaySession::connect(self.settings.gateway.clone()).await {
			Ok(session) => session,
			Err(e) => {
				handle.unsubscribe().await;
				return Err(e.context("open discord gateway"));
			}
		};

		let (events_tx, events_rx) = mpsc::channel(GATEWAY_EVENT_CAPACITY);
		let mut tasks = JoinSet::new();

		let fatal_tx = self.fatal_tx.clone();
		let gateway_cancel = cancel.clone();
		tasks.spawn(async move {
			if let Err(e) = session.run(events_tx, gateway_cancel).await {
				error!(error = ?e, "discord gateway failed");
				let _ = fatal_tx.try_send(e.context("discord gateway"));
			}
		});

		let events = EventLoop {
			platform: Arc::clone(&self.platform),
			commands: CommandHandler::new(
				Arc::clone(&self.service),
				Arc::clone(&self.platform),
				Arc::clone(&self.tokens),
				self.settings.request_timeout,
			),
			coordinator: Some((
				LifecycleCoordinator::new(
					Arc::clone(&self.platform),
					self.topic.clone(),
					Arc::clone(&self.posted),
					self.guild_icon.clone(),
					self.fatal_tx.clone(),
				),
				notifications,
			)),
			guild_icon: self.guild_icon.clone(),
			application_id: Arc::clone(&self.application_id),
			fatal_tx: self.fatal_tx.clone(),
			cancel: cancel.clone(),
		};
		tasks.spawn(events.run(events_rx));

		*self.running.lock().await = Some(Running {
			cancel,
			tasks,
			subscription: handle,
		});
		info!("bot started");
		Ok(())
	}

	/// Wait for the first fatal condition reported after `start`.
	pub async fn wait_fatal(&self) -> anyhow::Error {
		let mut rx = self.fatal_rx.lock().await;
		match rx.recv().await {
			Some(err) => err,
			// The bot holds a sender, so the channel never closes while `self` is alive.
			None => std::future::pending().await,
		}
	}

	/// Shut down and wait for background work to drain. Safe to call more than once.
	pub async fn stop(&self) {
		let Some(mut running) = self.running.lock().await.take() else {
			debug!("bot not running; nothing to stop");
			return;
		};

		info!("stopping bot");
		running.cancel.cancel();

		let application_id = self.application_id.read().clone();
		if let Some(application_id) = application_id
			&& let Err(e) = self.platform.unregister_commands(&application_id).await
		{
			warn!(error = ?e, "failed to unregister commands");
		}

		while let Some(joined) = running.tasks.join_next().await {
			if let Err(e) = joined {
				warn!(error = %e, "bot task panicked");
			}
		}

		running.subscription.unsubscribe().await;
		info!("bot stopped");
	}
}

/// Routes gateway events: READY bootstraps the session surface, commands fan out.
struct EventLoop {
	platform: Arc<dyn ChatPlatform>,
	commands: CommandHandler,
	coordinator: Option<(LifecycleCoordinator, mpsc::Receiver<Notification>)>,
	guild_icon: GuildIcon,
	application_id: Arc<RwLock<Option<String>>>,
	fatal_tx: mpsc::Sender<anyhow::Error>,
	cancel: CancellationToken,
}

impl EventLoop {
	async fn run(mut self, mut events: mpsc::Receiver<GatewayEvent>) {
		let mut coordinator_task: Option<JoinHandle<()>> = None;

		loop {
			let event = tokio::select! {
				biased;
				_ = self.cancel.cancelled() => break,
				ev = events.recv() => match ev {
					Some(ev) => ev,
					None => break,
				},
			};

			match event {
				GatewayEvent::Ready(ready) => {
					if let Err(e) = self.on_ready(&ready).await {
						error!(error = ?e, "failed to prepare guild");
						let _ = self.fatal_tx.try_send(e);
						break;
					}
					if let Some((coordinator, notifications)) = self.coordinator.take() {
						coordinator_task = Some(tokio::spawn(coordinator.run(notifications, self.cancel.clone())));
					}
				}
				GatewayEvent::Command(invocation) => {
					self.commands.dispatch(invocation);
				}
			}
		}

		if let Some(task) = coordinator_task {
			self.cancel.cancelled().await;
			if let Err(e) = task.await {
				warn!(error = %e, "lifecycle coordinator panicked");
			}
		}
	}

	async fn on_ready(&self, ready: &ReadyInfo) -> anyhow::Result<()> {
		info!(user = %ready.username, application_id = %ready.application_id, "discord ready");
		*self.application_id.write() = Some(ready.application_id.clone());

		let icon = self.platform.guild_icon_url().await.context("fetch guild")?;
		self.guild_icon.set(icon);

		if let Err(e) = self
			.platform
			.register_command(&ready.application_id, &messages::command_spec())
			.await
		{
			error!(error = ?e, "failed to register command");
		}
		Ok(())
	}
}
