#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use jukebox_platform::{ChatPlatform, CommandInvocation, ListenerService, RequestOutcome};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::messages::{MSG_INTERNAL_ERROR, REQ_COMMAND, REQ_OPTION};
use super::tokens::TokenCache;

/// Why a command could not be carried out. Only ever logged; the user sees a generic reply.
#[derive(Debug, thiserror::Error)]
pub enum CommandFailure {
	#[error("invocation carries no user id")]
	MissingUser,

	#[error("missing required option `{0}`")]
	MissingOption(&'static str),

	#[error("join failed: {0:#}")]
	Join(anyhow::Error),

	#[error("track request failed: {0:#}")]
	Request(anyhow::Error),

	#[error("{0} timed out after {1:?}")]
	Timeout(&'static str, Duration),
}

impl CommandFailure {
	fn kind(&self) -> &'static str {
		match self {
			Self::MissingUser => "missing_user",
			Self::MissingOption(_) => "missing_option",
			Self::Join(_) => "join",
			Self::Request(_) => "request",
			Self::Timeout(..) => "timeout",
		}
	}
}

/// Runs `/req` invocations, one task each.
#[derive(Clone)]
pub struct CommandHandler {
	service: Arc<dyn ListenerService>,
	platform: Arc<dyn ChatPlatform>,
	tokens: Arc<TokenCache>,
	request_timeout: Duration,
}

impl CommandHandler {
	pub fn new(
		service: Arc<dyn ListenerService>,
		platform: Arc<dyn ChatPlatform>,
		tokens: Arc<TokenCache>,
		request_timeout: Duration,
	) -> Self {
		Self {
			service,
			platform,
			tokens,
			request_timeout,
		}
	}

	/// Spawn a task for the invocation. Commands other than `req` are ignored.
	pub fn dispatch(&self, invocation: CommandInvocation) -> Option<JoinHandle<()>> {
		if invocation.name != REQ_COMMAND {
			debug!(command = %invocation.name, "ignoring unknown command");
			return None;
		}
		let this = self.clone();
		Some(tokio::spawn(async move { this.handle(invocation).await }))
	}

	/// Acknowledge, execute, then replace the acknowledgement with the final reply.
	pub async fn handle(&self, invocation: CommandInvocation) {
		metrics::counter!("jukebox_bot_commands_total").increment(1);

		if let Err(e) = self.platform.defer_response(&invocation.interaction).await {
			error!(error = ?e, interaction_id = %invocation.interaction.id, "failed to acknowledge command");
			return;
		}

		let reply = match self.execute(&invocation).await {
			Ok(outcome) => {
				metrics::counter!("jukebox_bot_commands_succeeded_total").increment(1);
				info!(
					user_id = ?invocation.user_id,
					success = outcome.success,
					code = %outcome.code,
					"track request answered"
				);
				outcome.message
			}
			Err(failure) => {
				metrics::counter!("jukebox_bot_commands_failed_total", "reason" => failure.kind()).increment(1);
				error!(user_id = ?invocation.user_id, error = %failure, "track request failed");
				MSG_INTERNAL_ERROR.to_string()
			}
		};

		if let Err(e) = self.platform.edit_response(&invocation.interaction, &reply).await {
			error!(error = ?e, interaction_id = %invocation.interaction.id, "failed to send command reply");
		}
	}

	/// Resolve the caller's token and forward the track request.
	pub async fn execute(&self, invocation: &CommandInvocation) -> Result<RequestOutcome, CommandFailure> {
		let user = invocation.user_id.as_ref().ok_or(CommandFailure::MissingUser)?;
		let track_ref = invocation
			.string_option(REQ_OPTION)
			.ok_or(CommandFailure::MissingOption(REQ_OPTION))?;

		debug!(user_id = %user, cached = self.tokens.get(user).is_some(), "resolving listener token");
		let token = self
			.tokens
			.resolve(self.service.as_ref(), user, &invocation.display_name, self.request_timeout)
			.await?;

		tokio::time::timeout(self.request_timeout, self.service.request_track(&token, track_ref))
			.await
			.map_err(|_| CommandFailure::Timeout("request track", self.request_timeout))?
			.map_err(CommandFailure::Request)
	}
}
