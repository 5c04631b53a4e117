//! Seam to the Telegram platform client.
//!
//! The kernel's control flow only ever sees these traits; the teloxide-backed
//! [`TelegramClient`] is the production implementation. Keeping the seam
//! trait-shaped lets every mode handler run against in-memory doubles in
//! tests.

use std::sync::Mutex;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::payloads::{GetUpdatesSetters, SetWebhookSetters};
use teloxide::types::{AllowedUpdate, InputFile, Update};
use tracing::{debug, warn};
use url::Url;

use crate::config::{Config, WebhookConfig};
use crate::error::KernelError;

/// Result of a platform API call, reported to the operator as a description
/// line rather than raised as an error.
#[derive(Debug, Clone)]
pub struct ApiOutcome {
    pub ok: bool,
    pub description: String,
}

impl ApiOutcome {
    pub fn success(description: impl Into<String>) -> Self {
        Self {
            ok: true,
            description: description.into(),
        }
    }

    pub fn failure(description: impl Into<String>) -> Self {
        Self {
            ok: false,
            description: description.into(),
        }
    }
}

/// Webhook management calls.
#[async_trait]
pub trait BotApi: Send + Sync {
    async fn set_webhook(&self, url: &str, options: &WebhookConfig) -> ApiOutcome;
    async fn delete_webhook(&self) -> ApiOutcome;

    /// Raw webhook status structure, for operator inspection.
    async fn webhook_info(&self) -> ApiOutcome;
}

/// Retrieves pending updates and feeds them to the processing collaborator.
/// Returns how many updates were handled this round.
#[async_trait]
pub trait UpdateSource: Send + Sync {
    async fn poll(&self) -> Result<usize, KernelError>;
}

/// The update-processing collaborator. Per-command business logic lives
/// behind this trait and is not part of the kernel.
#[async_trait]
pub trait UpdateSink: Send + Sync {
    async fn process(&self, update: Update) -> Result<(), KernelError>;
}

/// Default sink: records the update and moves on. Stands in until a command
/// dispatcher is wired up.
#[derive(Debug, Default)]
pub struct TracingSink;

#[async_trait]
impl UpdateSink for TracingSink {
    async fn process(&self, update: Update) -> Result<(), KernelError> {
        debug!(update_id = update.id.0, "received update");
        Ok(())
    }
}

/// teloxide-backed platform client.
pub struct TelegramClient {
    bot: Bot,
    sink: std::sync::Arc<dyn UpdateSink>,
    /// Next getUpdates offset; confirmed server-side on the following call.
    offset: Mutex<Option<i32>>,
}

impl TelegramClient {
    pub fn new(
        config: &Config,
        sink: std::sync::Arc<dyn UpdateSink>,
    ) -> Result<Self, KernelError> {
        let token = config.require_token()?;
        Ok(Self {
            bot: Bot::new(token),
            sink,
            offset: Mutex::new(None),
        })
    }
}

#[async_trait]
impl BotApi for TelegramClient {
    async fn set_webhook(&self, url: &str, options: &WebhookConfig) -> ApiOutcome {
        let parsed = match Url::parse(url) {
            Ok(u) => u,
            Err(err) => return ApiOutcome::failure(format!("invalid webhook URL: {err}")),
        };

        let mut request = self.bot.set_webhook(parsed);
        if let Some(n) = options.max_connections {
            request = request.max_connections(n);
        }
        let allowed = allowed_updates(&options.allowed_updates);
        if !allowed.is_empty() {
            request = request.allowed_updates(allowed);
        }
        if let Some(cert) = &options.certificate {
            request = request.certificate(InputFile::file(cert.clone()));
        }

        match request.await {
            Ok(_) => ApiOutcome::success("Webhook was set"),
            Err(err) => ApiOutcome::failure(err.to_string()),
        }
    }

    async fn delete_webhook(&self) -> ApiOutcome {
        match self.bot.delete_webhook().await {
            Ok(_) => ApiOutcome::success("Webhook was deleted"),
            Err(err) => ApiOutcome::failure(err.to_string()),
        }
    }

    async fn webhook_info(&self) -> ApiOutcome {
        match self.bot.get_webhook_info().await {
            Ok(info) => ApiOutcome::success(format!("{info:#?}")),
            Err(err) => ApiOutcome::failure(err.to_string()),
        }
    }
}

#[async_trait]
impl UpdateSource for TelegramClient {
    async fn poll(&self) -> Result<usize, KernelError> {
        let offset = *self.offset.lock().expect("offset lock poisoned");

        let mut request = self.bot.get_updates();
        if let Some(offset) = offset {
            request = request.offset(offset);
        }

        let updates = request
            .await
            .map_err(|err| KernelError::Upstream(err.to_string()))?;

        let count = updates.len();
        for update in updates {
            let next = update.id.0 as i32 + 1;
            *self.offset.lock().expect("offset lock poisoned") = Some(next);

            if let Err(err) = self.sink.process(update).await {
                // One bad update must not poison the batch.
                warn!(%err, "update processing failed");
            }
        }

        Ok(count)
    }
}

/// Map configured update-kind names to the API enum. Unknown names are
/// skipped with a warning so a typo cannot abort registration.
fn allowed_updates(names: &[String]) -> Vec<AllowedUpdate> {
    names
        .iter()
        .filter_map(|name| match name.as_str() {
            "message" => Some(AllowedUpdate::Message),
            "edited_message" => Some(AllowedUpdate::EditedMessage),
            "channel_post" => Some(AllowedUpdate::ChannelPost),
            "edited_channel_post" => Some(AllowedUpdate::EditedChannelPost),
            "inline_query" => Some(AllowedUpdate::InlineQuery),
            "chosen_inline_result" => Some(AllowedUpdate::ChosenInlineResult),
            "callback_query" => Some(AllowedUpdate::CallbackQuery),
            "poll" => Some(AllowedUpdate::Poll),
            "poll_answer" => Some(AllowedUpdate::PollAnswer),
            "my_chat_member" => Some(AllowedUpdate::MyChatMember),
            "chat_member" => Some(AllowedUpdate::ChatMember),
            other => {
                warn!(kind = other, "unknown allowed_updates entry");
                None
            }
        })
        .collect()
}
