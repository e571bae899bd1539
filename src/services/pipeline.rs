//! Admission of inbound chat messages.
//!
//! A request passes, in order: the rate-limit gate, wire-shape and presence
//! checks, text validation, image validation, then sanitization and
//! encoding. The first rejection ends the pass; nothing before acceptance
//! touches storage or the provider.

use std::sync::Arc;
use std::time::Instant;
use validator::Validate;

use crate::error::AppError;
use crate::modules::chat::crud::MessageStore;
use crate::modules::chat::model::{Message, Role};
use crate::modules::chat::schema::ChatRequest;
use crate::security::image::validate_image_batch;
use crate::security::rate_limit::RateLimiter;
use crate::security::sanitizer::{sanitize, sanitize_file_name};
use crate::security::text::validate_message;
use crate::security::Rejection;
use crate::services::content::{self, MessageContent};
use crate::services::llm::{ChatProvider, ConversationMessage};

/// A request that cleared every check, ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct AcceptedMessage {
    pub content: MessageContent,
    pub stored: String,
}

#[derive(Debug, Clone)]
pub struct RelayOutcome {
    pub user_message: Message,
    pub assistant_message: Message,
}

fn rejected(identity: &str, rejection: Rejection) -> AppError {
    if rejection.is_security() {
        tracing::warn!(client_id = %identity, reason = %rejection, "security rejection");
    } else {
        tracing::info!(client_id = %identity, reason = %rejection, "validation rejection");
    }
    rejection.into()
}

/// Run every admission check for one request. `request` is the parsed body,
/// or the parse error text when the body was not a valid chat request.
pub fn screen_request(
    limiter: &RateLimiter,
    identity: &str,
    request: Result<ChatRequest, String>,
) -> Result<AcceptedMessage, AppError> {
    let decision = limiter.admit(identity);
    if decision.limited {
        tracing::warn!(client_id = %identity, reset_at = %decision.reset_at, "rate limit exceeded");
        return Err(AppError::RateLimited {
            limit: decision.limit,
            reset_at: decision.reset_at,
        });
    }

    let request = request.map_err(|e| rejected(identity, Rejection::invalid(e)))?;
    request
        .validate()
        .map_err(|e| rejected(identity, Rejection::invalid(e.to_string())))?;

    let images = request.images.unwrap_or_default();
    // A blank caption next to attachments counts as no text at all.
    let text = request
        .message
        .filter(|m| images.is_empty() || !m.trim().is_empty());

    if text.is_none() && images.is_empty() {
        return Err(rejected(
            identity,
            Rejection::invalid("Message or images are required"),
        ));
    }

    if let Some(text) = &text {
        validate_message(text).map_err(|r| rejected(identity, r))?;
    }

    if !images.is_empty() {
        validate_image_batch(&images).map_err(|r| rejected(identity, r))?;
        let names: Vec<String> = images.iter().map(|i| sanitize_file_name(&i.file_name)).collect();
        tracing::debug!(client_id = %identity, files = ?names, "images accepted");
    }

    let sanitized = text.as_deref().map(sanitize);

    let content = if images.is_empty() {
        let sanitized = sanitized.unwrap_or_default();
        if sanitized.is_empty() {
            return Err(rejected(
                identity,
                Rejection::invalid("Message cannot be empty"),
            ));
        }
        MessageContent::from_text(sanitized)
    } else {
        MessageContent::Blocks(content::encode(sanitized.as_deref(), &images))
    };

    let stored = content.to_storage()?;
    Ok(AcceptedMessage { content, stored })
}

/// The full chat turn: admission, then persistence and the provider call.
pub struct ChatPipeline {
    limiter: Arc<RateLimiter>,
    store: Arc<dyn MessageStore>,
    provider: Arc<dyn ChatProvider>,
    history_limit: usize,
}

impl ChatPipeline {
    pub fn new(
        limiter: Arc<RateLimiter>,
        store: Arc<dyn MessageStore>,
        provider: Arc<dyn ChatProvider>,
        history_limit: usize,
    ) -> Self {
        Self {
            limiter,
            store,
            provider,
            history_limit,
        }
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub async fn relay(
        &self,
        identity: &str,
        request: Result<ChatRequest, String>,
    ) -> Result<RelayOutcome, AppError> {
        let start = Instant::now();
        let accepted = screen_request(&self.limiter, identity, request)?;

        let outcome = self.complete_turn(&accepted).await.inspect_err(|e| {
            tracing::error!(
                client_id = %identity,
                error = %e,
                duration_ms = start.elapsed().as_millis() as u64,
                "chat request failed"
            );
        })?;

        tracing::info!(
            client_id = %identity,
            duration_ms = start.elapsed().as_millis() as u64,
            summary = %content::extract_text_summary(&accepted.content),
            image_count = accepted.content.image_count(),
            message_length = accepted.stored.len(),
            response_length = outcome.assistant_message.content.len(),
            "chat request completed"
        );

        Ok(outcome)
    }

    async fn complete_turn(&self, accepted: &AcceptedMessage) -> Result<RelayOutcome, AppError> {
        let user_message = self
            .store
            .create_message(Role::User, accepted.stored.clone())
            .await?;

        let history = self.store.list_messages(Some(self.history_limit)).await?;
        let conversation: Vec<ConversationMessage> = history
            .iter()
            .map(|m| ConversationMessage {
                role: m.role,
                content: m.decoded_content(),
            })
            .collect();

        let reply = self.provider.complete(&conversation).await?;

        let stored_reply = MessageContent::from_text(reply).to_storage()?;
        let assistant_message = self
            .store
            .create_message(Role::Assistant, stored_reply)
            .await?;

        Ok(RelayOutcome {
            user_message,
            assistant_message,
        })
    }
}
