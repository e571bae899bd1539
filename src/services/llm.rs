use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

use crate::config::settings::{ModelSettings, ProviderKind};
use crate::modules::chat::model::Role;
use crate::services::content::{ContentBlock, ImageSource, MessageContent};

const CLAUDE_BASE_URL: &str = "https://api.anthropic.com/v1";
const CLAUDE_API_VERSION: &str = "2023-06-01";
const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("Missing API key")]
    MissingApiKey,
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// One turn of the conversation replayed to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: MessageContent,
}

/// A model that turns the ordered conversation into a reply.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(&self, conversation: &[ConversationMessage]) -> Result<String, LlmError>;
}

pub fn build_provider(
    kind: ProviderKind,
    settings: ModelSettings,
) -> Result<Arc<dyn ChatProvider>, LlmError> {
    match kind {
        ProviderKind::Claude => Ok(Arc::new(ClaudeClient::new(settings)?)),
        ProviderKind::Gemini => Ok(Arc::new(GeminiClient::new(settings)?)),
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

async fn api_error(response: reqwest::Response) -> LlmError {
    let status = response.status();
    let error_text = response.text().await.unwrap_or_default();
    if let Ok(error_response) = serde_json::from_str::<ApiErrorResponse>(&error_text) {
        return LlmError::ApiError(error_response.error.message);
    }
    LlmError::ApiError(format!("{}: {}", status, error_text))
}

// ---------------------------------------------------------------------------
// Claude

#[derive(Debug, Serialize)]
struct ClaudeMessage<'a> {
    role: &'static str,
    content: &'a MessageContent,
}

#[derive(Debug, Serialize)]
struct ClaudeRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ClaudeMessage<'a>>,
}

#[derive(Debug, Deserialize)]
struct ClaudeResponse {
    content: Vec<ClaudeResponseBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClaudeResponseBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Clone)]
pub struct ClaudeClient {
    client: Client,
    base_url: String,
    settings: ModelSettings,
}

impl ClaudeClient {
    pub fn new(settings: ModelSettings) -> Result<Self, LlmError> {
        if settings.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        Ok(Self {
            client: Client::new(),
            base_url: CLAUDE_BASE_URL.to_string(),
            settings,
        })
    }
}

#[async_trait]
impl ChatProvider for ClaudeClient {
    fn name(&self) -> &'static str {
        "claude"
    }

    async fn complete(&self, conversation: &[ConversationMessage]) -> Result<String, LlmError> {
        let start = Instant::now();
        tracing::info!(
            model = %self.settings.model,
            message_count = conversation.len(),
            "calling Claude API"
        );

        // Stored blocks already use the Messages API shape.
        let request = ClaudeRequest {
            model: &self.settings.model,
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature,
            messages: conversation
                .iter()
                .map(|m| ClaudeMessage {
                    role: m.role.as_str(),
                    content: &m.content,
                })
                .collect(),
        };

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", &self.settings.api_key)
            .header("anthropic-version", CLAUDE_API_VERSION)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error = api_error(response).await;
            tracing::error!(error = %error, duration_ms = start.elapsed().as_millis() as u64, "Claude API error");
            return Err(error);
        }

        let body: ClaudeResponse = response.json().await?;
        let text = body
            .content
            .into_iter()
            .find_map(|block| match block {
                ClaudeResponseBlock::Text { text } => Some(text),
                ClaudeResponseBlock::Other => None,
            })
            .ok_or_else(|| LlmError::InvalidResponse("No text content in Claude response".to_string()))?;

        tracing::info!(
            duration_ms = start.elapsed().as_millis() as u64,
            response_length = text.len(),
            "Claude API call successful"
        );

        Ok(text)
    }
}

// ---------------------------------------------------------------------------
// Gemini

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: GeminiInlineData,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiInlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    max_output_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
}

fn gemini_parts(content: &MessageContent) -> Vec<GeminiPart> {
    match content {
        MessageContent::Text(text) => vec![GeminiPart::Text { text: text.clone() }],
        MessageContent::Blocks(blocks) => blocks
            .iter()
            .map(|block| match block {
                ContentBlock::Text { text } => GeminiPart::Text { text: text.clone() },
                ContentBlock::Image {
                    source: ImageSource::Base64 { media_type, data },
                } => GeminiPart::InlineData {
                    inline_data: GeminiInlineData {
                        mime_type: media_type.as_str().to_string(),
                        data: data.clone(),
                    },
                },
            })
            .collect(),
    }
}

fn gemini_role(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "model",
    }
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
    settings: ModelSettings,
}

impl GeminiClient {
    pub fn new(settings: ModelSettings) -> Result<Self, LlmError> {
        if settings.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }

        Ok(Self {
            client: Client::new(),
            base_url: GEMINI_BASE_URL.to_string(),
            settings,
        })
    }
}

#[async_trait]
impl ChatProvider for GeminiClient {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn complete(&self, conversation: &[ConversationMessage]) -> Result<String, LlmError> {
        let start = Instant::now();
        let multimodal = conversation
            .iter()
            .filter(|m| m.content.image_count() > 0)
            .count();
        tracing::info!(
            model = %self.settings.model,
            message_count = conversation.len(),
            multimodal_messages = multimodal,
            "calling Gemini API"
        );

        let request = GeminiRequest {
            contents: conversation
                .iter()
                .map(|m| GeminiContent {
                    role: gemini_role(m.role).to_string(),
                    parts: gemini_parts(&m.content),
                })
                .collect(),
            generation_config: GeminiGenerationConfig {
                max_output_tokens: self.settings.max_tokens,
                temperature: self.settings.temperature,
            },
        };

        let response = self
            .client
            .post(format!(
                "{}/models/{}:generateContent",
                self.base_url, self.settings.model
            ))
            .header("x-goog-api-key", &self.settings.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error = api_error(response).await;
            tracing::error!(error = %error, duration_ms = start.elapsed().as_millis() as u64, "Gemini API error");
            return Err(error);
        }

        let body: GeminiResponse = response.json().await?;
        let text = body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|part| match part {
                GeminiPart::Text { text } => Some(text),
                GeminiPart::InlineData { .. } => None,
            })
            .collect::<String>();

        if text.is_empty() {
            return Err(LlmError::InvalidResponse(
                "No text content in Gemini response".to_string(),
            ));
        }

        tracing::info!(
            duration_ms = start.elapsed().as_millis() as u64,
            response_length = text.len(),
            "Gemini API call successful"
        );

        Ok(text)
    }
}
