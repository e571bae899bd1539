use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use crate::config::settings::Environment;
use crate::modules::chat::crud::StoreError;
use crate::modules::chat::schema::ErrorResponse;
use crate::security::Rejection;
use crate::services::llm::LlmError;

const GENERIC_UPSTREAM_MESSAGE: &str = "An error occurred while processing your request";

#[derive(Debug, Error)]
pub enum AppError {
    /// Retryable once `reset_at` has passed.
    #[error("Too many requests. Please try again later.")]
    RateLimited {
        limit: u32,
        reset_at: DateTime<Utc>,
    },
    #[error("{0}")]
    InvalidInput(String),
    /// Same response as `InvalidInput`; logged as likely abuse.
    #[error("{0}")]
    SecurityRejected(String),
    /// Persistence or provider failure. Never retried here.
    #[error(transparent)]
    Upstream(anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::InvalidInput(_) | AppError::SecurityRejected(_) => StatusCode::BAD_REQUEST,
            AppError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Pair the error with the environment that decides how much of an
    /// upstream failure the caller may see.
    pub fn reply(self, environment: Environment) -> ErrorReply {
        ErrorReply {
            error: self,
            expose_details: !environment.is_production(),
        }
    }
}

impl From<Rejection> for AppError {
    fn from(rejection: Rejection) -> Self {
        match rejection {
            Rejection::Invalid(message) => AppError::InvalidInput(message),
            Rejection::Security(message) => AppError::SecurityRejected(message),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::Upstream(e.into())
    }
}

impl From<LlmError> for AppError {
    fn from(e: LlmError) -> Self {
        AppError::Upstream(e.into())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Upstream(e.into())
    }
}

pub struct ErrorReply {
    error: AppError,
    expose_details: bool,
}

impl IntoResponse for ErrorReply {
    fn into_response(self) -> Response {
        let status = self.error.status();
        let message = match &self.error {
            AppError::Upstream(e) if self.expose_details => e.to_string(),
            AppError::Upstream(_) => GENERIC_UPSTREAM_MESSAGE.to_string(),
            other => other.to_string(),
        };

        let mut response = (
            status,
            Json(ErrorResponse {
                success: false,
                error: message,
            }),
        )
            .into_response();

        if let AppError::RateLimited { limit, reset_at } = self.error {
            let headers = response.headers_mut();
            headers.insert("X-RateLimit-Limit", HeaderValue::from(limit));
            headers.insert("X-RateLimit-Remaining", HeaderValue::from(0u32));
            if let Ok(value) =
                HeaderValue::from_str(&reset_at.to_rfc3339_opts(SecondsFormat::Millis, true))
            {
                headers.insert("X-RateLimit-Reset", value);
            }
            let retry_after = (reset_at - Utc::now()).num_seconds().max(0) + 1;
            headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
        }

        response
    }
}
