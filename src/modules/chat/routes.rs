use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::modules::chat::controller;
use crate::security::image::{MAX_ENCODED_IMAGE_LEN, MAX_IMAGES_PER_MESSAGE};
use crate::AppState;

/// A full image batch at the size limit, plus room for the caption and JSON framing.
pub const MAX_CHAT_BODY_BYTES: usize =
    MAX_IMAGES_PER_MESSAGE * MAX_ENCODED_IMAGE_LEN + 1024 * 1024;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/api/chat",
            post(controller::chat).layer(DefaultBodyLimit::max(MAX_CHAT_BODY_BYTES)),
        )
        .route("/api/messages", get(controller::list_messages))
        .route("/api/reset", post(controller::reset))
        .route("/api/health", get(controller::health))
}
