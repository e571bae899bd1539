use axum::http::{header, HeaderName, HeaderValue};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use crate::config::settings::Environment;
use crate::modules::chat::crud::MessageStore;
use crate::services::pipeline::ChatPipeline;

pub mod config;
pub mod error;
pub mod modules;
pub mod security;
pub mod services;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ChatPipeline>,
    pub store: Arc<dyn MessageStore>,
    pub environment: Environment,
}

const SECURITY_HEADERS: [(&str, &str); 5] = [
    ("x-content-type-options", "nosniff"),
    ("x-frame-options", "DENY"),
    ("x-xss-protection", "1; mode=block"),
    ("referrer-policy", "strict-origin-when-cross-origin"),
    ("permissions-policy", "geolocation=(), microphone=(), camera=()"),
];

fn cors(environment: Environment) -> CorsLayer {
    if environment.is_production() {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers([header::CONTENT_TYPE])
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}

/// The HTTP application with CORS and security headers applied.
pub fn app(state: AppState) -> Router {
    let environment = state.environment;
    let mut router = modules::chat::routes::routes().with_state(state);

    for (name, value) in SECURITY_HEADERS {
        router = router.layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        ));
    }

    router.layer(cors(environment))
}
