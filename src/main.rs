use anyhow::Context;
use std::sync::Arc;

use chatrelay::config::settings::{Settings, StorageBackend};
use chatrelay::config::{database, logging};
use chatrelay::modules::chat::crud::{MemoryMessageStore, MessageStore, MongoMessageStore};
use chatrelay::security::rate_limit::RateLimiter;
use chatrelay::services::llm::build_provider;
use chatrelay::services::pipeline::ChatPipeline;
use chatrelay::{app, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env().context("invalid configuration")?;
    logging::init(settings.environment);

    let store: Arc<dyn MessageStore> = match settings.storage {
        StorageBackend::MongoDb => {
            let mongo = settings
                .mongodb
                .as_ref()
                .context("MongoDB settings missing")?;
            let db = database::connect(&mongo.uri, &mongo.database)
                .await
                .context("failed to connect to MongoDB")?;
            Arc::new(MongoMessageStore::new(&db))
        }
        StorageBackend::Memory => Arc::new(MemoryMessageStore::new()),
    };

    let provider = build_provider(settings.provider, settings.model.clone())?;
    tracing::info!(provider = provider.name(), model = %settings.model.model, "provider ready");

    let limiter = Arc::new(RateLimiter::new(settings.rate_limit));
    let _sweeper = limiter.spawn_sweeper();

    let pipeline = ChatPipeline::new(limiter, store.clone(), provider, settings.history_limit);
    let state = AppState {
        pipeline: Arc::new(pipeline),
        store,
        environment: settings.environment,
    };

    let address = settings.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {}", address))?;
    tracing::info!(%address, "chatrelay listening");

    axum::serve(listener, app(state)).await?;
    Ok(())
}
