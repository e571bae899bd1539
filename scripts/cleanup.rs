//! Run with: cargo run --bin cleanup

use anyhow::Context;
use chatrelay::config::database;
use chatrelay::config::settings::MongoSettings;
use chatrelay::modules::chat::crud::{MessageStore, MongoMessageStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = MongoSettings::from_env().context("invalid MongoDB configuration")?;

    println!("Connecting to MongoDB database '{}'...", settings.database);
    let db = database::connect(&settings.uri, &settings.database).await?;
    let store = MongoMessageStore::new(&db);

    println!("Deleting stored messages...");
    let deleted = store.delete_all().await?;
    println!("✓ Deleted {} messages", deleted);

    Ok(())
}
