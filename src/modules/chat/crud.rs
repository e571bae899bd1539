use async_trait::async_trait;
use bson::{doc, oid::ObjectId};
use futures::TryStreamExt;
use mongodb::{Collection, Database};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::modules::chat::model::{Message, Role};

const COLLECTION_NAME: &str = "messages";

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),
    #[error("Inserted document has no ObjectId")]
    MissingId,
}

/// Persistence for the single linear conversation.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create_message(&self, role: Role, content: String) -> Result<Message, StoreError>;

    /// The most recent `limit` messages (all when `None`), oldest first.
    async fn list_messages(&self, limit: Option<usize>) -> Result<Vec<Message>, StoreError>;

    /// Remove every message, returning how many were deleted.
    async fn delete_all(&self) -> Result<u64, StoreError>;
}

pub struct MongoMessageStore {
    collection: Collection<Message>,
}

impl MongoMessageStore {
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.collection(COLLECTION_NAME),
        }
    }
}

#[async_trait]
impl MessageStore for MongoMessageStore {
    async fn create_message(&self, role: Role, content: String) -> Result<Message, StoreError> {
        let mut message = Message::new(role, content);
        let result = self.collection.insert_one(&message).await?;
        message.id = Some(result.inserted_id.as_object_id().ok_or(StoreError::MissingId)?);
        Ok(message)
    }

    async fn list_messages(&self, limit: Option<usize>) -> Result<Vec<Message>, StoreError> {
        let find = self
            .collection
            .find(doc! {})
            .sort(doc! { "created_at": -1, "_id": -1 });

        let cursor = match limit {
            Some(limit) => find.limit(i64::try_from(limit).unwrap_or(i64::MAX)).await?,
            None => find.await?,
        };

        let mut messages: Vec<Message> = cursor.try_collect().await?;
        messages.reverse();
        Ok(messages)
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        let result = self.collection.delete_many(doc! {}).await?;
        Ok(result.deleted_count)
    }
}

/// Process-local store for tests and the `memory` backend.
#[derive(Default)]
pub struct MemoryMessageStore {
    messages: RwLock<Vec<Message>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn create_message(&self, role: Role, content: String) -> Result<Message, StoreError> {
        let mut message = Message::new(role, content);
        message.id = Some(ObjectId::new());
        self.messages.write().await.push(message.clone());
        Ok(message)
    }

    async fn list_messages(&self, limit: Option<usize>) -> Result<Vec<Message>, StoreError> {
        let messages = self.messages.read().await;
        let skip = limit.map_or(0, |limit| messages.len().saturating_sub(limit));
        Ok(messages[skip..].to_vec())
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        let mut messages = self.messages.write().await;
        let count = messages.len() as u64;
        messages.clear();
        Ok(count)
    }
}
