use bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::services::content::{self, MessageContent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted chat row. `content` is the storage form produced by
/// `content::serialize`.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Message {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub role: Role,
    pub content: String,
    pub created_at: bson::DateTime,
}

impl Message {
    pub fn new(role: Role, content: String) -> Self {
        Self {
            id: None,
            role,
            content,
            created_at: bson::DateTime::now(),
        }
    }

    pub fn id_hex(&self) -> String {
        self.id.map(|id| id.to_hex()).unwrap_or_default()
    }

    pub fn decoded_content(&self) -> MessageContent {
        content::deserialize(&self.content)
    }

    pub fn created_at_rfc3339(&self) -> String {
        self.created_at.try_to_rfc3339_string().unwrap_or_default()
    }
}
