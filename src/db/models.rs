use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::prompt::reply::RatingResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Ai,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<RatingResult>,
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::User,
            text: text.into(),
            rating: None,
        }
    }

    pub fn ai(text: impl Into<String>, rating: Option<RatingResult>) -> Self {
        ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            role: Role::Ai,
            text: text.into(),
            rating,
        }
    }
}

#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct SlidePrompt {
    pub slide_id: String,
    pub system_instruction: String,
    pub initial_message: String,
}

/// One persisted conversation, keyed on `(user_id, slide_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatHistoryRow {
    pub user_id: String,
    pub course_id: String,
    pub slide_id: String,
    pub messages: Vec<ChatMessage>,
    /// Set by the store on read; ignored on write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ChatHistoryRow {
    pub fn new(
        user_id: impl Into<String>,
        course_id: impl Into<String>,
        slide_id: impl Into<String>,
        messages: Vec<ChatMessage>,
    ) -> Self {
        ChatHistoryRow {
            user_id: user_id.into(),
            course_id: course_id.into(),
            slide_id: slide_id.into(),
            messages,
            updated_at: None,
        }
    }
}

/// Shape returned when listing a user's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatHistoryEntry {
    pub slide_id: String,
    pub course_id: String,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, FromRow)]
pub struct StoredChatHistory {
    pub user_id: String,
    pub course_id: String,
    pub slide_id: String,
    pub messages_json: String,
    pub updated_at: DateTime<Utc>,
}
