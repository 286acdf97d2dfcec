use thiserror::Error;

use crate::prompt::reply::ContractViolation;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database query failed: {0}")]
    Query(#[from] sqlx::Error),
    #[error("failed to (de)serialize stored messages: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Configuration(String),
    #[error("{message}")]
    Upstream {
        message: String,
        details: Option<String>,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("model reply violated the chat-turn contract: {0}")]
    ContractViolation(#[from] ContractViolation),
}

impl ChatError {
    pub fn upstream(message: impl Into<String>, details: impl Into<String>) -> Self {
        let details = details.into();
        ChatError::Upstream {
            message: message.into(),
            details: if details.trim().is_empty() {
                None
            } else {
                Some(details)
            },
        }
    }
}
