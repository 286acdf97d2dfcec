use std::sync::Arc;

use crate::config::Config;
use crate::db::database::Database;
use crate::llm::gemini::GeminiClient;
use crate::prompt::templates::PromptTemplates;
use crate::slides::cache::SlidePromptCache;
use crate::utils::keyed_lock::{KeyedLockGuard, KeyedLocks};

type ConversationKey = (String, String);

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db: Database,
    pub gemini: GeminiClient,
    pub slide_prompts: SlidePromptCache,
    pub templates: Arc<PromptTemplates>,
    conversation_locks: KeyedLocks<ConversationKey>,
}

impl AppState {
    pub fn new(config: Config, db: Database, templates: PromptTemplates) -> Self {
        let gemini = GeminiClient::from_config(&config);
        AppState {
            config: Arc::new(config),
            db,
            gemini,
            slide_prompts: SlidePromptCache::new(),
            templates: Arc::new(templates),
            conversation_locks: KeyedLocks::new(),
        }
    }

    /// Serializes turns of one `(user_id, slide_id)` conversation until the
    /// guard is dropped.
    pub async fn lock_conversation(
        &self,
        user_id: &str,
        slide_id: &str,
    ) -> KeyedLockGuard<ConversationKey> {
        self.conversation_locks
            .lock((user_id.to_string(), slide_id.to_string()))
            .await
    }

    #[cfg(test)]
    pub fn active_conversation_locks(&self) -> usize {
        self.conversation_locks.len()
    }
}
