use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::db::database::Database;
use crate::db::models::SlidePrompt;
use crate::error::StorageError;
use crate::utils::keyed_lock::KeyedLocks;

#[derive(Default)]
struct CacheState {
    prompts: HashMap<String, SlidePrompt>,
    completed_fetches: HashMap<String, u64>,
    loading: usize,
    error: Option<String>,
}

#[derive(Default)]
struct CacheInner {
    state: Mutex<CacheState>,
    gates: KeyedLocks<String>,
}

/// Per-slide generation config, fetched once and kept for the life of the
/// owning context. Cloning shares the same cache.
#[derive(Clone, Default)]
pub struct SlidePromptCache {
    inner: Arc<CacheInner>,
}

impl SlidePromptCache {
    pub fn new() -> Self {
        SlidePromptCache::default()
    }

    pub fn get(&self, slide_id: &str) -> Option<SlidePrompt> {
        self.inner.state.lock().prompts.get(slide_id).cloned()
    }

    pub fn snapshot(&self) -> HashMap<String, SlidePrompt> {
        self.inner.state.lock().prompts.clone()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.lock().loading > 0
    }

    pub fn last_error(&self) -> Option<String> {
        self.inner.state.lock().error.clone()
    }

    /// Drops a cached entry so the next access goes back to the store.
    pub fn invalidate(&self, slide_id: &str) -> Option<SlidePrompt> {
        self.inner.state.lock().prompts.remove(slide_id)
    }

    pub async fn fetch_prompt_by_slide(
        &self,
        db: &Database,
        slide_id: &str,
    ) -> Result<(), StorageError> {
        self.fetch_with(slide_id, || db.fetch_slide_prompt(slide_id))
            .await
    }

    pub async fn get_or_fetch(
        &self,
        db: &Database,
        slide_id: &str,
    ) -> Result<SlidePrompt, StorageError> {
        if let Some(prompt) = self.get(slide_id) {
            return Ok(prompt);
        }
        self.fetch_prompt_by_slide(db, slide_id).await?;
        self.get(slide_id).ok_or_else(|| StorageError::NotFound {
            entity: "slide prompt",
            key: slide_id.to_string(),
        })
    }

    /// Runs `lookup` and stores its result under `slide_id`. Concurrent calls
    /// for the same slide share one lookup: a caller that waited on another
    /// caller's successful fetch returns without looking up again. On failure
    /// the existing entry is kept and the error is recorded.
    pub async fn fetch_with<F, Fut>(&self, slide_id: &str, lookup: F) -> Result<(), StorageError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Option<SlidePrompt>, StorageError>>,
    {
        let seen = self.completed_fetches(slide_id);
        let _permit = self.inner.gates.lock(slide_id.to_string()).await;
        if self.completed_fetches(slide_id) != seen {
            debug!(slide_id, "Slide prompt fetched by a concurrent caller");
            return Ok(());
        }

        self.inner.state.lock().loading += 1;
        let result = lookup().await;

        let mut state = self.inner.state.lock();
        state.loading = state.loading.saturating_sub(1);
        match result {
            Ok(Some(prompt)) => {
                state.prompts.insert(slide_id.to_string(), prompt);
                *state
                    .completed_fetches
                    .entry(slide_id.to_string())
                    .or_insert(0) += 1;
                state.error = None;
                Ok(())
            }
            Ok(None) => {
                let err = StorageError::NotFound {
                    entity: "slide prompt",
                    key: slide_id.to_string(),
                };
                warn!("Slide prompt fetch failed: {err}");
                state.error = Some(err.to_string());
                Err(err)
            }
            Err(err) => {
                warn!("Slide prompt fetch failed for {slide_id}: {err}");
                state.error = Some(err.to_string());
                Err(err)
            }
        }
    }

    #[cfg(test)]
    pub fn active_gates(&self) -> usize {
        self.inner.gates.len()
    }

    fn completed_fetches(&self, slide_id: &str) -> u64 {
        self.inner
            .state
            .lock()
            .completed_fetches
            .get(slide_id)
            .copied()
            .unwrap_or(0)
    }
}
