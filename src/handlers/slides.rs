use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::db::models::SlidePrompt;
use crate::error::StorageError;
use crate::handlers::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SlidePromptQuery {
    /// Re-read the slide from the store instead of serving the cached copy.
    #[serde(default)]
    pub refresh: bool,
}

pub async fn get_slide_prompt(
    State(state): State<AppState>,
    Path(slide_id): Path<String>,
    Query(query): Query<SlidePromptQuery>,
) -> Result<Json<SlidePrompt>, ApiError> {
    if query.refresh {
        match state
            .slide_prompts
            .fetch_prompt_by_slide(&state.db, &slide_id)
            .await
        {
            Ok(()) => {}
            Err(err @ StorageError::NotFound { .. }) => {
                // Removed from the store; stop serving the stale copy.
                state.slide_prompts.invalidate(&slide_id);
                return Err(err.into());
            }
            Err(err) => return Err(err.into()),
        }
    }
    let prompt = state.slide_prompts.get_or_fetch(&state.db, &slide_id).await?;
    Ok(Json(prompt))
}
