use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use crate::handlers::error::ApiError;
use crate::llm::media::AudioPayload;
use crate::state::AppState;
use crate::utils::timing::{complete_request_timer, start_request_timer};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscribeResponse {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// `POST /api/transcribe` with `{audioData, mimeType?, prompt?, debug?}`.
///
/// The body is read as loose JSON so a missing or mistyped `audioData`
/// becomes a 400 with our own error shape rather than axum's rejection text.
pub async fn transcribe(
    State(state): State<AppState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<TranscribeResponse>, ApiError> {
    let mut timer = start_request_timer("transcribe", None, None);
    let result = run_transcription(&state, body).await;
    match &result {
        Ok(_) => complete_request_timer(&mut timer, "success", None),
        Err(err) => complete_request_timer(&mut timer, "error", Some(format!("{err:?}"))),
    }
    result.map(Json)
}

async fn run_transcription(
    state: &AppState,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<TranscribeResponse, ApiError> {
    let Json(body) = body?;

    let audio_data = body
        .get("audioData")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::BadRequest("audioData (base64 string) is required".to_string()))?;
    let mime_type = body.get("mimeType").and_then(Value::as_str);
    let prompt = body.get("prompt").and_then(Value::as_str);
    let debug = body.get("debug").and_then(Value::as_bool).unwrap_or(false);

    if !state.gemini.is_configured() {
        return Err(ApiError::internal("GEMINI_API_KEY is not configured", None));
    }

    let audio = AudioPayload::from_request(
        audio_data,
        mime_type,
        &state.config.default_audio_mime_type,
    );
    let context = prompt
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| format!("{}{}", state.templates.transcription_context_prefix, value));

    let text = state
        .gemini
        .transcribe(
            &state.templates.transcription_system,
            &audio,
            context.as_deref(),
        )
        .await?;
    info!(
        mime_type = %audio.mime_type,
        chars = text.chars().count(),
        "Transcription completed"
    );

    Ok(TranscribeResponse {
        text,
        mime_type: debug.then_some(audio.mime_type),
    })
}
