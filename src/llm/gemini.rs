use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::ChatError;
use crate::llm::media::{normalize_gemini_mime_type, AudioPayload};
use crate::utils::http::{get_http_client, truncate_for_log};
use crate::utils::timing::log_llm_timing;

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    parts: Option<Vec<GeminiPart>>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiPromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

const GEMINI_MAX_RETRY_ATTEMPTS: usize = 2;
const GEMINI_RETRY_BASE_DELAY_MS: u64 = 900;

/// Generation settings for one call.
#[derive(Debug, Clone, Copy)]
pub struct GenerationSettings {
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: Option<i32>,
    pub max_output_tokens: i32,
    pub json_output: bool,
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    api_key: String,
    base_url: String,
    model: String,
    transcription_model: String,
    chat_settings: GenerationSettings,
    timeout: Duration,
}

impl GeminiClient {
    pub fn from_config(config: &Config) -> Self {
        GeminiClient {
            api_key: config.gemini_api_key.trim().to_string(),
            base_url: config.gemini_base_url.trim_end_matches('/').to_string(),
            model: config.gemini_model.clone(),
            transcription_model: config.gemini_transcription_model.clone(),
            chat_settings: GenerationSettings {
                temperature: config.gemini_temperature,
                top_p: config.gemini_top_p,
                top_k: Some(config.gemini_top_k),
                max_output_tokens: config.gemini_max_output_tokens,
                json_output: false,
            },
            timeout: Duration::from_secs(config.gemini_timeout_seconds.max(1)),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn ensure_configured(&self) -> Result<(), ChatError> {
        if self.is_configured() {
            Ok(())
        } else {
            Err(ChatError::Configuration(
                "GEMINI_API_KEY is not configured".to_string(),
            ))
        }
    }

    /// One chat turn. `json_output` asks Gemini for an `application/json` body.
    pub async fn generate_text(
        &self,
        system_instruction: &str,
        user_content: &str,
        json_output: bool,
        system_prompt_label: Option<&str>,
    ) -> Result<String, ChatError> {
        self.ensure_configured()?;

        let settings = GenerationSettings {
            json_output,
            ..self.chat_settings
        };
        let payload = build_payload(
            system_instruction,
            vec![json!({ "text": user_content })],
            settings,
        );
        let operation = if json_output {
            "chat_evaluation"
        } else {
            "chat_introduction"
        };

        log_llm_timing("gemini", &self.model, operation, None, || async {
            let response = self
                .call_api(&self.model, payload, system_prompt_label)
                .await?;
            Ok(extract_text_from_response(response))
        })
        .await
    }

    /// Verbatim transcription of base64 audio. The optional context prompt is
    /// sent after the audio part.
    pub async fn transcribe(
        &self,
        system_instruction: &str,
        audio: &AudioPayload,
        context: Option<&str>,
    ) -> Result<String, ChatError> {
        self.ensure_configured()?;

        let mut parts = vec![json!({
            "inlineData": {
                "mimeType": normalize_gemini_mime_type(&audio.mime_type),
                "data": audio.data,
            }
        })];
        if let Some(context) = context.map(str::trim).filter(|value| !value.is_empty()) {
            parts.push(json!({ "text": context }));
        }

        let settings = GenerationSettings {
            temperature: 0.0,
            top_p: 1.0,
            top_k: None,
            max_output_tokens: self.chat_settings.max_output_tokens,
            json_output: false,
        };
        let payload = build_payload(system_instruction, parts, settings);
        let metadata = json!({ "mimeType": audio.mime_type, "dataLen": audio.data.len() });

        log_llm_timing(
            "gemini",
            &self.transcription_model,
            "transcribe",
            Some(metadata),
            || async {
                let response = self
                    .call_api(
                        &self.transcription_model,
                        payload,
                        Some("transcription_system_prompt"),
                    )
                    .await?;
                Ok(extract_text_from_response(response).trim().to_string())
            },
        )
        .await
    }

    fn redact_api_key(&self, text: &str) -> String {
        if self.api_key.is_empty() {
            return text.to_string();
        }
        text.replace(&self.api_key, "[redacted]")
    }

    async fn call_api(
        &self,
        model: &str,
        payload: Value,
        system_prompt_label: Option<&str>,
    ) -> Result<GeminiResponse, ChatError> {
        let client = get_http_client();
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, model
        );

        if tracing::enabled!(tracing::Level::DEBUG) {
            let payload_summary = summarize_gemini_payload(&payload, system_prompt_label);
            debug!(target: "llm.gemini", model = model, payload = %payload_summary);
        }

        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let response = match client
                .post(&url)
                .header("x-goog-api-key", &self.api_key)
                .timeout(self.timeout)
                .json(&payload)
                .send()
                .await
            {
                Ok(response) => response,
                Err(err) => {
                    let err_text = self.redact_api_key(&err.to_string());
                    let should_retry =
                        gemini_should_retry_error(&err) && attempt < GEMINI_MAX_RETRY_ATTEMPTS;
                    warn!(
                        "Gemini request failed to send: {} (timeout={}, connect={}, retrying={})",
                        err_text,
                        err.is_timeout(),
                        err.is_connect(),
                        should_retry
                    );
                    if should_retry {
                        tokio::time::sleep(gemini_retry_delay(attempt)).await;
                        continue;
                    }
                    return Err(ChatError::upstream("Gemini request failed", err_text));
                }
            };

            if !response.status().is_success() {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                let (message, body_summary) = summarize_error_body(&body);
                let should_retry =
                    gemini_should_retry_status(status) && attempt < GEMINI_MAX_RETRY_ATTEMPTS;
                warn!(
                    "Gemini API error: status={}, body={}, retrying={}",
                    status, body_summary, should_retry
                );
                if should_retry {
                    tokio::time::sleep(gemini_retry_delay(attempt)).await;
                    continue;
                }
                let detail = self.redact_api_key(&message.unwrap_or(body_summary));
                return Err(ChatError::upstream(
                    format!("Gemini request failed with status {}", status),
                    detail,
                ));
            }

            let value = response.json::<GeminiResponse>().await.map_err(|err| {
                ChatError::upstream("Gemini returned an unreadable response", err.to_string())
            })?;
            if tracing::enabled!(tracing::Level::DEBUG) {
                let response_summary = summarize_gemini_response(&value);
                debug!(target: "llm.gemini", model = model, response = %response_summary);
            }
            if let Some(reason) = value
                .prompt_feedback
                .as_ref()
                .and_then(|feedback| feedback.block_reason.as_deref())
            {
                return Err(ChatError::upstream(
                    "Gemini blocked the request",
                    reason.to_string(),
                ));
            }
            return Ok(value);
        }
    }
}

fn gemini_should_retry_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

fn gemini_should_retry_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
        || status.is_server_error()
}

fn gemini_retry_delay(attempt: usize) -> Duration {
    let attempt = attempt.max(1) as u64;
    Duration::from_millis(GEMINI_RETRY_BASE_DELAY_MS.saturating_mul(attempt))
}

fn build_payload(system_instruction: &str, parts: Vec<Value>, settings: GenerationSettings) -> Value {
    let mut generation_config = Map::new();
    generation_config.insert("temperature".to_string(), json!(settings.temperature));
    generation_config.insert("topP".to_string(), json!(settings.top_p));
    if let Some(top_k) = settings.top_k {
        generation_config.insert("topK".to_string(), json!(top_k));
    }
    generation_config.insert(
        "maxOutputTokens".to_string(),
        json!(settings.max_output_tokens),
    );
    if settings.json_output {
        generation_config.insert(
            "responseMimeType".to_string(),
            json!("application/json"),
        );
    }

    let mut payload = json!({
        "contents": [{ "role": "user", "parts": parts }],
        "generationConfig": Value::Object(generation_config),
    });
    if !system_instruction.trim().is_empty() {
        if let Some(object) = payload.as_object_mut() {
            object.insert(
                "systemInstruction".to_string(),
                json!({ "parts": [{ "text": system_instruction }] }),
            );
        }
    }
    payload
}

fn summarize_gemini_parts(parts: &[Value]) -> Vec<Value> {
    parts
        .iter()
        .map(|part| {
            if let Some(text) = part.get("text").and_then(|value| value.as_str()) {
                json!({ "text": truncate_for_log(text, 200) })
            } else if let Some(inline_data) = part.get("inlineData") {
                let mime_type = inline_data
                    .get("mimeType")
                    .and_then(|value| value.as_str())
                    .unwrap_or("unknown");
                let data_len = inline_data
                    .get("data")
                    .and_then(|value| value.as_str())
                    .map(|value| value.len())
                    .unwrap_or(0);
                json!({ "inlineData": { "mimeType": mime_type, "dataLen": data_len } })
            } else {
                json!({ "unknownPart": true })
            }
        })
        .collect()
}

fn summarize_gemini_payload(payload: &Value, system_prompt_label: Option<&str>) -> Value {
    let mut summary = Map::new();

    if payload.pointer("/systemInstruction").is_some() {
        let label = system_prompt_label.unwrap_or("inline_system_prompt");
        summary.insert(
            "systemInstruction".to_string(),
            Value::String(label.to_string()),
        );
    }

    if let Some(contents) = payload.get("contents").and_then(|value| value.as_array()) {
        let summarized_contents: Vec<Value> = contents
            .iter()
            .map(|content| {
                let role = content
                    .get("role")
                    .and_then(|value| value.as_str())
                    .unwrap_or("user");
                let parts = content
                    .get("parts")
                    .and_then(|value| value.as_array())
                    .map(|parts| summarize_gemini_parts(parts))
                    .unwrap_or_default();
                json!({ "role": role, "parts": parts })
            })
            .collect();
        summary.insert("contents".to_string(), Value::Array(summarized_contents));
    }

    if let Some(config) = payload.get("generationConfig") {
        summary.insert("generationConfig".to_string(), config.clone());
    }

    Value::Object(summary)
}

fn summarize_gemini_response(response: &GeminiResponse) -> Value {
    let candidates = response.candidates.as_deref().unwrap_or(&[]);
    let mut text_parts = 0usize;
    let mut text_preview = None;
    for part in candidates
        .iter()
        .filter_map(|candidate| candidate.content.as_ref())
        .filter_map(|content| content.parts.as_ref())
        .flatten()
    {
        if let Some(text) = part.text.as_deref() {
            text_parts += 1;
            if text_preview.is_none() && !text.trim().is_empty() {
                text_preview = Some(truncate_for_log(text, 200));
            }
        }
    }
    let finish_reasons: Vec<&str> = candidates
        .iter()
        .filter_map(|candidate| candidate.finish_reason.as_deref())
        .collect();

    json!({
        "candidates": candidates.len(),
        "textParts": text_parts,
        "finishReasons": finish_reasons,
        "textPreview": text_preview
    })
}

fn summarize_error_body(body: &str) -> (Option<String>, String) {
    let trimmed = body.trim();
    if trimmed.is_empty() {
        return (None, "empty response body".to_string());
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        let message = value
            .pointer("/error/message")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string())
            .or_else(|| {
                value
                    .get("message")
                    .and_then(|v| v.as_str())
                    .map(|v| v.to_string())
            });
        return (message, truncate_for_log(&value.to_string(), 2000));
    }

    (None, truncate_for_log(trimmed, 2000))
}

fn extract_text_from_response(response: GeminiResponse) -> String {
    let mut text_parts = Vec::new();
    for candidate in response.candidates.unwrap_or_default() {
        let Some(parts) = candidate.content.and_then(|content| content.parts) else {
            continue;
        };
        for text in parts.into_iter().filter_map(|part| part.text) {
            if !text.trim().is_empty() {
                text_parts.push(text);
            }
        }
        // Only the first candidate with content is used.
        if !text_parts.is_empty() {
            break;
        }
    }
    text_parts.join("")
}
