use serde_json::{json, Value};

use crate::config::Config;
use crate::db::database::Database;
use crate::db::models::SlidePrompt;
use crate::prompt::templates::PromptTemplates;
use crate::state::AppState;

pub const SLIDE_INSTRUCTION: &str =
    "Оціни відповідь студента за критеріями. КЕЙС: Клієнт просить знижку, яку ви не можете дати.";

pub fn test_config(base_url: &str, api_key: &str) -> Config {
    Config {
        database_url: "sqlite::memory:".to_string(),
        gemini_api_key: api_key.to_string(),
        gemini_base_url: base_url.to_string(),
        gemini_model: "gemini-test".to_string(),
        gemini_transcription_model: "gemini-test".to_string(),
        gemini_timeout_seconds: 5,
        ..Config::default()
    }
}

pub async fn test_state(base_url: &str, api_key: &str) -> AppState {
    let config = test_config(base_url, api_key);
    let db = Database::init(&config.database_url)
        .await
        .expect("in-memory db");
    db.upsert_slide_prompt(&SlidePrompt {
        slide_id: "s1".to_string(),
        system_instruction: SLIDE_INSTRUCTION.to_string(),
        initial_message: "Вітаю! Ось ваш кейс.".to_string(),
    })
    .await
    .expect("seed slide prompt");
    AppState::new(config, db, PromptTemplates::default())
}

pub fn text_response(text: &str) -> Value {
    json!({
        "candidates": [{
            "content": { "role": "model", "parts": [{ "text": text }] },
            "finishReason": "STOP"
        }]
    })
}

pub const GEMINI_PATH: &str = "/v1beta/models/gemini-test:generateContent";
