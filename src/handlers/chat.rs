use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::chat::session::{ChatSession, TurnInput, TurnOutcome};
use crate::db::models::ChatMessage;
use crate::handlers::error::ApiError;
use crate::llm::media::AudioPayload;
use crate::prompt::builder::Criterion;
use crate::state::AppState;
use crate::utils::timing::{complete_request_timer, start_request_timer};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatTarget {
    pub user_id: String,
    pub course_id: String,
    pub slide_id: String,
    #[serde(default)]
    pub criteria: Vec<Criterion>,
}

impl ChatTarget {
    fn validate(&self) -> Result<(), ApiError> {
        for (field, value) in [
            ("userId", &self.user_id),
            ("courseId", &self.course_id),
            ("slideId", &self.slide_id),
        ] {
            if value.trim().is_empty() {
                return Err(ApiError::BadRequest(format!("{field} is required")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    #[serde(flatten)]
    pub target: ChatTarget,
    pub text: Option<String>,
    pub audio_data: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StartResponse {
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum TurnResponse {
    Skipped,
    #[serde(rename_all = "camelCase")]
    Answered {
        user_message: ChatMessage,
        ai_message: ChatMessage,
        #[serde(skip_serializing_if = "Option::is_none")]
        contract_violation: Option<String>,
    },
}

/// Opens the conversation if it has no history yet and returns the full
/// message list either way.
pub async fn start_chat(
    State(state): State<AppState>,
    body: Result<Json<ChatTarget>, JsonRejection>,
) -> Result<Json<StartResponse>, ApiError> {
    let Json(target) = body?;
    target.validate()?;

    let mut timer = start_request_timer("chat_start", Some(&target.user_id), Some(&target.slide_id));
    let _guard = state
        .lock_conversation(&target.user_id, &target.slide_id)
        .await;

    let result = async {
        let mut session = ChatSession::load(
            &state,
            &target.user_id,
            &target.course_id,
            &target.slide_id,
            target.criteria.clone(),
        )
        .await?;
        session.start(&state).await?;
        Ok::<_, ApiError>(session.messages().to_vec())
    }
    .await;

    match &result {
        Ok(_) => complete_request_timer(&mut timer, "success", None),
        Err(err) => complete_request_timer(&mut timer, "error", Some(format!("{err:?}"))),
    }
    result.map(|messages| Json(StartResponse { messages }))
}

pub async fn submit_turn(
    State(state): State<AppState>,
    body: Result<Json<TurnRequest>, JsonRejection>,
) -> Result<Json<TurnResponse>, ApiError> {
    let Json(request) = body?;
    request.target.validate()?;
    let input = turn_input(&state, &request)?;

    let target = &request.target;
    let mut timer = start_request_timer("chat_turn", Some(&target.user_id), Some(&target.slide_id));
    let _guard = state
        .lock_conversation(&target.user_id, &target.slide_id)
        .await;

    let result = async {
        let mut session = ChatSession::load(
            &state,
            &target.user_id,
            &target.course_id,
            &target.slide_id,
            target.criteria.clone(),
        )
        .await?;
        Ok::<_, ApiError>(session.submit(&state, input).await?)
    }
    .await;

    let status = match &result {
        Ok(TurnOutcome::Skipped) => "skipped",
        Ok(TurnOutcome::Answered { contract_violation: Some(_), .. }) => "fallback",
        Ok(TurnOutcome::Answered { .. }) => "success",
        Err(_) => "error",
    };
    complete_request_timer(&mut timer, status, result.as_ref().err().map(|err| format!("{err:?}")));

    Ok(Json(match result? {
        TurnOutcome::Skipped => TurnResponse::Skipped,
        TurnOutcome::Answered {
            user,
            ai,
            contract_violation,
        } => TurnResponse::Answered {
            user_message: user,
            ai_message: ai,
            contract_violation: contract_violation.map(|violation| violation.to_string()),
        },
    }))
}

fn turn_input(state: &AppState, request: &TurnRequest) -> Result<TurnInput, ApiError> {
    match (&request.text, &request.audio_data) {
        (Some(_), Some(_)) => Err(ApiError::BadRequest(
            "send either text or audioData, not both".to_string(),
        )),
        (Some(text), None) => Ok(TurnInput::Text(text.clone())),
        (None, Some(audio_data)) => {
            if !state.gemini.is_configured() {
                return Err(ApiError::internal("GEMINI_API_KEY is not configured", None));
            }
            Ok(TurnInput::Audio(AudioPayload::from_request(
                audio_data,
                request.mime_type.as_deref(),
                &state.config.default_audio_mime_type,
            )))
        }
        (None, None) => Err(ApiError::BadRequest(
            "text or audioData is required".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use crate::handlers::router;
    use crate::test_support::{test_state, text_response, GEMINI_PATH};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn post(app: axum::Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn target() -> Value {
        json!({
            "userId": "u1",
            "courseId": "c1",
            "slideId": "s1",
            "criteria": [{ "name": "Логіка", "description": "послідовність аргументів" }]
        })
    }

    #[tokio::test]
    async fn start_then_turn_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(GEMINI_PATH))
            .and(body_string_contains("responseMimeType"))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response(
                &json!({
                    "text": "Моя відповідь",
                    "rating": {
                        "overall_score": 6,
                        "criteriaScores": { "Логіка": 6 },
                        "comment": "💡 Порада: більше конкретики"
                    }
                })
                .to_string(),
            )))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(GEMINI_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(text_response("Текст кейсу")))
            .mount(&server)
            .await;

        let state = test_state(&server.uri(), "test-key").await;
        let (status, body) = post(router(state.clone()), "/api/chat/start", target()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert_eq!(body["messages"][1]["text"], "Текст кейсу");

        let mut turn = target();
        turn["text"] = json!("Моя відповідь");
        let (status, body) = post(router(state.clone()), "/api/chat/turn", turn).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "answered");
        assert_eq!(body["userMessage"]["text"], "Моя відповідь");
        assert_eq!(body["aiMessage"]["rating"]["overall_score"], 6);
        assert!(body.get("contractViolation").is_none());

        let history = state.db.fetch_chat_history("u1").await.unwrap();
        assert_eq!(history[0].messages.len(), 4);
        assert_eq!(state.active_conversation_locks(), 0);
        assert_eq!(state.slide_prompts.active_gates(), 0);
    }

    #[tokio::test]
    async fn blank_turn_is_skipped() {
        let state = test_state("http://127.0.0.1:9", "test-key").await;
        let mut turn = target();
        turn["text"] = json!("  ");
        let (status, body) = post(router(state), "/api/chat/turn", turn).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "skipped" }));
    }

    #[tokio::test]
    async fn blank_turn_on_unknown_slide_is_skipped() {
        let state = test_state("http://127.0.0.1:9", "test-key").await;
        let mut turn = target();
        turn["slideId"] = json!("nope");
        turn["text"] = json!("   ");
        let (status, body) = post(router(state), "/api/chat/turn", turn).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "skipped" }));
    }

    #[tokio::test]
    async fn turn_needs_text_or_audio() {
        let state = test_state("http://127.0.0.1:9", "test-key").await;
        let (status, body) = post(router(state), "/api/chat/turn", target()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("audioData"));
    }

    #[tokio::test]
    async fn missing_ids_are_rejected() {
        let state = test_state("http://127.0.0.1:9", "test-key").await;
        let mut start = target();
        start["slideId"] = json!("");
        let (status, body) = post(router(state), "/api/chat/start", start).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "slideId is required");
    }

    #[tokio::test]
    async fn start_on_unknown_slide_is_not_found() {
        let state = test_state("http://127.0.0.1:9", "test-key").await;
        let mut start = target();
        start["slideId"] = json!("nope");
        let (status, _) = post(router(state), "/api/chat/start", start).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
