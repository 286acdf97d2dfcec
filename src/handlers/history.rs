use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::Json;
use serde::Serialize;
use tracing::info;

use crate::db::models::{ChatHistoryEntry, ChatHistoryRow};
use crate::handlers::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct UpsertResponse {
    pub upserted: usize,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: u64,
}

pub async fn list_chat_history(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<ChatHistoryEntry>>, ApiError> {
    let entries = state.db.fetch_chat_history(&user_id).await?;
    Ok(Json(entries))
}

pub async fn upsert_chat_history(
    State(state): State<AppState>,
    body: Result<Json<Vec<ChatHistoryRow>>, JsonRejection>,
) -> Result<Json<UpsertResponse>, ApiError> {
    let Json(rows) = body?;
    if let Some(row) = rows
        .iter()
        .find(|row| row.user_id.trim().is_empty() || row.slide_id.trim().is_empty())
    {
        return Err(ApiError::BadRequest(format!(
            "user_id and slide_id are required (course_id={})",
            row.course_id
        )));
    }

    state.db.upsert_chat_history(&rows).await?;
    Ok(Json(UpsertResponse {
        upserted: rows.len(),
    }))
}

pub async fn delete_chat_history(
    State(state): State<AppState>,
    Path((user_id, course_id)): Path<(String, String)>,
) -> Result<Json<DeleteResponse>, ApiError> {
    let deleted = state.db.delete_chat_history(&user_id, &course_id).await?;
    info!(user_id = %user_id, course_id = %course_id, deleted, "Chat history cleared");
    Ok(Json(DeleteResponse { deleted }))
}

#[cfg(test)]
mod tests {
    use crate::db::models::{ChatHistoryRow, ChatMessage};
    use crate::handlers::router;
    use crate::test_support::test_state;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    async fn send(app: axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn unknown_user_has_empty_history() {
        let state = test_state("http://127.0.0.1:9", "test-key").await;
        let (status, body) = send(router(state), "GET", "/api/chat-history/nobody", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn put_replaces_messages_for_the_pair() {
        let state = test_state("http://127.0.0.1:9", "test-key").await;
        let first = ChatHistoryRow::new("u1", "c1", "s1", vec![ChatMessage::user("перша")]);
        let second = ChatHistoryRow::new("u1", "c1", "s1", vec![ChatMessage::user("друга")]);

        for row in [&first, &second] {
            let (status, body) = send(
                router(state.clone()),
                "PUT",
                "/api/chat-history",
                Some(json!([row])),
            )
            .await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["upserted"], 1);
        }

        let (_, body) = send(router(state), "GET", "/api/chat-history/u1", None).await;
        let entries = body.as_array().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["slide_id"], "s1");
        assert_eq!(entries[0]["messages"][0]["text"], "друга");
        assert_eq!(entries[0]["messages"][0]["role"], "user");
    }

    #[tokio::test]
    async fn put_rejects_rows_without_keys() {
        let state = test_state("http://127.0.0.1:9", "test-key").await;
        let (status, body) = send(
            router(state),
            "PUT",
            "/api/chat-history",
            Some(json!([{ "user_id": "", "course_id": "c1", "slide_id": "s1", "messages": [] }])),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn delete_without_rows_succeeds() {
        let state = test_state("http://127.0.0.1:9", "test-key").await;
        let (status, body) = send(router(state), "DELETE", "/api/chat-history/u1/c404", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "deleted": 0 }));
    }

    #[tokio::test]
    async fn delete_clears_one_course_only() {
        let state = test_state("http://127.0.0.1:9", "test-key").await;
        state
            .db
            .upsert_chat_history(&[
                ChatHistoryRow::new("u1", "c1", "s1", vec![ChatMessage::user("a")]),
                ChatHistoryRow::new("u1", "c1", "s2", vec![ChatMessage::user("b")]),
                ChatHistoryRow::new("u1", "c2", "s3", vec![ChatMessage::user("c")]),
            ])
            .await
            .unwrap();

        let (status, body) = send(router(state.clone()), "DELETE", "/api/chat-history/u1/c1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["deleted"], 2);

        let remaining = state.db.fetch_chat_history("u1").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].course_id, "c2");
    }
}
