pub mod chat;
pub mod error;
pub mod health;
pub mod history;
pub mod slides;
pub mod transcribe;

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/api/transcribe", post(transcribe::transcribe))
        .route("/api/chat-history", put(history::upsert_chat_history))
        .route(
            "/api/chat-history/{user_id}",
            get(history::list_chat_history),
        )
        .route(
            "/api/chat-history/{user_id}/{course_id}",
            delete(history::delete_chat_history),
        )
        .route("/api/slides/{slide_id}/prompt", get(slides::get_slide_prompt))
        .route("/api/chat/start", post(chat::start_chat))
        .route("/api/chat/turn", post(chat::submit_turn))
        .with_state(state)
        .layer(CorsLayer::permissive())
}
