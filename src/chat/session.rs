//! Server-side driver for one lesson chat: the introduction turn that reveals
//! the case, then evaluation turns for each student answer.

use tracing::{info, warn};

use crate::db::models::{ChatHistoryRow, ChatMessage};
use crate::error::ChatError;
use crate::llm::media::AudioPayload;
use crate::prompt::builder::{build_prompt, render_criteria, Criterion};
use crate::prompt::reply::{parse_chat_turn_reply, ContractViolation};
use crate::state::AppState;

#[derive(Debug, Clone)]
pub enum TurnInput {
    Text(String),
    Audio(AudioPayload),
}

#[derive(Debug, Clone)]
pub enum TurnOutcome {
    /// Nothing to evaluate; the model was not called and nothing was stored.
    Skipped,
    Answered {
        user: ChatMessage,
        ai: ChatMessage,
        contract_violation: Option<ContractViolation>,
    },
}

#[derive(Debug, Clone)]
pub struct ChatSession {
    pub user_id: String,
    pub course_id: String,
    pub slide_id: String,
    pub criteria: Vec<Criterion>,
    messages: Vec<ChatMessage>,
}

impl ChatSession {
    pub async fn load(
        state: &AppState,
        user_id: &str,
        course_id: &str,
        slide_id: &str,
        criteria: Vec<Criterion>,
    ) -> Result<Self, ChatError> {
        let messages = state
            .db
            .fetch_chat_history_row(user_id, slide_id)
            .await?
            .map(|row| row.messages)
            .unwrap_or_default();

        Ok(ChatSession {
            user_id: user_id.to_string(),
            course_id: course_id.to_string(),
            slide_id: slide_id.to_string(),
            criteria,
            messages,
        })
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Opens the conversation with the slide's initial message and the case
    /// text. Returns the appended messages; empty when the chat already has
    /// history.
    pub async fn start(&mut self, state: &AppState) -> Result<Vec<ChatMessage>, ChatError> {
        if !self.messages.is_empty() {
            return Ok(Vec::new());
        }

        let slide = state
            .slide_prompts
            .get_or_fetch(&state.db, &self.slide_id)
            .await?;
        let prompt = build_prompt(
            &state.templates,
            &slide.system_instruction,
            true,
            None,
            None,
        );
        let case_text = state
            .gemini
            .generate_text(
                &slide.system_instruction,
                &prompt,
                false,
                Some("slide_system_instruction"),
            )
            .await?;

        let mut opened = Vec::new();
        if !slide.initial_message.trim().is_empty() {
            opened.push(ChatMessage::ai(slide.initial_message.trim(), None));
        }
        let case_text = case_text.trim();
        if case_text.is_empty() {
            warn!(
                slide_id = %self.slide_id,
                "Model returned no case text for the introduction turn"
            );
        } else {
            opened.push(ChatMessage::ai(case_text, None));
        }

        if opened.is_empty() {
            return Err(ChatError::upstream(
                "Gemini returned no case text",
                format!("slide {} has no initial message either", self.slide_id),
            ));
        }

        self.commit(state, opened.clone()).await?;
        info!(
            user_id = %self.user_id,
            slide_id = %self.slide_id,
            messages = opened.len(),
            "Chat session opened"
        );
        Ok(opened)
    }

    /// Evaluates one student answer. The user message and the model's
    /// evaluation are stored together, or not at all.
    pub async fn submit(
        &mut self,
        state: &AppState,
        input: TurnInput,
    ) -> Result<TurnOutcome, ChatError> {
        let text = match input {
            TurnInput::Text(text) => text,
            TurnInput::Audio(audio) => {
                state
                    .gemini
                    .transcribe(&state.templates.transcription_system, &audio, None)
                    .await?
            }
        };
        let text = text.trim();
        if text.is_empty() {
            return Ok(TurnOutcome::Skipped);
        }
        let user = ChatMessage::user(text);

        let slide = state
            .slide_prompts
            .get_or_fetch(&state.db, &self.slide_id)
            .await?;
        let criterias_text = render_criteria(&self.criteria);
        let prompt = build_prompt(
            &state.templates,
            &slide.system_instruction,
            false,
            Some(&user),
            criterias_text.as_deref(),
        );
        if prompt.is_empty() {
            return Ok(TurnOutcome::Skipped);
        }

        let raw = state
            .gemini
            .generate_text("", &prompt, true, None)
            .await?;

        let criteria_names: Vec<String> = self
            .criteria
            .iter()
            .map(|criterion| criterion.name.trim().to_string())
            .filter(|name| !name.is_empty())
            .collect();

        let (ai, contract_violation) = match parse_chat_turn_reply(&raw, &criteria_names) {
            Ok(reply) => (
                ChatMessage::ai(reply.rating.comment.clone(), Some(reply.rating)),
                None,
            ),
            Err(violation) => {
                warn!(
                    user_id = %self.user_id,
                    slide_id = %self.slide_id,
                    "Evaluation reply rejected: {violation}"
                );
                (
                    ChatMessage::ai(fallback_text(&raw, &state.templates.contract_fallback), None),
                    Some(violation),
                )
            }
        };

        self.commit(state, vec![user.clone(), ai.clone()]).await?;
        Ok(TurnOutcome::Answered {
            user,
            ai,
            contract_violation,
        })
    }

    async fn commit(
        &mut self,
        state: &AppState,
        appended: Vec<ChatMessage>,
    ) -> Result<(), ChatError> {
        let mut messages = self.messages.clone();
        messages.extend(appended);
        let row = ChatHistoryRow::new(
            self.user_id.clone(),
            self.course_id.clone(),
            self.slide_id.clone(),
            messages,
        );
        state.db.upsert_chat_history(std::slice::from_ref(&row)).await?;
        self.messages = row.messages;
        Ok(())
    }
}

/// Plain prose from the model is still worth showing; broken JSON is not.
fn fallback_text(raw: &str, template: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.starts_with('{') || trimmed.starts_with("```") {
        template.to_string()
    } else {
        trimmed.to_string()
    }
}
