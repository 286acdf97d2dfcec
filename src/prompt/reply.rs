//! Parsing and validation of the one-line JSON reply the evaluation prompt
//! asks the model for. Models wrap JSON in code fences or add a sentence
//! around it often enough that the first balanced object is extracted before
//! validation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub const MAX_OVERALL_SCORE: i64 = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingResult {
    pub overall_score: i64,
    #[serde(rename = "criteriaScores", default)]
    pub criteria_scores: BTreeMap<String, i64>,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurnReply {
    pub text: String,
    pub rating: RatingResult,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContractViolation {
    #[error("reply is not JSON: {0}")]
    NotJson(String),
    #[error("reply JSON is not an object")]
    NotAnObject,
    #[error("missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{field}` must be {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },
    #[error("overall_score {0} is outside 0..=10")]
    ScoreOutOfRange(i64),
    #[error("criterion `{0}` was not requested")]
    UnknownCriterion(String),
}

/// Validates `raw` against the chat-turn contract. When `criteria_names` is
/// non-empty every key of `criteriaScores` must be one of them.
pub fn parse_chat_turn_reply(
    raw: &str,
    criteria_names: &[String],
) -> Result<ChatTurnReply, ContractViolation> {
    let value = parse_json_relaxed(raw)?;
    let object = value.as_object().ok_or(ContractViolation::NotAnObject)?;

    let text = require_str(object, "text", "text")?;
    let rating = object
        .get("rating")
        .ok_or(ContractViolation::MissingField("rating"))?
        .as_object()
        .ok_or_else(|| ContractViolation::WrongType {
            field: "rating".to_string(),
            expected: "an object",
        })?;

    let overall_score = require_integer(
        rating
            .get("overall_score")
            .ok_or(ContractViolation::MissingField("overall_score"))?,
        "overall_score",
    )?;
    if !(0..=MAX_OVERALL_SCORE).contains(&overall_score) {
        return Err(ContractViolation::ScoreOutOfRange(overall_score));
    }

    let scores = rating
        .get("criteriaScores")
        .ok_or(ContractViolation::MissingField("criteriaScores"))?
        .as_object()
        .ok_or_else(|| ContractViolation::WrongType {
            field: "criteriaScores".to_string(),
            expected: "an object",
        })?;

    let mut criteria_scores = BTreeMap::new();
    for (name, score) in scores {
        if !criteria_names.is_empty() && !criteria_names.iter().any(|known| known == name) {
            return Err(ContractViolation::UnknownCriterion(name.clone()));
        }
        let score = require_integer(score, &format!("criteriaScores.{name}"))?;
        criteria_scores.insert(name.clone(), score);
    }

    let comment = require_str(rating, "comment", "comment")?;

    Ok(ChatTurnReply {
        text,
        rating: RatingResult {
            overall_score,
            criteria_scores,
            comment,
        },
    })
}

fn require_str(
    object: &Map<String, Value>,
    key: &'static str,
    field: &str,
) -> Result<String, ContractViolation> {
    object
        .get(key)
        .ok_or(ContractViolation::MissingField(key))?
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| ContractViolation::WrongType {
            field: field.to_string(),
            expected: "a string",
        })
}

fn require_integer(value: &Value, field: &str) -> Result<i64, ContractViolation> {
    if let Some(number) = value.as_i64() {
        return Ok(number);
    }
    // 7.0 is still an integer score.
    match value.as_f64() {
        Some(number) if number.fract() == 0.0 => Ok(number as i64),
        _ => Err(ContractViolation::WrongType {
            field: field.to_string(),
            expected: "an integer",
        }),
    }
}

fn parse_json_relaxed(input: &str) -> Result<Value, ContractViolation> {
    let trimmed = strip_code_fences(input.trim());
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }
    match extract_first_balanced_object(trimmed) {
        Some(candidate) => serde_json::from_str::<Value>(candidate)
            .map_err(|err| ContractViolation::NotJson(err.to_string())),
        None => Err(ContractViolation::NotJson(
            "no balanced JSON object found".to_string(),
        )),
    }
}

fn strip_code_fences(s: &str) -> &str {
    let s = s.strip_prefix("```json").unwrap_or(s);
    let s = s.strip_prefix("```").unwrap_or(s);
    let s = s.strip_suffix("```").unwrap_or(s);
    s.trim()
}

fn extract_first_balanced_object(s: &str) -> Option<&str> {
    let mut in_str = false;
    let mut escaped = false;
    let mut depth = 0usize;
    let mut start = None;

    for (index, ch) in s.char_indices() {
        if in_str {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_str = false;
            }
            continue;
        }

        match ch {
            '"' if start.is_some() => in_str = true,
            '{' => {
                if start.is_none() {
                    start = Some(index);
                }
                depth += 1;
            }
            '}' if start.is_some() => {
                depth -= 1;
                if depth == 0 {
                    let begin = start?;
                    return Some(&s[begin..=index]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criteria() -> Vec<String> {
        vec!["Логіка".to_string(), "Структура".to_string()]
    }

    const VALID: &str = r#"{"text":"Моя відповідь","rating":{"overall_score":7,"criteriaScores":{"Логіка":8,"Структура":6},"comment":"✅ Сильні сторони: чітко • 💡 Порада: більше прикладів\n"}}"#;

    #[test]
    fn accepts_single_line_reply() {
        let reply = parse_chat_turn_reply(VALID, &criteria()).unwrap();
        assert_eq!(reply.text, "Моя відповідь");
        assert_eq!(reply.rating.overall_score, 7);
        assert_eq!(reply.rating.criteria_scores.get("Логіка"), Some(&8));
        assert!(reply.rating.comment.starts_with("✅"));
    }

    #[test]
    fn accepts_fenced_reply_with_prose() {
        let raw = format!("Ось оцінка:\n```json\n{VALID}\n```");
        let reply = parse_chat_turn_reply(&raw, &criteria()).unwrap();
        assert_eq!(reply.rating.criteria_scores.len(), 2);

        let fenced = format!("```json\n{VALID}\n```");
        assert!(parse_chat_turn_reply(&fenced, &criteria()).is_ok());
    }

    #[test]
    fn accepts_float_integers() {
        let raw = r#"{"text":"a","rating":{"overall_score":9.0,"criteriaScores":{},"comment":"ok"}}"#;
        let reply = parse_chat_turn_reply(raw, &[]).unwrap();
        assert_eq!(reply.rating.overall_score, 9);
    }

    #[test]
    fn rejects_out_of_range_score() {
        let raw = r#"{"text":"a","rating":{"overall_score":11,"criteriaScores":{},"comment":"ok"}}"#;
        assert_eq!(
            parse_chat_turn_reply(raw, &[]),
            Err(ContractViolation::ScoreOutOfRange(11))
        );
    }

    #[test]
    fn rejects_unknown_criterion() {
        let raw = r#"{"text":"a","rating":{"overall_score":5,"criteriaScores":{"Стиль":5},"comment":"ok"}}"#;
        assert_eq!(
            parse_chat_turn_reply(raw, &criteria()),
            Err(ContractViolation::UnknownCriterion("Стиль".to_string()))
        );
        // Without a requested list any names pass.
        assert!(parse_chat_turn_reply(raw, &[]).is_ok());
    }

    #[test]
    fn rejects_missing_rating_and_prose() {
        assert_eq!(
            parse_chat_turn_reply(r#"{"text":"a"}"#, &[]),
            Err(ContractViolation::MissingField("rating"))
        );
        assert!(matches!(
            parse_chat_turn_reply("Дякую за відповідь!", &[]),
            Err(ContractViolation::NotJson(_))
        ));
        assert_eq!(
            parse_chat_turn_reply("[1, 2]", &[]),
            Err(ContractViolation::NotAnObject)
        );
    }

    #[test]
    fn rejects_non_integer_criterion_score() {
        let raw = r#"{"text":"a","rating":{"overall_score":5,"criteriaScores":{"Логіка":"high"},"comment":"ok"}}"#;
        assert!(matches!(
            parse_chat_turn_reply(raw, &criteria()),
            Err(ContractViolation::WrongType { .. })
        ));
    }

    #[test]
    fn rating_serializes_with_camel_case_scores() {
        let reply = parse_chat_turn_reply(VALID, &criteria()).unwrap();
        let json = serde_json::to_value(&reply.rating).unwrap();
        assert!(json.get("criteriaScores").is_some());
        assert!(json.get("overall_score").is_some());
    }
}
