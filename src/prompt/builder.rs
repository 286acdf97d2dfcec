use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::db::models::ChatMessage;
use crate::prompt::templates::{render_template, PromptTemplates};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Criterion {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Criterion {
    pub fn named(name: impl Into<String>) -> Self {
        Criterion {
            name: name.into(),
            description: None,
        }
    }
}

/// Renders the criteria list as one line, e.g. `Логіка: опис; Структура`.
/// Returns `None` for an empty list.
pub fn render_criteria(criteria: &[Criterion]) -> Option<String> {
    let parts: Vec<String> = criteria
        .iter()
        .filter(|criterion| !criterion.name.trim().is_empty())
        .map(|criterion| {
            let name = criterion.name.trim();
            match criterion.description.as_deref().map(str::trim) {
                Some(description) if !description.is_empty() => {
                    format!("{name}: {description}")
                }
                _ => name.to_string(),
            }
        })
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(flatten_line_breaks(&parts.join("; ")))
    }
}

pub fn flatten_line_breaks(text: &str) -> String {
    text.replace("\r\n", " ").replace(['\n', '\r'], " ")
}

/// Builds the text for the next model call.
///
/// With `is_first_message` the result asks the model to reproduce the case
/// text that follows the case marker in the slide instruction. The slide
/// instruction travels as the system instruction, so the marker itself is
/// never part of the returned string.
///
/// Otherwise the result is an evaluation request for the last user message.
/// An empty string means there is nothing to evaluate and the model must not
/// be called this turn. The evaluation prompt never contains a raw line break.
pub fn build_prompt(
    templates: &PromptTemplates,
    slide_prompt: &str,
    is_first_message: bool,
    last_user_message: Option<&ChatMessage>,
    criterias_text: Option<&str>,
) -> String {
    if is_first_message {
        if !slide_prompt.contains(&templates.case_marker) {
            warn!(
                "Slide prompt has no '{}' marker; the model will not find a case to reproduce",
                templates.case_marker
            );
        }
        let introduction = render_template(
            &templates.introduction,
            &[("case_marker", templates.case_marker_name())],
        );
        return flatten_line_breaks(&introduction);
    }

    let Some(answer) = last_user_message
        .map(|message| message.text.as_str())
        .filter(|text| !text.trim().is_empty())
    else {
        return String::new();
    };

    let criteria = criterias_text
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .unwrap_or(templates.no_criteria.as_str());

    let output_format = render_template(
        &templates.output_format,
        &[("comment_template", templates.comment_template.as_str())],
    );

    let prompt = render_template(
        &templates.evaluation,
        &[
            ("slide_prompt", slide_prompt),
            ("criteria", criteria),
            ("student_answer", answer),
            ("output_format", output_format.as_str()),
        ],
    );

    flatten_line_breaks(&prompt)
}
