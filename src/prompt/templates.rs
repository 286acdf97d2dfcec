use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{info, warn};

/// Every model-facing literal. Defaults are the Ukrainian course texts; a YAML
/// or JSON file can override any subset of keys.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PromptTemplates {
    pub case_marker: String,
    pub introduction: String,
    pub evaluation: String,
    pub output_format: String,
    pub comment_template: String,
    pub no_criteria: String,
    pub transcription_system: String,
    pub transcription_context_prefix: String,
    pub contract_fallback: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        PromptTemplates {
            case_marker: "КЕЙС:".to_string(),
            introduction: "Знайди в інструкції до цього слайду текст кейсу, що стоїть після позначки {case_marker}, \
                і відтвори його дослівно. Не додавай саму позначку, лапки, привітання, пояснення чи будь-які \
                коментарі. Виведи лише текст кейсу."
                .to_string(),
            evaluation: "Ти оцінюєш відповідь студента на навчальний кейс. Опис завдання та правила \
                оцінювання: {slide_prompt} Критерії оцінювання: {criteria} Відповідь студента: \
                {student_answer} {output_format}"
                .to_string(),
            output_format: "Поверни результат ЛИШЕ як один рядок валідного JSON без жодного тексту до \
                чи після нього. Об'єкт має рівно два ключі верхнього рівня: \"text\" (дослівна копія \
                відповіді студента) та \"rating\" (об'єкт з ключами \"overall_score\" (ціле число від 0 до \
                10), \"criteriaScores\" (об'єкт, ключі якого це назви критеріїв зі списку вище, а значення \
                цілі бали) і \"comment\" (відгук)). Не використовуй символи нового рядка всередині рядкових \
                значень. Абзаци в \"comment\" розділяй пробілами або маркерами «•». Формат коментаря: \
                {comment_template}"
                .to_string(),
            comment_template: "✅ Сильні сторони: ... • ⚠️ Що можна покращити: ... • 💡 Порада: ..."
                .to_string(),
            no_criteria: "загальна якість і обґрунтованість відповіді".to_string(),
            transcription_system: "Ти система дослівної транскрипції аудіо. Запиши все сказане мовою \
                оригіналу, слово в слово. Не перекладай, не виправляй помилки, не додавай коментарів, \
                пояснень чи розмітки. Нерозбірливі фрагменти познач як [inaudible]. Поверни лише текст \
                транскрипції."
                .to_string(),
            transcription_context_prefix: "Контекст для кращого розпізнавання термінів (не включай його \
                у відповідь): "
                .to_string(),
            contract_fallback: "Не вдалося обробити оцінку відповіді. Спробуйте надіслати відповідь ще раз."
                .to_string(),
        }
    }
}

impl PromptTemplates {
    /// The case marker as it may be named in prompts: without its trailing
    /// colon, so prompts never carry the literal marker token.
    pub fn case_marker_name(&self) -> &str {
        self.case_marker.trim().trim_end_matches(':').trim_end()
    }

    /// Reads overrides from `path`. A missing or malformed file falls back to
    /// the compiled-in defaults.
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            warn!("Prompt template file not found at {}", path.display());
            return PromptTemplates::default();
        }

        let raw = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) => {
                warn!(
                    "Failed to read prompt templates at {}: {}",
                    path.display(),
                    err
                );
                return PromptTemplates::default();
            }
        };

        match serde_yaml::from_str::<PromptTemplates>(&raw) {
            Ok(templates) => {
                info!("Loaded prompt templates from {}", path.display());
                templates
            }
            Err(err) => {
                warn!(
                    "Failed to parse prompt templates at {}: {}",
                    path.display(),
                    err
                );
                PromptTemplates::default()
            }
        }
    }

    pub fn from_optional_path(path: Option<&Path>) -> Self {
        match path {
            Some(path) => PromptTemplates::load(path),
            None => PromptTemplates::default(),
        }
    }
}

/// Single-pass `{name}` substitution. Substituted values are never rescanned,
/// so user text containing `{criteria}` stays literal.
pub fn render_template(template: &str, values: &[(&str, &str)]) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        output.push_str(&rest[..open]);
        let after_open = &rest[open + 1..];
        let replacement = after_open.find('}').and_then(|close| {
            let name = &after_open[..close];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| (*value, close))
        });

        match replacement {
            Some((value, close)) => {
                output.push_str(value);
                rest = &after_open[close + 1..];
            }
            None => {
                output.push('{');
                rest = after_open;
            }
        }
    }
    output.push_str(rest);
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn renders_known_placeholders_once() {
        let rendered = render_template(
            "A={a} B={b} C={c}",
            &[("a", "{b}"), ("b", "2")],
        );
        assert_eq!(rendered, "A={b} B=2 C={c}");
    }

    #[test]
    fn defaults_are_single_line() {
        let templates = PromptTemplates::default();
        for text in [
            &templates.introduction,
            &templates.evaluation,
            &templates.output_format,
            &templates.comment_template,
            &templates.transcription_system,
        ] {
            assert!(!text.contains('\n'), "template has a line break: {text}");
        }
        assert!(templates.introduction.contains("{case_marker}"));
    }

    #[test]
    fn yaml_overrides_only_named_keys() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "no_criteria: overall quality").unwrap();
        writeln!(file, "contract_fallback: Please try again.").unwrap();

        let templates = PromptTemplates::load(file.path());
        let defaults = PromptTemplates::default();
        assert_eq!(templates.no_criteria, "overall quality");
        assert_eq!(templates.contract_fallback, "Please try again.");
        assert_eq!(templates.evaluation, defaults.evaluation);
        assert_eq!(templates.transcription_system, defaults.transcription_system);
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(std::sync::Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn malformed_file_falls_back_with_a_warning() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "no_criteria: [unclosed").unwrap();

        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let templates = tracing::subscriber::with_default(subscriber, || {
            PromptTemplates::load(file.path())
        });

        assert_eq!(templates, PromptTemplates::default());
        let output = String::from_utf8(logs.0.lock().clone()).unwrap();
        assert!(output.contains("WARN"), "no warning logged: {output}");
        assert!(output.contains("Failed to parse prompt templates"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let templates = PromptTemplates::load(Path::new("/definitely/not/here.yaml"));
        assert_eq!(templates, PromptTemplates::default());
    }
}
