use std::env;
use std::path::PathBuf;

use anyhow::Result;
use once_cell::sync::Lazy;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub database_url: String,
    pub bind_addr: String,
    pub gemini_api_key: String,
    pub gemini_base_url: String,
    pub gemini_model: String,
    pub gemini_transcription_model: String,
    pub gemini_temperature: f32,
    pub gemini_top_k: i32,
    pub gemini_top_p: f32,
    pub gemini_max_output_tokens: i32,
    pub gemini_timeout_seconds: u64,
    pub prompt_templates_path: Option<PathBuf>,
    pub default_audio_mime_type: String,
}

pub static CONFIG: Lazy<Config> =
    Lazy::new(|| Config::load().expect("Failed to load configuration"));

pub const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com";

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: "info".to_string(),
            database_url: "sqlite://kiflow_chat.db".to_string(),
            bind_addr: "0.0.0.0:8080".to_string(),
            gemini_api_key: String::new(),
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            gemini_model: "gemini-2.0-flash".to_string(),
            gemini_transcription_model: "gemini-2.0-flash".to_string(),
            gemini_temperature: 0.7,
            gemini_top_k: 40,
            gemini_top_p: 0.95,
            gemini_max_output_tokens: 2048,
            gemini_timeout_seconds: 90,
            prompt_templates_path: None,
            default_audio_mime_type: "audio/webm".to_string(),
        }
    }
}

fn env_string(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_f32(name: &str, default: f32) -> f32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<f32>().ok())
        .unwrap_or(default)
}

fn env_i32(name: &str, default: i32) -> i32 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<i32>().ok())
        .unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn env_optional_path(name: &str) -> Option<PathBuf> {
    let value = env::var(name).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(PathBuf::from(trimmed))
}

fn normalize_database_url(value: String) -> String {
    if value.starts_with("sqlite+aiosqlite://") {
        return value.replacen("sqlite+aiosqlite://", "sqlite://", 1);
    }
    value
}

fn normalize_base_url(value: String) -> String {
    let trimmed = value.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        warn!("GEMINI_BASE_URL is empty; using {}", DEFAULT_GEMINI_BASE_URL);
        return DEFAULT_GEMINI_BASE_URL.to_string();
    }
    trimmed.to_string()
}

impl Config {
    pub fn load() -> Result<Self> {
        let defaults = Config::default();

        let bind_addr = env_string("BIND_ADDR", &defaults.bind_addr);
        if bind_addr.trim().is_empty() {
            return Err(anyhow::anyhow!("BIND_ADDR must not be empty"));
        }

        let gemini_model = env_string("GEMINI_MODEL", &defaults.gemini_model);
        let gemini_transcription_model = env::var("GEMINI_TRANSCRIPTION_MODEL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| gemini_model.clone());

        Ok(Config {
            log_level: env_string("LOG_LEVEL", &defaults.log_level).to_lowercase(),
            database_url: normalize_database_url(env_string(
                "DATABASE_URL",
                &defaults.database_url,
            )),
            bind_addr,
            gemini_api_key: env_string("GEMINI_API_KEY", ""),
            gemini_base_url: normalize_base_url(env_string(
                "GEMINI_BASE_URL",
                DEFAULT_GEMINI_BASE_URL,
            )),
            gemini_model,
            gemini_transcription_model,
            gemini_temperature: env_f32("GEMINI_TEMPERATURE", defaults.gemini_temperature),
            gemini_top_k: env_i32("GEMINI_TOP_K", defaults.gemini_top_k),
            gemini_top_p: env_f32("GEMINI_TOP_P", defaults.gemini_top_p),
            gemini_max_output_tokens: env_i32(
                "GEMINI_MAX_OUTPUT_TOKENS",
                defaults.gemini_max_output_tokens,
            ),
            gemini_timeout_seconds: env_u64(
                "GEMINI_TIMEOUT_SECONDS",
                defaults.gemini_timeout_seconds,
            ),
            prompt_templates_path: env_optional_path("PROMPT_TEMPLATES_PATH"),
            default_audio_mime_type: env_string(
                "DEFAULT_AUDIO_MIME_TYPE",
                &defaults.default_audio_mime_type,
            ),
        })
    }

    pub fn gemini_configured(&self) -> bool {
        !self.gemini_api_key.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_python_style_sqlite_urls() {
        assert_eq!(
            normalize_database_url("sqlite+aiosqlite:///chat.db".to_string()),
            "sqlite:///chat.db"
        );
        assert_eq!(
            normalize_database_url("sqlite::memory:".to_string()),
            "sqlite::memory:"
        );
    }

    #[test]
    fn trims_trailing_slash_from_base_url() {
        assert_eq!(
            normalize_base_url("http://127.0.0.1:9000/".to_string()),
            "http://127.0.0.1:9000"
        );
        assert_eq!(normalize_base_url("  ".to_string()), DEFAULT_GEMINI_BASE_URL);
    }

    #[test]
    fn default_config_has_no_api_key() {
        let config = Config::default();
        assert!(!config.gemini_configured());
        assert_eq!(config.default_audio_mime_type, "audio/webm");
    }
}
