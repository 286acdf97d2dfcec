use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use dotenvy::dotenv;
use tracing::{info, warn};

mod chat;
mod config;
mod db;
mod error;
mod handlers;
mod llm;
mod prompt;
mod slides;
mod state;
#[cfg(test)]
mod test_support;
mod utils;

use config::CONFIG;
use db::database::Database;
use prompt::templates::PromptTemplates;
use slides::seed::seed_slide_prompts;
use state::AppState;
use utils::logging::init_logging;

fn seed_slides_usage() -> &'static str {
    "Usage: cargo run -- seed-slides --file <path to YAML or JSON list of slide prompts>"
}

fn parse_seed_slides_args(args: &[String]) -> anyhow::Result<Option<PathBuf>> {
    if args.get(1).map(|value| value.as_str()) != Some("seed-slides") {
        return Ok(None);
    }

    let mut file_path: Option<PathBuf> = None;
    let mut index = 2;
    while index < args.len() {
        match args[index].as_str() {
            "--file" => {
                index += 1;
                let value = args
                    .get(index)
                    .ok_or_else(|| anyhow!("Missing value for --file"))?;
                file_path = Some(PathBuf::from(value));
            }
            "--help" | "-h" => return Err(anyhow!(seed_slides_usage())),
            other => {
                return Err(anyhow!(
                    "Unknown argument '{}'. {}",
                    other,
                    seed_slides_usage()
                ))
            }
        }
        index += 1;
    }

    file_path
        .map(Some)
        .ok_or_else(|| anyhow!("--file is required. {}", seed_slides_usage()))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    let _guards = init_logging(&CONFIG.log_level, Path::new("logs"));

    let db = Database::init(&CONFIG.database_url)
        .await
        .with_context(|| format!("Failed to open database {}", CONFIG.database_url))?;

    let args: Vec<String> = std::env::args().collect();
    if let Some(file_path) = parse_seed_slides_args(&args)? {
        seed_slide_prompts(&db, &file_path).await?;
        return Ok(());
    }

    if !CONFIG.gemini_configured() {
        warn!("GEMINI_API_KEY is not set; model-backed routes will return errors");
    }

    let templates = PromptTemplates::from_optional_path(CONFIG.prompt_templates_path.as_deref());
    let state = AppState::new((*CONFIG).clone(), db, templates);
    let app = handlers::router(state);

    let listener = tokio::net::TcpListener::bind(&CONFIG.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", CONFIG.bind_addr))?;
    info!(
        "Starting Kiflow chat service on {} (model {})",
        CONFIG.bind_addr, CONFIG.gemini_model
    );
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}
