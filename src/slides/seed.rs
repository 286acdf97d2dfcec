use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tracing::{info, warn};

use crate::db::database::Database;
use crate::db::models::SlidePrompt;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SeedSummary {
    pub total_records: usize,
    pub upserted: usize,
    pub invalid_records: usize,
}

/// One entry of a seed file. Every field is optional so a single malformed
/// entry is counted as invalid instead of failing the whole file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SeedRecord {
    slide_id: Option<String>,
    system_instruction: Option<String>,
    initial_message: Option<String>,
}

impl SeedRecord {
    fn into_prompt(self) -> Option<SlidePrompt> {
        let slide_id = self.slide_id.filter(|value| !value.trim().is_empty())?;
        let system_instruction = self
            .system_instruction
            .filter(|value| !value.trim().is_empty())?;
        Some(SlidePrompt {
            slide_id,
            system_instruction,
            initial_message: self.initial_message.unwrap_or_default(),
        })
    }
}

/// Loads a YAML (or JSON) list of slide prompts and upserts each valid one.
/// Entries without a slide id or system instruction are skipped.
pub async fn seed_slide_prompts(db: &Database, path: &Path) -> anyhow::Result<SeedSummary> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read slide prompts from {}", path.display()))?;
    let entries: Vec<serde_yaml::Value> = serde_yaml::from_str(&raw)
        .with_context(|| format!("Failed to parse slide prompts in {}", path.display()))?;

    let mut summary = SeedSummary {
        total_records: entries.len(),
        ..SeedSummary::default()
    };
    for (index, entry) in entries.into_iter().enumerate() {
        let prompt = match serde_yaml::from_value::<SeedRecord>(entry) {
            Ok(record) => record.into_prompt(),
            Err(err) => {
                warn!(index, "Unreadable slide prompt entry: {err}");
                None
            }
        };
        let Some(prompt) = prompt else {
            warn!(index, "Skipping slide prompt without id or instruction");
            summary.invalid_records += 1;
            continue;
        };
        db.upsert_slide_prompt(&prompt).await?;
        summary.upserted += 1;
    }

    info!(
        "Seeded slide prompts: total={} upserted={} invalid={}",
        summary.total_records, summary.upserted, summary.invalid_records
    );
    Ok(summary)
}
