//! Prompt templates from `[analysis].prompt_dir`.
//!
//! The directory may hold `preamble.txt` and one `<pillar>.txt` per pillar
//! (`security.txt`, `cost_optimization.txt`, ...). Missing files fall back
//! to the built-in wording. A configured directory that does not exist, or
//! that holds none of these files, is a configuration error.

use std::path::Path;

use anyhow::{Context, Result};

use pillar_audit_core::analysis::PromptTemplates;
use pillar_audit_core::error::AuditError;
use pillar_audit_core::models::Pillar;

const PREAMBLE_FILE: &str = "preamble.txt";

pub fn load_prompt_templates(dir: &Path) -> Result<PromptTemplates> {
    if !dir.is_dir() {
        return Err(AuditError::Configuration(format!(
            "analysis.prompt_dir is not a directory: {}",
            dir.display()
        ))
        .into());
    }

    let mut templates = PromptTemplates {
        preamble: read_optional(&dir.join(PREAMBLE_FILE))?,
        ..Default::default()
    };
    for pillar in Pillar::ALL {
        let path = dir.join(format!("{}.txt", PromptTemplates::file_stem(pillar)));
        if let Some(text) = read_optional(&path)? {
            templates.pillars.insert(pillar, text);
        }
    }

    if templates.is_empty() {
        return Err(AuditError::Configuration(format!(
            "analysis.prompt_dir contains no templates: {}",
            dir.display()
        ))
        .into());
    }
    tracing::info!(
        dir = %dir.display(),
        preamble = templates.preamble.is_some(),
        pillars = templates.pillars.len(),
        "loaded prompt templates"
    );
    Ok(templates)
}

/// Blank files count as absent.
fn read_optional(path: &Path) -> Result<Option<String>> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read prompt template: {}", path.display()))?;
    Ok((!text.trim().is_empty()).then_some(text))
}
