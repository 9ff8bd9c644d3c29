//! Prompt templates for summarization.
//!
//! Templates live in a YAML file with a `summary` section holding a `system`
//! and a `user` prompt. The user prompt carries a `{text}` placeholder that is
//! replaced with the document text at call time.

use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use papertrail_core::{defaults, Error, Result};

/// Built-in templates, used when `PROMPTS_PATH` is not set.
const DEFAULT_PROMPTS_YAML: &str = include_str!("../prompts.yaml");

/// A system/user prompt pair.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}

/// All prompt templates the worker uses.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PromptTemplates {
    pub summary: PromptPair,
}

impl PromptTemplates {
    /// Parse templates from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let templates: Self = serde_yaml::from_str(yaml)?;
        if !templates
            .summary
            .user
            .contains(defaults::PROMPT_TEXT_PLACEHOLDER)
        {
            return Err(Error::Config(format!(
                "summary.user prompt is missing the {} placeholder",
                defaults::PROMPT_TEXT_PLACEHOLDER
            )));
        }
        Ok(templates)
    }

    /// Load templates from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read prompts file {}: {}", path.display(), e))
        })?;
        debug!(
            subsystem = "inference",
            component = "prompts",
            path = %path.display(),
            "Loaded prompt templates"
        );
        Self::from_yaml(&yaml)
    }

    /// The templates shipped with the crate.
    pub fn bundled() -> Result<Self> {
        Self::from_yaml(DEFAULT_PROMPTS_YAML)
    }

    /// Load from `PROMPTS_PATH` if set, otherwise use the bundled templates.
    pub fn from_env() -> Result<Self> {
        match std::env::var("PROMPTS_PATH") {
            Ok(path) if !path.is_empty() => Self::from_file(path),
            _ => Self::bundled(),
        }
    }

    /// The summary user prompt with `text` substituted.
    pub fn render_summary_user(&self, text: &str) -> String {
        self.summary
            .user
            .replace(defaults::PROMPT_TEXT_PLACEHOLDER, text)
    }
}
