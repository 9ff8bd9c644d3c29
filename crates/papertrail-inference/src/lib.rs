//! # papertrail-inference
//!
//! Language model access for the papertrail summary worker.
//!
//! - [`OllamaClient`] sends the summary prompt to an Ollama server and
//!   returns the raw reply.
//! - [`PromptTemplates`] loads the system/user prompt pair from YAML.
//! - [`parse_model_output`] turns a raw reply into a summary and tags.

pub mod ollama;
pub mod parser;
pub mod prompts;

pub use ollama::{OllamaClient, OllamaConfig};
pub use parser::{normalize_tags, parse_model_output, parse_tag_lines, parse_tag_list_json};
pub use prompts::{PromptPair, PromptTemplates};
