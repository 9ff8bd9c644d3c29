//! Choosing the text a job is summarized from.
//!
//! The open-access document is preferred. When there is no source URL, or
//! fetching or extraction fails for any reason, the work's stored abstract is
//! used instead.

use std::sync::Arc;

use tracing::{debug, warn};

use papertrail_core::{defaults, JobQueue, Result, TextExtractor};

use crate::fetch::SafeFetcher;

/// Where resolved text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextSource {
    /// Extracted from the fetched source document.
    Document,
    /// The work's stored abstract.
    Abstract,
}

impl TextSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextSource::Document => "document",
            TextSource::Abstract => "abstract",
        }
    }
}

/// Non-empty text ready for the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedText {
    pub text: String,
    pub source: TextSource,
}

/// Resolves the text to summarize for a work.
pub struct ContentResolver {
    fetcher: Arc<SafeFetcher>,
    extractor: Arc<dyn TextExtractor>,
    max_chars: usize,
}

impl ContentResolver {
    pub fn new(fetcher: Arc<SafeFetcher>, extractor: Arc<dyn TextExtractor>) -> Self {
        Self {
            fetcher,
            extractor,
            max_chars: defaults::MAX_TEXT_CHARS,
        }
    }

    /// Cap on characters taken from an extracted document.
    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars;
        self
    }

    /// Text for `work_id`, or `None` when neither source yields any.
    ///
    /// Only a store failure while reading the abstract is an error; document
    /// problems are logged and fall through to the abstract.
    pub async fn resolve_text(
        &self,
        queue: &dyn JobQueue,
        work_id: &str,
        source_url: Option<&str>,
    ) -> Result<Option<ResolvedText>> {
        if let Some(url) = source_url.filter(|u| !u.trim().is_empty()) {
            if let Some(text) = self.document_text(work_id, url).await {
                return Ok(Some(ResolvedText {
                    text,
                    source: TextSource::Document,
                }));
            }
        }

        let text = queue
            .work_abstract(work_id)
            .await?
            .filter(|a| !a.trim().is_empty());

        debug!(
            subsystem = "jobs",
            component = "resolver",
            work_id,
            has_abstract = text.is_some(),
            "Using stored abstract"
        );

        Ok(text.map(|text| ResolvedText {
            text,
            source: TextSource::Abstract,
        }))
    }

    async fn document_text(&self, work_id: &str, url: &str) -> Option<String> {
        let data = self.fetcher.fetch(url).await?;

        match self.extractor.extract_text(&data).await {
            Ok(text) if !text.trim().is_empty() => Some(truncate_chars(&text, self.max_chars)),
            Ok(_) => {
                warn!(
                    subsystem = "jobs",
                    component = "resolver",
                    work_id,
                    url,
                    "Document has no text layer, falling back to abstract"
                );
                None
            }
            Err(e) => {
                warn!(
                    subsystem = "jobs",
                    component = "resolver",
                    work_id,
                    url,
                    error = %e,
                    "Text extraction failed, falling back to abstract"
                );
                None
            }
        }
    }
}

/// The first `max_chars` characters of `text`.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
