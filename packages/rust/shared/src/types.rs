//! Core domain types for affiliation extraction.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// In-archive file name → decoded text, in archive order.
pub type ArchiveContents = IndexMap<String, String>;

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

/// One document whose source archive is to be fetched and scanned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Last path segment of the source link; used for correlation and file naming.
    pub identifier: String,
    /// Abstract-page link as published by the upstream feed.
    pub source_url: String,
}

impl Record {
    /// Build a record from a feed link, deriving the identifier from it.
    pub fn from_link(link: impl Into<String>) -> Self {
        let source_url = link.into();
        Self {
            identifier: identifier_from_link(&source_url),
            source_url,
        }
    }
}

/// Derive a record identifier: the last path segment, ignoring a trailing `/`.
pub fn identifier_from_link(link: &str) -> String {
    let trimmed = link.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed).to_string()
}

/// A single line of the upstream feed JSONL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_id: Option<String>,
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub categories: Option<String>,
}

impl From<FeedEntry> for Record {
    fn from(entry: FeedEntry) -> Self {
        match entry.custom_id {
            Some(id) if !id.is_empty() => Self {
                identifier: id,
                source_url: entry.link,
            },
            _ => Self::from_link(entry.link),
        }
    }
}

// ---------------------------------------------------------------------------
// ExtractionResult
// ---------------------------------------------------------------------------

/// Terminal state of one record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "kind", rename_all = "snake_case")]
pub enum ExtractionStatus {
    Done,
    Failed(ErrorKind),
}

/// Outcome for one record, handed to the downstream request builder.
///
/// Serializes as `{"id": ..., "institutions": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub id: String,
    /// Raw affiliation blocks, deduplicated, first occurrence kept.
    pub institutions: Vec<String>,
    #[serde(skip, default = "default_status")]
    pub status: ExtractionStatus,
}

fn default_status() -> ExtractionStatus {
    ExtractionStatus::Done
}

impl ExtractionResult {
    pub fn done(id: impl Into<String>, institutions: Vec<String>) -> Self {
        Self {
            id: id.into(),
            institutions,
            status: ExtractionStatus::Done,
        }
    }

    /// A failed record still yields an entry, with no institutions.
    pub fn failed(id: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            id: id.into(),
            institutions: Vec::new(),
            status: ExtractionStatus::Failed(kind),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ExtractionStatus::Done
    }
}

// ---------------------------------------------------------------------------
// FailureRecord
// ---------------------------------------------------------------------------

/// One entry of the append-only diagnostic log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureRecord {
    pub identifier: String,
    pub kind: ErrorKind,
    pub source_url: String,
    /// Rendered error with its full cause chain.
    pub trace: String,
}

impl FailureRecord {
    /// Render the log entry: kind and trace, the originating link, a separator.
    pub fn render(&self) -> String {
        format!(
            "[{}] {}: {}\nurl:{}\n{}\n",
            self.kind,
            self.identifier,
            self.trace,
            self.source_url,
            "-".repeat(80)
        )
    }
}
