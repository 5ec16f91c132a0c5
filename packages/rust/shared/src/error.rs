//! Error types for affilscan.
//!
//! Library crates use [`AffilscanError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::fmt::Write as _;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Top-level error type for all affilscan operations.
#[derive(Debug, thiserror::Error)]
pub enum AffilscanError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error while downloading a source archive.
    #[error("network error: {0}")]
    Network(String),

    /// The remote host answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    HttpStatus { url: String, status: u16 },

    /// The downloaded payload could not be opened as an archive.
    #[error("archive error: {message}")]
    Archive { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (malformed feed line, bad URL, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// The archive holds no plain-text source members.
    #[error("no .tex files in source archive")]
    NoSourceFiles,

    /// Source members were present but no affiliation block matched.
    #[error("no affiliation blocks found in any .tex file")]
    NoInstitutions,

    /// The remote host served an anti-automation challenge page.
    /// Unrecoverable for the whole run.
    #[error("challenge page served while downloading {url}")]
    ChallengeDetected { url: String },

    /// The run was halted before this record was admitted; nothing was fetched.
    #[error("run halted before the record was fetched")]
    Halted,

    /// A spawned task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, AffilscanError>;

/// Classification of a per-record failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NoSourceFiles,
    NoInstitutions,
    ChallengeDetected,
    /// Network error, timeout, or non-2xx status.
    Transport,
    /// Never attempted because the run halted first.
    Skipped,
    Other,
}

impl ErrorKind {
    /// Stable code written to the diagnostic log.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoSourceFiles => "NO_SOURCE_FILES",
            Self::NoInstitutions => "NO_INSTITUTIONS",
            Self::ChallengeDetected => "CHALLENGE_DETECTED",
            Self::Transport => "TRANSPORT",
            Self::Skipped => "SKIPPED",
            Self::Other => "OTHER",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl AffilscanError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create an archive error from any displayable message.
    pub fn archive(msg: impl Into<String>) -> Self {
        Self::Archive {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Classify this error for logging and scheduling decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoSourceFiles => ErrorKind::NoSourceFiles,
            Self::NoInstitutions => ErrorKind::NoInstitutions,
            Self::ChallengeDetected { .. } => ErrorKind::ChallengeDetected,
            Self::Network(_) | Self::HttpStatus { .. } => ErrorKind::Transport,
            Self::Halted => ErrorKind::Skipped,
            _ => ErrorKind::Other,
        }
    }

    /// Whether this error must stop the entire run.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::ChallengeDetected
    }
}

/// Render an error and every `source()` below it, one cause per line.
pub fn display_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut current = err.source();
    while let Some(cause) = current {
        let _ = write!(out, "\n  caused by: {cause}");
        current = cause.source();
    }
    out
}
