//! Shared types, error model, and configuration for affilscan.
//!
//! This crate is the foundation depended on by all other affilscan crates.
//! It provides:
//! - [`AffilscanError`] and [`ErrorKind`]: the unified error type and its classification
//! - Domain types ([`Record`], [`ArchiveContents`], [`ExtractionResult`], [`FailureRecord`])
//! - Configuration ([`AppConfig`], [`FetchConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, FetchConfig, FetchPoliciesConfig, PathsConfig, config_dir, config_file_path,
    init_config, load_config, load_config_from, validate_config,
};
pub use error::{AffilscanError, ErrorKind, Result, display_chain};
pub use types::{
    ArchiveContents, ExtractionResult, ExtractionStatus, FailureRecord, FeedEntry, Record,
    identifier_from_link,
};
