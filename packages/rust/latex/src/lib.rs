//! Affiliation block extraction from LaTeX source.
//!
//! This crate provides:
//! - [`brace`]: counter-based matcher for brace-delimited arguments
//! - [`commands`]: the open set of affiliation-bearing command names and their patterns
//! - [`extract`]: per-archive driver that selects sources and deduplicates blocks
//!
//! Everything here is pure and synchronous; callers run it off the async scheduler.

pub mod brace;
pub mod commands;
pub mod extract;

pub use brace::extract_brace_block;
pub use commands::{CommandSet, DEFAULT_COMMANDS, extract_command_blocks};
pub use extract::{
    TEXT_SOURCE_EXTENSIONS, dedup_preserving_order, extract_institutions, is_text_source,
    select_text_sources,
};
