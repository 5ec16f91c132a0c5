//! Source archive download for affilscan.
//!
//! This crate provides:
//! - [`FetchSession`]: the per-batch HTTP client (identity, cookies, pool, timeouts)
//! - [`fetch_source`]: streaming download of one archive with challenge detection

pub mod session;
pub mod source;

pub use session::{FetchSession, USER_AGENTS};
pub use source::{
    CHALLENGE_SIGNATURE, DownloadedSource, contains_challenge, fetch_source, source_url_for,
};
