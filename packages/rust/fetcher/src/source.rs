//! Streaming download of one source archive.

use affilscan_shared::{AffilscanError, Result, display_chain};
use tempfile::TempPath;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};
use url::Url;

use crate::session::FetchSession;

/// Head of the page served instead of the archive once the host starts
/// challenging our traffic.
pub const CHALLENGE_SIGNATURE: &[u8] =
    b"<html>\n     <head>\n       <title>arXiv reCAPTCHA</title>";

/// Path segment of the abstract page, replaced to reach the source download.
const ABSTRACT_SEGMENT: &str = "abs";
const SOURCE_SEGMENT: &str = "e-print";

/// A source archive persisted to a temporary file.
///
/// The file is removed when this value is dropped.
#[derive(Debug)]
pub struct DownloadedSource {
    pub url: Url,
    pub path: TempPath,
    pub bytes: u64,
}

/// Map an abstract-page link to its source-download URL.
///
/// `https://arxiv.org/abs/2401.01234` → `https://arxiv.org/e-print/2401.01234`.
/// Links without an `abs` segment are returned unchanged.
pub fn source_url_for(link: &str) -> Result<Url> {
    let mut url = Url::parse(link)
        .map_err(|e| AffilscanError::validation(format!("invalid source link '{link}': {e}")))?;

    let segments: Option<Vec<String>> = url
        .path_segments()
        .map(|segments| segments.map(str::to_string).collect());

    if let Some(mut segments) = segments {
        if let Some(seg) = segments.iter_mut().find(|s| *s == ABSTRACT_SEGMENT) {
            *seg = SOURCE_SEGMENT.to_string();
            url.set_path(&format!("/{}", segments.join("/")));
        }
    }

    Ok(url)
}

/// Whether a single received chunk carries the challenge page.
///
/// Detection is per chunk: a signature split across two chunks is missed.
pub fn contains_challenge(chunk: &[u8]) -> bool {
    chunk.len() >= CHALLENGE_SIGNATURE.len()
        && chunk
            .windows(CHALLENGE_SIGNATURE.len())
            .any(|window| window == CHALLENGE_SIGNATURE)
}

/// Download the source archive behind `link` into a fresh temporary file.
///
/// The body is written chunk by chunk and never held in memory as a whole.
/// Non-success statuses and transport failures are ordinary errors; a
/// challenge page aborts the download with [`AffilscanError::ChallengeDetected`].
#[instrument(skip_all, fields(link = %link))]
pub async fn fetch_source(session: &FetchSession, link: &str) -> Result<DownloadedSource> {
    let url = source_url_for(link)?;
    debug!(%url, "requesting source archive");

    let mut response = session
        .client()
        .get(url.clone())
        .send()
        .await
        .map_err(|e| AffilscanError::Network(format!("{url}: {}", display_chain(&e))))?;

    let status = response.status();
    if !status.is_success() {
        return Err(AffilscanError::HttpStatus {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    let named = tempfile::Builder::new()
        .prefix("affilscan-")
        .suffix(".src")
        .tempfile()
        .map_err(|e| AffilscanError::io(std::env::temp_dir(), e))?;
    let (file, path) = named.into_parts();
    let mut file = tokio::fs::File::from_std(file);
    let mut written: u64 = 0;

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| AffilscanError::Network(format!("{url}: body read failed: {}", display_chain(&e))))?
    {
        if contains_challenge(&chunk) {
            warn!(%url, "challenge page detected, aborting download");
            return Err(AffilscanError::ChallengeDetected {
                url: url.to_string(),
            });
        }
        file.write_all(&chunk)
            .await
            .map_err(|e| AffilscanError::io(path.to_path_buf(), e))?;
        written += chunk.len() as u64;
    }

    file.flush()
        .await
        .map_err(|e| AffilscanError::io(path.to_path_buf(), e))?;

    debug!(%url, bytes = written, "source archive downloaded");

    Ok(DownloadedSource {
        url,
        path,
        bytes: written,
    })
}
