//! Source archive opening.
//!
//! Source bundles arrive as tar streams, usually gzip-compressed. [`open_archive`]
//! decodes every regular member into text and returns them in archive order.
//! It is synchronous and touches no shared state, so callers may run any
//! number of invocations in parallel on blocking threads.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

use affilscan_shared::{AffilscanError, ArchiveContents, Result};
use flate2::read::GzDecoder;
use tracing::{debug, instrument};

/// First two bytes of every gzip stream.
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Upper bound on the buffer reserved from a member's declared size. The
/// header is untrusted; larger members grow the buffer as they are read.
const MAX_PREALLOC: u64 = 1 << 20;

/// Open the archive at `path` and decode each regular member as text.
///
/// Invalid UTF-8 is replaced, never rejected. Members whose name or body
/// cannot be read are skipped. The result is not filtered by extension.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn open_archive(path: &Path) -> Result<ArchiveContents> {
    let file = File::open(path).map_err(|e| AffilscanError::io(path, e))?;
    let mut reader = BufReader::new(file);

    let contents = if is_gzip(&mut reader).map_err(|e| AffilscanError::io(path, e))? {
        debug!("gzip-compressed archive");
        read_members(GzDecoder::new(reader))?
    } else {
        read_members(reader)?
    };

    debug!(members = contents.len(), "archive opened");
    Ok(contents)
}

/// Peek at the buffered head of the stream without consuming it.
fn is_gzip<R: BufRead>(reader: &mut R) -> io::Result<bool> {
    let head = reader.fill_buf()?;
    Ok(head.starts_with(&GZIP_MAGIC))
}

/// Decode every regular file of a tar stream.
///
/// An unreadable first header means the stream is not a tar archive at all.
/// A bad header further in ends the walk with whatever was collected.
pub fn read_members<R: Read>(reader: R) -> Result<ArchiveContents> {
    let mut archive = tar::Archive::new(reader);
    let entries = archive
        .entries()
        .map_err(|e| AffilscanError::archive(format!("cannot read tar stream: {e}")))?;

    let mut files = ArchiveContents::new();
    let mut seen_header = false;

    for entry in entries {
        let mut entry = match entry {
            Ok(entry) => entry,
            Err(e) if !seen_header => {
                return Err(AffilscanError::archive(format!("not a tar archive: {e}")));
            }
            Err(e) => {
                debug!(error = %e, members = files.len(), "stopping at unreadable header");
                break;
            }
        };
        seen_header = true;

        if !entry.header().entry_type().is_file() {
            continue;
        }

        let name = match entry.path() {
            Ok(p) => p.to_string_lossy().into_owned(),
            Err(e) => {
                debug!(error = %e, "skipping member with unreadable path");
                continue;
            }
        };

        let mut bytes = Vec::with_capacity(entry.size().min(MAX_PREALLOC) as usize);
        if let Err(e) = entry.read_to_end(&mut bytes) {
            debug!(member = %name, error = %e, "skipping unreadable member");
            continue;
        }

        files.insert(name, String::from_utf8_lossy(&bytes).into_owned());
    }

    Ok(files)
}
