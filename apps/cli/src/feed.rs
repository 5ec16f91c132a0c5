//! JSONL input and output.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;

use affilscan_shared::{AffilscanError, ExtractionResult, FeedEntry, Record, Result};
use tracing::debug;

/// Read one [`Record`] per non-blank line of a feed file.
pub(crate) fn read_feed(path: &Path) -> Result<Vec<Record>> {
    let file = File::open(path).map_err(|e| AffilscanError::io(path, e))?;
    let mut records = Vec::new();

    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| AffilscanError::io(path, e))?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: FeedEntry = serde_json::from_str(&line).map_err(|e| {
            AffilscanError::validation(format!("{}:{}: {e}", path.display(), index + 1))
        })?;
        records.push(Record::from(entry));
    }

    debug!(path = %path.display(), records = records.len(), "feed loaded");
    Ok(records)
}

/// Write results as `{"id": .., "institutions": [..]}` lines, replacing `path`.
pub(crate) fn write_results(path: &Path, results: &[ExtractionResult]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| AffilscanError::io(parent, e))?;
    }

    let file = File::create(path).map_err(|e| AffilscanError::io(path, e))?;
    let mut out = BufWriter::new(file);
    for result in results {
        let line = serde_json::to_string(result)
            .map_err(|e| AffilscanError::validation(format!("cannot encode result {}: {e}", result.id)))?;
        writeln!(out, "{line}").map_err(|e| AffilscanError::io(path, e))?;
    }
    out.flush().map_err(|e| AffilscanError::io(path, e))?;
    Ok(())
}
