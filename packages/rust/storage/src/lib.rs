//! Durable side channels of an extraction run.
//!
//! The [`Storage`] struct owns two locations on disk:
//! - a source directory holding the decoded LaTeX members of records that
//!   need a second look, one sub-directory per record identifier;
//! - an append-only diagnostic log, one rendered [`FailureRecord`] per entry.
//!
//! Both are written concurrently by many workers of a batch. Archive writes
//! touch disjoint per-identifier directories; log appends are serialized.

use std::path::{Component, Path, PathBuf};

use affilscan_shared::{AffilscanError, ArchiveContents, FailureRecord, PathsConfig, Result};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

/// Storage handle shared by every worker of a run.
#[derive(Debug)]
pub struct Storage {
    source_root: PathBuf,
    error_log: PathBuf,
    log_lock: Mutex<()>,
}

impl Storage {
    /// Open storage at the locations named in the `[paths]` config section,
    /// creating the source directory if needed.
    pub async fn open(paths: &PathsConfig) -> Result<Self> {
        Self::at(&paths.failed_source_dir, &paths.error_log).await
    }

    /// Open storage rooted at explicit locations.
    pub async fn at(source_root: impl AsRef<Path>, error_log: impl AsRef<Path>) -> Result<Self> {
        let source_root = source_root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&source_root)
            .await
            .map_err(|e| AffilscanError::io(&source_root, e))?;

        Ok(Self {
            source_root,
            error_log: error_log.as_ref().to_path_buf(),
            log_lock: Mutex::new(()),
        })
    }

    pub fn source_root(&self) -> &Path {
        &self.source_root
    }

    pub fn error_log(&self) -> &Path {
        &self.error_log
    }

    // -----------------------------------------------------------------------
    // Source archive
    // -----------------------------------------------------------------------

    /// Write each member under `<source_root>/<identifier>/<member path>`.
    ///
    /// Existing files are overwritten, so re-running a record is idempotent.
    /// Members whose path would escape the record directory, or that cannot
    /// be written, are skipped so the rest of the record is still archived.
    /// Returns the number of files written.
    #[instrument(skip_all, fields(id = %identifier, members = sources.len()))]
    pub async fn archive_sources(&self, identifier: &str, sources: &ArchiveContents) -> Result<usize> {
        let record_dir = self.record_dir(identifier)?;
        let mut written = 0;

        for (name, text) in sources {
            let Some(relative) = safe_relative(name) else {
                warn!(member = %name, "refusing to archive member outside record directory");
                continue;
            };
            let target = record_dir.join(relative);
            match write_member(&target, text).await {
                Ok(()) => written += 1,
                Err(e) => warn!(member = %name, error = %e, "skipping member that could not be archived"),
            }
        }

        debug!(written, dir = %record_dir.display(), "archived record sources");
        Ok(written)
    }

    /// Identifiers that have archived sources, sorted.
    pub async fn archived_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut dir = tokio::fs::read_dir(&self.source_root)
            .await
            .map_err(|e| AffilscanError::io(&self.source_root, e))?;

        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| AffilscanError::io(&self.source_root, e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if is_dir {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        ids.sort();
        Ok(ids)
    }

    /// Load the archived members of one record, keyed by `/`-separated
    /// relative path, in sorted path order.
    pub async fn load_archived(&self, identifier: &str) -> Result<ArchiveContents> {
        let record_dir = self.record_dir(identifier)?;
        let mut files = Vec::new();
        let mut pending = vec![record_dir.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir)
                .await
                .map_err(|e| AffilscanError::io(&dir, e))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| AffilscanError::io(&dir, e))?
            {
                let path = entry.path();
                let file_type = entry
                    .file_type()
                    .await
                    .map_err(|e| AffilscanError::io(&path, e))?;
                if file_type.is_dir() {
                    pending.push(path);
                } else if file_type.is_file() {
                    files.push(path);
                }
            }
        }

        files.sort();
        let mut contents = ArchiveContents::new();
        for path in files {
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| AffilscanError::io(&path, e))?;
            let name = path
                .strip_prefix(&record_dir)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            contents.insert(name, String::from_utf8_lossy(&bytes).into_owned());
        }
        Ok(contents)
    }

    fn record_dir(&self, identifier: &str) -> Result<PathBuf> {
        match safe_relative(identifier) {
            Some(rel) if rel.components().count() == 1 => Ok(self.source_root.join(rel)),
            _ => Err(AffilscanError::validation(format!(
                "record identifier '{identifier}' is not a plain directory name"
            ))),
        }
    }

    // -----------------------------------------------------------------------
    // Diagnostic log
    // -----------------------------------------------------------------------

    /// Append one entry to the diagnostic log, creating it if absent.
    #[instrument(skip_all, fields(id = %failure.identifier, kind = %failure.kind))]
    pub async fn append_failure(&self, failure: &FailureRecord) -> Result<()> {
        let _guard = self.log_lock.lock().await;

        if let Some(parent) = self.error_log.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AffilscanError::io(parent, e))?;
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.error_log)
            .await
            .map_err(|e| AffilscanError::io(&self.error_log, e))?;
        file.write_all(failure.render().as_bytes())
            .await
            .map_err(|e| AffilscanError::io(&self.error_log, e))?;
        file.flush()
            .await
            .map_err(|e| AffilscanError::io(&self.error_log, e))?;

        debug!("diagnostic entry appended");
        Ok(())
    }
}

async fn write_member(target: &Path, text: &str) -> Result<()> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| AffilscanError::io(parent, e))?;
    }
    tokio::fs::write(target, text.as_bytes())
        .await
        .map_err(|e| AffilscanError::io(target, e))
}

/// Accept only paths made of plain name components.
fn safe_relative(name: &str) -> Option<PathBuf> {
    let path = Path::new(name);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    if out.as_os_str().is_empty() {
        None
    } else {
        Some(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use affilscan_shared::ErrorKind;
    use std::sync::Arc;

    async fn test_storage(dir: &tempfile::TempDir) -> Storage {
        Storage::at(dir.path().join("failed_tex"), dir.path().join("log/errors.txt"))
            .await
            .expect("open test storage")
    }

    fn contents(files: &[(&str, &str)]) -> ArchiveContents {
        files
            .iter()
            .map(|(n, t)| (n.to_string(), t.to_string()))
            .collect()
    }

    fn failure(id: &str, kind: ErrorKind) -> FailureRecord {
        FailureRecord {
            identifier: id.to_string(),
            kind,
            source_url: format!("https://arxiv.org/abs/{id}"),
            trace: "boom".to_string(),
        }
    }

    #[tokio::test]
    async fn open_creates_source_root() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(&dir).await;
        assert!(storage.source_root().is_dir());
        assert!(!storage.error_log().exists(), "log is created lazily");
    }

    #[tokio::test]
    async fn archive_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(&dir).await;
        let sources = contents(&[
            ("main.tex", r"\affiliation{Inria}"),
            ("sections/authors.tex", r"\author{Ada}"),
        ]);

        let written = storage.archive_sources("2401.00001", &sources).await.unwrap();
        assert_eq!(written, 2);
        assert!(storage.source_root().join("2401.00001/sections/authors.tex").is_file());

        let reloaded = storage.load_archived("2401.00001").await.unwrap();
        assert_eq!(reloaded, sources);
        assert_eq!(storage.archived_ids().await.unwrap(), vec!["2401.00001"]);
    }

    #[tokio::test]
    async fn archiving_twice_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(&dir).await;
        let sources = contents(&[("main.tex", "v1")]);

        storage.archive_sources("id", &sources).await.unwrap();
        storage.archive_sources("id", &sources).await.unwrap();

        let reloaded = storage.load_archived("id").await.unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded["main.tex"], "v1");
    }

    #[tokio::test]
    async fn escaping_members_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(&dir).await;
        let sources = contents(&[
            ("../../evil.tex", "x"),
            ("/etc/passwd.tex", "x"),
            ("./ok.tex", "fine"),
        ]);

        let written = storage.archive_sources("id", &sources).await.unwrap();
        assert_eq!(written, 1);
        assert!(!dir.path().join("evil.tex").exists());
        assert!(storage.source_root().join("id/ok.tex").is_file());
    }

    #[tokio::test]
    async fn unwritable_member_does_not_stop_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(&dir).await;
        // `main.tex` becomes a file, so the second member's parent cannot be a directory.
        let sources = contents(&[
            ("main.tex", "first"),
            ("main.tex/nested.tex", "blocked"),
            ("appendix.tex", "last"),
        ]);

        let written = storage.archive_sources("id", &sources).await.unwrap();
        assert_eq!(written, 2);

        let reloaded = storage.load_archived("id").await.unwrap();
        assert_eq!(reloaded["main.tex"], "first");
        assert_eq!(reloaded["appendix.tex"], "last");
        assert_eq!(reloaded.len(), 2);
    }

    #[tokio::test]
    async fn bad_identifier_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(&dir).await;
        let err = storage
            .archive_sources("../outside", &contents(&[("a.tex", "x")]))
            .await
            .unwrap_err();
        assert!(matches!(err, AffilscanError::Validation { .. }));
    }

    #[tokio::test]
    async fn failures_are_appended_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let storage = test_storage(&dir).await;

        storage
            .append_failure(&failure("a", ErrorKind::NoInstitutions))
            .await
            .unwrap();
        storage
            .append_failure(&failure("b", ErrorKind::Transport))
            .await
            .unwrap();

        let log = std::fs::read_to_string(storage.error_log()).unwrap();
        let separator = "-".repeat(80);
        assert_eq!(log.matches(&separator).count(), 2);
        assert!(log.starts_with("[NO_INSTITUTIONS] a: boom\nurl:https://arxiv.org/abs/a\n"));
        assert!(log.contains("[TRANSPORT] b: boom"));
    }

    #[tokio::test]
    async fn concurrent_appends_do_not_interleave() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(test_storage(&dir).await);

        let mut handles = Vec::new();
        for i in 0..32 {
            let storage = Arc::clone(&storage);
            handles.push(tokio::spawn(async move {
                storage
                    .append_failure(&failure(&format!("rec-{i}"), ErrorKind::Other))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let log = std::fs::read_to_string(storage.error_log()).unwrap();
        let entries: Vec<&str> = log.split_terminator(&format!("{}\n", "-".repeat(80))).collect();
        assert_eq!(entries.len(), 32);
        for entry in entries {
            assert!(entry.starts_with("[OTHER] rec-"), "mangled entry: {entry:?}");
            assert_eq!(entry.lines().count(), 2);
        }
    }
}
