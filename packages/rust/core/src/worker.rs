//! Per-record extraction: download, open, scan, record side effects.

use std::fmt;
use std::sync::Arc;

use affilscan_archive::open_archive;
use affilscan_fetcher::{FetchSession, fetch_source};
use affilscan_latex::{CommandSet, extract_institutions, select_text_sources};
use affilscan_shared::{
    AffilscanError, ArchiveContents, ErrorKind, ExtractionResult, FailureRecord, Record, Result,
    display_chain,
};
use affilscan_storage::Storage;
use tracing::{debug, error, instrument, warn};

use crate::cpu_pool::CpuPool;
use crate::gate::AdmissionGate;

/// Lifecycle of one record inside a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Pending,
    Fetching,
    Opening,
    Scanning,
    Done,
    Failed(ErrorKind),
}

impl WorkerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_))
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Fetching => f.write_str("fetching"),
            Self::Opening => f.write_str("opening"),
            Self::Scanning => f.write_str("scanning"),
            Self::Done => f.write_str("done"),
            Self::Failed(kind) => write!(f, "failed({kind})"),
        }
    }
}

struct StateTrace<'a> {
    id: &'a str,
    current: WorkerState,
}

impl<'a> StateTrace<'a> {
    fn new(id: &'a str) -> Self {
        debug!(id, state = %WorkerState::Pending, "record queued");
        Self {
            id,
            current: WorkerState::Pending,
        }
    }

    fn advance(&mut self, next: WorkerState) {
        debug!(id = self.id, from = %self.current, to = %next, "state transition");
        self.current = next;
    }
}

/// An error plus whatever source text had been decoded when it happened.
struct Failure {
    error: AffilscanError,
    sources: Option<ArchiveContents>,
}

impl From<AffilscanError> for Failure {
    fn from(error: AffilscanError) -> Self {
        Self {
            error,
            sources: None,
        }
    }
}

/// Everything a record needs to be processed. One per batch, cloned into
/// each spawned task.
#[derive(Debug, Clone)]
pub struct ExtractionWorker {
    session: FetchSession,
    cpu: CpuPool,
    gate: Arc<AdmissionGate>,
    storage: Arc<Storage>,
    commands: Arc<CommandSet>,
}

impl ExtractionWorker {
    pub fn new(
        session: FetchSession,
        cpu: CpuPool,
        gate: Arc<AdmissionGate>,
        storage: Arc<Storage>,
        commands: Arc<CommandSet>,
    ) -> Self {
        Self {
            session,
            cpu,
            gate,
            storage,
            commands,
        }
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Process one record to a terminal state.
    ///
    /// Every ordinary failure is logged and yields an empty result. Only a
    /// challenge page is returned as an error, since it ends the whole run;
    /// it also closes the batch's gate, so records not yet admitted come back
    /// as [`ErrorKind::Skipped`] without touching the network.
    #[instrument(skip_all, fields(id = %record.identifier))]
    pub async fn process(&self, record: &Record) -> Result<ExtractionResult> {
        let mut trace = StateTrace::new(&record.identifier);

        if self.gate.is_closed() {
            return Ok(self.skip(record, &mut trace));
        }
        self.session.pre_request_delay().await;

        match self.extract(record, &mut trace).await {
            Ok((sources, institutions)) => {
                trace.advance(WorkerState::Done);
                self.archive(record, &sources).await;
                debug!(blocks = institutions.len(), "record done");
                Ok(ExtractionResult::done(&record.identifier, institutions))
            }
            Err(Failure {
                error: AffilscanError::Halted,
                ..
            }) => Ok(self.skip(record, &mut trace)),
            Err(Failure { error, sources }) => {
                let kind = error.kind();
                trace.advance(WorkerState::Failed(kind));

                if let Some(sources) = &sources {
                    self.archive(record, sources).await;
                }
                self.log_failure(record, &error).await;

                if error.is_fatal() {
                    error!(error = %error, "challenge detected, run must stop");
                    return Err(error);
                }
                warn!(%kind, error = %error, "record failed");
                Ok(ExtractionResult::failed(&record.identifier, kind))
            }
        }
    }

    /// Network and CPU phases, run while holding an admission slot.
    async fn extract(
        &self,
        record: &Record,
        trace: &mut StateTrace<'_>,
    ) -> std::result::Result<(ArchiveContents, Vec<String>), Failure> {
        let _admission = self.gate.admit().await?;

        trace.advance(WorkerState::Fetching);
        let downloaded = match fetch_source(&self.session, &record.source_url).await {
            Ok(downloaded) => downloaded,
            Err(error) => {
                // Close while still admitted so the freed slot cannot be taken.
                if error.is_fatal() {
                    self.gate.close();
                }
                return Err(error.into());
            }
        };
        debug!(bytes = downloaded.bytes, "download complete");

        trace.advance(WorkerState::Opening);
        // The temp file goes away with `downloaded` once the job finishes.
        let contents = self
            .cpu
            .run(move || open_archive(&downloaded.path))
            .await??;
        let sources = select_text_sources(contents)?;

        trace.advance(WorkerState::Scanning);
        let commands = Arc::clone(&self.commands);
        let (sources, found) = self
            .cpu
            .run(move || {
                let found = extract_institutions(&sources, &commands);
                (sources, found)
            })
            .await?;

        match found {
            Ok(institutions) => Ok((sources, institutions)),
            Err(error) => Err(Failure {
                error,
                sources: Some(sources),
            }),
        }
    }

    /// The run halted before this record was admitted. Nothing was fetched and
    /// nothing is logged.
    fn skip(&self, record: &Record, trace: &mut StateTrace<'_>) -> ExtractionResult {
        trace.advance(WorkerState::Failed(ErrorKind::Skipped));
        debug!("run halted, record not fetched");
        ExtractionResult::failed(&record.identifier, ErrorKind::Skipped)
    }

    async fn archive(&self, record: &Record, sources: &ArchiveContents) {
        if let Err(e) = self
            .storage
            .archive_sources(&record.identifier, sources)
            .await
        {
            warn!(error = %e, "failed to archive record sources");
        }
    }

    async fn log_failure(&self, record: &Record, error: &AffilscanError) {
        let entry = FailureRecord {
            identifier: record.identifier.clone(),
            kind: error.kind(),
            source_url: record.source_url.clone(),
            trace: display_chain(error),
        };
        if let Err(e) = self.storage.append_failure(&entry).await {
            warn!(error = %e, "failed to write diagnostic entry");
        }
    }
}
