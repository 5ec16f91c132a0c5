//! Batched extraction run: records → batches → concurrent workers → results.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tracing::{error, info, instrument, warn};

use affilscan_fetcher::FetchSession;
use affilscan_latex::CommandSet;
use affilscan_shared::{
    AffilscanError, ErrorKind, ExtractionResult, ExtractionStatus, FetchConfig, Record,
};
use affilscan_storage::Storage;

use crate::cpu_pool::CpuPool;
use crate::gate::AdmissionGate;
use crate::worker::ExtractionWorker;

/// Records per batch. Each batch gets a fresh client identity.
pub const BATCH_SIZE: usize = 300;
/// Records allowed between download start and extraction end at once.
pub const MAX_IN_FLIGHT: usize = 5;
/// Concurrent decompression/scanning jobs per batch.
pub const CPU_WORKERS: usize = 4;

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting run status.
pub trait ProgressReporter: Send + Sync {
    /// Called before a batch's workers are spawned. `index` is 1-based.
    fn batch_started(&self, index: usize, total_batches: usize, size: usize);
    /// Called as each record reaches a terminal state, in completion order.
    fn record_finished(&self, result: &ExtractionResult, completed: usize, total: usize);
    /// Called once when the run ends, halted or not.
    fn done(&self, summary: &RunSummary);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn batch_started(&self, _index: usize, _total_batches: usize, _size: usize) {}
    fn record_finished(&self, _result: &ExtractionResult, _completed: usize, _total: usize) {}
    fn done(&self, _summary: &RunSummary) {}
}

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Records submitted.
    pub total: usize,
    /// Records that reached a terminal state.
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Failed records that were never fetched because the run halted.
    pub skipped: usize,
    pub batches: usize,
    /// Highest admission count observed in any batch.
    pub peak_in_flight: usize,
    pub halted: bool,
    pub elapsed: Duration,
}

/// Results of a run that completed every batch.
#[derive(Debug)]
pub struct RunReport {
    /// One entry per record, in input order.
    pub results: Vec<ExtractionResult>,
    pub summary: RunSummary,
}

/// A run stopped early by an unrecoverable error.
///
/// Carries every result gathered up to and including the batch that hit it.
#[derive(Debug, thiserror::Error)]
#[error("run halted after {} of {} records: {source}", .results.len(), .summary.total)]
pub struct RunHalted {
    #[source]
    pub source: AffilscanError,
    pub results: Vec<ExtractionResult>,
    pub summary: RunSummary,
}

#[derive(Default)]
struct BatchOutcome {
    results: Vec<ExtractionResult>,
    halt: Option<AffilscanError>,
    peak: usize,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Splits records into fixed-size batches and runs them one after another.
pub struct BatchScheduler {
    fetch: FetchConfig,
    storage: Arc<Storage>,
    commands: Arc<CommandSet>,
    batch_size: usize,
}

impl BatchScheduler {
    pub fn new(fetch: FetchConfig, storage: Arc<Storage>) -> Self {
        Self {
            fetch,
            storage,
            commands: Arc::new(CommandSet::default_set().clone()),
            batch_size: BATCH_SIZE,
        }
    }

    /// Scan with a custom command set instead of the built-in one.
    pub fn with_commands(mut self, commands: CommandSet) -> Self {
        self.commands = Arc::new(commands);
        self
    }

    #[cfg(test)]
    pub(crate) fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Process every record and return one result per record, in input order.
    ///
    /// Per-record failures never stop the run. A challenge page stops it: the
    /// batch's records not yet admitted are skipped without a request, the
    /// ones in flight finish, and no later batch is started.
    #[instrument(skip_all, fields(records = records.len()))]
    pub async fn run(
        &self,
        records: Vec<Record>,
        progress: Arc<dyn ProgressReporter>,
    ) -> Result<RunReport, RunHalted> {
        let start = Instant::now();
        let total = records.len();
        let total_batches = total.div_ceil(self.batch_size);
        let completed = Arc::new(AtomicUsize::new(0));

        let mut summary = RunSummary {
            total,
            ..RunSummary::default()
        };
        let mut results = Vec::with_capacity(total);

        info!(total, batches = total_batches, "starting extraction run");

        for (index, batch) in records.chunks(self.batch_size).enumerate() {
            progress.batch_started(index + 1, total_batches, batch.len());
            info!(batch = index + 1, of = total_batches, size = batch.len(), "starting batch");

            let outcome = self
                .run_batch(batch, &progress, &completed, total)
                .await;

            summary.batches += 1;
            summary.peak_in_flight = summary.peak_in_flight.max(outcome.peak);
            results.extend(outcome.results);

            if let Some(source) = outcome.halt {
                summary.halted = true;
                finish(&mut summary, &results, start);
                warn!(
                    processed = summary.processed,
                    remaining = total - summary.processed,
                    error = %source,
                    "run halted"
                );
                progress.done(&summary);
                return Err(RunHalted {
                    source,
                    results,
                    summary,
                });
            }
        }

        finish(&mut summary, &results, start);
        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "extraction run complete"
        );
        progress.done(&summary);

        Ok(RunReport { results, summary })
    }

    /// Run one batch with its own session, CPU pool and admission gate.
    /// All three are dropped when this returns.
    async fn run_batch(
        &self,
        batch: &[Record],
        progress: &Arc<dyn ProgressReporter>,
        completed: &Arc<AtomicUsize>,
        total: usize,
    ) -> BatchOutcome {
        let session = match FetchSession::new(&self.fetch) {
            Ok(session) => session,
            Err(e) => {
                error!(error = %e, "cannot create fetch session");
                return BatchOutcome {
                    halt: Some(e),
                    ..BatchOutcome::default()
                };
            }
        };

        let gate = Arc::new(AdmissionGate::new(MAX_IN_FLIGHT));
        let worker = ExtractionWorker::new(
            session,
            CpuPool::new(CPU_WORKERS),
            Arc::clone(&gate),
            Arc::clone(&self.storage),
            Arc::clone(&self.commands),
        );

        let handles: Vec<_> = batch
            .iter()
            .cloned()
            .map(|record| {
                let worker = worker.clone();
                let progress = Arc::clone(progress);
                let completed = Arc::clone(completed);
                tokio::spawn(async move {
                    let (result, fatal) = match worker.process(&record).await {
                        Ok(result) => (result, None),
                        Err(e) => (
                            ExtractionResult::failed(&record.identifier, e.kind()),
                            Some(e).filter(AffilscanError::is_fatal),
                        ),
                    };
                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    progress.record_finished(&result, done, total);
                    (result, fatal)
                })
            })
            .collect();

        let mut outcome = BatchOutcome::default();
        for (record, handle) in batch.iter().zip(handles) {
            match handle.await {
                Ok((result, fatal)) => {
                    outcome.results.push(result);
                    if outcome.halt.is_none() {
                        outcome.halt = fatal;
                    }
                }
                Err(e) => {
                    error!(id = %record.identifier, error = %e, "worker task failed");
                    outcome
                        .results
                        .push(ExtractionResult::failed(&record.identifier, ErrorKind::Other));
                }
            }
        }

        outcome.peak = gate.peak();
        outcome
    }
}

fn finish(summary: &mut RunSummary, results: &[ExtractionResult], start: Instant) {
    summary.processed = results.len();
    summary.succeeded = results.iter().filter(|r| r.is_success()).count();
    summary.failed = summary.processed - summary.succeeded;
    summary.skipped = results
        .iter()
        .filter(|r| r.status == ExtractionStatus::Failed(ErrorKind::Skipped))
        .count();
    summary.elapsed = start.elapsed();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use std::sync::Mutex;
    use wiremock::matchers::{method, path_regex};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn scheduler(storage: Arc<Storage>) -> BatchScheduler {
        BatchScheduler::new(FetchConfig::default().without_delay(), storage)
    }

    fn records(server: &MockServer, ids: &[&str]) -> Vec<Record> {
        ids.iter()
            .map(|id| Record::from_link(abs_link(server, id)))
            .collect()
    }

    #[derive(Default)]
    struct RecordingProgress {
        batches: Mutex<Vec<(usize, usize, usize)>>,
        finished: AtomicUsize,
        done: AtomicUsize,
    }

    impl ProgressReporter for RecordingProgress {
        fn batch_started(&self, index: usize, total_batches: usize, size: usize) {
            self.batches.lock().unwrap().push((index, total_batches, size));
        }
        fn record_finished(&self, _result: &ExtractionResult, _completed: usize, _total: usize) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
        fn done(&self, _summary: &RunSummary) {
            self.done.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn empty_input_runs_no_batches() {
        let dir = tempfile::tempdir().unwrap();
        let report = scheduler(scratch_storage(&dir).await)
            .run(Vec::new(), Arc::new(SilentProgress))
            .await
            .unwrap();
        assert!(report.results.is_empty());
        assert_eq!(report.summary.batches, 0);
    }

    #[tokio::test]
    async fn mixed_outcomes_keep_input_order() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = scratch_storage(&dir).await;
        mount_source(
            &server,
            "good",
            tar_gz(&[("main.tex", r"\affiliation{Inria}\affiliation{MIT}")]),
        )
        .await;
        mount_source(&server, "figs", tar_gz(&[("plot.eps", "%!PS")])).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let progress = Arc::new(RecordingProgress::default());
        let report = scheduler(storage)
            .run(records(&server, &["good", "figs", "broken"]), progress.clone())
            .await
            .unwrap();

        let ids: Vec<&str> = report.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["good", "figs", "broken"]);
        assert_eq!(report.results[0].institutions, vec!["Inria", "MIT"]);
        assert!(report.results[1].institutions.is_empty());
        assert!(report.results[2].institutions.is_empty());
        assert_eq!(report.summary.succeeded, 1);
        assert_eq!(report.summary.failed, 2);

        assert_eq!(progress.finished.load(Ordering::SeqCst), 3);
        assert_eq!(progress.done.load(Ordering::SeqCst), 1);
        assert_eq!(*progress.batches.lock().unwrap(), vec![(1, 1, 3)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn in_flight_ceiling_holds_for_a_full_batch() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = scratch_storage(&dir).await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/e-print/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(tar_gz(&[("main.tex", r"\affiliation{Somewhere}")]))
                    .set_delay(Duration::from_millis(10)),
            )
            .mount(&server)
            .await;

        let ids: Vec<String> = (0..BATCH_SIZE).map(|i| format!("2401.{i:05}")).collect();
        let ids: Vec<&str> = ids.iter().map(String::as_str).collect();

        let report = scheduler(storage)
            .run(records(&server, &ids), Arc::new(SilentProgress))
            .await
            .unwrap();

        assert_eq!(report.results.len(), BATCH_SIZE);
        assert!(report.results.iter().all(ExtractionResult::is_success));
        assert_eq!(report.summary.batches, 1);
        assert!(report.summary.peak_in_flight <= MAX_IN_FLIGHT);
        assert!(report.summary.peak_in_flight > 1, "workers ran concurrently");
    }

    #[tokio::test]
    async fn records_are_split_into_batches() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = scratch_storage(&dir).await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_bytes(tar_gz(&[("a.tex", r"\inst{X}")])),
            )
            .mount(&server)
            .await;

        let progress = Arc::new(RecordingProgress::default());
        let report = scheduler(storage)
            .with_batch_size(2)
            .run(records(&server, &["a", "b", "c", "d", "e"]), progress.clone())
            .await
            .unwrap();

        assert_eq!(report.results.len(), 5);
        assert_eq!(report.summary.batches, 3);
        assert_eq!(
            *progress.batches.lock().unwrap(),
            vec![(1, 3, 2), (2, 3, 2), (3, 3, 1)]
        );
    }

    #[tokio::test]
    async fn challenge_stops_later_batches() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = scratch_storage(&dir).await;
        mount_source(&server, "blocked", challenge_page()).await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(tar_gz(&[("main.tex", r"\affiliation{Inria}")])),
            )
            .mount(&server)
            .await;

        let progress = Arc::new(RecordingProgress::default());
        let halted = scheduler(Arc::clone(&storage))
            .with_batch_size(3)
            .run(
                records(&server, &["a", "blocked", "c", "d", "e", "f", "g"]),
                progress.clone(),
            )
            .await
            .unwrap_err();

        assert_eq!(halted.source.kind(), ErrorKind::ChallengeDetected);
        // The whole first batch was joined, nothing after it started.
        let ids: Vec<&str> = halted.results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "blocked", "c"]);
        assert!(halted.results[0].is_success());
        assert!(halted.results[2].is_success());
        assert!(halted.summary.halted);
        assert_eq!(halted.summary.batches, 1);
        assert_eq!(halted.summary.total, 7);
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
        assert_eq!(progress.done.load(Ordering::SeqCst), 1);

        assert!(read_log(&storage).contains("[CHALLENGE_DETECTED] blocked"));
        assert!(halted.to_string().starts_with("run halted after 3 of 7 records"));
    }

    #[tokio::test]
    async fn challenge_turns_away_queued_records_of_the_batch() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let storage = scratch_storage(&dir).await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(challenge_page()))
            .mount(&server)
            .await;

        let ids: Vec<String> = (0..40).map(|i| format!("blocked-{i}")).collect();
        let ids: Vec<&str> = ids.iter().map(String::as_str).collect();

        let halted = scheduler(Arc::clone(&storage))
            .run(records(&server, &ids), Arc::new(SilentProgress))
            .await
            .unwrap_err();

        let requests = server.received_requests().await.unwrap().len();
        assert!(
            requests <= MAX_IN_FLIGHT,
            "queued records reached the blocked host: {requests} requests"
        );

        let log = read_log(&storage);
        let logged = log.matches("[CHALLENGE_DETECTED]").count();
        assert!((1..=MAX_IN_FLIGHT).contains(&logged), "{logged} challenge entries");
        assert!(!log.contains("SKIPPED"));

        assert_eq!(halted.results.len(), 40);
        assert_eq!(halted.summary.skipped, 40 - requests);
        assert_eq!(halted.source.kind(), ErrorKind::ChallengeDetected);
    }
}
