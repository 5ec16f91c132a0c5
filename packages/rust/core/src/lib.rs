//! Core pipeline orchestration for affilscan.
//!
//! This crate ties together downloading, archive opening, and block
//! extraction into the batched run over a list of records:
//! - [`cpu_pool`]: bounded execution of decompression and scanning off the runtime
//! - [`gate`]: the admission ceiling shared by every worker of a batch
//! - [`worker`]: the per-record state machine and its side effects
//! - [`pipeline`]: batch scheduling, progress reporting, run halting

pub mod cpu_pool;
pub mod gate;
pub mod pipeline;
pub mod worker;

#[cfg(test)]
pub(crate) mod testutil;

pub use cpu_pool::CpuPool;
pub use gate::{Admission, AdmissionGate};
pub use pipeline::{
    BATCH_SIZE, BatchScheduler, CPU_WORKERS, MAX_IN_FLIGHT, ProgressReporter, RunHalted, RunReport,
    RunSummary, SilentProgress,
};
pub use worker::{ExtractionWorker, WorkerState};
