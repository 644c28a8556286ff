//! Error types for admission, slot accounting, and job execution.
//!
//! Contention outcomes ([`AdmissionError`]) and caller defects ([`UsageError`])
//! are separate types so a double release can never be mistaken for a busy GPU.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use super::admission::TicketId;

/// Expected, recoverable outcomes of an admission attempt.
///
/// None of these consume a slot and none are retried inside the controller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// No slot was free and the caller asked not to wait.
    #[error("no slot available")]
    Busy,
    /// The caller waited but no slot was handed over in time.
    #[error("no slot became available within {waited:?}")]
    Timeout {
        /// How long the waiter was parked before giving up.
        waited: Duration,
    },
    /// The wait was abandoned because the caller's cancellation token fired.
    #[error("admission wait cancelled")]
    Cancelled,
    /// The admission parameters are contradictory or out of range.
    #[error("invalid admission request: {0}")]
    InvalidRequest(String),
}

/// Programming errors in code that calls the controller.
///
/// These indicate latent corruption of the slot counters and are fatal to the
/// request that triggered them.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    /// The ticket was already returned to the pool.
    #[error("ticket {0} released twice")]
    DoubleRelease(TicketId),
    /// The ticket is not outstanding in this controller.
    #[error("ticket {0} was never granted by this controller")]
    UnknownTicket(TicketId),
    /// The ticket was issued by a different controller.
    #[error("ticket {0} belongs to a different controller")]
    ForeignTicket(TicketId),
    /// A job was started with a ticket that no longer holds a slot.
    #[error("ticket {0} no longer holds a slot")]
    TicketNotHeld(TicketId),
    /// `release` was called on a pool with nothing in use.
    #[error("slot pool released with no slots in use")]
    PoolUnderflow,
    /// A pool was constructed with zero capacity.
    #[error("slot pool capacity must be at least 1")]
    ZeroCapacity,
}

/// Failures raised by the document pipeline once a slot is held.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The per-job scratch directory could not be prepared.
    #[error("failed to prepare workspace {path:?}: {source}")]
    Workspace {
        /// Path that could not be created or written.
        path: PathBuf,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// A processing stage returned an error.
    #[error("{stage} processing failed: {source}")]
    Stage {
        /// Stage name, e.g. `OCR`.
        stage: String,
        /// Error reported by the stage engine.
        #[source]
        source: anyhow::Error,
    },
    /// A processing stage panicked on its blocking thread.
    #[error("{stage} processing panicked")]
    StagePanicked {
        /// Stage name.
        stage: String,
    },
    /// The output directory could not be packaged.
    #[error("packaging failed: {0}")]
    Packaging(#[source] anyhow::Error),
    /// The job's task was cancelled before it reported a result.
    #[error("job aborted before completion")]
    Aborted,
}

/// Everything that can go wrong between receiving a job and returning its artifact.
#[derive(Debug, Error)]
pub enum JobError {
    /// The job never got a slot.
    #[error(transparent)]
    Admission(#[from] AdmissionError),
    /// The calling code misused a ticket.
    #[error(transparent)]
    Usage(#[from] UsageError),
    /// The pipeline failed while holding a slot; passed through unchanged.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// Errors produced while assembling a service from configuration.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Configuration failed validation.
    #[error("config invalid: {0}")]
    Config(String),
    /// The slot pool could not be created.
    #[error(transparent)]
    Usage(#[from] UsageError),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
