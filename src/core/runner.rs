//! Runs the pipeline for a job that already holds a slot.
//!
//! Once admitted, a job runs on its own task and owns its ticket. Dropping the
//! caller's future detaches from the job but never cuts it short, so the slot
//! only returns to the pool after the pipeline has actually finished.

use std::fmt;
use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{error, info, info_span, warn, Instrument};

use super::admission::{AdmissionController, AdmissionTicket};
use super::error::{JobError, PipelineError, UsageError};
use super::executor::{Artifact, DocumentJob, DocumentPipeline};

/// Executes jobs under a granted ticket and returns the slot afterwards.
///
/// The runner never decides admission. The ticket is released explicitly when
/// the pipeline returns; if the pipeline panics the ticket's own `Drop`
/// returns the slot during unwinding.
#[derive(Clone)]
pub struct JobRunner {
    controller: AdmissionController,
    pipeline: Arc<dyn DocumentPipeline>,
}

impl fmt::Debug for JobRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobRunner")
            .field("controller", &self.controller)
            .finish_non_exhaustive()
    }
}

impl JobRunner {
    /// Create a runner over `controller`'s tickets.
    #[must_use]
    pub fn new(controller: AdmissionController, pipeline: Arc<dyn DocumentPipeline>) -> Self {
        Self {
            controller,
            pipeline,
        }
    }

    /// Run `job` while holding `ticket`.
    ///
    /// The job is spawned onto the runtime. If this future is dropped the job
    /// keeps its slot until the pipeline returns, and an artifact nobody
    /// collects has its scratch directory removed.
    ///
    /// # Errors
    ///
    /// - [`JobError::Usage`] if the ticket is released, foreign, or cannot be
    ///   returned cleanly
    /// - [`JobError::Pipeline`] with the pipeline's error, unchanged, or
    ///   [`PipelineError::Aborted`] if the runtime dropped the job
    ///
    /// # Panics
    ///
    /// Re-raises a panic from the pipeline after its slot has been returned.
    pub async fn run(&self, ticket: AdmissionTicket, job: DocumentJob) -> Result<Artifact, JobError> {
        if !self.controller.owns(&ticket) {
            return Err(UsageError::ForeignTicket(ticket.id()).into());
        }
        if ticket.is_released() {
            return Err(UsageError::TicketNotHeld(ticket.id()).into());
        }

        let span = info_span!("job", job_id = %job.id, ticket = %ticket.id());
        let pipeline = Arc::clone(&self.pipeline);
        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(
            async move {
                let outcome = execute(pipeline.as_ref(), ticket, job).await;
                if let Err(unclaimed) = tx.send(outcome) {
                    discard(unclaimed).await;
                }
            }
            .instrument(span),
        );

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => match handle.await {
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                _ => Err(PipelineError::Aborted.into()),
            },
        }
    }
}

async fn execute(
    pipeline: &dyn DocumentPipeline,
    ticket: AdmissionTicket,
    job: DocumentJob,
) -> Result<Artifact, JobError> {
    let started = Instant::now();
    let result = pipeline.process(job).await;
    let elapsed = started.elapsed();

    match (result, ticket.release()) {
        (Ok(artifact), Ok(())) => {
            info!(elapsed = ?elapsed, artifact = ?artifact.path, "job completed");
            Ok(artifact)
        }
        (Err(e), Ok(())) => {
            warn!(elapsed = ?elapsed, error = %e, "job failed");
            Err(e.into())
        }
        (outcome, Err(usage)) => {
            if let Err(e) = outcome {
                warn!(elapsed = ?elapsed, error = %e, "job failed");
            }
            error!(error = %usage, "slot release failed after job");
            Err(usage.into())
        }
    }
}

/// Clean up after a job whose caller went away.
async fn discard(unclaimed: Result<Artifact, JobError>) {
    let Ok(artifact) = unclaimed else {
        return;
    };
    warn!(artifact = ?artifact.path, "caller gone, discarding artifact");
    if let Some(dir) = artifact.scratch_dir {
        if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
            warn!(workdir = ?dir, error = %e, "failed to remove scratch directory");
        }
    }
}
