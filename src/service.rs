//! Request handling core shared by every transport.
//!
//! [`AdmissionService`] turns an inbound job plus its admission parameters
//! into an artifact or a classified failure. Each request's wait is tied to a
//! child of the service's shutdown token, so shutting down cancels parked
//! waiters instead of leaving them to time out.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Settings;
use crate::core::{
    AdmissionController, AdmissionError, AdmissionRequest, Artifact, DocumentJob, JobError,
    JobRunner, ModelRole, ServiceStatus, StatusReporter,
};

/// Liveness summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// True when every backing model is loaded.
    pub ok: bool,
    /// OCR model name.
    pub ocr_model: String,
    /// Captioning model name.
    pub vl2_model: String,
}

/// Admission, execution, and status behind one handle.
#[derive(Debug)]
pub struct AdmissionService {
    settings: Settings,
    controller: AdmissionController,
    runner: JobRunner,
    reporter: StatusReporter,
    shutdown: CancellationToken,
}

impl AdmissionService {
    /// Assemble a service from already-built parts.
    ///
    /// Prefer [`crate::builders::build_service`], which validates settings.
    #[must_use]
    pub fn new(
        settings: Settings,
        controller: AdmissionController,
        runner: JobRunner,
        reporter: StatusReporter,
    ) -> Self {
        Self {
            settings,
            controller,
            runner,
            reporter,
            shutdown: CancellationToken::new(),
        }
    }

    /// Admit `job` and run it.
    ///
    /// With `wait_if_busy` the caller parks for up to `timeout`; otherwise a
    /// busy pool fails at once. A zero timeout with `wait_if_busy` joins the
    /// queue and fails with `Timeout` if a wait would be needed.
    ///
    /// # Errors
    ///
    /// - [`JobError::Admission`] for `Busy`, `Timeout`, `Cancelled`, or invalid parameters
    /// - [`JobError::Usage`] if the slot could not be returned cleanly
    /// - [`JobError::Pipeline`] with the pipeline's own failure
    pub async fn process(
        &self,
        job: DocumentJob,
        wait_if_busy: bool,
        timeout: Duration,
    ) -> Result<Artifact, JobError> {
        if self.shutdown.is_cancelled() {
            debug!(job_id = %job.id, "rejecting job during shutdown");
            return Err(AdmissionError::Cancelled.into());
        }
        let request = AdmissionRequest {
            wait_if_busy,
            timeout,
            cancel: Some(self.shutdown.child_token()),
        };
        let ticket = self.controller.acquire(&request).await?;
        debug!(
            job_id = %job.id,
            ticket = %ticket.id(),
            waited = ?ticket.waited(),
            "job admitted"
        );
        self.runner.run(ticket, job).await
    }

    /// Liveness and model names.
    #[must_use]
    pub fn health(&self) -> HealthReport {
        let name = |role| {
            self.reporter
                .model(role)
                .map(|m| m.name.clone())
                .unwrap_or_default()
        };
        HealthReport {
            ok: self.reporter.all_ready(),
            ocr_model: name(ModelRole::Ocr),
            vl2_model: name(ModelRole::Captioner),
        }
    }

    /// Pool occupancy and model readiness. Never takes a slot.
    #[must_use]
    pub fn status(&self) -> ServiceStatus {
        self.reporter.status()
    }

    /// Settings the service was built from.
    #[must_use]
    pub const fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Underlying controller, for callers managing tickets directly.
    #[must_use]
    pub const fn controller(&self) -> &AdmissionController {
        &self.controller
    }

    /// Token cancelled by [`Self::shutdown`].
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stop admitting and cancel every parked waiter. Running jobs finish.
    pub fn shutdown(&self) {
        if !self.shutdown.is_cancelled() {
            info!(
                waiting = self.reporter.pool().waiting,
                "admission service shutting down"
            );
            self.shutdown.cancel();
        }
    }
}
