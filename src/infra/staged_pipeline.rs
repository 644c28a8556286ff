//! Pipeline made of blocking stages that share a per-job scratch directory.
//!
//! Layout under `work_root`:
//!
//! ```text
//! <job-id>/
//!   input.pdf
//!   output/       stages read and write here
//!   result.zip    written by the packager
//! ```
//!
//! Stages are model-bound and synchronous, so each runs on the blocking pool.
//! A failed job's scratch directory is removed; a successful one is handed to
//! the caller through [`Artifact::scratch_dir`].

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::{Artifact, DocumentJob, DocumentPipeline, PipelineError, RenderOptions};

/// Inputs a stage sees.
#[derive(Debug, Clone)]
pub struct StageContext {
    /// Job identifier.
    pub job_id: Uuid,
    /// Per-job scratch directory.
    pub workdir: PathBuf,
    /// Uploaded document.
    pub input_pdf: PathBuf,
    /// Shared output directory.
    pub output_dir: PathBuf,
    /// Rendering and captioning options.
    pub options: RenderOptions,
}

/// One blocking step, e.g. OCR or captioning.
pub trait PipelineStage: Send + Sync + 'static {
    /// Name used in logs and error messages.
    fn name(&self) -> &str;

    /// Run the stage to completion.
    ///
    /// # Errors
    ///
    /// Any engine failure; it is reported as a stage failure.
    fn run(&self, ctx: &StageContext) -> anyhow::Result<()>;
}

/// Archives a finished output directory.
pub trait Packager: Send + Sync + 'static {
    /// Write an archive of `src` to `dest`.
    ///
    /// # Errors
    ///
    /// Any archiving failure.
    fn package(&self, src: &Path, dest: &Path) -> anyhow::Result<()>;
}

/// [`DocumentPipeline`] that runs stages in order, then packages the output.
#[derive(Clone)]
pub struct StagedPipeline {
    work_root: PathBuf,
    stages: Vec<Arc<dyn PipelineStage>>,
    packager: Arc<dyn Packager>,
}

impl fmt::Debug for StagedPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagedPipeline")
            .field("work_root", &self.work_root)
            .field(
                "stages",
                &self.stages.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

impl StagedPipeline {
    /// Pipeline with no stages yet.
    #[must_use]
    pub fn new(work_root: impl Into<PathBuf>, packager: Arc<dyn Packager>) -> Self {
        Self {
            work_root: work_root.into(),
            stages: Vec::new(),
            packager,
        }
    }

    /// Append a stage.
    #[must_use]
    pub fn with_stage(mut self, stage: Arc<dyn PipelineStage>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Root of per-job scratch directories.
    #[must_use]
    pub fn work_root(&self) -> &Path {
        &self.work_root
    }

    async fn prepare(&self, job: &DocumentJob) -> Result<StageContext, PipelineError> {
        let workdir = self.work_root.join(job.id.to_string());
        let output_dir = workdir.join("output");
        let input_pdf = workdir.join("input.pdf");

        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|source| PipelineError::Workspace {
                path: output_dir.clone(),
                source,
            })?;
        tokio::fs::write(&input_pdf, &job.pdf)
            .await
            .map_err(|source| PipelineError::Workspace {
                path: input_pdf.clone(),
                source,
            })?;

        Ok(StageContext {
            job_id: job.id,
            workdir,
            input_pdf,
            output_dir,
            options: job.options.clone(),
        })
    }

    async fn run_stages(&self, ctx: &StageContext) -> Result<PathBuf, PipelineError> {
        for stage in &self.stages {
            let name = stage.name().to_string();
            let started = Instant::now();
            let task_stage = Arc::clone(stage);
            let task_ctx = ctx.clone();

            let outcome = tokio::task::spawn_blocking(move || task_stage.run(&task_ctx)).await;
            match outcome {
                Ok(Ok(())) => debug!(stage = %name, elapsed = ?started.elapsed(), "stage finished"),
                Ok(Err(source)) => return Err(PipelineError::Stage { stage: name, source }),
                Err(_) => return Err(PipelineError::StagePanicked { stage: name }),
            }
        }

        let archive = ctx.workdir.join("result.zip");
        let packager = Arc::clone(&self.packager);
        let (src, dest) = (ctx.output_dir.clone(), archive.clone());
        tokio::task::spawn_blocking(move || packager.package(&src, &dest))
            .await
            .map_err(|e| PipelineError::Packaging(anyhow::anyhow!("packager panicked: {e}")))?
            .map_err(PipelineError::Packaging)?;
        Ok(archive)
    }
}

#[async_trait]
impl DocumentPipeline for StagedPipeline {
    async fn process(&self, job: DocumentJob) -> Result<Artifact, PipelineError> {
        let ctx = self.prepare(&job).await?;
        let workdir = ctx.workdir.clone();

        match self.run_stages(&ctx).await {
            Ok(archive) => {
                info!(archive = ?archive, "document packaged");
                Ok(Artifact {
                    path: archive,
                    media_type: "application/zip".into(),
                    file_name: format!("{}_markdown.zip", job.stem()),
                    scratch_dir: Some(workdir),
                })
            }
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_dir_all(&workdir).await {
                    warn!(workdir = ?workdir, error = %cleanup, "failed to remove scratch directory");
                }
                Err(e)
            }
        }
    }
}
