//! Staged pipeline: workspace layout, stage order, packaging, and cleanup.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use pdfscribe_admission::core::{
    CaptionRewrite, DocumentJob, DocumentPipeline, PipelineError, RenderOptions,
};
use pdfscribe_admission::infra::{Packager, PipelineStage, StageContext, StagedPipeline};

/// Appends its name to a shared log and writes a page file into the output.
struct RecordingStage {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl PipelineStage for RecordingStage {
    fn name(&self) -> &str {
        self.name
    }

    fn run(&self, ctx: &StageContext) -> anyhow::Result<()> {
        let pdf = fs::read(&ctx.input_pdf)?;
        anyhow::ensure!(pdf.starts_with(b"%PDF"), "not a PDF");
        fs::write(
            ctx.output_dir.join(format!("{}.md", self.name)),
            format!("dpi={} rewrite={}", ctx.options.dpi, ctx.options.rewrite),
        )?;
        self.log.lock().push(self.name.to_string());
        Ok(())
    }
}

struct FailingStage;

impl PipelineStage for FailingStage {
    fn name(&self) -> &str {
        "OCR"
    }

    fn run(&self, _ctx: &StageContext) -> anyhow::Result<()> {
        anyhow::bail!("model not loaded")
    }
}

struct PanickingStage;

impl PipelineStage for PanickingStage {
    fn name(&self) -> &str {
        "Caption"
    }

    fn run(&self, _ctx: &StageContext) -> anyhow::Result<()> {
        panic!("captioner crashed")
    }
}

/// Writes the sorted list of output files as the "archive".
struct ListingPackager;

impl Packager for ListingPackager {
    fn package(&self, src: &Path, dest: &Path) -> anyhow::Result<()> {
        let mut names = fs::read_dir(src)?
            .map(|entry| entry.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<Result<Vec<_>, _>>()?;
        names.sort();
        fs::write(dest, names.join("\n"))?;
        Ok(())
    }
}

fn job() -> DocumentJob {
    DocumentJob::new(
        "quarterly.pdf",
        b"%PDF-1.7 body".to_vec(),
        RenderOptions {
            dpi: 300,
            rewrite: CaptionRewrite::Replace,
            seed: Some(3),
        },
    )
}

#[tokio::test]
async fn runs_stages_in_order_and_packages_output() {
    let root = tempfile::tempdir().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    let pipeline = StagedPipeline::new(root.path(), Arc::new(ListingPackager))
        .with_stage(Arc::new(RecordingStage { name: "OCR", log: Arc::clone(&log) }))
        .with_stage(Arc::new(RecordingStage { name: "Caption", log: Arc::clone(&log) }));

    let job = job();
    let job_id = job.id;
    let artifact = pipeline.process(job).await.unwrap();

    assert_eq!(*log.lock(), vec!["OCR".to_string(), "Caption".to_string()]);
    assert_eq!(artifact.file_name, "quarterly_markdown.zip");
    assert_eq!(artifact.media_type, "application/zip");

    let workdir = root.path().join(job_id.to_string());
    assert_eq!(artifact.scratch_dir.as_deref(), Some(workdir.as_path()));
    assert_eq!(artifact.path, workdir.join("result.zip"));
    assert!(workdir.join("input.pdf").is_file());
    assert_eq!(fs::read_to_string(&artifact.path).unwrap(), "Caption.md\nOCR.md");
    assert_eq!(
        fs::read_to_string(workdir.join("output").join("OCR.md")).unwrap(),
        "dpi=300 rewrite=replace"
    );
}

#[tokio::test]
async fn stage_error_names_the_stage_and_removes_workspace() {
    let root = tempfile::tempdir().unwrap();
    let pipeline =
        StagedPipeline::new(root.path(), Arc::new(ListingPackager)).with_stage(Arc::new(FailingStage));

    let err = pipeline.process(job()).await.unwrap_err();

    assert!(matches!(err, PipelineError::Stage { ref stage, .. } if stage == "OCR"));
    assert_eq!(err.to_string(), "OCR processing failed: model not loaded");
    assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn stage_panic_is_reported_not_propagated() {
    let root = tempfile::tempdir().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    let pipeline = StagedPipeline::new(root.path(), Arc::new(ListingPackager))
        .with_stage(Arc::new(RecordingStage { name: "OCR", log: Arc::clone(&log) }))
        .with_stage(Arc::new(PanickingStage));

    let err = pipeline.process(job()).await.unwrap_err();

    assert!(matches!(err, PipelineError::StagePanicked { ref stage } if stage == "Caption"));
    assert_eq!(log.lock().len(), 1);
    assert_eq!(fs::read_dir(root.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn unwritable_work_root_is_a_workspace_error() {
    let root = tempfile::tempdir().unwrap();
    let blocker = root.path().join("not-a-dir");
    fs::write(&blocker, b"").unwrap();
    let pipeline = StagedPipeline::new(&blocker, Arc::new(ListingPackager));

    let err = pipeline.process(job()).await.unwrap_err();

    assert!(matches!(err, PipelineError::Workspace { .. }));
}
