//! Document jobs and the pipeline abstraction that turns them into artifacts.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::PipelineError;

/// Default rendering resolution for PDF pages.
pub const DEFAULT_DPI: u32 = 200;

/// How image tags in the generated Markdown are rewritten with captions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptionRewrite {
    /// Keep the image tag and append the caption after it.
    #[default]
    Append,
    /// Replace the image tag with the caption.
    Replace,
}

impl FromStr for CaptionRewrite {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "append" => Ok(Self::Append),
            "replace" => Ok(Self::Replace),
            other => Err(format!("unknown rewrite mode `{other}` (expected append or replace)")),
        }
    }
}

impl fmt::Display for CaptionRewrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Append => f.write_str("append"),
            Self::Replace => f.write_str("replace"),
        }
    }
}

/// Rendering and captioning options, opaque to admission control.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Page rendering resolution.
    pub dpi: u32,
    /// Caption rewrite strategy.
    pub rewrite: CaptionRewrite,
    /// Optional sampling seed for the captioner.
    pub seed: Option<u64>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            dpi: DEFAULT_DPI,
            rewrite: CaptionRewrite::default(),
            seed: None,
        }
    }
}

/// A document submitted for processing.
#[derive(Debug, Clone)]
pub struct DocumentJob {
    /// Job identifier, also used to name the scratch directory.
    pub id: Uuid,
    /// Name of the uploaded file, used for the artifact name.
    pub file_name: String,
    /// Raw PDF bytes.
    pub pdf: Vec<u8>,
    /// Processing options.
    pub options: RenderOptions,
}

impl DocumentJob {
    /// Create a job with a fresh identifier.
    #[must_use]
    pub fn new(file_name: impl Into<String>, pdf: Vec<u8>, options: RenderOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            file_name: file_name.into(),
            pdf,
            options,
        }
    }

    /// File stem used to name the artifact, e.g. `report` for `report.pdf`.
    #[must_use]
    pub fn stem(&self) -> &str {
        match self.file_name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ if self.file_name.is_empty() => "document",
            _ => &self.file_name,
        }
    }
}

/// Result of a successful job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Location of the packaged output.
    pub path: PathBuf,
    /// MIME type of the packaged output.
    pub media_type: String,
    /// Suggested download name.
    pub file_name: String,
    /// Scratch directory the caller may delete once the artifact is consumed.
    pub scratch_dir: Option<PathBuf>,
}

/// The GPU-bound processing pipeline, run only while a slot is held.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use pdfscribe_admission::core::{Artifact, DocumentJob, DocumentPipeline, PipelineError};
///
/// struct Echo;
///
/// #[async_trait]
/// impl DocumentPipeline for Echo {
///     async fn process(&self, job: DocumentJob) -> Result<Artifact, PipelineError> {
///         Ok(Artifact {
///             path: "/tmp/out.zip".into(),
///             media_type: "application/zip".into(),
///             file_name: format!("{}_markdown.zip", job.stem()),
///             scratch_dir: None,
///         })
///     }
/// }
/// ```
#[async_trait]
pub trait DocumentPipeline: Send + Sync + 'static {
    /// Turn a document into an artifact.
    ///
    /// Errors are returned to the caller unchanged.
    async fn process(&self, job: DocumentJob) -> Result<Artifact, PipelineError>;
}
