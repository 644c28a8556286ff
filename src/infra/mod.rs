//! Infrastructure adapters around the processing pipeline.

pub mod staged_pipeline;
pub mod zip_packager;

pub use staged_pipeline::{Packager, PipelineStage, StageContext, StagedPipeline};
pub use zip_packager::ZipPackager;
