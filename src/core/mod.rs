//! Admission control, slot accounting, and job execution.

pub mod admission;
pub mod error;
pub mod executor;
pub mod runner;
pub mod slot_pool;
pub mod status;
pub mod wait_queue;

pub use admission::{
    AdmissionController, AdmissionLimits, AdmissionRequest, AdmissionTicket, TicketId,
    DEFAULT_MAX_WAIT,
};
pub use error::{AdmissionError, AppResult, JobError, PipelineError, ServiceError, UsageError};
pub use executor::{Artifact, CaptionRewrite, DocumentJob, DocumentPipeline, RenderOptions, DEFAULT_DPI};
pub use runner::JobRunner;
pub use slot_pool::SlotPool;
pub use status::{ModelRole, ModelStatus, PoolStatus, ServiceStatus, StatusReporter};
pub use wait_queue::{Grant, QueueFull, WaitQueue, Waiter, WaiterId};
