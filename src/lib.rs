//! # PDFScribe Admission
//!
//! GPU slot admission control for a PDF to Markdown service.
//!
//! The OCR and captioning models are resident on a GPU that can run only a
//! fixed number of jobs at once, and loading a second copy is too expensive.
//! This crate decides, for every incoming request, whether it runs now, waits
//! its turn, or is turned away, and guarantees the slot comes back on every
//! exit path.
//!
//! ## Admission semantics
//!
//! - **Fast path**: a free slot with nobody queued is granted immediately.
//! - **Busy**: with `wait_if_busy = false` a busy pool fails at once.
//! - **Wait**: otherwise the caller parks in a FIFO queue until a slot is
//!   handed to it, its timeout elapses, or its cancellation token fires.
//! - **Hand-off**: a release gives the slot straight to the longest waiter,
//!   so a newcomer can never overtake someone already queued.
//! - **Status**: occupancy and model readiness are read lock-free and never
//!   consume a slot.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use pdfscribe_admission::builders::build_service;
//! use pdfscribe_admission::config::Settings;
//! use pdfscribe_admission::infra::StagedPipeline;
//!
//! let settings = Settings::from_env()?;
//! let pipeline = StagedPipeline::new(&settings.server.work_root, Arc::new(my_zipper))
//!     .with_stage(Arc::new(ocr_stage))
//!     .with_stage(Arc::new(caption_stage));
//! let service = Arc::new(build_service(settings.clone(), |_| true, Arc::new(pipeline))?);
//!
//! pdfscribe_admission::api::serve(&settings.server, service).await?;
//! ```
//!
//! Driving the controller directly:
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use pdfscribe_admission::core::{AdmissionController, AdmissionRequest};
//!
//! let controller = AdmissionController::new(1)?;
//! let ticket = controller.acquire(&AdmissionRequest::wait(Duration::from_secs(5))).await?;
//! // ... GPU work ...
//! ticket.release()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Admission control, slot accounting, and job execution.
pub mod core;
/// Configuration models for admission, models, and the HTTP server.
pub mod config;
/// Builders to construct the service from configuration.
pub mod builders;
/// Infrastructure adapters around the processing pipeline.
pub mod infra;
/// Request handling core shared by every transport.
pub mod service;
/// HTTP boundary.
#[cfg(feature = "http")]
pub mod api;
/// Shared utilities.
pub mod util;

pub use service::{AdmissionService, HealthReport};
