//! Configuration models for admission, models, and the HTTP server.

pub mod settings;

pub use settings::{AdmissionConfig, ModelSpec, ServerConfig, Settings};
