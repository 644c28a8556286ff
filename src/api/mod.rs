//! HTTP boundary: routes, bodies, and server lifecycle.

pub mod routes;
pub mod schemas;
pub mod server;

pub use routes::{routes, ApiError};
pub use schemas::{ErrorBody, HealthResponse, ProcessParams, StatusResponse};
pub use server::{serve, serve_listener};
