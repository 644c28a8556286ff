//! Request and response bodies for the HTTP boundary.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{CaptionRewrite, ModelStatus, RenderOptions, ServiceStatus, DEFAULT_DPI};
use crate::service::HealthReport;

/// `GET /v1/health` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Every model is loaded.
    pub ok: bool,
    /// OCR model name.
    pub ocr_model: String,
    /// Captioning model name.
    pub vl2_model: String,
}

impl From<HealthReport> for HealthResponse {
    fn from(report: HealthReport) -> Self {
        Self {
            ok: report.ok,
            ocr_model: report.ocr_model,
            vl2_model: report.vl2_model,
        }
    }
}

/// `GET /v1/models/status` body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusResponse {
    /// OCR model name.
    pub ocr_model: String,
    /// Captioning model name.
    pub vl2_model: String,
    /// No slot is free.
    pub busy: bool,
    /// Total slots.
    pub capacity: u32,
    /// Slots in use.
    pub in_use: u32,
    /// Free slots.
    pub available: u32,
    /// Parked requests.
    pub waiting: usize,
    /// Per-model readiness.
    pub models: Vec<ModelStatus>,
}

impl StatusResponse {
    /// Combine a status snapshot with the model names from `health`.
    #[must_use]
    pub fn new(status: ServiceStatus, health: HealthReport) -> Self {
        Self {
            ocr_model: health.ocr_model,
            vl2_model: health.vl2_model,
            busy: status.busy,
            capacity: status.pool.capacity,
            in_use: status.pool.in_use,
            available: status.pool.available,
            waiting: status.pool.waiting,
            models: status.models,
        }
    }
}

/// Error body, `{"detail": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable reason.
    pub detail: String,
}

/// Query parameters of `POST /v1/process/pdf`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProcessParams {
    /// Uploaded file name; the artifact is named after its stem.
    #[serde(default)]
    pub filename: Option<String>,
    /// Page rendering resolution.
    #[serde(default = "default_dpi")]
    pub dpi: u32,
    /// `append` or `replace`.
    #[serde(default)]
    pub rewrite_mode: Option<String>,
    /// Captioner seed; falls back to the configured seed.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Park instead of failing when the GPU is busy.
    #[serde(default)]
    pub wait_if_busy: bool,
    /// Seconds to wait, `0..=600`. Only used with `wait_if_busy`.
    #[serde(default)]
    pub timeout_s: f64,
}

const fn default_dpi() -> u32 {
    DEFAULT_DPI
}

impl Default for ProcessParams {
    fn default() -> Self {
        Self {
            filename: None,
            dpi: DEFAULT_DPI,
            rewrite_mode: None,
            seed: None,
            wait_if_busy: false,
            timeout_s: 0.0,
        }
    }
}

impl ProcessParams {
    /// Render options, using `default_seed` when no seed was given.
    ///
    /// # Errors
    ///
    /// Returns a message for a zero DPI or an unknown rewrite mode.
    pub fn render_options(&self, default_seed: Option<u64>) -> Result<RenderOptions, String> {
        if self.dpi == 0 {
            return Err("dpi must be greater than 0".into());
        }
        let rewrite = match self.rewrite_mode.as_deref() {
            None => CaptionRewrite::default(),
            Some(mode) => mode.parse()?,
        };
        Ok(RenderOptions {
            dpi: self.dpi,
            rewrite,
            seed: self.seed.or(default_seed),
        })
    }

    /// Requested wait.
    ///
    /// # Errors
    ///
    /// Returns a message for a negative, non-finite, or oversized value.
    pub fn timeout(&self) -> Result<Duration, String> {
        Duration::try_from_secs_f64(self.timeout_s)
            .map_err(|_| format!("timeout_s must be a non-negative number, got {}", self.timeout_s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let params: ProcessParams = serde_json::from_str("{}").unwrap();
        assert_eq!(params.dpi, 200);
        assert!(!params.wait_if_busy);
        assert_eq!(params.timeout().unwrap(), Duration::ZERO);
        assert_eq!(
            params.render_options(Some(7)).unwrap(),
            RenderOptions { dpi: 200, rewrite: CaptionRewrite::Append, seed: Some(7) }
        );
    }

    #[test]
    fn rejects_unknown_rewrite_mode_and_negative_timeout() {
        let params = ProcessParams {
            rewrite_mode: Some("inline".into()),
            timeout_s: -1.0,
            ..ProcessParams::default()
        };
        assert!(params.render_options(None).is_err());
        assert!(params.timeout().is_err());
    }
}
