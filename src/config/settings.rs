//! Service settings: admission limits, backing models, and HTTP server.
//!
//! Settings come from JSON ([`Settings::from_json_str`]) or from the process
//! environment ([`Settings::from_env`], which loads a `.env` file first).
//! Every entry point validates before returning.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{AdmissionLimits, ModelRole, ModelStatus};

/// Admission limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Concurrent GPU jobs allowed (1 for a single GPU).
    pub gpu_slots: u32,
    /// Longest wait a caller may request, in seconds.
    pub max_wait_secs: u64,
    /// Bound on parked waiters; `None` for unbounded.
    pub max_waiters: Option<usize>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            gpu_slots: 1,
            max_wait_secs: 600,
            max_waiters: None,
        }
    }
}

impl AdmissionConfig {
    /// Validate admission values.
    ///
    /// # Errors
    ///
    /// Returns a message naming the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.gpu_slots == 0 {
            return Err("gpu_slots must be greater than 0".into());
        }
        if self.max_waiters == Some(0) {
            return Err("max_waiters must be greater than 0 when set".into());
        }
        Ok(())
    }

    /// Limits for the admission controller.
    #[must_use]
    pub const fn limits(&self) -> AdmissionLimits {
        AdmissionLimits {
            capacity: self.gpu_slots,
            max_wait: Duration::from_secs(self.max_wait_secs),
            max_waiters: self.max_waiters,
        }
    }
}

/// One backing model and where it runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    /// Engine the model backs.
    pub role: ModelRole,
    /// Model name.
    pub name: String,
    /// Device the model is pinned to.
    pub device: String,
    /// Fraction of device memory the model may claim.
    pub gpu_memory_utilization: f32,
}

impl ModelSpec {
    fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".into());
        }
        if self.device.trim().is_empty() {
            return Err("device must not be empty".into());
        }
        if !(self.gpu_memory_utilization > 0.0 && self.gpu_memory_utilization <= 1.0) {
            return Err(format!(
                "gpu_memory_utilization must be in (0, 1], got {}",
                self.gpu_memory_utilization
            ));
        }
        Ok(())
    }

    /// Readiness record for this model.
    #[must_use]
    pub fn status(&self, ready: bool) -> ModelStatus {
        ModelStatus {
            role: self.role,
            name: self.name.clone(),
            ready,
            device: self.device.clone(),
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Root of per-job scratch directories.
    pub work_root: PathBuf,
    /// `Retry-After` sent with a busy rejection.
    pub busy_retry_after_secs: u64,
    /// `Retry-After` sent when a wait times out.
    pub timeout_retry_after_secs: u64,
    /// Largest accepted upload.
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8000,
            work_root: PathBuf::from("/tmp/pdfscribe2ds"),
            busy_retry_after_secs: 15,
            timeout_retry_after_secs: 30,
            max_upload_bytes: 100 * 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// `host:port` string for binding.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Root settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Admission limits.
    pub admission: AdmissionConfig,
    /// Backing models, one per role.
    pub models: Vec<ModelSpec>,
    /// HTTP server.
    pub server: ServerConfig,
    /// Default sampling seed for the captioner.
    pub seed: Option<u64>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            admission: AdmissionConfig::default(),
            models: vec![
                ModelSpec {
                    role: ModelRole::Ocr,
                    name: "deepseek-ai/DeepSeek-OCR".into(),
                    device: "0".into(),
                    gpu_memory_utilization: 0.70,
                },
                ModelSpec {
                    role: ModelRole::Captioner,
                    name: "deepseek-ai/deepseek-vl2-tiny".into(),
                    device: "1".into(),
                    gpu_memory_utilization: 0.70,
                },
            ],
            server: ServerConfig::default(),
            seed: None,
        }
    }
}

impl Settings {
    /// Validate all sections; each role must appear exactly once.
    ///
    /// # Errors
    ///
    /// Returns a message naming the invalid section.
    pub fn validate(&self) -> Result<(), String> {
        self.admission
            .validate()
            .map_err(|e| format!("admission invalid: {e}"))?;
        for role in [ModelRole::Ocr, ModelRole::Captioner] {
            match self.models.iter().filter(|m| m.role == role).count() {
                0 => return Err(format!("no model configured for role `{role}`")),
                1 => {}
                n => return Err(format!("{n} models configured for role `{role}`")),
            }
        }
        for model in &self.models {
            model
                .validate()
                .map_err(|e| format!("model `{}` invalid: {e}", model.role))?;
        }
        if self.server.host.trim().is_empty() {
            return Err("server host must not be empty".into());
        }
        if self.server.max_upload_bytes == 0 {
            return Err("server max_upload_bytes must be greater than 0".into());
        }
        Ok(())
    }

    /// Model configured for `role`.
    #[must_use]
    pub fn model(&self, role: ModelRole) -> Option<&ModelSpec> {
        self.models.iter().find(|m| m.role == role)
    }

    /// Parse settings from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a message on parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let settings: Self =
            serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load `.env` if present, then read settings from the environment.
    ///
    /// # Errors
    ///
    /// Returns a message on a malformed variable or failed validation.
    pub fn from_env() -> Result<Self, String> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(format!(".env error: {e}"));
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build settings from defaults overridden by `lookup`.
    ///
    /// Recognised keys: `GPU_SLOTS`, `MAX_WAIT_SECS`, `MAX_WAITERS`,
    /// `MODEL_OCR`, `MODEL_VL2`, `OCR_DEVICE`, `VL2_DEVICE`, `GPU_MEM_OCR`,
    /// `GPU_MEM_VL2`, `SEED`, `HOST`, `PORT`, `WORK_ROOT`. Empty values count
    /// as unset.
    ///
    /// # Errors
    ///
    /// Returns a message on a malformed variable or failed validation.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut settings = Self::default();

        if let Some(v) = parse_var(&get, "GPU_SLOTS")? {
            settings.admission.gpu_slots = v;
        }
        if let Some(v) = parse_var(&get, "MAX_WAIT_SECS")? {
            settings.admission.max_wait_secs = v;
        }
        if let Some(v) = parse_var(&get, "MAX_WAITERS")? {
            settings.admission.max_waiters = Some(v);
        }
        settings.seed = parse_var(&get, "SEED")?;

        for model in &mut settings.models {
            let (name_key, device_key, mem_key) = match model.role {
                ModelRole::Ocr => ("MODEL_OCR", "OCR_DEVICE", "GPU_MEM_OCR"),
                ModelRole::Captioner => ("MODEL_VL2", "VL2_DEVICE", "GPU_MEM_VL2"),
            };
            if let Some(v) = get(name_key) {
                model.name = v;
            }
            if let Some(v) = get(device_key) {
                model.device = v;
            }
            if let Some(v) = parse_var(&get, mem_key)? {
                model.gpu_memory_utilization = v;
            }
        }

        if let Some(v) = get("HOST") {
            settings.server.host = v;
        }
        if let Some(v) = parse_var(&get, "PORT")? {
            settings.server.port = v;
        }
        if let Some(v) = get("WORK_ROOT") {
            settings.server.work_root = PathBuf::from(v);
        }

        settings.validate()?;
        Ok(settings)
    }
}

fn parse_var<T, F>(get: &F, key: &str) -> Result<Option<T>, String>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| format!("{key}={raw:?} is invalid: {e}"))
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.admission.limits().capacity, 1);
        assert_eq!(settings.model(ModelRole::Captioner).unwrap().device, "1");
    }

    #[test]
    fn env_overrides_defaults() {
        let settings = Settings::from_lookup(lookup(&[
            ("GPU_SLOTS", "2"),
            ("MODEL_VL2", "deepseek-ai/deepseek-vl2-small"),
            ("GPU_MEM_OCR", "0.5"),
            ("SEED", "42"),
            ("PORT", "9000"),
            ("OCR_DEVICE", ""),
        ]))
        .unwrap();

        assert_eq!(settings.admission.gpu_slots, 2);
        assert_eq!(
            settings.model(ModelRole::Captioner).unwrap().name,
            "deepseek-ai/deepseek-vl2-small"
        );
        let ocr = settings.model(ModelRole::Ocr).unwrap();
        assert!((ocr.gpu_memory_utilization - 0.5).abs() < f32::EPSILON);
        assert_eq!(ocr.device, "0");
        assert_eq!(settings.seed, Some(42));
        assert_eq!(settings.server.bind_addr(), "0.0.0.0:9000");
    }

    #[test]
    fn malformed_variable_names_the_key() {
        let err = Settings::from_lookup(lookup(&[("GPU_SLOTS", "many")])).unwrap_err();
        assert!(err.contains("GPU_SLOTS"), "{err}");
    }

    #[test]
    fn zero_slots_rejected() {
        let err = Settings::from_lookup(lookup(&[("GPU_SLOTS", "0")])).unwrap_err();
        assert!(err.contains("gpu_slots"), "{err}");
    }

    #[test]
    fn json_partial_sections_use_defaults() {
        let settings = Settings::from_json_str(r#"{"admission": {"gpu_slots": 3}}"#).unwrap();
        assert_eq!(settings.admission.gpu_slots, 3);
        assert_eq!(settings.admission.max_wait_secs, 600);
        assert_eq!(settings.models.len(), 2);
    }

    #[test]
    fn duplicate_role_rejected() {
        let mut settings = Settings::default();
        settings.models.push(settings.models[0].clone());
        assert!(settings.validate().unwrap_err().contains("ocr"));
    }
}
