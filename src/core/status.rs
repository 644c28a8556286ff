//! Read-only view of slot occupancy and model readiness.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::admission::AdmissionController;
use super::slot_pool::SlotPool;

/// Which engine a model backs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    /// Page OCR model.
    Ocr,
    /// Vision-language model used to caption extracted images.
    Captioner,
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ocr => f.write_str("ocr"),
            Self::Captioner => f.write_str("captioner"),
        }
    }
}

/// Readiness of one backing model, fixed at process startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelStatus {
    /// Engine the model backs.
    pub role: ModelRole,
    /// Model name, e.g. `deepseek-ai/DeepSeek-OCR`.
    pub name: String,
    /// Whether the model finished loading.
    pub ready: bool,
    /// Device the model is pinned to.
    pub device: String,
}

/// Consistent snapshot of the slot pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    /// Total slots.
    pub capacity: u32,
    /// Slots currently granted.
    pub in_use: u32,
    /// `capacity - in_use`.
    pub available: u32,
    /// Callers parked in the wait queue.
    pub waiting: usize,
}

impl PoolStatus {
    /// Whether every slot is taken.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.available == 0
    }
}

/// Pool snapshot plus per-model readiness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Every slot is taken.
    pub busy: bool,
    /// Slot occupancy.
    pub pool: PoolStatus,
    /// Backing models.
    pub models: Vec<ModelStatus>,
}

/// Exposes occupancy and readiness without ever touching the admission lock.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    slots: Arc<SlotPool>,
    waiting: Arc<AtomicUsize>,
    models: Arc<[ModelStatus]>,
}

impl StatusReporter {
    /// Build a reporter over `controller`'s pool and the loaded models.
    #[must_use]
    pub fn new(controller: &AdmissionController, models: Vec<ModelStatus>) -> Self {
        Self {
            slots: controller.slots(),
            waiting: controller.waiting_gauge(),
            models: models.into(),
        }
    }

    /// Current pool occupancy.
    ///
    /// `in_use` is read once, so `available` is always within `0..=capacity`.
    #[must_use]
    pub fn pool(&self) -> PoolStatus {
        let capacity = self.slots.capacity();
        let in_use = self.slots.in_use();
        PoolStatus {
            capacity,
            in_use,
            available: capacity.saturating_sub(in_use),
            waiting: self.waiting.load(Ordering::Acquire),
        }
    }

    /// Backing model readiness.
    #[must_use]
    pub fn models(&self) -> &[ModelStatus] {
        &self.models
    }

    /// Model for `role`, if configured.
    #[must_use]
    pub fn model(&self, role: ModelRole) -> Option<&ModelStatus> {
        self.models.iter().find(|m| m.role == role)
    }

    /// Whether every backing model is loaded.
    #[must_use]
    pub fn all_ready(&self) -> bool {
        self.models.iter().all(|m| m.ready)
    }

    /// Full snapshot.
    #[must_use]
    pub fn status(&self) -> ServiceStatus {
        let pool = self.pool();
        ServiceStatus {
            busy: pool.is_busy(),
            pool,
            models: self.models.to_vec(),
        }
    }
}
