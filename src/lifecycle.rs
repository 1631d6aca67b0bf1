//! Process-wide model lifecycle.
//!
//! `Uninitialized -> Loading -> Ready | Unavailable`, driven once by the startup
//! loader. Request handlers only read.

use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::LifecycleError;
use crate::llm::models::Paraphraser;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Uninitialized,
    Loading,
    Ready,
    Unavailable,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Phase::Uninitialized => "uninitialized",
            Phase::Loading => "loading",
            Phase::Ready => "ready",
            Phase::Unavailable => "unavailable",
        }
    }
}

enum ModelState {
    Uninitialized,
    Loading,
    Ready(Arc<dyn Paraphraser>),
    Unavailable { reason: String },
}

impl ModelState {
    fn phase(&self) -> Phase {
        match self {
            ModelState::Uninitialized => Phase::Uninitialized,
            ModelState::Loading => Phase::Loading,
            ModelState::Ready(_) => Phase::Ready,
            ModelState::Unavailable { .. } => Phase::Unavailable,
        }
    }
}

pub struct ModelSlot {
    state: RwLock<ModelState>,
    device: RwLock<Option<String>>,
}

impl Default for ModelSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelSlot {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(ModelState::Uninitialized),
            device: RwLock::new(None),
        }
    }

    pub fn phase(&self) -> Phase {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .phase()
    }

    pub fn is_ready(&self) -> bool {
        self.phase() == Phase::Ready
    }

    /// The loaded model, if any.
    pub fn paraphraser(&self) -> Option<Arc<dyn Paraphraser>> {
        match &*self.state.read().unwrap_or_else(PoisonError::into_inner) {
            ModelState::Ready(model) => Some(Arc::clone(model)),
            _ => None,
        }
    }

    /// Why loading failed, once unavailable.
    pub fn failure_reason(&self) -> Option<String> {
        match &*self.state.read().unwrap_or_else(PoisonError::into_inner) {
            ModelState::Unavailable { reason } => Some(reason.clone()),
            _ => None,
        }
    }

    pub fn device_label(&self) -> String {
        self.device
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| "unknown".to_string())
    }

    pub fn set_device(&self, label: &str) {
        *self.device.write().unwrap_or_else(PoisonError::into_inner) = Some(label.to_string());
    }

    pub fn begin_loading(&self) -> Result<(), LifecycleError> {
        self.transition(Phase::Uninitialized, Phase::Loading, ModelState::Loading)
    }

    pub fn mark_ready(&self, model: Arc<dyn Paraphraser>) -> Result<(), LifecycleError> {
        let device = model.device().to_string();
        self.transition(Phase::Loading, Phase::Ready, ModelState::Ready(model))?;
        self.set_device(&device);
        Ok(())
    }

    pub fn mark_unavailable(&self, reason: impl Into<String>) -> Result<(), LifecycleError> {
        let next = ModelState::Unavailable {
            reason: reason.into(),
        };
        self.transition(Phase::Loading, Phase::Unavailable, next)
    }

    fn transition(&self, from: Phase, to: Phase, next: ModelState) -> Result<(), LifecycleError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let current = state.phase();
        if current != from {
            return Err(LifecycleError {
                from: current.name(),
                to: to.name(),
            });
        }
        *state = next;
        tracing::debug!("model lifecycle: {} -> {}", from.name(), to.name());
        Ok(())
    }
}
