use std::time::Instant;

use crate::config::Settings;
use crate::lifecycle::ModelSlot;

pub struct AppState {
    pub settings: Settings,
    pub model: ModelSlot,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            model: ModelSlot::new(),
            started_at: Instant::now(),
        }
    }

    /// Seconds since the process started serving.
    pub fn uptime(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }
}
