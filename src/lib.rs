//! Indonesian paraphrasing service.
//!
//! A pretrained T5 paraphrase model, loaded from the Hugging Face hub at
//! startup, served over a small JSON HTTP API (`/paraphrase`,
//! `/batch-paraphrase`, `/health`).

pub mod api;
pub mod app_state;
pub mod cli;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod llm;

pub use app_state::AppState;
pub use config::{Preset, Settings};
