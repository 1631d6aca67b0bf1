use std::path::PathBuf;

use clap::Parser;

use crate::config::{Preset, Settings};
use crate::llm::device::DevicePreference;

/// Indonesian paraphrasing service backed by a pretrained T5 model
#[derive(Debug, Parser)]
#[command(name = "paraphrase_serve")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Host to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "PORT", default_value = "5005")]
    pub port: u16,

    /// Starting settings: sampling (top-k/top-p) or beam (styled prompts)
    #[arg(long, env = "PARAPHRASE_PRESET", value_enum, default_value = "sampling")]
    pub preset: Preset,

    /// JSON settings file; replaces the preset entirely
    #[arg(long, env = "PARAPHRASE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Compute device
    #[arg(long, env = "PARAPHRASE_DEVICE", value_enum)]
    pub device: Option<DevicePreference>,

    /// Primary model identifier on the Hugging Face hub
    #[arg(long, env = "PARAPHRASE_MODEL")]
    pub model: Option<String>,

    /// tokenizer.json source (local file or hub repo) for models that lack one
    #[arg(long, env = "PARAPHRASE_TOKENIZER")]
    pub tokenizer: Option<String>,

    /// Echo generation error details in responses
    #[arg(long, env = "PARAPHRASE_VERBOSE_ERRORS")]
    pub verbose_errors: bool,
}

impl Cli {
    /// Resolve the service settings: file or preset, then command-line overrides.
    pub fn settings(&self) -> anyhow::Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::from_json_file(path)?,
            None => Settings::preset(self.preset),
        };
        if let Some(device) = self.device {
            settings.model.device = device;
        }
        if let Some(model) = &self.model {
            settings.model.primary = model.clone();
        }
        if let Some(tokenizer) = &self.tokenizer {
            settings.model.tokenizer = Some(tokenizer.clone());
        }
        if self.verbose_errors {
            settings.verbose_errors = true;
        }
        Ok(settings)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
