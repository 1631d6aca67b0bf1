use std::fs::File;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::llm::device::DevicePreference;
use crate::llm::prompt::PromptTable;

pub const PRIMARY_MODEL_ID: &str = "Wikidepia/IndoT5-base-paraphrase";
pub const FALLBACK_MODEL_ID: &str = "indonesian-nlp/indot5-base";

/// Which of the two historical service flavours to start from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Preset {
    /// Top-k/top-p sampling, plain `paraphrase:` prompt.
    Sampling,
    /// Beam search with styled Indonesian instructions.
    Beam,
}

/// Service settings. Everything that differed between the two flavours is data here.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub model: ModelSettings,
    pub prompts: PromptTable,
    pub decoding: DecodeParams,
    pub limits: RequestLimits,
    pub sequence_policy: SequencePolicy,
    /// Echo generation/internal error messages to clients.
    pub verbose_errors: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self::preset(Preset::Sampling)
    }
}

impl Settings {
    pub fn preset(preset: Preset) -> Self {
        match preset {
            Preset::Sampling => Self {
                model: ModelSettings::default(),
                prompts: PromptTable::plain("paraphrase: ", " </s>"),
                decoding: DecodeParams {
                    strategy: DecodeStrategy::Sampling {
                        temperature: 1.0,
                        top_k: Some(200),
                        top_p: Some(0.95),
                    },
                    repetition_penalty: 1.0,
                    seed: None,
                },
                limits: RequestLimits::default(),
                sequence_policy: SequencePolicy::All,
                verbose_errors: false,
            },
            Preset::Beam => Self {
                model: ModelSettings::default(),
                prompts: PromptTable::styled(),
                decoding: DecodeParams {
                    strategy: DecodeStrategy::Beam {
                        num_beams: 5,
                        length_penalty: 1.0,
                        early_stopping: true,
                    },
                    repetition_penalty: 1.2,
                    seed: None,
                },
                limits: RequestLimits {
                    default_max_length: 256,
                    ..RequestLimits::default()
                },
                sequence_policy: SequencePolicy::All,
                verbose_errors: false,
            },
        }
    }

    /// Load settings from a JSON file. Missing fields take the sampling defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("failed to open settings file {}", path.display()))?;
        let settings = serde_json::from_reader::<File, Settings>(file)
            .with_context(|| format!("failed to parse settings file {}", path.display()))?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// Hub identifier tried first.
    pub primary: String,
    /// Tried once if the primary fails to load.
    pub fallback: Option<String>,
    pub device: DevicePreference,
    /// Where to get `tokenizer.json` when a model repo ships only a
    /// SentencePiece `spiece.model`: a local file path or a hub repo id.
    pub tokenizer: Option<String>,
    /// Prompts are truncated to this many tokens before encoding.
    pub max_input_tokens: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            primary: PRIMARY_MODEL_ID.to_string(),
            fallback: Some(FALLBACK_MODEL_ID.to_string()),
            device: DevicePreference::Auto,
            tokenizer: None,
            max_input_tokens: 512,
        }
    }
}

impl ModelSettings {
    /// Model ids in the order they are attempted.
    pub fn candidates(&self) -> Vec<String> {
        let mut ids = vec![self.primary.clone()];
        if let Some(fallback) = &self.fallback {
            if fallback != &self.primary {
                ids.push(fallback.clone());
            }
        }
        ids
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecodeStrategy {
    Sampling {
        temperature: f64,
        top_k: Option<usize>,
        top_p: Option<f64>,
    },
    Beam {
        num_beams: usize,
        length_penalty: f64,
        early_stopping: bool,
    },
}

/// Parameters for the single decode entry point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodeParams {
    pub strategy: DecodeStrategy,
    /// 1.0 disables the penalty.
    pub repetition_penalty: f32,
    /// Fixed seed for sampling; random per request when unset.
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestLimits {
    pub max_text_chars: usize,
    pub min_max_length: usize,
    pub max_max_length: usize,
    pub default_max_length: usize,
    pub max_return_sequences: usize,
    pub max_batch_size: usize,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_text_chars: 1000,
            min_max_length: 10,
            max_max_length: 512,
            default_max_length: 512,
            max_return_sequences: 5,
            max_batch_size: 32,
        }
    }
}

/// What to do when a request asks for more than one sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequencePolicy {
    /// Generate only what is returned: a single sequence.
    FirstOnly,
    /// Generate all requested sequences; extras are returned as `alternatives`.
    All,
}
