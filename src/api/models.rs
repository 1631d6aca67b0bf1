use serde::{Deserialize, Serialize};

use crate::config::{DecodeStrategy, RequestLimits};
use crate::error::ValidationError;
use crate::lifecycle::Phase;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParaphraseRequest {
    pub text: String,
    #[serde(default = "default_style")]
    pub style: String,
    /// Falls back to the configured default when absent.
    #[serde(default)]
    pub max_length: Option<usize>,
    #[serde(default = "default_num_return_sequences")]
    pub num_return_sequences: usize,
}

fn default_style() -> String {
    "default".to_string()
}

fn default_num_return_sequences() -> usize {
    1
}

impl ParaphraseRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            style: default_style(),
            max_length: None,
            num_return_sequences: default_num_return_sequences(),
        }
    }

    /// Check every field against `limits` and return the effective `max_length`.
    pub fn validate(&self, limits: &RequestLimits) -> Result<usize, ValidationError> {
        if self.text.trim().is_empty() {
            return Err(ValidationError::EmptyText);
        }
        let chars = self.text.chars().count();
        if chars > limits.max_text_chars {
            return Err(ValidationError::TextTooLong {
                actual: chars,
                max: limits.max_text_chars,
            });
        }

        let max_length = self.max_length.unwrap_or(limits.default_max_length);
        if !(limits.min_max_length..=limits.max_max_length).contains(&max_length) {
            return Err(ValidationError::MaxLengthOutOfRange {
                actual: max_length,
                min: limits.min_max_length,
                max: limits.max_max_length,
            });
        }

        if self.num_return_sequences == 0 || self.num_return_sequences > limits.max_return_sequences
        {
            return Err(ValidationError::SequencesOutOfRange {
                actual: self.num_return_sequences,
                max: limits.max_return_sequences,
            });
        }

        Ok(max_length)
    }
}

/// Validate a whole batch up front; returns the effective `max_length` per item.
pub fn validate_batch(
    requests: &[ParaphraseRequest],
    limits: &RequestLimits,
) -> Result<Vec<usize>, ValidationError> {
    if requests.len() > limits.max_batch_size {
        return Err(ValidationError::BatchTooLarge {
            actual: requests.len(),
            max: limits.max_batch_size,
        });
    }
    requests
        .iter()
        .enumerate()
        .map(|(index, request)| {
            request
                .validate(limits)
                .map_err(|e| ValidationError::BatchItem {
                    index,
                    source: Box::new(e),
                })
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParaphraseResponse {
    pub result: String,
    pub original_text: String,
    pub style: String,
    /// Seconds spent in generation.
    pub processing_time: f64,
    pub model_details: ModelDetails,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelDetails {
    pub model: String,
    pub device: String,
    pub max_length: usize,
    pub num_return_sequences: usize,
    pub decoding: DecodeStrategy,
    pub repetition_penalty: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchParaphraseResponse {
    pub results: Vec<ParaphraseResponse>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model_loaded: bool,
    /// Same as `model_loaded`, kept for older clients.
    pub is_model_loaded: bool,
    pub device: String,
    pub uptime: f64,
    pub state: Phase,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub detail: String,
}
