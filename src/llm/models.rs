use candle_core::{DType, Device, Result as CandleResult, Tensor};
use candle_transformers::models::t5::{Config as T5Config, T5ForConditionalGeneration};
use tokenizers::Tokenizer;

use crate::config::DecodeParams;
use crate::error::GenerationError;
use crate::llm::device::device_label;
use crate::llm::inference::{self, DecoderStep};

/// Per-call generation knobs coming from the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenerateOptions {
    /// Maximum decoder length, counting the decoder start token.
    pub max_length: usize,
    pub num_sequences: usize,
}

/// A loaded paraphrasing model.
///
/// Implementations are shared read-only across requests; `generate` may block
/// for the duration of the forward passes.
pub trait Paraphraser: Send + Sync {
    /// Paraphrase an already composed prompt. Every returned string is trimmed
    /// and non-empty; at least one is returned.
    fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<Vec<String>, GenerationError>;

    fn model_id(&self) -> &str;

    fn device(&self) -> &str;
}

/// T5 model, tokenizer and device, created once by the loader.
pub struct ModelHandle {
    model_id: String,
    model: T5ForConditionalGeneration,
    config: T5Config,
    tokenizer: Tokenizer,
    device: Device,
    decoding: DecodeParams,
}

impl ModelHandle {
    pub fn new(
        model_id: String,
        model: T5ForConditionalGeneration,
        config: T5Config,
        tokenizer: Tokenizer,
        device: Device,
        decoding: DecodeParams,
    ) -> Self {
        Self {
            model_id,
            model,
            config,
            tokenizer,
            device,
            decoding,
        }
    }

    fn encode(&self, prompt: &str) -> Result<Tensor, GenerationError> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| GenerationError::Tokenization(e.to_string()))?;
        let ids = encoding.get_ids();
        if ids.is_empty() {
            return Err(GenerationError::Tokenization(
                "prompt produced no tokens".to_string(),
            ));
        }
        Ok(Tensor::new(ids, &self.device)?.unsqueeze(0)?)
    }

    fn detokenize(&self, ids: &[u32]) -> Result<String, GenerationError> {
        let text = self
            .tokenizer
            .decode(ids, true)
            .map_err(|e| GenerationError::Detokenization(e.to_string()))?;
        Ok(text.trim().to_string())
    }
}

impl Paraphraser for ModelHandle {
    fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<Vec<String>, GenerationError> {
        let input_ids = self.encode(prompt)?;

        // Private copy: weights are shared, the decoder KV cache is not.
        let mut model = self.model.clone();
        model.clear_kv_cache();
        let encoder_output = model.encode(&input_ids)?;

        let start_token = self
            .config
            .decoder_start_token_id
            .unwrap_or(self.config.pad_token_id) as u32;
        let mut step = T5Step {
            model,
            encoder_output,
            start_token,
            eos_token: self.config.eos_token_id as u32,
            device: self.device.clone(),
        };

        let seed = self.decoding.seed.unwrap_or_else(rand::random);
        let sequences = inference::decode(
            &mut step,
            &self.decoding,
            options.max_length,
            options.num_sequences,
            seed,
        )?;

        let texts = sequences
            .iter()
            .map(|ids| self.detokenize(ids))
            .collect::<Result<Vec<_>, _>>()?;
        non_empty(texts)
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn device(&self) -> &str {
        device_label(&self.device)
    }
}

/// Drop empty decodes, keeping rank order. Fails only if nothing is left.
fn non_empty(texts: Vec<String>) -> Result<Vec<String>, GenerationError> {
    let texts: Vec<String> = texts.into_iter().filter(|text| !text.is_empty()).collect();
    if texts.is_empty() {
        Err(GenerationError::EmptyOutput)
    } else {
        Ok(texts)
    }
}

#[derive(Clone)]
struct T5Step {
    model: T5ForConditionalGeneration,
    encoder_output: Tensor,
    start_token: u32,
    eos_token: u32,
    device: Device,
}

impl DecoderStep for T5Step {
    fn next_logits(&mut self, tokens: &[u32], incremental: bool) -> CandleResult<Tensor> {
        let input = if incremental {
            &tokens[tokens.len() - 1..]
        } else {
            self.model.clear_kv_cache();
            tokens
        };
        let decoder_ids = Tensor::new(input, &self.device)?.unsqueeze(0)?;
        self.model
            .decode(&decoder_ids, &self.encoder_output)?
            .squeeze(0)?
            .to_dtype(DType::F32)
    }

    fn fork(&self) -> Box<dyn DecoderStep> {
        Box::new(self.clone())
    }

    fn start_token(&self) -> u32 {
        self.start_token
    }

    fn eos_token(&self) -> u32 {
        self.eos_token
    }
}
