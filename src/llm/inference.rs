use std::cmp::Ordering;

use candle_core::{Result as CandleResult, Tensor, D};
use candle_nn::ops::log_softmax;
use candle_transformers::generation::{LogitsProcessor, Sampling};
use candle_transformers::utils::apply_repeat_penalty;

use crate::config::{DecodeParams, DecodeStrategy};

/// One decoder forward step of a seq2seq model whose encoder pass is already done.
pub trait DecoderStep {
    /// Logits over the vocabulary for the token following `tokens`.
    ///
    /// `tokens` starts with the decoder start token. When `incremental` is true,
    /// `tokens` extends the previous call's sequence by exactly one token and the
    /// implementation may reuse its cache; otherwise it must recompute from scratch.
    fn next_logits(&mut self, tokens: &[u32], incremental: bool) -> CandleResult<Tensor>;

    /// Independent copy carrying the current cache. Beam search keeps one per
    /// live hypothesis.
    fn fork(&self) -> Box<dyn DecoderStep>;

    fn start_token(&self) -> u32;

    fn eos_token(&self) -> u32;
}

/// Run the configured decoding strategy and return up to `num_sequences`
/// token sequences, without start or EOS tokens.
///
/// `max_length` counts the decoder start token, so at most `max_length - 1`
/// tokens are generated per sequence.
pub fn decode(
    step: &mut dyn DecoderStep,
    params: &DecodeParams,
    max_length: usize,
    num_sequences: usize,
    seed: u64,
) -> CandleResult<Vec<Vec<u32>>> {
    let num_sequences = num_sequences.max(1);
    let max_new_tokens = max_length.saturating_sub(1);
    match params.strategy {
        DecodeStrategy::Sampling {
            temperature,
            top_k,
            top_p,
        } => {
            let sampling = sampling_mode(temperature, top_k, top_p);
            (0..num_sequences as u64)
                .map(|i| {
                    sample_sequence(
                        step,
                        sampling.clone(),
                        params.repetition_penalty,
                        max_new_tokens,
                        seed.wrapping_add(i),
                    )
                })
                .collect()
        }
        DecodeStrategy::Beam {
            num_beams,
            length_penalty,
            early_stopping,
        } => beam_search(
            step,
            BeamConfig {
                num_beams: num_beams.max(1),
                length_penalty,
                early_stopping,
                repetition_penalty: params.repetition_penalty,
                max_new_tokens,
            },
            num_sequences,
        ),
    }
}

fn sampling_mode(temperature: f64, top_k: Option<usize>, top_p: Option<f64>) -> Sampling {
    if temperature <= 0.0 {
        return Sampling::ArgMax;
    }
    let temperature = temperature.clamp(0.01, 100.0);
    let top_p = top_p.filter(|p| *p > 0.0 && *p < 1.0);
    match (top_k.filter(|k| *k > 0), top_p) {
        (Some(k), Some(p)) => Sampling::TopKThenTopP { k, p, temperature },
        (Some(k), None) => Sampling::TopK { k, temperature },
        (None, Some(p)) => Sampling::TopP { p, temperature },
        (None, None) => Sampling::All { temperature },
    }
}

fn penalize(logits: Tensor, penalty: f32, generated: &[u32]) -> CandleResult<Tensor> {
    if penalty == 1.0 || generated.is_empty() {
        Ok(logits)
    } else {
        apply_repeat_penalty(&logits, penalty, generated)
    }
}

fn sample_sequence(
    step: &mut dyn DecoderStep,
    sampling: Sampling,
    repetition_penalty: f32,
    max_new_tokens: usize,
    seed: u64,
) -> CandleResult<Vec<u32>> {
    let mut processor = LogitsProcessor::from_sampling(seed, sampling);
    let eos = step.eos_token();
    let mut tokens = vec![step.start_token()];

    for index in 0..max_new_tokens {
        let logits = step.next_logits(&tokens, index > 0)?;
        let logits = penalize(logits, repetition_penalty, &tokens[1..])?;
        let next_token = processor.sample(&logits)?;
        if next_token == eos {
            break;
        }
        tokens.push(next_token);
    }

    tokens.remove(0);
    Ok(tokens)
}

struct BeamConfig {
    num_beams: usize,
    length_penalty: f64,
    early_stopping: bool,
    repetition_penalty: f32,
    max_new_tokens: usize,
}

struct Hypothesis {
    tokens: Vec<u32>,
    log_prob: f64,
    /// Decoder whose cache covers the start token plus `tokens`, once stepped.
    decoder: Box<dyn DecoderStep>,
}

impl Hypothesis {
    fn step(&mut self, start: u32) -> CandleResult<Tensor> {
        let mut context = Vec::with_capacity(self.tokens.len() + 1);
        context.push(start);
        context.extend_from_slice(&self.tokens);
        self.decoder.next_logits(&context, !self.tokens.is_empty())
    }

    /// Length-normalised score; the EOS token counts towards the length.
    fn score(&self, length_penalty: f64, finished: bool) -> f64 {
        length_normalised(self.log_prob, self.tokens.len(), length_penalty, finished)
    }
}

fn length_normalised(log_prob: f64, len: usize, length_penalty: f64, finished: bool) -> f64 {
    let len = len + usize::from(finished);
    log_prob / (len.max(1) as f64).powf(length_penalty)
}

fn beam_search(
    step: &mut dyn DecoderStep,
    config: BeamConfig,
    num_sequences: usize,
) -> CandleResult<Vec<Vec<u32>>> {
    let start = step.start_token();
    let eos = step.eos_token();
    let mut beams = vec![Hypothesis {
        tokens: Vec::new(),
        log_prob: 0.0,
        decoder: step.fork(),
    }];
    let mut finished: Vec<(f64, Vec<u32>)> = Vec::new();

    for _ in 0..config.max_new_tokens {
        let mut candidates: Vec<(usize, u32, f64)> = Vec::new();
        for (beam_idx, beam) in beams.iter_mut().enumerate() {
            let logits = beam.step(start)?;
            let logits = penalize(logits, config.repetition_penalty, &beam.tokens)?;
            let log_probs = log_softmax(&logits, D::Minus1)?.to_vec1::<f32>()?;

            for (token, log_prob) in top_n(&log_probs, 2 * config.num_beams) {
                candidates.push((beam_idx, token, beam.log_prob + log_prob as f64));
            }
        }
        candidates.sort_by(|a, b| b.2.total_cmp(&a.2));

        let mut next_beams = Vec::with_capacity(config.num_beams);
        for (rank, (beam_idx, token, log_prob)) in candidates.into_iter().enumerate() {
            let parent = &beams[beam_idx];
            if token == eos {
                // EOS only closes a hypothesis from within the top num_beams ranks.
                if rank < config.num_beams {
                    let score = length_normalised(
                        log_prob,
                        parent.tokens.len(),
                        config.length_penalty,
                        true,
                    );
                    finished.push((score, parent.tokens.clone()));
                }
                continue;
            }
            let mut tokens = parent.tokens.clone();
            tokens.push(token);
            next_beams.push(Hypothesis {
                tokens,
                log_prob,
                decoder: parent.decoder.fork(),
            });
            if next_beams.len() == config.num_beams {
                break;
            }
        }
        beams = next_beams;

        if beams.is_empty() || search_done(&config, &finished, &beams) {
            break;
        }
    }

    // Hypotheses still alive at the length limit compete with the finished ones.
    finished.extend(
        beams
            .into_iter()
            .map(|h| (h.score(config.length_penalty, false), h.tokens)),
    );
    finished.sort_by(|a, b| b.0.total_cmp(&a.0));
    finished.truncate(num_sequences.min(config.num_beams));

    Ok(finished.into_iter().map(|(_, tokens)| tokens).collect())
}

fn search_done(config: &BeamConfig, finished: &[(f64, Vec<u32>)], beams: &[Hypothesis]) -> bool {
    if finished.len() < config.num_beams {
        return false;
    }
    if config.early_stopping {
        return true;
    }
    let mut scores: Vec<f64> = finished.iter().map(|(score, _)| *score).collect();
    scores.sort_by(|a, b| b.total_cmp(a));
    let worst_kept = scores[config.num_beams - 1];
    let best_alive = beams
        .iter()
        .map(|h| h.score(config.length_penalty, false))
        .fold(f64::NEG_INFINITY, f64::max);
    best_alive <= worst_kept
}

/// Indices and values of the `n` largest entries, largest first.
fn top_n(values: &[f32], n: usize) -> Vec<(u32, f32)> {
    let mut indexed: Vec<(u32, f32)> = values
        .iter()
        .enumerate()
        .map(|(i, &v)| (i as u32, v))
        .collect();
    indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
    indexed.truncate(n);
    indexed
}
