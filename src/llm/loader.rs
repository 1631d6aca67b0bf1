//! Hub download and model construction, run once at startup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use candle_transformers::models::t5::{Config as T5Config, T5ForConditionalGeneration};
use hf_hub::api::sync::{Api, ApiRepo};
use tokenizers::{PaddingParams, Tokenizer, TruncationParams};
use tokio::task::JoinHandle;

use crate::app_state::AppState;
use crate::config::Settings;
use crate::error::LoadError;
use crate::llm::device::{device_label, select_device};
use crate::llm::models::{ModelHandle, Paraphraser};

struct ModelFiles {
    config: PathBuf,
    tokenizer: PathBuf,
    weights: PathBuf,
}

impl ModelFiles {
    fn is_safetensors(&self) -> bool {
        self.weights
            .extension()
            .map(|e| e == "safetensors")
            .unwrap_or(false)
    }
}

fn fetch(repo: &ApiRepo, model_id: &str, file: &str) -> Result<PathBuf, LoadError> {
    repo.get(file).map_err(|e| LoadError::Fetch {
        model_id: model_id.to_string(),
        file: file.to_string(),
        message: e.to_string(),
    })
}

/// Locate `tokenizer.json`: the model repo's own, else `fallback`, which is
/// an existing local file or another repo id handed to `fetch_from`.
fn resolve_tokenizer<F>(
    model_id: &str,
    fallback: Option<&str>,
    mut fetch_from: F,
) -> Result<PathBuf, LoadError>
where
    F: FnMut(&str) -> Result<PathBuf, LoadError>,
{
    let err = match fetch_from(model_id) {
        Ok(path) => return Ok(path),
        Err(e) => e,
    };
    let Some(source) = fallback else {
        return Err(err);
    };

    tracing::warn!("{}; using tokenizer from {}", err, source);
    let local = Path::new(source);
    if local.is_file() {
        Ok(local.to_path_buf())
    } else {
        fetch_from(source)
    }
}

fn fetch_files(
    api: &Api,
    model_id: &str,
    tokenizer_source: Option<&str>,
) -> Result<ModelFiles, LoadError> {
    let repo = api.model(model_id.to_string());

    let config = fetch(&repo, model_id, "config.json")?;
    let tokenizer = resolve_tokenizer(model_id, tokenizer_source, |repo_id| {
        fetch(&api.model(repo_id.to_string()), repo_id, "tokenizer.json")
    })?;
    let weights = match fetch(&repo, model_id, "model.safetensors") {
        Ok(path) => path,
        Err(e) => {
            tracing::warn!("{}; trying pytorch_model.bin", e);
            fetch(&repo, model_id, "pytorch_model.bin")?
        }
    };
    tracing::debug!("Weights downloaded to {:?}", weights);

    Ok(ModelFiles {
        config,
        tokenizer,
        weights,
    })
}

fn load_tokenizer(
    files: &ModelFiles,
    model_id: &str,
    max_input_tokens: usize,
) -> Result<Tokenizer, LoadError> {
    let err = |message: String| LoadError::Tokenizer {
        model_id: model_id.to_string(),
        message,
    };

    let mut tokenizer = Tokenizer::from_file(&files.tokenizer).map_err(|e| err(e.to_string()))?;
    tokenizer
        .with_truncation(Some(TruncationParams {
            max_length: max_input_tokens,
            ..Default::default()
        }))
        .map_err(|e| err(e.to_string()))?;
    // Batch-longest padding is a no-op for the single prompts encoded here.
    tokenizer.with_padding(Some(PaddingParams::default()));
    Ok(tokenizer)
}

/// Download and build one model on `device`.
pub fn load_model(
    api: &Api,
    model_id: &str,
    device: &Device,
    settings: &Settings,
) -> Result<ModelHandle, LoadError> {
    tracing::info!("Loading model: {}", model_id);
    let files = fetch_files(api, model_id, settings.model.tokenizer.as_deref())?;

    let config_str = std::fs::read_to_string(&files.config).map_err(|e| LoadError::Config {
        model_id: model_id.to_string(),
        message: e.to_string(),
    })?;
    let mut config: T5Config =
        serde_json::from_str(&config_str).map_err(|e| LoadError::Config {
            model_id: model_id.to_string(),
            message: e.to_string(),
        })?;
    config.use_cache = true;

    let tokenizer = load_tokenizer(&files, model_id, settings.model.max_input_tokens)?;

    let weights_err = |e: candle_core::Error| LoadError::Weights {
        model_id: model_id.to_string(),
        message: e.to_string(),
    };
    let vb = if files.is_safetensors() {
        unsafe { VarBuilder::from_mmaped_safetensors(&[&files.weights], DType::F32, device) }
            .map_err(weights_err)?
    } else {
        VarBuilder::from_pth(&files.weights, DType::F32, device).map_err(weights_err)?
    };
    let model = T5ForConditionalGeneration::load(vb, &config).map_err(weights_err)?;

    tracing::info!(
        "Model {} loaded: vocab={}, d_model={}, layers={}",
        model_id,
        config.vocab_size,
        config.d_model,
        config.num_layers
    );

    Ok(ModelHandle::new(
        model_id.to_string(),
        model,
        config,
        tokenizer,
        device.clone(),
        settings.decoding.clone(),
    ))
}

/// Try each candidate in order and return the first that loads.
///
/// Every candidate is attempted at most once; the last error is returned when
/// all of them fail.
pub fn load_first_available<T, F>(candidates: &[String], mut attempt: F) -> Result<T, LoadError>
where
    F: FnMut(&str) -> Result<T, LoadError>,
{
    let mut last_error = LoadError::NoCandidates;
    for (idx, model_id) in candidates.iter().enumerate() {
        if idx > 0 {
            tracing::info!("Trying alternative model: {}", model_id);
        }
        match attempt(model_id) {
            Ok(loaded) => return Ok(loaded),
            Err(e) => {
                tracing::error!("Failed to load model {}: {}", model_id, e);
                last_error = e;
            }
        }
    }
    Err(last_error)
}

/// Resolve the device and load the configured model into `state`.
///
/// Failure leaves the service running and reporting unhealthy.
pub fn initialize(state: &AppState) {
    if let Err(e) = state.model.begin_loading() {
        tracing::warn!("Model initialisation skipped: {}", e);
        return;
    }

    let device = select_device(state.settings.model.device);
    tracing::info!("Using device: {}", device_label(&device));
    state.model.set_device(device_label(&device));

    let loaded = Api::new()
        .map_err(|e| LoadError::Hub(e.to_string()))
        .and_then(|api| {
            load_first_available(&state.settings.model.candidates(), |model_id| {
                load_model(&api, model_id, &device, &state.settings)
            })
        });

    let outcome = match loaded {
        Ok(handle) => {
            tracing::info!("Model {} ready", handle.model_id());
            state.model.mark_ready(Arc::new(handle))
        }
        Err(e) => {
            tracing::error!("No model could be loaded, serving as unhealthy: {}", e);
            state.model.mark_unavailable(e.to_string())
        }
    };
    if let Err(e) = outcome {
        tracing::error!("{}", e);
    }
}

/// Run [`initialize`] on a blocking worker so the server can answer health
/// checks while weights download.
pub fn spawn_model_loader(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::task::spawn_blocking(move || initialize(&state))
}
