use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::{json, Value};

use crate::api::error::ApiError;
use crate::api::models::{
    validate_batch, BatchParaphraseResponse, HealthResponse, ModelDetails, ParaphraseRequest,
    ParaphraseResponse,
};
use crate::app_state::AppState;
use crate::config::SequencePolicy;
use crate::error::GenerationError;
use crate::llm::models::{GenerateOptions, Paraphraser};

const SERVICE_NAME: &str = "IndoT5 Paraphraser API";

pub async fn root(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "message": SERVICE_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "model": state.settings.model.primary,
        "status": "running",
        "endpoints": {
            "health": "/health",
            "liveness": "/health/live",
            "readiness": "/health/ready",
            "paraphrase": "/paraphrase",
            "batch_paraphrase": "/batch-paraphrase",
        }
    }))
}

fn health_status(state: &AppState) -> HealthResponse {
    let loaded = state.model.is_ready();
    HealthResponse {
        status: if loaded { "healthy" } else { "unhealthy" }.to_string(),
        model_loaded: loaded,
        is_model_loaded: loaded,
        device: state.model.device_label(),
        uptime: state.uptime(),
        state: state.model.phase(),
    }
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(health_status(&state))
}

pub async fn liveness() -> Json<Value> {
    Json(json!({ "status": "alive" }))
}

pub async fn readiness(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = health_status(&state);
    let status = if health.model_loaded {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(health))
}

fn loaded_model(state: &AppState) -> Result<Arc<dyn Paraphraser>, ApiError> {
    state.model.paraphraser().ok_or_else(|| {
        let detail = match state.model.failure_reason() {
            Some(_) => "Model not loaded: model failed to load",
            None => "Model not loaded: model is still loading",
        };
        ApiError::Unavailable(detail.to_string())
    })
}

pub async fn paraphrase(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ParaphraseRequest>, JsonRejection>,
) -> Result<Json<ParaphraseResponse>, ApiError> {
    let model = loaded_model(&state)?;
    let Json(request) = payload?;
    let max_length = request.validate(&state.settings.limits)?;

    tracing::info!(
        "Paraphrase request: {} chars, style={}",
        request.text.chars().count(),
        request.style
    );
    let response = run_paraphrase(&state, model, request, max_length).await?;
    Ok(Json(response))
}

pub async fn batch_paraphrase(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<Vec<ParaphraseRequest>>, JsonRejection>,
) -> Result<Json<BatchParaphraseResponse>, ApiError> {
    let model = loaded_model(&state)?;
    let Json(requests) = payload?;
    let max_lengths = validate_batch(&requests, &state.settings.limits)?;

    tracing::info!("Batch paraphrase request: {} items", requests.len());
    let mut results = Vec::with_capacity(requests.len());
    for (request, max_length) in requests.into_iter().zip(max_lengths) {
        results.push(run_paraphrase(&state, Arc::clone(&model), request, max_length).await?);
    }

    Ok(Json(BatchParaphraseResponse {
        total: results.len(),
        results,
    }))
}

async fn run_paraphrase(
    state: &AppState,
    model: Arc<dyn Paraphraser>,
    request: ParaphraseRequest,
    max_length: usize,
) -> Result<ParaphraseResponse, ApiError> {
    let settings = &state.settings;
    let verbose = settings.verbose_errors;
    let prompt = settings.prompts.build(&request.style, &request.text);
    let options = GenerateOptions {
        max_length,
        num_sequences: match settings.sequence_policy {
            SequencePolicy::FirstOnly => 1,
            SequencePolicy::All => request.num_return_sequences,
        },
    };

    let start = Instant::now();
    let worker_model = Arc::clone(&model);
    let outputs = tokio::task::spawn_blocking(move || worker_model.generate(&prompt, &options))
        .await
        .map_err(|e| ApiError::internal(e, verbose))?
        .map_err(|e| ApiError::generation(&e, verbose))?;
    let processing_time = start.elapsed().as_secs_f64();

    let mut outputs = outputs.into_iter();
    let result = outputs
        .next()
        .ok_or_else(|| ApiError::generation(&GenerationError::EmptyOutput, verbose))?;
    let alternatives = outputs
        .take(options.num_sequences.saturating_sub(1))
        .collect();
    tracing::info!("Paraphrase generated in {:.3}s", processing_time);

    Ok(ParaphraseResponse {
        result,
        original_text: request.text,
        style: request.style,
        processing_time,
        model_details: ModelDetails {
            model: model.model_id().to_string(),
            device: model.device().to_string(),
            max_length,
            num_return_sequences: request.num_return_sequences,
            decoding: settings.decoding.strategy.clone(),
            repetition_penalty: settings.decoding.repetition_penalty,
        },
        alternatives,
    })
}
