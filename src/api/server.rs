use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{
    routing::{get, post},
    Json, Router,
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::api::error::INTERNAL_ERROR_DETAIL;
use crate::api::handlers::{batch_paraphrase, health, liveness, paraphrase, readiness, root};
use crate::api::models::ErrorResponse;
use crate::AppState;

const PREFLIGHT_MAX_AGE: Duration = Duration::from_secs(86400);

/// Routes plus permissive CORS. The CORS layer answers every `OPTIONS`
/// request, on any path, before routing, and wraps panic responses too.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
        .route("/paraphrase", post(paraphrase))
        .route("/batch-paraphrase", post(batch_paraphrase))
        .fallback(not_found)
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(CorsLayer::permissive().max_age(PREFLIGHT_MAX_AGE))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            detail: "Not Found".to_string(),
        }),
    )
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!("Unhandled exception: {}", message);

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            detail: INTERNAL_ERROR_DETAIL.to_string(),
        }),
    )
        .into_response()
}
