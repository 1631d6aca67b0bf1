use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use paraphrase_serve::api::server::create_router;
use paraphrase_serve::config::{Preset, SequencePolicy, Settings};
use paraphrase_serve::error::GenerationError;
use paraphrase_serve::llm::models::{GenerateOptions, Paraphraser};
use paraphrase_serve::AppState;

/// Records every prompt and answers with numbered paraphrases.
#[derive(Default)]
struct MockParaphraser {
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
    options: Mutex<Vec<GenerateOptions>>,
    fail_on: Option<&'static str>,
}

impl MockParaphraser {
    fn failing_on(marker: &'static str) -> Self {
        Self {
            fail_on: Some(marker),
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Paraphraser for MockParaphraser {
    fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<Vec<String>, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.options.lock().unwrap().push(*options);
        std::thread::sleep(std::time::Duration::from_millis(1));

        if let Some(marker) = self.fail_on {
            if prompt.contains(marker) {
                return Err(GenerationError::Tokenization("secret internals".to_string()));
            }
        }
        Ok((0..options.num_sequences)
            .map(|i| format!("parafrase {} dari [{}]", i, prompt))
            .collect())
    }

    fn model_id(&self) -> &str {
        "mock/indot5"
    }

    fn device(&self) -> &str {
        "cpu"
    }
}

/// Where [`PanickingParaphraser`] blows up.
#[derive(Clone, Copy)]
enum PanicSite {
    /// Inside `generate`, on the blocking worker.
    Generation,
    /// When the handler reads model metadata on the request task.
    Handler,
}

struct PanickingParaphraser(PanicSite);

impl Paraphraser for PanickingParaphraser {
    fn generate(
        &self,
        _prompt: &str,
        _options: &GenerateOptions,
    ) -> Result<Vec<String>, GenerationError> {
        match self.0 {
            PanicSite::Generation => panic!("tensor shape mismatch"),
            PanicSite::Handler => Ok(vec!["hasil".to_string()]),
        }
    }

    fn model_id(&self) -> &str {
        match self.0 {
            PanicSite::Generation => "mock/indot5",
            PanicSite::Handler => panic!("model metadata unavailable"),
        }
    }

    fn device(&self) -> &str {
        "cpu"
    }
}

/// Blocks inside `generate` until the test releases it.
struct GatedParaphraser {
    started: AtomicBool,
    gate: Mutex<mpsc::Receiver<()>>,
}

impl Paraphraser for GatedParaphraser {
    fn generate(
        &self,
        _prompt: &str,
        _options: &GenerateOptions,
    ) -> Result<Vec<String>, GenerationError> {
        self.started.store(true, Ordering::SeqCst);
        let _ = self.gate.lock().unwrap().recv_timeout(Duration::from_secs(10));
        Ok(vec!["akhirnya selesai".to_string()])
    }

    fn model_id(&self) -> &str {
        "mock/slow"
    }

    fn device(&self) -> &str {
        "cpu"
    }
}

fn ready_app(settings: Settings, model: Arc<dyn Paraphraser>) -> Router {
    let state = Arc::new(AppState::new(settings));
    state.model.begin_loading().unwrap();
    state.model.mark_ready(model).unwrap();
    create_router(state)
}

fn unloaded_app() -> (Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(Settings::default()));
    (create_router(Arc::clone(&state)), state)
}

async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };
    let response = app.oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, json)
}

async fn post(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(app, Method::POST, uri, Some(body)).await
}

#[tokio::test]
async fn test_root_metadata() {
    let (app, _) = unloaded_app();
    let (status, body) = send(app, Method::GET, "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "IndoT5 Paraphraser API");
    assert_eq!(body["model"], "Wikidepia/IndoT5-base-paraphrase");
    assert_eq!(body["endpoints"]["paraphrase"], "/paraphrase");
    assert_eq!(body["endpoints"]["batch_paraphrase"], "/batch-paraphrase");
}

#[tokio::test]
async fn test_health_before_load() {
    let (app, _) = unloaded_app();
    let (status, body) = send(app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["model_loaded"], false);
    assert_eq!(body["is_model_loaded"], false);
    assert_eq!(body["device"], "unknown");
    assert_eq!(body["state"], "uninitialized");
    assert!(body["uptime"].as_f64().unwrap() >= 0.0);
}

#[tokio::test]
async fn test_health_while_loading_and_after_failure() {
    let (app, state) = unloaded_app();
    state.model.begin_loading().unwrap();
    state.model.set_device("cpu");

    let (status, body) = send(app.clone(), Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "loading");
    assert_eq!(body["model_loaded"], false);
    assert_eq!(body["device"], "cpu");

    state.model.mark_unavailable("primary and fallback failed").unwrap();
    let (status, body) = send(app.clone(), Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["state"], "unavailable");

    let (status, _) = send(app.clone(), Method::GET, "/health/ready", None).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    let (status, body) = send(app, Method::GET, "/health/live", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "alive");
}

#[tokio::test]
async fn test_health_after_load() {
    let app = ready_app(Settings::default(), Arc::new(MockParaphraser::default()));
    let (status, body) = send(app.clone(), Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["model_loaded"], true);
    assert_eq!(body["device"], "cpu");
    assert_eq!(body["state"], "ready");

    let (status, _) = send(app, Method::GET, "/health/ready", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_paraphrase_success() {
    let mock = Arc::new(MockParaphraser::default());
    let app = ready_app(Settings::default(), mock.clone());

    let (status, body) = post(
        app,
        "/paraphrase",
        json!({"text": "Saya suka makan nasi goreng", "style": "default", "max_length": 128}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let result = body["result"].as_str().unwrap();
    assert!(!result.is_empty());
    assert_eq!(result, result.trim());
    assert_ne!(result, "Saya suka makan nasi goreng");
    assert_eq!(body["original_text"], "Saya suka makan nasi goreng");
    assert_eq!(body["style"], "default");
    assert!(body["processing_time"].as_f64().unwrap() > 0.0);
    assert_eq!(body["model_details"]["model"], "mock/indot5");
    assert_eq!(body["model_details"]["device"], "cpu");
    assert_eq!(body["model_details"]["max_length"], 128);
    assert_eq!(body["model_details"]["decoding"]["type"], "sampling");
    assert!(body.get("alternatives").is_none());

    assert_eq!(mock.calls(), 1);
    assert_eq!(
        mock.prompts.lock().unwrap()[0],
        "paraphrase: Saya suka makan nasi goreng </s>"
    );
    assert_eq!(mock.options.lock().unwrap()[0].max_length, 128);
}

#[tokio::test]
async fn test_paraphrase_defaults_max_length_from_settings() {
    let mock = Arc::new(MockParaphraser::default());
    let app = ready_app(Settings::preset(Preset::Beam), mock.clone());

    let (status, body) = post(app, "/paraphrase", json!({"text": "Cuaca hari ini cerah"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["model_details"]["max_length"], 256);
    assert_eq!(body["model_details"]["decoding"]["type"], "beam");
    assert_eq!(mock.options.lock().unwrap()[0].max_length, 256);
}

#[tokio::test]
async fn test_unknown_style_uses_default_prompt() {
    let mock = Arc::new(MockParaphraser::default());
    let app = ready_app(Settings::preset(Preset::Beam), mock.clone());

    let (status, body) = post(
        app.clone(),
        "/paraphrase",
        json!({"text": "Dia pergi ke pasar", "style": "pirate"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["style"], "pirate");

    let (status, _) = post(
        app,
        "/paraphrase",
        json!({"text": "Dia pergi ke pasar", "style": "formal"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let prompts = mock.prompts.lock().unwrap();
    assert_eq!(prompts[0], "parafrasekan: Dia pergi ke pasar");
    assert_eq!(prompts[1], "parafrasekan dengan bahasa formal: Dia pergi ke pasar");
}

#[tokio::test]
async fn test_multiple_sequences_returned_as_alternatives() {
    let mock = Arc::new(MockParaphraser::default());
    let app = ready_app(Settings::default(), mock.clone());

    let (status, body) = post(
        app,
        "/paraphrase",
        json!({"text": "Buku itu sangat menarik", "num_return_sequences": 3}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["result"].as_str().unwrap().starts_with("parafrase 0"));
    let alternatives = body["alternatives"].as_array().unwrap();
    assert_eq!(alternatives.len(), 2);
    assert!(alternatives[1].as_str().unwrap().starts_with("parafrase 2"));
    assert_eq!(body["model_details"]["num_return_sequences"], 3);
    assert_eq!(mock.options.lock().unwrap()[0].num_sequences, 3);
}

#[tokio::test]
async fn test_first_only_policy_generates_one_sequence() {
    let mock = Arc::new(MockParaphraser::default());
    let settings = Settings {
        sequence_policy: SequencePolicy::FirstOnly,
        ..Settings::default()
    };
    let app = ready_app(settings, mock.clone());

    let (status, body) = post(
        app,
        "/paraphrase",
        json!({"text": "Buku itu sangat menarik", "num_return_sequences": 3}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("alternatives").is_none());
    assert_eq!(body["model_details"]["num_return_sequences"], 3);
    assert_eq!(mock.options.lock().unwrap()[0].num_sequences, 1);
}

#[tokio::test]
async fn test_invalid_requests_never_reach_the_model() {
    let mock = Arc::new(MockParaphraser::default());
    let app = ready_app(Settings::default(), mock.clone());

    let invalid = [
        json!({"text": ""}),
        json!({"text": "   "}),
        json!({"text": "a".repeat(1001)}),
        json!({"text": "halo", "max_length": 9}),
        json!({"text": "halo", "max_length": 513}),
        json!({"text": "halo", "max_length": -1}),
        json!({"text": "halo", "num_return_sequences": 0}),
        json!({"text": "halo", "num_return_sequences": 6}),
        json!({"style": "default"}),
    ];
    for body in invalid {
        let (status, response) = post(app.clone(), "/paraphrase", body.clone()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "body: {}", body);
        assert!(response["detail"].is_string());
    }

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/paraphrase")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(mock.calls(), 0);
}

#[tokio::test]
async fn test_paraphrase_without_model_is_unavailable() {
    let (app, _) = unloaded_app();

    let (status, body) = post(
        app.clone(),
        "/paraphrase",
        json!({"text": "Saya suka makan nasi goreng", "style": "default", "max_length": 128}),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["detail"].as_str().unwrap().contains("Model not loaded"));

    // unavailability wins over validation
    let (status, _) = post(app.clone(), "/paraphrase", json!({"text": ""})).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, _) = post(app, "/batch-paraphrase", json!([{"text": "halo"}])).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_generation_failure_is_redacted_by_default() {
    let mock = Arc::new(MockParaphraser::failing_on("rusak"));
    let app = ready_app(Settings::default(), mock.clone());

    let (status, body) = post(app, "/paraphrase", json!({"text": "kalimat rusak"})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["detail"], "Paraphrase generation failed");
}

#[tokio::test]
async fn test_generation_failure_verbose() {
    let mock = Arc::new(MockParaphraser::failing_on("rusak"));
    let settings = Settings {
        verbose_errors: true,
        ..Settings::default()
    };
    let app = ready_app(settings, mock.clone());

    let (status, body) = post(app, "/paraphrase", json!({"text": "kalimat rusak"})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"].as_str().unwrap().contains("secret internals"));
}

#[tokio::test]
async fn test_batch_preserves_order() {
    let mock = Arc::new(MockParaphraser::default());
    let app = ready_app(Settings::default(), mock.clone());

    let texts = ["Pertama kali", "Kedua kalinya", "Ketiga juga"];
    let batch: Vec<Value> = texts.iter().map(|t| json!({"text": t})).collect();

    let (status, body) = post(app, "/batch-paraphrase", Value::Array(batch)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 3);
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    for (result, text) in results.iter().zip(texts) {
        assert_eq!(result["original_text"], text);
        assert!(result["result"].as_str().unwrap().contains(text));
    }
    assert_eq!(mock.calls(), 3);
}

#[tokio::test]
async fn test_batch_validates_every_item_first() {
    let mock = Arc::new(MockParaphraser::default());
    let app = ready_app(Settings::default(), mock.clone());

    let (status, body) = post(
        app.clone(),
        "/batch-paraphrase",
        json!([{"text": "baik"}, {"text": "juga baik"}, {"text": ""}]),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["detail"].as_str().unwrap().starts_with("item 2"));
    assert_eq!(mock.calls(), 0);

    let too_many: Vec<Value> = (0..33).map(|i| json!({"text": format!("teks {}", i)})).collect();
    let (status, _) = post(app.clone(), "/batch-paraphrase", Value::Array(too_many)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = post(app, "/batch-paraphrase", json!([])).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 0);
    assert_eq!(mock.calls(), 0);
}

#[tokio::test]
async fn test_batch_fails_as_a_whole_on_generation_error() {
    let mock = Arc::new(MockParaphraser::failing_on("rusak"));
    let app = ready_app(Settings::default(), mock.clone());

    let (status, body) = post(
        app,
        "/batch-paraphrase",
        json!([{"text": "baik"}, {"text": "rusak"}, {"text": "tidak dijalankan"}]),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["detail"].is_string());
    assert_eq!(mock.calls(), 2);
}

#[tokio::test]
async fn test_cors_preflight_on_any_path() {
    let (app, _) = unloaded_app();

    for uri in ["/paraphrase", "/does/not/exist"] {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri(uri)
                    .header(header::ORIGIN, "https://example.com")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "uri: {}", uri);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
        assert_eq!(response.headers()[header::ACCESS_CONTROL_MAX_AGE], "86400");
    }
}

#[tokio::test]
async fn test_unknown_path_is_json_404() {
    let (app, _) = unloaded_app();
    let (status, body) = send(app, Method::GET, "/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["detail"], "Not Found");
}

#[tokio::test]
async fn test_generation_panic_is_internal_error() {
    let app = ready_app(
        Settings::default(),
        Arc::new(PanickingParaphraser(PanicSite::Generation)),
    );
    let (status, body) = post(app, "/paraphrase", json!({"text": "Saya suka makan nasi goreng"})).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["detail"], "Internal server error");
}

#[tokio::test]
async fn test_handler_panic_is_caught_with_cors_headers() {
    let app = ready_app(
        Settings::default(),
        Arc::new(PanickingParaphraser(PanicSite::Handler)),
    );
    let response = app
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/paraphrase")
                .header(header::ORIGIN, "https://example.com")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"text": "Saya suka makan nasi goreng"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(body, json!({"detail": "Internal server error"}));
}

#[tokio::test]
async fn test_health_responds_during_generation() {
    let (release, gate) = mpsc::channel();
    let model = Arc::new(GatedParaphraser {
        started: AtomicBool::new(false),
        gate: Mutex::new(gate),
    });
    let app = ready_app(Settings::default(), model.clone());

    let pending = tokio::spawn(post(
        app.clone(),
        "/paraphrase",
        json!({"text": "Kalimat yang lambat diproses"}),
    ));
    while !model.started.load(Ordering::SeqCst) {
        tokio::task::yield_now().await;
    }

    // generation is parked on the blocking pool; health must still answer
    let (status, body) = send(app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(!pending.is_finished());

    release.send(()).unwrap();
    let (status, body) = pending.await.unwrap();
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], "akhirnya selesai");
}
