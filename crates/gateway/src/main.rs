//! Groundline API Gateway
//!
//! HTTP entry point for the grounded chat pipeline.
//! Handles:
//! - Service wiring (corpus, embedder, generator, checkpoint backend)
//! - Rate limiting, timeouts, and concurrency limits
//! - Request routing
//! - Observability (logging, metrics)

mod handlers;
mod middleware;

use axum::{
    extract::Request,
    middleware::{from_fn, Next},
    routing::{get, post},
    Router,
};
use groundline_common::{
    checkpoint::create_backend,
    config::{AppConfig, ObservabilityConfig, SearchMode},
    embeddings::{create_embedder, Embedder},
    errors::Result,
    llm::create_generator,
    metrics,
};
use groundline_context::{GroundedResponder, PipelineOrchestrator, QueryRewriter, SessionStore};
use groundline_search::{
    load_corpus, Bm25Index, CorpusSearch, HybridSearch, RetrievalParams, Retriever, VectorIndex,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Notify;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use middleware::rate_limit::{create_rate_limiter, rate_limit_middleware};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub pipeline: Arc<PipelineOrchestrator>,
    pub sessions: Arc<SessionStore>,
    pub retriever: Arc<Retriever>,
    pub metrics: Option<PrometheusHandle>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    init_tracing(&config.observability);

    info!(
        service = %config.observability.service_name,
        "Starting Groundline API Gateway v{}",
        groundline_common::VERSION
    );

    config.validate().map_err(|e| {
        error!(error = %e, "Invalid configuration");
        e
    })?;
    let config = Arc::new(config);

    // Initialize metrics
    let metrics_handle = if config.observability.metrics_enabled {
        let handle = PrometheusBuilder::new()
            .set_buckets(metrics::LATENCY_BUCKETS)?
            .install_recorder()?;
        metrics::register_metrics();
        Some(handle)
    } else {
        None
    };

    let state = build_state(config.clone(), metrics_handle).await.map_err(|e| {
        error!(error = %e, "Failed to initialize services");
        e
    })?;

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let shutdown = Arc::new(Notify::new());
    let server = axum::serve(listener, app).with_graceful_shutdown({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            shutdown.notify_one();
        }
    });

    let grace = config.shutdown_timeout();
    tokio::select! {
        result = server.into_future() => result?,
        _ = async {
            shutdown.notified().await;
            tokio::time::sleep(grace).await;
        } => warn!(timeout_secs = grace.as_secs(), "Graceful shutdown timed out"),
    }

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

/// Construct every service once and share them through the state
async fn build_state(config: Arc<AppConfig>, metrics: Option<PrometheusHandle>) -> Result<AppState> {
    let embedder = create_embedder(&config.embedding)?;
    let corpus = build_search(&config, embedder).await?;
    info!(
        chunks = corpus.len(),
        mode = corpus.mode().as_str(),
        "Corpus loaded"
    );

    let retriever = Arc::new(Retriever::new(
        corpus,
        RetrievalParams::from(&config.retrieval),
    ));

    let backend = create_backend(&config.persistence).await?;
    let sessions = Arc::new(SessionStore::new(backend));

    let generator = create_generator(&config.generation)?;
    let rewriter = QueryRewriter::new(generator.clone(), &config.rewriter);
    let responder = GroundedResponder::new(
        generator,
        config.generation.temperature,
        &config.responder,
    );

    let pipeline = Arc::new(PipelineOrchestrator::new(
        sessions.clone(),
        rewriter,
        retriever.clone(),
        responder,
    ));

    Ok(AppState {
        config,
        pipeline,
        sessions,
        retriever,
        metrics,
    })
}

async fn build_search(
    config: &AppConfig,
    embedder: Arc<dyn Embedder>,
) -> Result<Arc<dyn CorpusSearch>> {
    let entries = load_corpus(&config.corpus.path).await?;

    let search: Arc<dyn CorpusSearch> = match config.corpus.search_mode {
        SearchMode::Vector => Arc::new(VectorIndex::build(entries, embedder).await?),
        SearchMode::Lexical => Arc::new(Bm25Index::new(&entries)),
        SearchMode::Hybrid => Arc::new(HybridSearch::build(entries, embedder).await?),
    };
    Ok(search)
}

/// Create the main application router
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/chat", post(handlers::chat::chat))
        .route("/sessions", post(handlers::sessions::create_session))
        .route("/sessions/{id}", get(handlers::sessions::get_session));

    let mut app = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .route("/metrics", get(handlers::health::metrics))
        .nest("/v1", api_routes);

    let limits = &state.config.rate_limit;
    if limits.enabled {
        let limiter = create_rate_limiter(limits.requests_per_second, limits.burst);
        app = app.layer(from_fn(move |request: Request, next: Next| {
            rate_limit_middleware(request, next, limiter.clone())
        }));
    }

    app.layer(GlobalConcurrencyLimitLayer::new(
        state.config.server.max_concurrent_requests.max(1),
    ))
    .layer(TimeoutLayer::new(state.config.request_timeout()))
    .layer(TraceLayer::new_for_http())
    .layer(cors)
    .layer(PropagateRequestIdLayer::x_request_id())
    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, StatusCode};
    use axum::response::Response;
    use groundline_common::checkpoint::MemoryBackend;
    use groundline_common::config::{ResponderConfig, RewriterConfig};
    use groundline_common::llm::MockGenerator;
    use groundline_context::REFUSAL_MESSAGE;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let retriever = Arc::new(Retriever::new(
            Arc::new(Bm25Index::new(&[])),
            RetrievalParams::default(),
        ));
        let sessions = Arc::new(SessionStore::new(Arc::new(MemoryBackend::new())));
        let generator = Arc::new(MockGenerator::new());
        let pipeline = Arc::new(PipelineOrchestrator::new(
            sessions.clone(),
            QueryRewriter::new(generator.clone(), &RewriterConfig::default()),
            retriever.clone(),
            GroundedResponder::new(generator, 0.2, &ResponderConfig::default()),
        ));

        AppState {
            config: Arc::new(AppConfig::default()),
            pipeline,
            sessions,
            retriever,
            metrics: None,
        }
    }

    async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> Response {
        let builder = axum::http::Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        app.oneshot(request).await.unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = send(create_router(test_state()), Method::GET, "/health", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        assert_eq!(json_body(response).await["status"], "healthy");
    }

    #[tokio::test]
    async fn test_ready_reports_backend_and_corpus() {
        let response = send(create_router(test_state()), Method::GET, "/ready", None).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["status"], "ready");
        assert_eq!(body["checks"]["persistence"]["status"], "up");
        assert_eq!(body["corpus_chunks"], 0);
    }

    #[tokio::test]
    async fn test_metrics_disabled() {
        let response = send(create_router(test_state()), Method::GET, "/metrics", None).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_chat_refuses_on_empty_corpus() {
        let response = send(
            create_router(test_state()),
            Method::POST,
            "/v1/chat",
            Some(json!({"user_input": "What color is the sun?"})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["response"], REFUSAL_MESSAGE);
        assert_eq!(body["used_retrieval"], false);
        assert!(body["session_id"].as_str().unwrap().starts_with("user_anonymous_"));
    }

    #[tokio::test]
    async fn test_chat_rejects_blank_input() {
        let response = send(
            create_router(test_state()),
            Method::POST,
            "/v1/chat",
            Some(json!({"user_input": "   "})),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_session_lifecycle() {
        let state = test_state();

        let created = send(
            create_router(state.clone()),
            Method::POST,
            "/v1/sessions",
            Some(json!({"user_hint": "Ana"})),
        )
        .await;
        assert_eq!(created.status(), StatusCode::CREATED);
        let session_id = json_body(created).await["session_id"]
            .as_str()
            .unwrap()
            .to_string();
        assert!(session_id.starts_with("user_ana_"));

        let chat = send(
            create_router(state.clone()),
            Method::POST,
            "/v1/chat",
            Some(json!({"user_input": "hello", "session_id": session_id})),
        )
        .await;
        assert_eq!(chat.status(), StatusCode::OK);

        let fetched = send(
            create_router(state),
            Method::GET,
            &format!("/v1/sessions/{}", session_id),
            None,
        )
        .await;
        assert_eq!(fetched.status(), StatusCode::OK);

        let body = json_body(fetched).await;
        assert_eq!(body["turn_count"], 2);
        assert_eq!(body["turns"][0]["role"], "user");
        assert_eq!(body["turns"][0]["text"], "hello");
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let response = send(
            create_router(test_state()),
            Method::GET,
            "/v1/sessions/nobody",
            None,
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
