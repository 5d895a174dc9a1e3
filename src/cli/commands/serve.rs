//! HTTP API server for integration with other systems.
//!
//! Provides a streaming chat endpoint plus REST endpoints for search and
//! document management.

use crate::agent::{event_channel, Outcome};
use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::error::SyllabiError;
use crate::orchestrator::Orchestrator;
use axum::{
    extract::State,
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

/// Shared application state.
struct AppState {
    orchestrator: Orchestrator,
}

/// Run the HTTP API server.
pub async fn run_serve(host: Option<String>, port: Option<u16>, settings: Settings) -> anyhow::Result<()> {
    if let Err(e) = preflight::check(Operation::Chat) {
        Output::error(&format!("{}", e));
        return Err(e.into());
    }

    let host = host.unwrap_or_else(|| settings.server.host.clone());
    let port = port.unwrap_or(settings.server.port);

    let state = Arc::new(AppState {
        orchestrator: Orchestrator::new(settings)?,
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat))
        .route("/search", post(search))
        .route("/documents", get(list_documents).post(upload_document))
        .route("/stats", get(stats))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state.clone());

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    Output::header("Syllabi API Server");
    println!();
    Output::success(&format!("Listening on http://{}", addr));
    println!();
    println!("Endpoints:");
    Output::kv("Health", "GET  /health");
    Output::kv("Chat (SSE)", "POST /chat");
    Output::kv("Search", "POST /search");
    Output::kv("Upload", "POST /documents");
    Output::kv("List", "GET  /documents");
    Output::kv("Stats", "GET  /stats");
    println!();
    Output::info("Press Ctrl+C to stop the server.");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped, flushing index");
    state.orchestrator.shutdown().await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

// === Request/Response Types ===

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    /// Chat model to use instead of the configured one
    #[serde(default)]
    model: Option<String>,
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Serialize)]
struct SearchResponse {
    results: Vec<SearchResult>,
}

#[derive(Serialize)]
struct SearchResult {
    source: String,
    filename: String,
    position: u32,
    content: String,
    score: f32,
}

#[derive(Deserialize)]
struct UploadRequest {
    /// File or directory on the server's filesystem
    path: String,
}

#[derive(Serialize)]
struct UploadResponse {
    documents: Vec<UploadOutcome>,
}

#[derive(Serialize)]
struct UploadOutcome {
    path: String,
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    chunks_indexed: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn status_for(e: &SyllabiError) -> StatusCode {
    match e {
        SyllabiError::FileNotFound(_) => StatusCode::NOT_FOUND,
        SyllabiError::UnsupportedFile(_) | SyllabiError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(e: SyllabiError) -> Response {
    (
        status_for(&e),
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
        .into_response()
}

// === Handlers ===

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Run the agent and stream its events. Closing the connection cancels the run.
async fn chat(State(state): State<Arc<AppState>>, Json(req): Json<ChatRequest>) -> Response {
    let agent = match req.model.as_deref() {
        Some(model) => match state.orchestrator.agent_with_model(model) {
            Ok(agent) => agent,
            Err(e) => return error_response(e),
        },
        None => state.orchestrator.agent(),
    };

    let message = req.message;
    let (sink, mut rx) = event_channel();
    tokio::spawn(async move {
        let run = agent.run(&message, &sink).await;
        match run.outcome {
            Outcome::Cancelled => info!("Chat stream closed by client after {} turns", run.turns),
            _ => debug!("Chat run finished after {} turns", run.turns),
        }
    });

    let stream = async_stream::stream! {
        while let Some(event) = rx.recv().await {
            match Event::default().event(event.event_name()).json_data(&event) {
                Ok(sse) => yield Ok::<Event, Infallible>(sse),
                Err(e) => error!("Failed to serialize SSE event: {e}"),
            }
        }
    };

    Sse::new(stream)
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn search(State(state): State<Arc<AppState>>, Json(req): Json<SearchRequest>) -> Response {
    let settings = &state.orchestrator.settings().search;
    let limit = req
        .limit
        .unwrap_or(settings.default_results)
        .min(settings.max_results);

    let embedding = match state.orchestrator.embedder().embed(&req.query).await {
        Ok(embedding) => embedding,
        Err(e) => return error_response(e),
    };

    match state.orchestrator.index().search(&embedding, limit).await {
        Ok(hits) => Json(SearchResponse {
            results: hits
                .into_iter()
                .map(|hit| SearchResult {
                    filename: hit.chunk.filename().to_string(),
                    source: hit.chunk.source,
                    position: hit.chunk.position,
                    content: hit.chunk.content,
                    score: hit.score,
                })
                .collect(),
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn upload_document(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UploadRequest>,
) -> Response {
    let path = PathBuf::from(shellexpand::tilde(&req.path).to_string());

    match state.orchestrator.ingest_path(&path).await {
        Ok(outcomes) => Json(UploadResponse {
            documents: outcomes
                .into_iter()
                .map(|(path, outcome)| match outcome {
                    Ok(report) => UploadOutcome {
                        path: report.source,
                        success: true,
                        chunks_indexed: Some(report.chunks_indexed),
                        error: None,
                    },
                    Err(e) => UploadOutcome {
                        path: path.display().to_string(),
                        success: false,
                        chunks_indexed: None,
                        error: Some(e.to_string()),
                    },
                })
                .collect(),
        })
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn list_documents(State(state): State<Arc<AppState>>) -> Response {
    match state.orchestrator.index().list_files().await {
        Ok(files) => Json(serde_json::json!({
            "total": files.len(),
            "files": files,
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}

async fn stats(State(state): State<Arc<AppState>>) -> Response {
    let index = state.orchestrator.index();
    match index.stats().await {
        Ok(stats) => Json(serde_json::json!({
            "chunk_count": stats.chunk_count,
            "file_count": stats.file_count,
            "backend": index.backend(),
        }))
        .into_response(),
        Err(e) => error_response(e),
    }
}
