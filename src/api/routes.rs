//! HTTP route handlers.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::agent::{Agent, RunContext};
use crate::config::Config;

use super::types::{HealthResponse, SolveRequest, SolveResponse};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    /// The agent that runs accepted solve requests
    pub agent: Arc<Agent>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: Config, agent: Agent) -> Self {
        Self {
            config,
            agent: Arc::new(agent),
            started_at: Instant::now(),
        }
    }
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/solve", post(solve))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let agent = Agent::new(config.clone());
    let state = Arc::new(AppState::new(config.clone(), agent));
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

/// Health check endpoint.
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

/// Accept a task chain and solve it in the background.
async fn solve(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<SolveResponse>, (StatusCode, String)> {
    let request = SolveRequest::from_body(&body)
        .and_then(SolveRequest::validate)
        .map_err(|msg| (StatusCode::BAD_REQUEST, msg))?;

    if request.secret != state.config.secret {
        tracing::warn!(url = %request.url, "Rejected solve request with bad secret");
        return Err((StatusCode::FORBIDDEN, "Invalid secret".to_string()));
    }

    let run = RunContext::start(&request.url).await;
    let run_id = run.run_id;
    tracing::info!(run_id = %run_id, url = %request.url, "Accepted solve request");

    let agent = Arc::clone(&state.agent);
    tokio::spawn(async move {
        match agent.run(run).await {
            Ok(summary) => tracing::info!(
                run_id = %summary.run_id,
                steps = summary.agent_steps,
                "Task chain completed"
            ),
            Err(e) => tracing::error!(run_id = %run_id, "Task chain failed: {}", e),
        }
    });

    Ok(Json(SolveResponse {
        status: "ok".to_string(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::AssistantMessage;
    use crate::test_support::{serve_router, ScriptedClient};
    use serde_json::{json, Value};
    use std::time::Duration;

    async fn spawn_app(client: Arc<ScriptedClient>) -> (String, tempfile::TempDir) {
        let workspace = tempfile::tempdir().unwrap();
        let config = Config::new("key".into(), "s3cret".into(), workspace.path().to_path_buf());
        let agent = Agent::with_client(config.clone(), client);
        let base = serve_router(router(Arc::new(AppState::new(config, agent)))).await;
        (base, workspace)
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (base, _ws) = spawn_app(ScriptedClient::new(vec![])).await;
        let resp = reqwest::get(format!("{}/healthz", base)).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: HealthResponse = resp.json().await.unwrap();
        assert_eq!(body.status, "ok");
    }

    #[tokio::test]
    async fn valid_request_is_acknowledged_and_run_in_background() {
        let client = ScriptedClient::new(vec![AssistantMessage::text("END")]);
        let (base, _ws) = spawn_app(client.clone()).await;

        let resp = reqwest::Client::new()
            .post(format!("{}/solve", base))
            .json(&json!({"url": "http://x/q1", "secret": "s3cret"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body, json!({"status": "ok"}));

        for _ in 0..50 {
            if client.call_count() > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn wrong_secret_is_forbidden() {
        let client = ScriptedClient::new(vec![]);
        let (base, _ws) = spawn_app(client.clone()).await;

        let resp = reqwest::Client::new()
            .post(format!("{}/solve", base))
            .json(&json!({"url": "http://x/q1", "secret": "nope"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 403);
        assert_eq!(resp.text().await.unwrap(), "Invalid secret");
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn malformed_or_incomplete_body_is_bad_request() {
        let (base, _ws) = spawn_app(ScriptedClient::new(vec![])).await;
        let http = reqwest::Client::new();

        let resp = http
            .post(format!("{}/solve", base))
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        assert_eq!(resp.text().await.unwrap(), "Invalid JSON");

        let resp = http
            .post(format!("{}/solve", base))
            .json(&json!({"secret": "s3cret"}))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        assert!(resp.text().await.unwrap().contains("url"));
    }

    #[tokio::test]
    async fn positional_array_body_starts_no_run() {
        let client = ScriptedClient::new(vec![]);
        let (base, _ws) = spawn_app(client.clone()).await;

        let resp = reqwest::Client::new()
            .post(format!("{}/solve", base))
            .json(&json!(["http://x/q1", "s3cret"]))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        assert_eq!(resp.text().await.unwrap(), "Invalid JSON");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(client.call_count(), 0);
    }
}
