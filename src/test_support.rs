//! Helpers shared by unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use tempfile::TempDir;

use crate::agent::RunContext;
use crate::llm::{AssistantMessage, LlmClient, LlmError, Message, RateLimiter, ToolDefinition};
use crate::tools::ToolContext;

enum Script {
    /// Replay these in order, then answer `END`.
    Queue(VecDeque<Result<AssistantMessage, LlmError>>),
    /// Answer the same turn forever.
    Repeat(AssistantMessage),
}

/// An `LlmClient` that replays canned turns and records every request.
pub struct ScriptedClient {
    script: Mutex<Script>,
    requests: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedClient {
    pub fn new(turns: Vec<AssistantMessage>) -> Arc<Self> {
        Self::with_results(turns.into_iter().map(Ok).collect())
    }

    pub fn with_results(results: Vec<Result<AssistantMessage, LlmError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Script::Queue(results.into())),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn repeating(turn: AssistantMessage) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(Script::Repeat(turn)),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn chat_completion(
        &self,
        _model: &str,
        messages: &[Message],
        _tools: Option<&[ToolDefinition]>,
    ) -> Result<AssistantMessage, LlmError> {
        self.requests.lock().unwrap().push(messages.to_vec());
        match &mut *self.script.lock().unwrap() {
            Script::Queue(queue) => queue
                .pop_front()
                .unwrap_or_else(|| Ok(AssistantMessage::text("END"))),
            Script::Repeat(turn) => Ok(turn.clone()),
        }
    }
}

/// A tool context over a temporary workspace; the directory lives as long as this value.
pub struct TestToolContext {
    pub ctx: ToolContext,
    _workspace: TempDir,
}

pub async fn tool_context(client: Arc<ScriptedClient>) -> TestToolContext {
    let workspace = tempfile::tempdir().unwrap();
    let ctx = ToolContext {
        workspace: workspace.path().to_path_buf(),
        run: RunContext::start("http://x/q1").await,
        llm: client,
        limiter: Arc::new(RateLimiter::new(1000, Duration::from_secs(1))),
        model: "test-model".to_string(),
        code_timeout: Duration::from_secs(30),
        http: reqwest::Client::new(),
    };
    TestToolContext {
        ctx,
        _workspace: workspace,
    }
}

/// Serve `router` on an ephemeral local port and return its base URL.
pub async fn serve_router(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}
