//! Tool system for the agent.
//!
//! Tools are the agent's only way to touch the outside world: rendering task
//! pages, downloading files, submitting answers, running code, and decoding
//! media. Every tool failure is turned into error text for the model; nothing
//! raised by a tool escapes [`ToolRegistry::invoke`].

mod browser;
mod code;
mod download;
mod http;
mod media;

pub use browser::RenderPage;
pub use code::{AddDependencies, RunCode};
pub use download::DownloadFile;
pub use http::PostRequest;
pub use media::{EncodeImageToBase64, OcrImage, TranscribeAudio};

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use serde_json::Value;

use crate::agent::RunContext;
use crate::llm::{FunctionDefinition, LlmClient, Message, RateLimiter, ToolCall, ToolDefinition};

/// Resolve a path relative to the workspace; absolute paths are used as-is.
pub fn resolve_path(path_str: &str, workspace: &Path) -> PathBuf {
    let path = Path::new(path_str);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}

/// Everything a tool may need while serving one run.
#[derive(Clone)]
pub struct ToolContext {
    /// Directory for downloads and code execution
    pub workspace: PathBuf,
    pub run: Arc<RunContext>,
    /// Model client used by tools that delegate to the model (transcription)
    pub llm: Arc<dyn LlmClient>,
    /// Budget shared with the model gateway
    pub limiter: Arc<RateLimiter>,
    pub model: String,
    pub code_timeout: Duration,
    pub http: reqwest::Client,
}

/// Information about a tool for display purposes.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

/// Trait for implementing tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// A description of what this tool does.
    fn description(&self) -> &str;

    /// JSON schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Execute the tool with the given arguments.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<String>;
}

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a new registry with the full tool manifest.
    pub fn new() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(RunCode));
        registry.register(Arc::new(RenderPage));
        registry.register(Arc::new(DownloadFile));
        registry.register(Arc::new(PostRequest));
        registry.register(Arc::new(AddDependencies));
        registry.register(Arc::new(OcrImage));
        registry.register(Arc::new(TranscribeAudio));
        registry.register(Arc::new(EncodeImageToBase64));
        registry
    }

    /// Create an empty registry (no built-in tools).
    pub fn empty() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// List all tools, sorted by name.
    pub fn list_tools(&self) -> Vec<ToolInfo> {
        let mut infos: Vec<ToolInfo> = self
            .tools
            .values()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
            })
            .collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Tool manifest to bind to the model.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| {
                let tool = &self.tools[name];
                ToolDefinition {
                    tool_type: "function".to_string(),
                    function: FunctionDefinition {
                        name: tool.name().to_string(),
                        description: tool.description().to_string(),
                        parameters: tool.parameters_schema(),
                    },
                }
            })
            .collect()
    }

    /// Execute a tool by name.
    pub async fn execute(&self, name: &str, args: Value, ctx: &ToolContext) -> anyhow::Result<String> {
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown tool: {}", name))?;

        AssertUnwindSafe(tool.execute(args, ctx))
            .catch_unwind()
            .await
            .map_err(|_| anyhow::anyhow!("Tool '{}' panicked", name))?
    }

    /// Run one requested call and wrap the outcome as a tool-role message.
    pub async fn invoke(&self, call: &ToolCall, ctx: &ToolContext) -> Message {
        let name = call.function.name.as_str();
        let raw_args = call.function.arguments.trim();

        let result = if raw_args.is_empty() {
            self.execute(name, Value::Object(Default::default()), ctx).await
        } else {
            match serde_json::from_str::<Value>(raw_args) {
                Ok(args) => self.execute(name, args, ctx).await,
                Err(e) => Err(anyhow::anyhow!("Invalid JSON arguments: {}", e)),
            }
        };

        let content = match result {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "Tool call failed");
                format!("Error: {}", e)
            }
        };

        Message::tool_result(call.id.clone(), name, content)
    }

    /// Run every call concurrently; results come back in request order.
    pub async fn invoke_all(&self, calls: &[ToolCall], ctx: &ToolContext) -> Vec<Message> {
        join_all(calls.iter().map(|call| {
            tracing::info!(tool = %call.function.name, args = %truncate(&call.function.arguments, 300), "Calling tool");
            self.invoke(call, ctx)
        }))
        .await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Pull a required string argument.
pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> anyhow::Result<&'a str> {
    args[key]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("Missing '{}' argument", key))
}

/// Truncate to at most `max_len` bytes on a char boundary, marking the cut.
pub(crate) fn truncate(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{tool_context, ScriptedClient};
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echo the text argument"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {"text": {"type": "string"}}})
        }
        async fn execute(&self, args: Value, _ctx: &ToolContext) -> anyhow::Result<String> {
            Ok(required_str(&args, "text")?.to_string())
        }
    }

    struct Exploding;

    #[async_trait]
    impl Tool for Exploding {
        fn name(&self) -> &str {
            "explode"
        }
        fn description(&self) -> &str {
            "Always panics"
        }
        fn parameters_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> anyhow::Result<String> {
            panic!("boom");
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::empty();
        registry.register(Arc::new(Echo));
        registry.register(Arc::new(Exploding));
        registry
    }

    #[test]
    fn default_manifest_has_all_capabilities() {
        let names: Vec<String> = ToolRegistry::new()
            .definitions()
            .into_iter()
            .map(|d| d.function.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "add_dependencies",
                "download_file",
                "encode_image_to_base64",
                "get_rendered_html",
                "ocr_image_tool",
                "post_request",
                "run_code",
                "transcribe_audio",
            ]
        );
    }

    #[tokio::test]
    async fn results_keep_request_order() {
        let ctx = tool_context(ScriptedClient::new(vec![])).await;
        let calls = vec![
            ToolCall::new("a", "echo", json!({"text": "first"})),
            ToolCall::new("b", "echo", json!({"text": "second"})),
        ];
        let results = registry().invoke_all(&calls, &ctx.ctx).await;
        assert_eq!(results[0], Message::tool_result("a", "echo", "first"));
        assert_eq!(results[1], Message::tool_result("b", "echo", "second"));
    }

    #[tokio::test]
    async fn failures_become_error_text() {
        let ctx = tool_context(ScriptedClient::new(vec![])).await;
        let calls = vec![
            ToolCall::new("a", "missing_tool", json!({})),
            ToolCall::new("b", "echo", json!({})),
            ToolCall::new("c", "explode", json!({})),
            ToolCall {
                id: "d".into(),
                call_type: "function".into(),
                function: crate::llm::FunctionCall {
                    name: "echo".into(),
                    arguments: "{not json".into(),
                },
            },
        ];
        let results = registry().invoke_all(&calls, &ctx.ctx).await;
        for (message, expected) in results.iter().zip([
            "Unknown tool",
            "Missing 'text'",
            "panicked",
            "Invalid JSON arguments",
        ]) {
            match message {
                Message::ToolResult { content, .. } => {
                    assert!(content.starts_with("Error: "), "{}", content);
                    assert!(content.contains(expected), "{}", content);
                }
                other => panic!("unexpected message {:?}", other),
            }
        }
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let s = "é".repeat(10);
        let out = truncate(&s, 5);
        assert!(out.ends_with("... [truncated]"));
        assert!(out.starts_with("éé"));
    }
}
