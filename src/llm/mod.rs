//! LLM client module for interacting with language models.
//!
//! Conversation messages are modeled as a tagged union ([`Message`]). Provider
//! responses are decoded into an [`AssistantMessage`] exactly once, inside the
//! client, so the control loop never inspects raw wire shapes.

mod error;
mod gateway;
mod openai;
mod rate_limit;

pub use error::{classify_http_status, LlmError, LlmErrorKind};
pub use gateway::ModelGateway;
pub use openai::OpenAiClient;
pub use rate_limit::RateLimiter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Role in a chat conversation (wire representation).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Content part for multimodal messages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
    InputAudio { input_audio: InputAudio },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ImageUrl {
    pub url: String,
}

/// Inline audio payload (base64 data + container format, e.g. "mp3").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputAudio {
    pub data: String,
    pub format: String,
}

impl ContentPart {
    pub fn text(text: impl Into<String>) -> Self {
        ContentPart::Text { text: text.into() }
    }
}

/// Message content - either plain text or a list of parts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    pub fn text(text: impl Into<String>) -> Self {
        MessageContent::Text(text.into())
    }

    /// All text carried by this content, with parts concatenated in order.
    pub fn flatten_text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join(""),
        }
    }

    /// Rough payload size in characters, used for token estimation.
    fn char_len(&self) -> usize {
        match self {
            MessageContent::Text(s) => s.len(),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    ContentPart::Text { text } => text.len(),
                    ContentPart::ImageUrl { image_url } => image_url.url.len(),
                    ContentPart::InputAudio { input_audio } => input_audio.data.len(),
                })
                .sum(),
        }
    }
}

impl Default for MessageContent {
    fn default() -> Self {
        MessageContent::Text(String::new())
    }
}

/// A tool call requested by the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "default_call_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn default_call_type() -> String {
    "function".to_string()
}

/// Function call details.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    /// Arguments as a JSON string. May be empty for no-argument functions.
    #[serde(default)]
    pub arguments: String,
}

impl ToolCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            call_type: default_call_type(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.to_string(),
            },
        }
    }
}

/// Tool definition for the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

/// Function definition with schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Why the model stopped generating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinishReason {
    Stop,
    ToolCalls,
    Length,
    MalformedFunctionCall,
    ContentFilter,
    Other(String),
}

impl FinishReason {
    /// Decode a provider finish reason. Matching is case-insensitive.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "stop" | "end_turn" => FinishReason::Stop,
            "tool_calls" | "function_call" | "tool_use" => FinishReason::ToolCalls,
            "length" | "max_tokens" => FinishReason::Length,
            "malformed_function_call" => FinishReason::MalformedFunctionCall,
            "content_filter" | "safety" => FinishReason::ContentFilter,
            _ => FinishReason::Other(raw.to_string()),
        }
    }
}

/// Body of an assistant turn.
#[derive(Debug, Clone, PartialEq)]
pub enum AssistantBody {
    Text(MessageContent),
    ToolCalls {
        content: Option<MessageContent>,
        calls: Vec<ToolCall>,
    },
}

/// A decoded model response.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantMessage {
    pub body: AssistantBody,
    pub finish_reason: FinishReason,
}

impl AssistantMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            body: AssistantBody::Text(MessageContent::text(content)),
            finish_reason: FinishReason::Stop,
        }
    }

    pub fn tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            body: AssistantBody::ToolCalls {
                content: None,
                calls,
            },
            finish_reason: FinishReason::ToolCalls,
        }
    }

    pub fn with_finish_reason(mut self, finish_reason: FinishReason) -> Self {
        self.finish_reason = finish_reason;
        self
    }

    pub fn content(&self) -> Option<&MessageContent> {
        match &self.body {
            AssistantBody::Text(content) => Some(content),
            AssistantBody::ToolCalls { content, .. } => content.as_ref(),
        }
    }

    pub fn calls(&self) -> &[ToolCall] {
        match &self.body {
            AssistantBody::Text(_) => &[],
            AssistantBody::ToolCalls { calls, .. } => calls,
        }
    }

    /// Flattened text of the turn (empty when there is none).
    pub fn flatten_text(&self) -> String {
        self.content().map(|c| c.flatten_text()).unwrap_or_default()
    }
}

/// A message in the conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: MessageContent,
    },
    Assistant(AssistantMessage),
    ToolResult {
        tool_call_id: String,
        name: String,
        content: String,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: MessageContent::text(content),
        }
    }

    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Message::ToolResult {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Message::System { .. } => Role::System,
            Message::User { .. } => Role::User,
            Message::Assistant(_) => Role::Assistant,
            Message::ToolResult { .. } => Role::Tool,
        }
    }

    /// Whether the message was authored on the human side of the conversation.
    pub fn is_human(&self) -> bool {
        matches!(self, Message::User { .. })
    }

    /// Estimate tokens for this message (rough: 4 chars per token, plus framing).
    pub fn estimated_tokens(&self) -> usize {
        let chars = match self {
            Message::System { content } => content.len(),
            Message::User { content } => content.char_len(),
            Message::Assistant(turn) => {
                turn.content().map(|c| c.char_len()).unwrap_or(0)
                    + turn
                        .calls()
                        .iter()
                        .map(|c| c.function.name.len() + c.function.arguments.len())
                        .sum::<usize>()
            }
            Message::ToolResult { content, name, .. } => content.len() + name.len(),
        };
        (chars + 3) / 4 + 4
    }
}

/// Trait for LLM clients.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a chat completion request and decode the single response turn.
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<AssistantMessage, LlmError>;
}
