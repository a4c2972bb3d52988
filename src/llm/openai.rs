//! OpenAI-compatible chat completions client.
//!
//! Works against any provider exposing `/chat/completions` in the OpenAI
//! format (the default base URL is Gemini's compatibility endpoint).

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::error::LlmError;
use super::{
    AssistantBody, AssistantMessage, FinishReason, LlmClient, Message, MessageContent, Role,
    ToolCall, ToolDefinition,
};

/// Chat completions client.
pub struct OpenAiClient {
    client: Client,
    api_base: String,
    api_key: String,
}

impl OpenAiClient {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.into(),
            api_key: api_key.into(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.api_base.trim_end_matches('/'))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
}

/// A message as it travels over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct WireMessage {
    role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

impl From<&Message> for WireMessage {
    fn from(message: &Message) -> Self {
        let mut wire = WireMessage {
            role: message.role(),
            content: None,
            tool_calls: None,
            tool_call_id: None,
            name: None,
        };
        match message {
            Message::System { content } => wire.content = Some(MessageContent::text(content)),
            Message::User { content } => wire.content = Some(content.clone()),
            Message::Assistant(turn) => match &turn.body {
                AssistantBody::Text(content) => wire.content = Some(content.clone()),
                AssistantBody::ToolCalls { content, calls } => {
                    wire.content = content.clone();
                    wire.tool_calls = Some(calls.clone());
                }
            },
            Message::ToolResult {
                tool_call_id,
                name,
                content,
            } => {
                wire.content = Some(MessageContent::text(content));
                wire.tool_call_id = Some(tool_call_id.clone());
                wire.name = Some(name.clone());
            }
        }
        wire
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

/// Decode a single choice into the assistant turn the agent works with.
fn decode_choice(choice: Choice) -> AssistantMessage {
    let calls = choice.message.tool_calls.unwrap_or_default();
    let finish_reason = match choice.finish_reason.as_deref() {
        Some(raw) => FinishReason::parse(raw),
        None if !calls.is_empty() => FinishReason::ToolCalls,
        None => FinishReason::Stop,
    };

    let body = if calls.is_empty() {
        AssistantBody::Text(choice.message.content.unwrap_or_default())
    } else {
        AssistantBody::ToolCalls {
            content: choice.message.content,
            calls,
        }
    };

    AssistantMessage {
        body,
        finish_reason,
    }
}

fn decode_body(body: &str) -> Result<AssistantMessage, LlmError> {
    let parsed: ChatResponse = serde_json::from_str(body).map_err(|e| {
        LlmError::parse_error(format!(
            "Failed to parse response: {}, body: {}",
            e,
            body.chars().take(500).collect::<String>()
        ))
    })?;

    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| LlmError::parse_error("No choices in response".to_string()))?;

    Ok(decode_choice(choice))
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn chat_completion(
        &self,
        model: &str,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<AssistantMessage, LlmError> {
        let request = ChatRequest {
            model,
            messages: messages.iter().map(WireMessage::from).collect(),
            tools: tools.filter(|t| !t.is_empty()),
        };

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::network_error(format!("Request timeout: {}", e))
                } else if e.is_connect() {
                    LlmError::network_error(format!("Connection failed: {}", e))
                } else {
                    LlmError::network_error(format!("Request failed: {}", e))
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| LlmError::network_error(format!("Failed to read body: {}", e)))?;

        if !status.is_success() {
            return Err(LlmError::from_status(status.as_u16(), body));
        }

        let turn = decode_body(&body)?;
        tracing::debug!(
            finish_reason = ?turn.finish_reason,
            tool_calls = turn.calls().len(),
            "Decoded model response"
        );
        Ok(turn)
    }
}
