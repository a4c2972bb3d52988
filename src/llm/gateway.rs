//! Model gateway: a rate-limited client bound to one model and tool manifest.

use std::sync::Arc;

use super::{AssistantMessage, LlmClient, LlmError, Message, RateLimiter, ToolDefinition};
use crate::config::RateLimitConfig;

pub struct ModelGateway {
    client: Arc<dyn LlmClient>,
    model: String,
    tools: Vec<ToolDefinition>,
    limiter: Arc<RateLimiter>,
}

impl ModelGateway {
    pub fn new(
        client: Arc<dyn LlmClient>,
        model: impl Into<String>,
        tools: Vec<ToolDefinition>,
        rate_limit: &RateLimitConfig,
    ) -> Self {
        Self {
            client,
            model: model.into(),
            tools,
            limiter: Arc::new(RateLimiter::new(rate_limit.requests, rate_limit.period)),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// The outbound budget, for other callers of the same model endpoint.
    pub fn limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.limiter)
    }

    /// Produce one assistant turn for `messages`.
    ///
    /// Blocks while the outbound budget is exhausted. Failures are returned
    /// as-is; there is no retry at this layer.
    pub async fn invoke(&self, messages: &[Message]) -> Result<AssistantMessage, LlmError> {
        self.limiter.acquire().await;
        tracing::debug!(
            model = %self.model,
            messages = messages.len(),
            "Invoking model"
        );
        self.client
            .chat_completion(&self.model, messages, Some(&self.tools))
            .await
    }
}
