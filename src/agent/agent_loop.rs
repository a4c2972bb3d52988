//! Core agent loop implementation.
//!
//! After every model turn the loop routes on the latest assistant message:
//! malformed calls go to repair, tool calls are executed, a bare `END`
//! finishes the run, and anything else goes back to the model.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::Config;
use crate::llm::{AssistantMessage, FinishReason, LlmClient, LlmError, Message, ModelGateway, OpenAiClient};
use crate::tools::{ToolContext, ToolRegistry};

use super::context::RunContext;
use super::conversation::{trim_context, Conversation};
use super::prompt::{build_system_prompt, timeout_instruction, REPAIR_INSTRUCTION};

/// Literal the model replies with once there is nothing left to solve.
const END_TOKEN: &str = "END";

/// States of the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Node {
    Agent,
    Tools,
    Repair,
    Done,
}

/// Decide where to go after an assistant turn.
pub fn route(turn: &AssistantMessage) -> Node {
    if turn.finish_reason == FinishReason::MalformedFunctionCall {
        Node::Repair
    } else if !turn.calls().is_empty() {
        Node::Tools
    } else if turn.flatten_text().trim() == END_TOKEN {
        Node::Done
    } else {
        Node::Agent
    }
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("model gateway failed: {0}")]
    Gateway(#[from] LlmError),

    #[error("iteration limit of {0} reached without completion")]
    IterationLimit(usize),

    #[error("model produced {0} malformed function calls in a row")]
    MalformedStreak(usize),
}

/// Outcome of a run that reached `END`.
#[derive(Debug)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub agent_steps: usize,
    pub repairs: usize,
    /// Agent steps that went through the timeout override
    pub overrides: usize,
    pub conversation: Conversation,
}

/// The autonomous agent.
pub struct Agent {
    config: Config,
    gateway: ModelGateway,
    tools: ToolRegistry,
    llm: Arc<dyn LlmClient>,
    http: reqwest::Client,
}

impl Agent {
    /// Create a new agent with the given configuration.
    pub fn new(config: Config) -> Self {
        let llm = Arc::new(OpenAiClient::new(
            config.api_base.clone(),
            config.api_key.clone(),
        ));
        Self::with_client(config, llm)
    }

    /// Create an agent over an arbitrary model client.
    pub fn with_client(config: Config, llm: Arc<dyn LlmClient>) -> Self {
        Self::with_parts(config, llm, ToolRegistry::new())
    }

    pub fn with_parts(config: Config, llm: Arc<dyn LlmClient>, tools: ToolRegistry) -> Self {
        let gateway = ModelGateway::new(
            llm.clone(),
            config.default_model.clone(),
            tools.definitions(),
            &config.rate_limit,
        );
        Self {
            config,
            gateway,
            tools,
            llm,
            http: reqwest::Client::new(),
        }
    }

    /// Drive one run from its seed URL until the model says `END`.
    pub async fn run(&self, run: Arc<RunContext>) -> Result<RunSummary, AgentError> {
        let limits = &self.config.limits;
        let system_prompt = build_system_prompt(&self.config.email, &self.config.secret, &self.tools);
        let mut conversation = Conversation::seed(system_prompt, run.seed_url.clone());

        if let Err(e) = tokio::fs::create_dir_all(&self.config.workspace_path).await {
            tracing::warn!(
                path = %self.config.workspace_path.display(),
                error = %e,
                "Could not create workspace directory"
            );
        }
        let tool_ctx = ToolContext {
            workspace: self.config.workspace_path.clone(),
            run: run.clone(),
            llm: self.llm.clone(),
            limiter: self.gateway.limiter(),
            model: self.gateway.model().to_string(),
            code_timeout: self.config.code_timeout,
            http: self.http.clone(),
        };

        let mut agent_steps = 0usize;
        let mut repairs = 0usize;
        let mut overrides = 0usize;
        let mut malformed_streak = 0usize;
        let mut node = Node::Agent;

        tracing::info!(run_id = %run.run_id, url = %run.seed_url, "Run started");

        loop {
            node = match node {
                Node::Agent => {
                    if agent_steps >= limits.max_iterations {
                        tracing::error!(run_id = %run.run_id, steps = agent_steps, "Iteration limit reached");
                        return Err(AgentError::IterationLimit(limits.max_iterations));
                    }
                    agent_steps += 1;
                    tracing::debug!(run_id = %run.run_id, step = agent_steps, "Agent step");

                    let turn = self.agent_step(&run, &conversation, &mut overrides).await?;
                    let next = route(&turn);
                    conversation.push(Message::Assistant(turn));

                    if next == Node::Repair {
                        malformed_streak += 1;
                        if malformed_streak > limits.max_malformed_retries {
                            return Err(AgentError::MalformedStreak(malformed_streak));
                        }
                    } else {
                        malformed_streak = 0;
                    }
                    next
                }
                Node::Tools => {
                    let calls = conversation
                        .last_assistant()
                        .map(|turn| turn.calls().to_vec())
                        .unwrap_or_default();
                    for result in self.tools.invoke_all(&calls, &tool_ctx).await {
                        conversation.push(result);
                    }
                    Node::Agent
                }
                Node::Repair => {
                    repairs += 1;
                    tracing::warn!(run_id = %run.run_id, streak = malformed_streak, "Malformed function call, asking model to retry");
                    conversation.push(Message::user(REPAIR_INSTRUCTION));
                    Node::Agent
                }
                Node::Done => break,
            };
        }

        tracing::info!(
            run_id = %run.run_id,
            steps = agent_steps,
            repairs,
            overrides,
            "Run finished"
        );

        Ok(RunSummary {
            run_id: run.run_id,
            agent_steps,
            repairs,
            overrides,
            conversation,
        })
    }

    /// One model turn: deadline override or trimmed invocation.
    async fn agent_step(
        &self,
        run: &RunContext,
        conversation: &Conversation,
        overrides: &mut usize,
    ) -> Result<AssistantMessage, LlmError> {
        let current_url = run.current_url().await;

        if let Some(overrun) = run.deadline_status(Utc::now(), &self.config.limits).await {
            *overrides += 1;
            tracing::warn!(run_id = %run.run_id, url = %current_url, ?overrun, "Time limit exceeded, forcing submission");

            let mut messages = conversation.messages().to_vec();
            messages.push(Message::user(timeout_instruction(&overrun, &current_url)));
            return self.gateway.invoke(&messages).await;
        }

        let view = trim_context(conversation.messages(), self.config.limits.token_limit, &current_url);
        if view.dropped > 0 {
            tracing::debug!(
                run_id = %run.run_id,
                dropped = view.dropped,
                kept = view.messages.len(),
                "Trimmed conversation"
            );
        }
        if view.reminder_injected {
            tracing::warn!(run_id = %run.run_id, url = %current_url, "Context cleared, reminding model of current URL");
        }
        self.gateway.invoke(&view.messages).await
    }
}
