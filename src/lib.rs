//! # Taskchain
//!
//! An autonomous agent that solves chains of web-hosted tasks.
//!
//! This library provides:
//! - An HTTP API that accepts a starting task URL and solves it in the background
//! - A control loop that routes model turns to tools, repair, or completion
//! - A rate-limited gateway to an OpenAI-compatible model endpoint
//!
//! ## Architecture
//!
//! Each run follows the "tools in a loop" pattern:
//! 1. Seed the conversation with the system prompt and the task URL
//! 2. Call the model with a trimmed view of the conversation
//! 3. Execute requested tool calls and feed the results back
//! 4. Submitting an answer may yield the next task URL; repeat until the model says `END`
//!
//! ## Example
//!
//! ```rust,ignore
//! use taskchain::{agent::{Agent, RunContext}, config::Config};
//!
//! let config = Config::from_env()?;
//! let agent = Agent::new(config);
//! let summary = agent.run(RunContext::start("https://quiz.example.com/q1").await).await?;
//! ```

pub mod agent;
pub mod api;
pub mod config;
pub mod llm;
pub mod tools;

#[cfg(test)]
mod test_support;

pub use config::Config;
