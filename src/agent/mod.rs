//! Agent module - the control loop that solves a chain of task pages.
//!
//! A run works like this:
//! 1. Seed the conversation with the system prompt and the task URL
//! 2. Call the model through the rate-limited gateway, over a trimmed view
//!    of the conversation (or with a forced-submission instruction once
//!    the page's time is up)
//! 3. Execute requested tool calls, or repair a malformed call
//! 4. Repeat until the model answers `END` or the iteration ceiling is hit

mod agent_loop;
mod context;
mod conversation;
mod prompt;

pub use agent_loop::{route, Agent, AgentError, Node, RunSummary};
pub use context::{check_deadline, Base64Store, Overrun, RunContext, TimingStore};
pub use conversation::{reminder_message, trim_context, ContextView, Conversation, PINNED_PREFIX};
pub use prompt::{build_system_prompt, timeout_instruction, REPAIR_INSTRUCTION};
