//! Prompt templates for the agent.

use super::context::Overrun;
use crate::tools::ToolRegistry;

/// Sent after a malformed function call.
pub const REPAIR_INSTRUCTION: &str = "SYSTEM ERROR: Your last tool call was malformed (invalid JSON). Rewrite the call and try again. Make sure newlines and quotes inside JSON strings are escaped correctly.";

/// Build the system prompt with tool definitions and submission identity.
pub fn build_system_prompt(email: &str, secret: &str, tools: &ToolRegistry) -> String {
    let tool_descriptions = tools
        .list_tools()
        .iter()
        .map(|t| format!("- **{}**: {}", t.name, t.description))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"You are an autonomous task-solving agent.

Your job is to:
1. Load each task page from the given URL.
2. Extract the instructions, parameters, and submission endpoint.
3. Solve the task exactly.
4. Submit the answer ONLY to the endpoint the page names.
5. Follow any new URL returned by the submission response, until none remain. Then reply with exactly: END

## Tools

{tool_descriptions}

## Rules

- To get the base64 of an image, NEVER write your own code; always use the encode_image_to_base64 tool.
- Never invent URLs or fields. Never shorten endpoints.
- Always read the server's response to a submission.
- Never stop early.
- Use tools for HTML, downloading, rendering, OCR, transcription, or running code.
- Include in every submission:
    email = {email}
    secret = {secret}"#,
        tool_descriptions = tool_descriptions,
        email = email,
        secret = secret,
    )
}

/// Instruction injected when the current page has run out of time.
pub fn timeout_instruction(overrun: &Overrun, current_url: &str) -> String {
    let why = match overrun {
        Overrun::TaskTimeLimit { elapsed } => {
            format!("over {} seconds on this task", elapsed.as_secs())
        }
        Overrun::RetryWindow { since_offset } => format!(
            "{} seconds since your last rejected answer",
            since_offset.as_secs()
        ),
    };
    format!(
        "You have exceeded the time limit for this task ({why}). Immediately call the `post_request` tool and submit a WRONG answer for the CURRENT task ({current_url}) so that you receive the next URL.",
    )
}
