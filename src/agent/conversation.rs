//! Conversation history and the bounded view sent to the model.

use crate::llm::{AssistantMessage, Message};

/// Messages at the head of every conversation that trimming never evicts:
/// the operating instructions and the starting task URL.
pub const PINNED_PREFIX: usize = 2;

/// Append-only conversation history, seeded with the system prompt and task URL.
#[derive(Debug, Clone)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn seed(system_prompt: impl Into<String>, task_url: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_prompt), Message::user(task_url)],
        }
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The most recent assistant turn, if the last message is one.
    pub fn last_assistant(&self) -> Option<&AssistantMessage> {
        match self.messages.last() {
            Some(Message::Assistant(turn)) => Some(turn),
            _ => None,
        }
    }
}

/// A transient, budget-bounded view over a conversation.
#[derive(Debug, Clone)]
pub struct ContextView {
    pub messages: Vec<Message>,
    /// Messages after the pinned prefix that were left out
    pub dropped: usize,
    /// Whether a URL reminder was appended because no human message survived
    pub reminder_injected: bool,
}

pub fn reminder_message(current_url: &str) -> Message {
    Message::user(format!(
        "Context cleared due to length. Continue processing URL: {}",
        current_url
    ))
}

/// Build the view of `history` that fits in `token_limit`.
///
/// The pinned prefix is always kept. Of the remaining messages, the longest
/// suffix that fits the leftover budget is kept, then cut forward to begin at
/// a human-authored message. If a cut leaves no human-authored message in the
/// tail, a reminder naming `current_url` is appended to the view.
pub fn trim_context(history: &[Message], token_limit: usize, current_url: &str) -> ContextView {
    let pinned = history.len().min(PINNED_PREFIX);
    let (prefix, tail) = history.split_at(pinned);

    let prefix_tokens: usize = prefix.iter().map(Message::estimated_tokens).sum();
    let mut remaining = token_limit.saturating_sub(prefix_tokens);

    let mut start = tail.len();
    for (idx, message) in tail.iter().enumerate().rev() {
        let cost = message.estimated_tokens();
        if cost > remaining {
            break;
        }
        remaining -= cost;
        start = idx;
    }

    if start == 0 {
        return ContextView {
            messages: history.to_vec(),
            dropped: 0,
            reminder_injected: false,
        };
    }

    let aligned = tail[start..]
        .iter()
        .position(Message::is_human)
        .map(|offset| start + offset)
        .unwrap_or(tail.len());

    let mut messages = Vec::with_capacity(pinned + tail.len() - aligned + 1);
    messages.extend_from_slice(prefix);
    messages.extend_from_slice(&tail[aligned..]);

    let reminder_injected = !tail[aligned..].iter().any(Message::is_human);
    if reminder_injected {
        messages.push(reminder_message(current_url));
    }

    ContextView {
        messages,
        dropped: aligned,
        reminder_injected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolCall;
    use serde_json::json;

    fn tool_round(id: usize, payload_chars: usize) -> Vec<Message> {
        vec![
            Message::Assistant(AssistantMessage::tool_calls(vec![ToolCall::new(
                format!("call_{}", id),
                "get_rendered_html",
                json!({ "url": "http://x/q1" }),
            )])),
            Message::tool_result(format!("call_{}", id), "get_rendered_html", "x".repeat(payload_chars)),
        ]
    }

    fn seeded() -> Conversation {
        Conversation::seed("You are a solver.", "http://x/q1")
    }

    #[test]
    fn everything_fits_returns_full_history() {
        let mut conv = seeded();
        for m in tool_round(0, 100) {
            conv.push(m);
        }
        let view = trim_context(conv.messages(), 60_000, "http://x/q1");
        assert_eq!(view.messages, conv.messages());
        assert_eq!(view.dropped, 0);
        assert!(!view.reminder_injected);
    }

    #[test]
    fn pinned_prefix_survives_heavy_trimming() {
        let mut conv = seeded();
        for i in 0..20 {
            for m in tool_round(i, 4_000) {
                conv.push(m);
            }
        }
        let view = trim_context(conv.messages(), 2_000, "http://x/q3");
        assert_eq!(view.messages[0], conv.messages()[0]);
        assert_eq!(view.messages[1], conv.messages()[1]);
    }

    #[test]
    fn dropping_all_human_messages_adds_one_reminder() {
        let mut conv = seeded();
        for i in 0..10 {
            for m in tool_round(i, 4_000) {
                conv.push(m);
            }
        }
        let before = conv.clone();

        let view = trim_context(conv.messages(), 3_000, "http://x/q7");

        assert!(view.reminder_injected);
        let reminders: Vec<_> = view
            .messages
            .iter()
            .filter(|m| **m == reminder_message("http://x/q7"))
            .collect();
        assert_eq!(reminders.len(), 1);
        assert_eq!(view.messages.last(), Some(&reminder_message("http://x/q7")));
        assert_eq!(conv.messages(), before.messages());
    }

    #[test]
    fn cut_aligns_to_human_message() {
        let mut conv = seeded();
        for i in 0..5 {
            for m in tool_round(i, 4_000) {
                conv.push(m);
            }
        }
        conv.push(Message::user("SYSTEM ERROR: retry"));
        for m in tool_round(99, 400) {
            conv.push(m);
        }

        let view = trim_context(conv.messages(), 1_500, "http://x/q1");

        assert!(!view.reminder_injected);
        assert_eq!(view.messages.len(), 2 + 3);
        assert_eq!(view.messages[2], Message::user("SYSTEM ERROR: retry"));
    }

    #[test]
    fn last_assistant_only_reports_trailing_turn() {
        let mut conv = seeded();
        assert!(conv.last_assistant().is_none());
        conv.push(Message::Assistant(AssistantMessage::text("END")));
        assert_eq!(conv.last_assistant().unwrap().flatten_text(), "END");
        conv.push(Message::user("more"));
        assert!(conv.last_assistant().is_none());
    }
}
