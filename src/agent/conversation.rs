//! Conversation history for one agent run.
//!
//! Messages are only ever appended. Every tool call an assistant message
//! carries must be answered by exactly one tool result, with the same
//! correlation ID, before the next non-tool message.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// Correlation ID assigned by the model provider.
    pub id: String,
    /// Tool name.
    pub name: String,
    /// Raw JSON arguments as produced by the model.
    pub arguments: String,
}

impl ToolCallRequest {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments: arguments.into(),
        }
    }
}

/// Outcome of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Correlation ID of the request this answers.
    pub call_id: String,
    /// Tool name, echoed for logging and display.
    pub name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    /// A successful result carrying `payload`.
    pub fn ok(request: &ToolCallRequest, payload: Value) -> Self {
        Self {
            call_id: request.id.clone(),
            name: request.name.clone(),
            success: true,
            payload: Some(payload),
            error: None,
        }
    }

    /// A failed result carrying an error description.
    pub fn failed(request: &ToolCallRequest, error: impl Into<String>) -> Self {
        Self {
            call_id: request.id.clone(),
            name: request.name.clone(),
            success: false,
            payload: None,
            error: Some(error.into()),
        }
    }

    /// Text handed back to the model as the tool message content.
    pub fn content(&self) -> String {
        match (&self.payload, &self.error) {
            (Some(payload), _) if self.success => payload.to_string(),
            (_, error) => json!({
                "success": false,
                "error": error.as_deref().unwrap_or("unknown error"),
            })
            .to_string(),
        }
    }
}

/// A conversation message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCallRequest>,
    },
    Tool {
        result: ToolResult,
    },
}

/// Broken pairing between tool calls and tool results.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    #[error("tool call {0} was not answered")]
    Unanswered(String),

    #[error("tool result {0} does not match an outstanding tool call")]
    Unexpected(String),
}

/// Ordered, append-only message history.
#[derive(Debug, Clone, Default)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a conversation with a system prompt.
    pub fn with_system(prompt: impl Into<String>) -> Self {
        let mut conversation = Self::new();
        conversation.push(Message::System {
            content: prompt.into(),
        });
        conversation
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.push(Message::User {
            content: content.into(),
        });
    }

    pub fn push_assistant(&mut self, content: Option<String>, tool_calls: Vec<ToolCallRequest>) {
        self.push(Message::Assistant {
            content,
            tool_calls,
        });
    }

    pub fn push_tool_result(&mut self, result: ToolResult) {
        self.push(Message::Tool { result });
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Drop everything except leading system messages.
    pub fn clear_history(&mut self) {
        let keep = self.leading_system_count();
        self.messages.truncate(keep);
    }

    /// Drop the oldest exchanges until at most `max_messages` remain.
    ///
    /// Leading system messages are always kept and the retained history
    /// always restarts at a user message, so no tool result is orphaned.
    pub fn trim_to(&mut self, max_messages: usize) {
        if self.messages.len() <= max_messages {
            return;
        }

        let keep = self.leading_system_count();
        let mut cut = keep + (self.messages.len() - max_messages.max(keep));
        while cut < self.messages.len() && !matches!(self.messages[cut], Message::User { .. }) {
            cut += 1;
        }
        self.messages.drain(keep..cut);
    }

    fn leading_system_count(&self) -> usize {
        self.messages
            .iter()
            .take_while(|m| matches!(m, Message::System { .. }))
            .count()
    }

    /// Check that every tool call is answered exactly once, in its own block.
    pub fn verify_tool_results(&self) -> Result<(), ProtocolViolation> {
        let mut outstanding: Option<Vec<&str>> = None;

        for message in &self.messages {
            match message {
                Message::Tool { result } => {
                    let pending = outstanding
                        .as_mut()
                        .ok_or_else(|| ProtocolViolation::Unexpected(result.call_id.clone()))?;
                    match pending.iter().position(|id| *id == result.call_id) {
                        Some(i) => {
                            pending.remove(i);
                        }
                        None => return Err(ProtocolViolation::Unexpected(result.call_id.clone())),
                    }
                }
                other => {
                    if let Some(id) = outstanding.as_ref().and_then(|p| p.first()) {
                        return Err(ProtocolViolation::Unanswered(id.to_string()));
                    }
                    outstanding = match other {
                        Message::Assistant { tool_calls, .. } if !tool_calls.is_empty() => {
                            Some(tool_calls.iter().map(|c| c.id.as_str()).collect())
                        }
                        _ => None,
                    };
                }
            }
        }

        match outstanding.as_ref().and_then(|p| p.first()) {
            Some(id) => Err(ProtocolViolation::Unanswered(id.to_string())),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str) -> ToolCallRequest {
        ToolCallRequest::new(id, "get_index_stats", "{}")
    }

    #[test]
    fn test_matched_results_verify() {
        let mut conversation = Conversation::with_system("sys");
        conversation.push_user("hi");
        conversation.push_assistant(None, vec![call("a"), call("b")]);
        conversation.push_tool_result(ToolResult::ok(&call("a"), json!({})));
        conversation.push_tool_result(ToolResult::ok(&call("b"), json!({})));
        conversation.push_assistant(Some("done".to_string()), vec![]);

        assert_eq!(conversation.verify_tool_results(), Ok(()));
    }

    #[test]
    fn test_unanswered_call_is_violation() {
        let mut conversation = Conversation::new();
        conversation.push_user("hi");
        conversation.push_assistant(None, vec![call("a"), call("b")]);
        conversation.push_tool_result(ToolResult::ok(&call("a"), json!({})));

        assert_eq!(
            conversation.verify_tool_results(),
            Err(ProtocolViolation::Unanswered("b".to_string()))
        );
    }

    #[test]
    fn test_duplicate_or_stray_result_is_violation() {
        let mut conversation = Conversation::new();
        conversation.push_assistant(None, vec![call("a")]);
        conversation.push_tool_result(ToolResult::ok(&call("a"), json!({})));
        conversation.push_tool_result(ToolResult::ok(&call("a"), json!({})));
        assert_eq!(
            conversation.verify_tool_results(),
            Err(ProtocolViolation::Unexpected("a".to_string()))
        );

        let mut stray = Conversation::new();
        stray.push_user("hi");
        stray.push_tool_result(ToolResult::ok(&call("z"), json!({})));
        assert!(stray.verify_tool_results().is_err());
    }

    #[test]
    fn test_failed_result_content() {
        let result = ToolResult::failed(&call("a"), "File not found: x.pdf");
        let content: Value = serde_json::from_str(&result.content()).unwrap();
        assert_eq!(content["success"], false);
        assert_eq!(content["error"], "File not found: x.pdf");

        let ok = ToolResult::ok(&call("a"), json!({"file_count": 2}));
        assert_eq!(ok.content(), r#"{"file_count":2}"#);
    }

    #[test]
    fn test_trim_keeps_system_and_whole_exchanges() {
        let mut conversation = Conversation::with_system("sys");
        conversation.push_user("q1");
        conversation.push_assistant(None, vec![call("a")]);
        conversation.push_tool_result(ToolResult::ok(&call("a"), json!({})));
        conversation.push_assistant(Some("a1".to_string()), vec![]);
        conversation.push_user("q2");
        conversation.push_assistant(Some("a2".to_string()), vec![]);

        conversation.trim_to(4);

        assert_eq!(conversation.messages().len(), 3);
        assert!(matches!(conversation.messages()[0], Message::System { .. }));
        assert_eq!(
            conversation.messages()[1],
            Message::User {
                content: "q2".to_string()
            }
        );
        assert_eq!(conversation.verify_tool_results(), Ok(()));
    }

    #[test]
    fn test_clear_history_keeps_system_prompt() {
        let mut conversation = Conversation::with_system("sys");
        conversation.push_user("q1");
        conversation.clear_history();
        assert_eq!(conversation.messages().len(), 1);
    }

    #[test]
    fn test_message_serialization_tags_role() {
        let value = serde_json::to_value(Message::User {
            content: "hi".to_string(),
        })
        .unwrap();
        assert_eq!(value, json!({"role": "user", "content": "hi"}));
    }
}
