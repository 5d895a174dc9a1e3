//! Events streamed to the caller while an agent run is in progress.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

/// Why a run ended without a final answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The model provider failed or returned an unusable response.
    Provider,
    /// The model kept requesting tools past the configured turn limit.
    TurnLimitExceeded,
    /// Tool calls and tool results no longer pair up.
    Protocol,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::Provider => "provider",
            ErrorKind::TurnLimitExceeded => "turn_limit_exceeded",
            ErrorKind::Protocol => "protocol",
        };
        write!(f, "{}", name)
    }
}

/// A structured event emitted by an agent run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Incremental answer text.
    TextDelta { text: String },
    ToolCallStarted {
        call_id: String,
        name: String,
        arguments: String,
    },
    ToolCallFinished {
        call_id: String,
        name: String,
        success: bool,
    },
    /// The complete answer. Always the last event of a successful run.
    FinalAnswer { text: String },
    /// Terminal failure. Always the last event of a failed run.
    Error { kind: ErrorKind, message: String },
}

impl AgentEvent {
    /// Event name used for SSE framing.
    pub fn event_name(&self) -> &'static str {
        match self {
            AgentEvent::TextDelta { .. } => "text_delta",
            AgentEvent::ToolCallStarted { .. } => "tool_call_started",
            AgentEvent::ToolCallFinished { .. } => "tool_call_finished",
            AgentEvent::FinalAnswer { .. } => "final_answer",
            AgentEvent::Error { .. } => "error",
        }
    }
}

/// Sending half of an agent event stream.
///
/// Dropping the receiving half is how a caller cancels a run.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<AgentEvent>,
}

/// Create a connected event sink and receiver.
pub fn event_channel() -> (EventSink, mpsc::UnboundedReceiver<AgentEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink { tx }, rx)
}

impl EventSink {
    /// Deliver an event. Returns false when nobody is listening any more.
    pub fn emit(&self, event: AgentEvent) -> bool {
        match self.tx.send(event) {
            Ok(()) => true,
            Err(e) => {
                trace!("Dropping {} event, receiver is gone", e.0.event_name());
                false
            }
        }
    }

    /// Whether the caller has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the caller has gone away.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}
