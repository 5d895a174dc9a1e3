//! Tool-calling agent over the syllabus index.
//!
//! A run alternates between streaming a model response and executing the
//! tool calls it asks for, until the model answers in plain text, a failure
//! ends the run, or the caller stops listening.

mod conversation;
mod events;
mod model;
mod openai_chat;
mod runner;
mod tools;

#[cfg(test)]
pub(crate) mod testing;

pub use conversation::{Conversation, Message, ProtocolViolation, ToolCallRequest, ToolResult};
pub use events::{event_channel, AgentEvent, ErrorKind, EventSink};
pub use model::{ChatModel, ModelChunk, ModelStream};
pub use openai_chat::OpenAIChatModel;
pub use runner::{Agent, AgentRun, Outcome, ToolCallRecord};
pub use tools::{ToolCall, ToolError, ToolRegistry, ToolSchema};
