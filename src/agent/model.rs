//! Chat model abstraction used by the agent loop.

use super::conversation::{Message, ToolCallRequest};
use super::tools::ToolSchema;
use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// One piece of a streamed model response.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelChunk {
    /// Answer text, delivered as it is generated.
    TextDelta(String),
    /// Fully assembled tool call requests.
    ToolCalls(Vec<ToolCallRequest>),
}

/// A streamed model response. Errors terminate the response.
pub type ModelStream = BoxStream<'static, Result<ModelChunk>>;

/// Trait for chat completion backends.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Start a completion over the full history, offering the given tools.
    async fn stream(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<ModelStream>;

    /// Model name, for logging.
    fn name(&self) -> &str;
}
