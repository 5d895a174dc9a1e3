//! Streaming OpenAI chat completions.

use super::conversation::{Message, ToolCallRequest};
use super::model::{ChatModel, ModelChunk, ModelStream};
use super::tools::ToolSchema;
use crate::error::{Result, SyllabiError};
use crate::openai::create_client;
use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs, ChatCompletionTool,
    ChatCompletionToolType, CreateChatCompletionRequestArgs, FunctionCall, FunctionObject,
};
use async_trait::async_trait;
use futures::StreamExt;
use std::collections::BTreeMap;
use tracing::{debug, instrument};

/// OpenAI-backed chat model.
pub struct OpenAIChatModel {
    client: async_openai::Client<async_openai::config::OpenAIConfig>,
    model: String,
    temperature: Option<f32>,
}

impl OpenAIChatModel {
    pub fn new(model: &str) -> Result<Self> {
        Ok(Self {
            client: create_client()?,
            model: model.to_string(),
            temperature: None,
        })
    }

    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl ChatModel for OpenAIChatModel {
    #[instrument(skip(self, messages, tools), fields(model = %self.model, messages = messages.len()))]
    async fn stream(&self, messages: &[Message], tools: &[ToolSchema]) -> Result<ModelStream> {
        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&self.model).messages(to_request_messages(messages)?);
        if !tools.is_empty() {
            args.tools(tools.iter().map(to_openai_tool).collect::<Vec<_>>());
        }
        if let Some(temperature) = self.temperature {
            args.temperature(temperature);
        }
        let request = args
            .build()
            .map_err(|e| SyllabiError::Agent(format!("Failed to build request: {}", e)))?;

        let mut upstream = self
            .client
            .chat()
            .create_stream(request)
            .await
            .map_err(|e| SyllabiError::OpenAI(format!("Chat API error: {}", e)))?;

        let stream = async_stream::try_stream! {
            let mut calls = ToolCallAccumulator::default();

            while let Some(item) = upstream.next().await {
                let response = item
                    .map_err(|e| SyllabiError::OpenAI(format!("Chat stream error: {}", e)))?;

                for choice in response.choices {
                    if let Some(text) = choice.delta.content {
                        if !text.is_empty() {
                            yield ModelChunk::TextDelta(text);
                        }
                    }
                    for fragment in choice.delta.tool_calls.unwrap_or_default() {
                        let (name, arguments) = match fragment.function {
                            Some(f) => (f.name, f.arguments),
                            None => (None, None),
                        };
                        calls.push(fragment.index, fragment.id, name, arguments);
                    }
                }
            }

            let requests = calls.finish()?;
            if !requests.is_empty() {
                debug!("Model requested {} tool calls", requests.len());
                yield ModelChunk::ToolCalls(requests);
            }
        };

        Ok(Box::pin(stream))
    }

    fn name(&self) -> &str {
        &self.model
    }
}

fn to_openai_tool(schema: &ToolSchema) -> ChatCompletionTool {
    ChatCompletionTool {
        r#type: ChatCompletionToolType::Function,
        function: FunctionObject {
            name: schema.name.clone(),
            description: Some(schema.description.clone()),
            parameters: Some(schema.parameters.clone()),
            strict: None,
        },
    }
}

fn to_request_messages(messages: &[Message]) -> Result<Vec<ChatCompletionRequestMessage>> {
    messages.iter().map(to_request_message).collect()
}

fn to_request_message(message: &Message) -> Result<ChatCompletionRequestMessage> {
    let build_err = |e: async_openai::error::OpenAIError| SyllabiError::Agent(e.to_string());

    let message = match message {
        Message::System { content } => ChatCompletionRequestSystemMessageArgs::default()
            .content(content.clone())
            .build()
            .map_err(build_err)?
            .into(),
        Message::User { content } => ChatCompletionRequestUserMessageArgs::default()
            .content(content.clone())
            .build()
            .map_err(build_err)?
            .into(),
        Message::Assistant {
            content,
            tool_calls,
        } => {
            let mut args = ChatCompletionRequestAssistantMessageArgs::default();
            if let Some(content) = content {
                args.content(content.clone());
            }
            if !tool_calls.is_empty() {
                args.tool_calls(
                    tool_calls
                        .iter()
                        .map(|call| ChatCompletionMessageToolCall {
                            id: call.id.clone(),
                            r#type: ChatCompletionToolType::Function,
                            function: FunctionCall {
                                name: call.name.clone(),
                                arguments: call.arguments.clone(),
                            },
                        })
                        .collect::<Vec<_>>(),
                );
            }
            args.build().map_err(build_err)?.into()
        }
        Message::Tool { result } => ChatCompletionRequestToolMessageArgs::default()
            .tool_call_id(result.call_id.clone())
            .content(result.content())
            .build()
            .map_err(build_err)?
            .into(),
    };

    Ok(message)
}

/// Reassembles tool calls that arrive split across stream chunks.
#[derive(Debug, Default)]
struct ToolCallAccumulator {
    calls: BTreeMap<u32, PartialCall>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl ToolCallAccumulator {
    fn push(
        &mut self,
        index: u32,
        id: Option<String>,
        name: Option<String>,
        arguments: Option<String>,
    ) {
        let call = self.calls.entry(index).or_default();
        if let Some(id) = id.filter(|id| !id.is_empty()) {
            call.id.get_or_insert(id);
        }
        if let Some(name) = name {
            call.name.push_str(&name);
        }
        if let Some(arguments) = arguments {
            call.arguments.push_str(&arguments);
        }
    }

    /// Finished calls in stream index order.
    fn finish(self) -> Result<Vec<ToolCallRequest>> {
        self.calls
            .into_iter()
            .map(|(index, call)| {
                let id = call.id.ok_or_else(|| {
                    SyllabiError::OpenAI(format!("Tool call {} arrived without an id", index))
                })?;
                if call.name.is_empty() {
                    return Err(SyllabiError::OpenAI(format!(
                        "Tool call {} arrived without a name",
                        id
                    )));
                }
                let arguments = if call.arguments.trim().is_empty() {
                    "{}".to_string()
                } else {
                    call.arguments
                };
                Ok(ToolCallRequest {
                    id,
                    name: call.name,
                    arguments,
                })
            })
            .collect()
    }
}
