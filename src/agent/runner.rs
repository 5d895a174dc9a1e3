//! Agent runner with a streaming tool calling loop.

use super::conversation::{Conversation, ToolCallRequest, ToolResult};
use super::events::{AgentEvent, ErrorKind, EventSink};
use super::model::{ChatModel, ModelChunk};
use super::tools::{ToolRegistry, ToolSchema};
use crate::config::AgentPrompts;
use crate::error::SyllabiError;
use futures::future::join_all;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Agent that answers questions using the syllabus tools.
pub struct Agent {
    model: Arc<dyn ChatModel>,
    tools: Arc<ToolRegistry>,
    max_turns: usize,
    system_prompt: String,
    empty_message_reply: String,
}

/// Where the loop is between steps.
#[derive(Debug)]
enum LoopState {
    AwaitModel,
    ExecuteTools(Vec<ToolCallRequest>),
    Done(String),
    Failed(ErrorKind, String),
    Cancelled,
}

/// What one model request produced.
enum ModelStep {
    Answer(String),
    ToolCalls {
        text: Option<String>,
        calls: Vec<ToolCallRequest>,
    },
    Failed(SyllabiError),
    Cancelled,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Answered(String),
    Failed { kind: ErrorKind, message: String },
    /// The caller stopped listening.
    Cancelled,
}

/// Summary of a finished run.
#[derive(Debug)]
pub struct AgentRun {
    pub outcome: Outcome,
    /// Tool phases executed.
    pub turns: usize,
    /// Record of all tool calls made during execution.
    pub tool_calls: Vec<ToolCallRecord>,
}

impl AgentRun {
    pub fn answer(&self) -> Option<&str> {
        match &self.outcome {
            Outcome::Answered(text) => Some(text),
            _ => None,
        }
    }
}

/// Record of a tool call made by the agent.
#[derive(Debug, Clone)]
pub struct ToolCallRecord {
    pub name: String,
    pub arguments: String,
    pub success: bool,
}

impl std::fmt::Display for ToolCallRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name, self.arguments)?;
        if !self.success {
            write!(f, " [failed]")?;
        }
        Ok(())
    }
}

impl Agent {
    /// Create a new agent with the given model and tools.
    pub fn new(model: Arc<dyn ChatModel>, tools: Arc<ToolRegistry>) -> Self {
        let prompts = AgentPrompts::default();
        Self {
            model,
            tools,
            max_turns: 8,
            system_prompt: prompts.system,
            empty_message_reply: prompts.empty_message_reply,
        }
    }

    /// Set a custom system prompt.
    pub fn with_system_prompt(mut self, prompt: &str) -> Self {
        self.system_prompt = prompt.to_string();
        self
    }

    /// Set the reply used for empty user messages.
    pub fn with_empty_message_reply(mut self, reply: &str) -> Self {
        self.empty_message_reply = reply.to_string();
        self
    }

    /// Set the maximum number of tool phases per run.
    pub fn with_max_turns(mut self, max: usize) -> Self {
        self.max_turns = max;
        self
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Answer a single user message, streaming progress into `sink`.
    pub async fn run(&self, user_message: &str, sink: &EventSink) -> AgentRun {
        let mut conversation = Conversation::with_system(self.system_prompt.clone());
        conversation.push_user(user_message);
        self.run_conversation(&mut conversation, sink).await
    }

    /// Continue a conversation whose last message is from the user.
    ///
    /// Each tool phase is appended together with all of its results, and stays
    /// appended if a later model request fails or the turn limit is reached.
    /// An assistant message is never left without its tool results, so the
    /// conversation stays valid for follow-up questions whatever the outcome.
    #[instrument(skip_all, fields(model = %self.model.name(), max_turns = self.max_turns))]
    pub async fn run_conversation(
        &self,
        conversation: &mut Conversation,
        sink: &EventSink,
    ) -> AgentRun {
        let mut turns = 0;
        let mut tool_calls = Vec::new();

        if last_user_message_is_blank(conversation) {
            debug!("Empty user message, replying without the model");
            let reply = self.empty_message_reply.clone();
            sink.emit(AgentEvent::TextDelta {
                text: reply.clone(),
            });
            conversation.push_assistant(Some(reply.clone()), Vec::new());
            sink.emit(AgentEvent::FinalAnswer {
                text: reply.clone(),
            });
            return AgentRun {
                outcome: Outcome::Answered(reply),
                turns,
                tool_calls,
            };
        }

        let schemas = self.tools.describe_all();
        let mut state = LoopState::AwaitModel;

        loop {
            state = match state {
                LoopState::AwaitModel => {
                    if let Err(violation) = conversation.verify_tool_results() {
                        LoopState::Failed(ErrorKind::Protocol, violation.to_string())
                    } else if sink.is_closed() {
                        LoopState::Cancelled
                    } else {
                        match self.request_model(conversation, &schemas, sink).await {
                            ModelStep::Answer(text) => {
                                conversation.push_assistant(Some(text.clone()), Vec::new());
                                LoopState::Done(text)
                            }
                            ModelStep::ToolCalls { text, calls } => {
                                if turns >= self.max_turns {
                                    LoopState::Failed(
                                        ErrorKind::TurnLimitExceeded,
                                        format!(
                                            "Agent exceeded maximum tool turns ({})",
                                            self.max_turns
                                        ),
                                    )
                                } else {
                                    turns += 1;
                                    conversation.push_assistant(text, calls.clone());
                                    LoopState::ExecuteTools(calls)
                                }
                            }
                            ModelStep::Failed(e) => {
                                LoopState::Failed(ErrorKind::Provider, e.to_string())
                            }
                            ModelStep::Cancelled => LoopState::Cancelled,
                        }
                    }
                }
                LoopState::ExecuteTools(calls) => {
                    debug!("Tool phase {} with {} calls", turns, calls.len());
                    let results = self.execute_tools(&calls, sink).await;
                    for (call, result) in calls.iter().zip(results) {
                        tool_calls.push(ToolCallRecord {
                            name: call.name.clone(),
                            arguments: call.arguments.clone(),
                            success: result.success,
                        });
                        conversation.push_tool_result(result);
                    }
                    LoopState::AwaitModel
                }
                LoopState::Done(text) => {
                    info!("Agent answered after {} tool turns", turns);
                    sink.emit(AgentEvent::FinalAnswer { text: text.clone() });
                    return AgentRun {
                        outcome: Outcome::Answered(text),
                        turns,
                        tool_calls,
                    };
                }
                LoopState::Failed(kind, message) => {
                    warn!("Agent run failed ({}): {}", kind, message);
                    sink.emit(AgentEvent::Error {
                        kind,
                        message: message.clone(),
                    });
                    return AgentRun {
                        outcome: Outcome::Failed { kind, message },
                        turns,
                        tool_calls,
                    };
                }
                LoopState::Cancelled => {
                    info!("Agent run cancelled after {} tool turns", turns);
                    return AgentRun {
                        outcome: Outcome::Cancelled,
                        turns,
                        tool_calls,
                    };
                }
            };
        }
    }

    /// Stream one model response, forwarding text as it arrives.
    async fn request_model(
        &self,
        conversation: &Conversation,
        schemas: &[ToolSchema],
        sink: &EventSink,
    ) -> ModelStep {
        let started = tokio::select! {
            biased;
            _ = sink.closed() => return ModelStep::Cancelled,
            started = self.model.stream(conversation.messages(), schemas) => started,
        };
        let mut stream = match started {
            Ok(stream) => stream,
            Err(e) => return ModelStep::Failed(e),
        };

        let mut text = String::new();
        let mut calls = Vec::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = sink.closed() => return ModelStep::Cancelled,
                next = stream.next() => next,
            };

            match next {
                Some(Ok(ModelChunk::TextDelta(delta))) => {
                    text.push_str(&delta);
                    sink.emit(AgentEvent::TextDelta { text: delta });
                }
                Some(Ok(ModelChunk::ToolCalls(mut requested))) => calls.append(&mut requested),
                Some(Err(e)) => return ModelStep::Failed(e),
                None => break,
            }
        }

        if calls.is_empty() {
            ModelStep::Answer(text)
        } else {
            ModelStep::ToolCalls {
                text: (!text.is_empty()).then_some(text),
                calls,
            }
        }
    }

    /// Run one phase of tool calls concurrently. Results come back in request order.
    async fn execute_tools(&self, calls: &[ToolCallRequest], sink: &EventSink) -> Vec<ToolResult> {
        for call in calls {
            sink.emit(AgentEvent::ToolCallStarted {
                call_id: call.id.clone(),
                name: call.name.clone(),
                arguments: call.arguments.clone(),
            });
        }

        let results = join_all(calls.iter().map(|call| self.tools.invoke(call))).await;

        for result in &results {
            sink.emit(AgentEvent::ToolCallFinished {
                call_id: result.call_id.clone(),
                name: result.name.clone(),
                success: result.success,
            });
        }

        results
    }
}

fn last_user_message_is_blank(conversation: &Conversation) -> bool {
    use super::conversation::Message;

    matches!(
        conversation.messages().last(),
        Some(Message::User { content }) if content.trim().is_empty()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::conversation::Message;
    use crate::agent::events::event_channel;
    use crate::agent::testing::{
        drain, registry, ClosingEmbedder, DelayedEmbedder, FailingIndex, KeywordEmbedder,
        ScriptedModel,
    };
    use crate::index::{DocumentIndex, MemoryIndex};
    use crate::ingest::Ingestor;
    use std::time::Duration;

    fn call(id: &str, name: &str, arguments: &str) -> ToolCallRequest {
        ToolCallRequest::new(id, name, arguments)
    }

    async fn seeded_index() -> Arc<MemoryIndex> {
        let index = Arc::new(MemoryIndex::new());
        Ingestor::new(
            index.clone(),
            Arc::new(KeywordEmbedder::default()),
            &Default::default(),
        )
        .ingest_text(
            "/syllabi/cs101.md",
            "CS 101 prerequisites: none. Intro to programming in Python.",
        )
        .await
        .unwrap();
        index
    }

    #[test]
    fn test_tool_call_record_display() {
        let record = ToolCallRecord {
            name: "search_syllabi".to_string(),
            arguments: r#"{"query": "test"}"#.to_string(),
            success: true,
        };
        assert_eq!(format!("{}", record), r#"search_syllabi({"query": "test"})"#);
    }

    #[tokio::test]
    async fn test_search_then_answer_event_order() {
        let index = seeded_index().await;
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptedModel::tool_calls(vec![call(
                "call_1",
                "search_syllabi",
                r#"{"query": "CS 101 prerequisites"}"#,
            )]),
            ScriptedModel::text(&["CS 101 has ", "no prerequisites."]),
        ]));
        let agent = Agent::new(
            model.clone(),
            Arc::new(registry(index, Arc::new(KeywordEmbedder::default()))),
        );

        let (sink, mut rx) = event_channel();
        let run = agent.run("What are the prerequisites for CS 101?", &sink).await;
        drop(sink);
        let events = drain(&mut rx).await;

        assert_eq!(run.answer(), Some("CS 101 has no prerequisites."));
        assert_eq!(run.turns, 1);
        assert_eq!(model.calls(), 2);

        assert!(matches!(
            &events[0],
            AgentEvent::ToolCallStarted { name, .. } if name == "search_syllabi"
        ));
        assert!(matches!(
            &events[1],
            AgentEvent::ToolCallFinished { success: true, .. }
        ));
        let deltas: Vec<&AgentEvent> = events[2..events.len() - 1].iter().collect();
        assert!(!deltas.is_empty());
        assert!(deltas
            .iter()
            .all(|e| matches!(e, AgentEvent::TextDelta { .. })));
        assert_eq!(
            events.last(),
            Some(&AgentEvent::FinalAnswer {
                text: "CS 101 has no prerequisites.".to_string()
            })
        );

        // The second request saw the search result for the first call
        let seen = model.seen();
        let second = &seen[1];
        assert!(matches!(
            second.last(),
            Some(Message::Tool { result }) if result.call_id == "call_1" && result.success
        ));
    }

    #[tokio::test]
    async fn test_every_call_gets_exactly_one_result() {
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptedModel::tool_calls(vec![
                call("a", "get_index_stats", "{}"),
                call("b", "list_indexed_files", "{}"),
                call("c", "no_such_tool", "{}"),
            ]),
            ScriptedModel::text(&["done"]),
        ]));
        let agent = Agent::new(
            model.clone(),
            Arc::new(registry(
                Arc::new(MemoryIndex::new()),
                Arc::new(KeywordEmbedder::default()),
            )),
        );

        let mut conversation = Conversation::with_system(agent.system_prompt().to_string());
        conversation.push_user("what do you have?");
        let (sink, _rx) = event_channel();
        let run = agent.run_conversation(&mut conversation, &sink).await;

        assert_eq!(run.answer(), Some("done"));
        assert_eq!(conversation.verify_tool_results(), Ok(()));

        let result_ids: Vec<&str> = conversation
            .messages()
            .iter()
            .filter_map(|m| match m {
                Message::Tool { result } => Some(result.call_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(result_ids, vec!["a", "b", "c"]);

        let successes: Vec<bool> = run.tool_calls.iter().map(|r| r.success).collect();
        assert_eq!(successes, vec![true, true, false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tools_run_concurrently_and_keep_request_order() {
        let index = seeded_index().await;
        let embedder = Arc::new(DelayedEmbedder::new(&[
            ("grading", Duration::from_millis(300)),
            ("prerequisites", Duration::from_millis(100)),
        ]));
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptedModel::tool_calls(vec![
                call("slow", "search_syllabi", r#"{"query": "CS 101 grading"}"#),
                call("fast", "search_syllabi", r#"{"query": "CS 101 prerequisites"}"#),
            ]),
            ScriptedModel::text(&["Both answered."]),
        ]));
        let agent = Agent::new(model.clone(), Arc::new(registry(index, embedder.clone())));

        let (sink, mut rx) = event_channel();
        let started = tokio::time::Instant::now();
        let run = agent.run("Grading and prerequisites for CS 101?", &sink).await;
        let elapsed = started.elapsed();
        drop(sink);
        let events = drain(&mut rx).await;

        assert_eq!(run.answer(), Some("Both answered."));

        // The second search finished first
        assert_eq!(
            embedder.completed(),
            vec!["CS 101 prerequisites", "CS 101 grading"]
        );

        // One phase costs the slowest call, not the sum
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed < Duration::from_millis(400));

        let finished: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::ToolCallFinished { call_id, .. } => Some(call_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(finished, vec!["slow", "fast"]);

        let seen = model.seen();
        let result_ids: Vec<&str> = seen[1]
            .iter()
            .filter_map(|m| match m {
                Message::Tool { result } => Some(result.call_id.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(result_ids, vec!["slow", "fast"]);

        let recorded: Vec<&str> = run.tool_calls.iter().map(|r| r.arguments.as_str()).collect();
        assert!(recorded[0].contains("grading"));
        assert!(recorded[1].contains("prerequisites"));
    }

    #[tokio::test]
    async fn test_tool_failure_does_not_end_run() {
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptedModel::tool_calls(vec![call(
                "call_1",
                "search_syllabi",
                r#"{"query": "grading"}"#,
            )]),
            ScriptedModel::text(&["The index is unavailable right now."]),
        ]));
        let agent = Agent::new(
            model.clone(),
            Arc::new(registry(
                Arc::new(FailingIndex),
                Arc::new(KeywordEmbedder::default()),
            )),
        );

        let (sink, mut rx) = event_channel();
        let run = agent.run("How is CS 101 graded?", &sink).await;
        drop(sink);
        let events = drain(&mut rx).await;

        assert_eq!(run.answer(), Some("The index is unavailable right now."));
        assert!(events.iter().any(|e| matches!(
            e,
            AgentEvent::ToolCallFinished { success: false, .. }
        )));
        let seen = model.seen();
        let second = &seen[1];
        assert!(matches!(
            second.last(),
            Some(Message::Tool { result }) if !result.success
        ));
    }

    #[tokio::test]
    async fn test_turn_limit_ends_with_error() {
        let model = Arc::new(ScriptedModel::repeating(ScriptedModel::tool_calls(vec![
            call("loop", "get_index_stats", "{}"),
        ])));
        let agent = Agent::new(
            model.clone(),
            Arc::new(registry(
                Arc::new(MemoryIndex::new()),
                Arc::new(KeywordEmbedder::default()),
            )),
        )
        .with_max_turns(3);

        let (sink, mut rx) = event_channel();
        let run = agent.run("loop forever", &sink).await;
        drop(sink);
        let events = drain(&mut rx).await;

        assert!(matches!(
            run.outcome,
            Outcome::Failed {
                kind: ErrorKind::TurnLimitExceeded,
                ..
            }
        ));
        assert_eq!(run.turns, 3);
        assert_eq!(run.tool_calls.len(), 3);
        assert_eq!(model.calls(), 4);
        assert!(matches!(
            events.last(),
            Some(AgentEvent::Error {
                kind: ErrorKind::TurnLimitExceeded,
                ..
            })
        ));
        assert!(!events
            .iter()
            .any(|e| matches!(e, AgentEvent::FinalAnswer { .. })));
    }

    #[tokio::test]
    async fn test_provider_failure_ends_with_error() {
        let model = Arc::new(ScriptedModel::new(vec![ScriptedModel::failure(
            "rate limited",
        )]));
        let agent = Agent::new(
            model,
            Arc::new(registry(
                Arc::new(MemoryIndex::new()),
                Arc::new(KeywordEmbedder::default()),
            )),
        );

        let (sink, mut rx) = event_channel();
        let run = agent.run("hello", &sink).await;
        drop(sink);
        let events = drain(&mut rx).await;

        assert!(matches!(
            run.outcome,
            Outcome::Failed {
                kind: ErrorKind::Provider,
                ..
            }
        ));
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            AgentEvent::Error { kind: ErrorKind::Provider, message } if message.contains("rate limited")
        ));
    }

    #[tokio::test]
    async fn test_failed_run_keeps_finished_tool_phases() {
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptedModel::tool_calls(vec![call("s", "get_index_stats", "{}")]),
            ScriptedModel::failure("connection reset"),
        ]));
        let agent = Agent::new(
            model,
            Arc::new(registry(
                Arc::new(MemoryIndex::new()),
                Arc::new(KeywordEmbedder::default()),
            )),
        );

        let mut conversation = Conversation::with_system(agent.system_prompt().to_string());
        conversation.push_user("How many syllabi are indexed?");
        let (sink, _rx) = event_channel();
        let run = agent.run_conversation(&mut conversation, &sink).await;

        assert!(matches!(
            run.outcome,
            Outcome::Failed {
                kind: ErrorKind::Provider,
                ..
            }
        ));
        assert!(matches!(
            conversation.messages().last(),
            Some(Message::Tool { result }) if result.call_id == "s"
        ));
        assert_eq!(conversation.verify_tool_results(), Ok(()));
    }

    #[tokio::test]
    async fn test_empty_message_skips_model() {
        let model = Arc::new(ScriptedModel::new(Vec::new()));
        let agent = Agent::new(
            model.clone(),
            Arc::new(registry(
                Arc::new(MemoryIndex::new()),
                Arc::new(KeywordEmbedder::default()),
            )),
        );

        let (sink, mut rx) = event_channel();
        let run = agent.run("   ", &sink).await;
        drop(sink);
        let events = drain(&mut rx).await;

        let reply = "I didn't receive a message. Please try again.";
        assert_eq!(run.answer(), Some(reply));
        assert_eq!(model.calls(), 0);
        assert_eq!(
            events.last(),
            Some(&AgentEvent::FinalAnswer {
                text: reply.to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_broken_history_is_protocol_error() {
        let model = Arc::new(ScriptedModel::new(vec![ScriptedModel::text(&["hi"])]));
        let agent = Agent::new(
            model.clone(),
            Arc::new(registry(
                Arc::new(MemoryIndex::new()),
                Arc::new(KeywordEmbedder::default()),
            )),
        );

        let mut conversation = Conversation::new();
        conversation.push_assistant(None, vec![call("orphan", "get_index_stats", "{}")]);
        conversation.push_user("hello?");

        let (sink, _rx) = event_channel();
        let run = agent.run_conversation(&mut conversation, &sink).await;

        assert!(matches!(
            run.outcome,
            Outcome::Failed {
                kind: ErrorKind::Protocol,
                ..
            }
        ));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_dropped_receiver_cancels_before_model() {
        let model = Arc::new(ScriptedModel::new(vec![ScriptedModel::text(&["hi"])]));
        let agent = Agent::new(
            model.clone(),
            Arc::new(registry(
                Arc::new(MemoryIndex::new()),
                Arc::new(KeywordEmbedder::default()),
            )),
        );

        let (sink, rx) = event_channel();
        drop(rx);
        let run = agent.run("hello", &sink).await;

        assert_eq!(run.outcome, Outcome::Cancelled);
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn test_cancel_while_streaming() {
        let model = Arc::new(ScriptedModel::new(vec![ScriptedModel::stalled()]));
        let agent = Arc::new(Agent::new(
            model.clone(),
            Arc::new(registry(
                Arc::new(MemoryIndex::new()),
                Arc::new(KeywordEmbedder::default()),
            )),
        ));

        let (sink, rx) = event_channel();
        let handle = tokio::spawn({
            let agent = agent.clone();
            async move { agent.run("hello", &sink).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(rx);

        let run = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("run should stop once the receiver is dropped")
            .unwrap();
        assert_eq!(run.outcome, Outcome::Cancelled);
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancel_during_tools_keeps_side_effects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bio150.txt");
        std::fs::write(&path, "BIO 150 lab safety is mandatory.").unwrap();

        let (sink, rx) = event_channel();
        let index = Arc::new(MemoryIndex::new());
        let embedder = Arc::new(ClosingEmbedder::new(rx));
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptedModel::tool_calls(vec![call(
                "up",
                "upload_syllabus",
                &serde_json::json!({"file_path": path.to_string_lossy()}).to_string(),
            )]),
            ScriptedModel::text(&["never sent"]),
        ]));
        let agent = Agent::new(model.clone(), Arc::new(registry(index.clone(), embedder)));

        let run = agent.run("Upload my biology syllabus", &sink).await;

        assert_eq!(run.outcome, Outcome::Cancelled);
        assert_eq!(model.calls(), 1);
        assert_eq!(run.tool_calls.len(), 1);
        assert!(run.tool_calls[0].success);
        assert_eq!(index.stats().await.unwrap().chunk_count, 1);
    }
}
