//! Syllabi Agent - tool-calling question answering over course syllabi
//!
//! A local-first agent that indexes syllabus files and answers questions about
//! them, streaming its progress as it searches.
//!
//! # Overview
//!
//! Syllabi Agent allows you to:
//! - Upload syllabus files into a local vector index
//! - Ask questions and watch the agent search, then answer with citations
//! - Serve the same agent over HTTP with Server-Sent Events
//!
//! # Architecture
//!
//! - `config` - Settings and prompt templates
//! - `chunking` - Paragraph-aware text chunking
//! - `embedding` - Embedding generation
//! - `index` - Document index abstraction (SQLite, in-memory)
//! - `ingest` - File reading, chunking, embedding and indexing
//! - `agent` - Conversation model, tools, event stream and the agent loop
//! - `orchestrator` - Component wiring
//!
//! # Example
//!
//! ```rust,no_run
//! use syllabi_agent::agent::{event_channel, AgentEvent};
//! use syllabi_agent::config::Settings;
//! use syllabi_agent::orchestrator::Orchestrator;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let orchestrator = Orchestrator::new(Settings::load()?)?;
//!     orchestrator
//!         .ingest_file(std::path::Path::new("cs101.md"))
//!         .await?;
//!
//!     let (sink, mut events) = event_channel();
//!     let agent = orchestrator.agent();
//!     let printer = tokio::spawn(async move {
//!         while let Some(event) = events.recv().await {
//!             if let AgentEvent::TextDelta { text } = event {
//!                 print!("{}", text);
//!             }
//!         }
//!     });
//!
//!     agent.run("What are the prerequisites for CS 101?", &sink).await;
//!     drop(sink);
//!     printer.await?;
//!     orchestrator.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod chunking;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod index;
pub mod ingest;
pub mod openai;
pub mod orchestrator;

pub use error::{Result, SyllabiError};
