//! Configuration module.
//!
//! Handles loading and managing application settings and prompt templates.

mod prompts;
mod settings;

pub use prompts::{AgentPrompts, Prompts};
pub use settings::{
    AgentSettings, ChunkingSettings, EmbeddingSettings, GeneralSettings, IndexProvider,
    IndexSettings, PromptSettings, SearchSettings, ServerSettings, Settings,
};
