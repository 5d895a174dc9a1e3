//! Wiring for the syllabus agent.
//!
//! Builds the index, embedder, chat model and tools from settings and hands
//! out agents that share them.

use crate::agent::{Agent, ChatModel, OpenAIChatModel, ToolRegistry};
use crate::config::{IndexProvider, Prompts, Settings};
use crate::embedding::{Embedder, OpenAIEmbedder};
use crate::error::Result;
use crate::index::{DocumentIndex, MemoryIndex, SqliteIndex};
use crate::ingest::{IngestReport, Ingestor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Shared components behind every agent run.
pub struct Orchestrator {
    settings: Settings,
    prompts: Prompts,
    index: Arc<dyn DocumentIndex>,
    embedder: Arc<dyn Embedder>,
    model: Arc<dyn ChatModel>,
    ingestor: Arc<Ingestor>,
    tools: Arc<ToolRegistry>,
}

impl Orchestrator {
    /// Build every component from settings.
    pub fn new(settings: Settings) -> Result<Self> {
        let prompts = Prompts::load(
            settings.prompts.custom_dir.as_deref(),
            Some(&settings.prompts.variables),
        )?;

        let index: Arc<dyn DocumentIndex> = match settings.index.provider {
            IndexProvider::Sqlite => {
                let path = settings.sqlite_path();
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                info!("Using SQLite index at {}", path.display());
                Arc::new(SqliteIndex::open(&path)?)
            }
            IndexProvider::Memory => {
                warn!("Using in-memory index; uploads are lost on exit");
                Arc::new(MemoryIndex::new())
            }
        };

        let embedder = Arc::new(OpenAIEmbedder::with_config(
            &settings.embedding.model,
            settings.embedding.dimensions as usize,
        )?);

        let model = Arc::new(
            OpenAIChatModel::new(&settings.agent.model)?
                .with_temperature(settings.agent.temperature),
        );

        Ok(Self::with_components(settings, prompts, index, embedder, model))
    }

    /// Create an orchestrator with custom components.
    pub fn with_components(
        settings: Settings,
        prompts: Prompts,
        index: Arc<dyn DocumentIndex>,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn ChatModel>,
    ) -> Self {
        let ingestor = Arc::new(Ingestor::new(
            index.clone(),
            embedder.clone(),
            &settings.chunking,
        ));
        let tools = Arc::new(ToolRegistry::new(
            index.clone(),
            embedder.clone(),
            ingestor.clone(),
            settings.search.clone(),
        ));

        Self {
            settings,
            prompts,
            index,
            embedder,
            model,
            ingestor,
            tools,
        }
    }

    /// An agent using the configured model.
    pub fn agent(&self) -> Agent {
        self.build_agent(self.model.clone())
    }

    /// An agent using a different OpenAI model than the configured one.
    pub fn agent_with_model(&self, model: &str) -> Result<Agent> {
        let model = OpenAIChatModel::new(model)?.with_temperature(self.settings.agent.temperature);
        Ok(self.build_agent(Arc::new(model)))
    }

    fn build_agent(&self, model: Arc<dyn ChatModel>) -> Agent {
        Agent::new(model, self.tools.clone())
            .with_system_prompt(&self.prompts.agent_system())
            .with_empty_message_reply(&self.prompts.agent.empty_message_reply)
            .with_max_turns(self.settings.agent.max_turns)
    }

    pub fn index(&self) -> Arc<dyn DocumentIndex> {
        self.index.clone()
    }

    pub fn embedder(&self) -> Arc<dyn Embedder> {
        self.embedder.clone()
    }

    pub fn ingestor(&self) -> Arc<Ingestor> {
        self.ingestor.clone()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Index a single file.
    pub async fn ingest_file(&self, path: &Path) -> Result<IngestReport> {
        self.ingestor.ingest_file(path).await
    }

    /// Index every supported file under `path` (or `path` itself if it is a file).
    ///
    /// Failures are reported per file and do not stop the walk.
    #[instrument(skip(self), fields(path = %path.display()))]
    pub async fn ingest_path(&self, path: &Path) -> Result<Vec<(PathBuf, Result<IngestReport>)>> {
        let files = if path.is_dir() {
            self.ingestor.collect_files(path)?
        } else {
            vec![path.to_path_buf()]
        };

        let mut outcomes = Vec::with_capacity(files.len());
        for file in files {
            let outcome = self.ingestor.ingest_file(&file).await;
            if let Err(e) = &outcome {
                warn!("Skipping {}: {}", file.display(), e);
            }
            outcomes.push((file, outcome));
        }
        Ok(outcomes)
    }

    /// Flush the index before exit.
    pub async fn shutdown(&self) -> Result<()> {
        self.index.close().await
    }
}
