//! Search command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use anyhow::Result;

/// Run the search command.
pub async fn run_search(query: &str, limit: Option<usize>, settings: Settings) -> Result<()> {
    if let Err(e) = preflight::check(Operation::Embed) {
        Output::error(&format!("{}", e));
        return Err(e.into());
    }

    let limit = limit
        .unwrap_or(settings.search.default_results)
        .min(settings.search.max_results);
    let orchestrator = Orchestrator::new(settings)?;

    let spinner = Output::spinner("Searching...");
    let results = async {
        let embedding = orchestrator.embedder().embed(query).await?;
        orchestrator.index().search(&embedding, limit).await
    }
    .await;
    spinner.finish_and_clear();

    match results {
        Ok(hits) if hits.is_empty() => {
            Output::warning("No results found matching your query.");
        }
        Ok(hits) => {
            Output::success(&format!("Found {} results", hits.len()));
            for hit in &hits {
                Output::search_result(
                    hit.chunk.filename(),
                    hit.chunk.position,
                    hit.score,
                    &hit.chunk.content,
                );
            }
        }
        Err(e) => {
            Output::error(&format!("Search failed: {}", e));
            return Err(e.into());
        }
    }

    orchestrator.shutdown().await?;
    Ok(())
}
