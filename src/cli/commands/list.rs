//! List and stats command implementations.

use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use anyhow::Result;

/// Run the list command.
pub async fn run_list(settings: Settings) -> Result<()> {
    let orchestrator = Orchestrator::new(settings)?;

    match orchestrator.index().list_files().await {
        Ok(files) => {
            if files.is_empty() {
                Output::info("No syllabi indexed yet. Use 'syllabi ingest <path>' to add some.");
            } else {
                Output::header(&format!("Indexed Files ({})", files.len()));
                println!();

                for file in &files {
                    Output::file_info(file);
                }

                let total_chunks: u64 = files.iter().map(|f| f.chunk_count as u64).sum();
                println!();
                Output::kv("Total files", &files.len().to_string());
                Output::kv("Total chunks", &total_chunks.to_string());
            }
        }
        Err(e) => {
            Output::error(&format!("Failed to list files: {}", e));
            return Err(e.into());
        }
    }

    orchestrator.shutdown().await?;
    Ok(())
}

/// Run the stats command.
pub async fn run_stats(settings: Settings) -> Result<()> {
    let orchestrator = Orchestrator::new(settings)?;
    let index = orchestrator.index();
    let stats = index.stats().await?;

    Output::header("Index Statistics");
    Output::kv("Backend", index.backend());
    if index.backend() == "sqlite" {
        Output::kv(
            "Database",
            &orchestrator.settings().sqlite_path().display().to_string(),
        );
    }
    Output::kv("Files", &stats.file_count.to_string());
    Output::kv("Chunks", &stats.chunk_count.to_string());

    orchestrator.shutdown().await?;
    Ok(())
}
