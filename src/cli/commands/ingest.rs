//! Ingest command implementation.

use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use anyhow::Result;
use std::path::PathBuf;

/// Index a file, or every supported file under a directory.
pub async fn run_ingest(path: &str, settings: Settings) -> Result<()> {
    if let Err(e) = preflight::check(Operation::Embed) {
        Output::error(&format!("{}", e));
        return Err(e.into());
    }

    let path = PathBuf::from(shellexpand::tilde(path).to_string());
    let orchestrator = Orchestrator::new(settings)?;

    if path.is_dir() {
        let files = orchestrator.ingestor().collect_files(&path)?;
        if files.is_empty() {
            Output::warning(&format!("No supported files under {}", path.display()));
            return Ok(());
        }

        let pb = Output::progress_bar(files.len() as u64, "Indexing");
        let mut indexed = 0;
        let mut failed = 0;
        for file in &files {
            pb.set_message(file.display().to_string());
            match orchestrator.ingest_file(file).await {
                Ok(_) => indexed += 1,
                Err(e) => {
                    pb.suspend(|| Output::warning(&format!("{}: {}", file.display(), e)));
                    failed += 1;
                }
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        Output::success(&format!("Indexed {} files", indexed));
        if failed > 0 {
            Output::warning(&format!("{} files failed", failed));
        }
    } else {
        let spinner = Output::spinner("Chunking and embedding...");
        let result = orchestrator.ingest_file(&path).await;
        spinner.finish_and_clear();

        let report = result?;
        Output::success(&format!("Indexed {}", report.source));
        Output::kv("Chunks", &report.chunks_indexed.to_string());
        if report.superseded > 0 {
            Output::kv("Replaced", &format!("{} previous chunks", report.superseded));
        }
    }

    orchestrator.shutdown().await?;
    Ok(())
}
