//! Ask command implementation.

use crate::agent::{event_channel, Outcome};
use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use anyhow::Result;

/// Run the ask command, streaming the answer as it is generated.
pub async fn run_ask(question: &str, model: Option<String>, settings: Settings) -> Result<()> {
    if let Err(e) = preflight::check(Operation::Chat) {
        Output::error(&format!("{}", e));
        return Err(e.into());
    }

    let orchestrator = Orchestrator::new(settings)?;
    let agent = match model {
        Some(model) => orchestrator.agent_with_model(&model)?,
        None => orchestrator.agent(),
    };

    let (sink, mut rx) = event_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            Output::agent_event(&event);
        }
    });

    println!();
    let run = agent.run(question, &sink).await;
    drop(sink);
    printer.await?;

    orchestrator.shutdown().await?;

    if !run.tool_calls.is_empty() {
        Output::kv(
            "Tools used",
            &run.tool_calls
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(", "),
        );
    }

    match run.outcome {
        Outcome::Failed { kind, message } => Err(anyhow::anyhow!("{} ({})", message, kind)),
        _ => Ok(()),
    }
}
