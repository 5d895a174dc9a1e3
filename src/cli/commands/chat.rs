//! Interactive chat command with streamed tool-calling answers.

use crate::agent::{event_channel, Conversation, Outcome};
use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::Settings;
use crate::orchestrator::Orchestrator;
use anyhow::Result;
use console::style;
use std::io::{self, BufRead, Write};
use tracing::debug;

/// Oldest exchanges are dropped beyond this many messages.
const MAX_HISTORY: usize = 40;

/// Run the interactive chat command.
pub async fn run_chat(model: Option<String>, settings: Settings) -> Result<()> {
    if let Err(e) = preflight::check(Operation::Chat) {
        Output::error(&format!("{}", e));
        return Err(e.into());
    }

    let orchestrator = Orchestrator::new(settings)?;
    let agent = match model {
        Some(model) => orchestrator.agent_with_model(&model)?,
        None => orchestrator.agent(),
    };

    let mut conversation = Conversation::with_system(agent.system_prompt().to_string());

    println!("\n{}", style("Syllabi Chat").bold().cyan());
    println!(
        "{}\n",
        style("Type your questions, or 'exit' to quit. Use 'clear' to reset conversation.").dim()
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        print!("{} ", style("You:").green().bold());
        stdout.flush()?;

        let mut input = String::new();
        if stdin.lock().read_line(&mut input)? == 0 {
            break;
        }

        let input = input.trim();

        if input.is_empty() {
            continue;
        }

        if input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit") {
            Output::info("Goodbye!");
            break;
        }

        if input.eq_ignore_ascii_case("clear") {
            conversation.clear_history();
            Output::info("Conversation history cleared.");
            continue;
        }

        conversation.push_user(input);

        let (sink, mut rx) = event_channel();
        let printer = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                Output::agent_event(&event);
            }
        });

        print!("\n{} ", style("Syllabi:").cyan().bold());
        stdout.flush()?;
        let run = agent.run_conversation(&mut conversation, &sink).await;
        drop(sink);
        printer.await?;

        if let Outcome::Failed { .. } = run.outcome {
            debug!("Turn failed after {} tool turns", run.turns);
        }

        conversation.trim_to(MAX_HISTORY);
    }

    orchestrator.shutdown().await?;
    Ok(())
}
