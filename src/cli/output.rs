//! CLI output formatting utilities.

use crate::agent::AgentEvent;
use crate::index::IndexedFile;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;

/// Output helper for CLI formatting.
pub struct Output;

impl Output {
    /// Print an info message.
    pub fn info(msg: &str) {
        println!("{} {}", style(">>").cyan().bold(), msg);
    }

    /// Print a success message.
    pub fn success(msg: &str) {
        println!("{} {}", style(">>").green().bold(), msg);
    }

    /// Print a warning message.
    pub fn warning(msg: &str) {
        eprintln!("{} {}", style(">>").yellow().bold(), msg);
    }

    /// Print an error message.
    pub fn error(msg: &str) {
        eprintln!("{} {}", style(">>").red().bold(), msg);
    }

    /// Print a header.
    pub fn header(msg: &str) {
        println!("\n{}", style(msg).bold().underlined());
    }

    /// Print a key-value pair.
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", style(key).dim(), value);
    }

    /// Print indexed file info.
    pub fn file_info(file: &IndexedFile) {
        println!(
            "  {} {} ({} chunks, {} chars, {})",
            style("*").cyan(),
            style(file_name(&file.source)).bold(),
            file.chunk_count,
            file.characters,
            style(file.indexed_at.format("%Y-%m-%d %H:%M")).dim()
        );
        println!("    {}", style(&file.source).dim());
    }

    /// Print search result.
    pub fn search_result(filename: &str, position: u32, score: f32, content: &str) {
        println!(
            "\n{} {} #{} (score: {:.2})",
            style(">>").green(),
            style(filename).bold(),
            style(position).cyan(),
            score
        );
        println!("   {}", content_preview(content, 200));
    }

    /// Render one agent event to the terminal.
    ///
    /// Answer text goes to stdout, tool activity to stderr.
    pub fn agent_event(event: &AgentEvent) {
        match event {
            AgentEvent::TextDelta { text } => {
                print!("{}", text);
                std::io::stdout().flush().ok();
            }
            AgentEvent::ToolCallStarted {
                name, arguments, ..
            } => {
                eprintln!("{}", style(format!("  [{}] {}", name, arguments)).dim());
            }
            AgentEvent::ToolCallFinished { name, success, .. } => {
                let mark = if *success {
                    style("✓").green()
                } else {
                    style("✗").red()
                };
                eprintln!("  {} {}", mark, style(name).dim());
            }
            AgentEvent::FinalAnswer { .. } => println!("\n"),
            AgentEvent::Error { kind, message } => {
                println!();
                Output::error(&format!("{} ({})", message, kind));
            }
        }
    }

    /// Create a progress bar.
    pub fn progress_bar(len: u64, msg: &str) -> ProgressBar {
        let pb = ProgressBar::new(len);
        if let Ok(bar_style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        {
            pb.set_style(bar_style.progress_chars("#>-"));
        }
        pb.set_message(msg.to_string());
        pb
    }

    /// Create a spinner.
    pub fn spinner(msg: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        if let Ok(spinner_style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            pb.set_style(spinner_style);
        }
        pb.set_message(msg.to_string());
        pb.enable_steady_tick(std::time::Duration::from_millis(100));
        pb
    }
}

fn file_name(source: &str) -> &str {
    std::path::Path::new(source)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(source)
}

/// Truncate content with ellipsis, on a character boundary.
fn content_preview(content: &str, max_chars: usize) -> String {
    let content = content.replace('\n', " ");
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content,
    }
}
