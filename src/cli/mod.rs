//! CLI module for the syllabi agent.

pub mod commands;
mod output;
pub mod preflight;

pub use output::Output;

use clap::{Parser, Subcommand};

/// Syllabi - ask questions about your course syllabi
///
/// Index syllabus files locally and chat with an agent that searches them.
#[derive(Parser, Debug)]
#[command(name = "syllabi")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Increase verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "SYLLABI_CONFIG")]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the HTTP API server with a streaming chat endpoint
    Serve {
        /// Host to bind to (default from config)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (default from config)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Ask a single question and stream the answer
    Ask {
        /// The question to ask
        question: String,

        /// Chat model to use instead of the configured one
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Start an interactive chat session
    Chat {
        /// Chat model to use instead of the configured one
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Index a syllabus file, or every supported file in a directory
    Ingest {
        /// File or directory path
        path: String,
    },

    /// Search indexed syllabi without asking the model
    Search {
        /// Search query
        query: String,

        /// Maximum number of results (default from config)
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// List indexed files
    List,

    /// Show index statistics
    Stats,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Open configuration file in editor
    Edit,

    /// Show configuration file path
    Path,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ask_with_model() {
        let cli = Cli::parse_from(["syllabi", "-vv", "ask", "What is CS 101?", "-m", "gpt-4o-mini"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Ask { question, model } => {
                assert_eq!(question, "What is CS 101?");
                assert_eq!(model.as_deref(), Some("gpt-4o-mini"));
            }
            other => panic!("Expected Ask, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_serve_defaults_come_from_config() {
        let cli = Cli::parse_from(["syllabi", "serve"]);
        assert!(matches!(
            cli.command,
            Commands::Serve {
                host: None,
                port: None
            }
        ));
    }
}
