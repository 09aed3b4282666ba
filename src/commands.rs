//! Command-line interface, defined with `clap`.
//!
//! [`Cli`] holds the global options and the parsed subcommand; [`Commands`]
//! lists the subcommands the `recall` binary understands.
//!
//! # Examples
//!
//! ```no_run
//! use clap::Parser;
//! use journal_recall::commands::{Cli, Commands};
//!
//! let cli = Cli::parse();
//! match cli.command {
//!     Commands::Ask { question, .. } => println!("asking: {question}"),
//!     _ => {}
//! }
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::llm::LlmProvider;

/// Represents the parsed command-line arguments.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, propagate_version = true, color = clap::ColorChoice::Always)]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, short = 'c', global = true, env = "RECALL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Represents the available subcommands and their options.
#[derive(Subcommand, Debug)]
#[command(about, long_about = None, color = clap::ColorChoice::Always)]
pub enum Commands {
    /// Ask a question about the journal.
    #[clap(name = "ask", alias = "a")]
    Ask {
        question: String,

        /// Number of journal entries to retrieve (1-20). Defaults to
        /// `retrieval.default_top_k`.
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// LLM provider for this query: `hosted` or `self_hosted`.
        #[arg(short = 'm', long = "model")]
        provider: Option<LlmProvider>,

        /// Self-hosted model name, e.g. `llama3.1:8b`.
        #[arg(short = 'n', long)]
        model_name: Option<String>,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Add a journal entry to the index.
    #[clap(name = "index", alias = "i")]
    Index {
        entry_id: i64,

        text: String,

        #[arg(short = 't', long = "tag")]
        tags: Vec<String>,
    },

    /// Delete every indexed entry and all conversation memory.
    Reset {
        /// Required; reset cannot be undone.
        #[arg(long)]
        confirm: bool,
    },

    /// Show which providers and index backend are in use.
    Status,

    /// Write a default configuration and prompt template.
    Init,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ask_with_overrides() {
        let cli = Cli::parse_from([
            "recall",
            "ask",
            "Where did I go hiking?",
            "-k",
            "3",
            "-m",
            "ollama",
            "-n",
            "qwen2.5:7b",
            "--json",
        ]);
        match cli.command {
            Commands::Ask {
                question,
                top_k,
                provider,
                model_name,
                json,
            } => {
                assert_eq!(question, "Where did I go hiking?");
                assert_eq!(top_k, Some(3));
                assert_eq!(provider, Some(LlmProvider::SelfHosted));
                assert_eq!(model_name.as_deref(), Some("qwen2.5:7b"));
                assert!(json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_index_with_tags_and_global_config() {
        let cli = Cli::parse_from([
            "recall",
            "index",
            "42",
            "I went hiking in Da Lat",
            "--tag",
            "travel",
            "-t",
            "outdoors",
            "--config",
            "/tmp/recall.yaml",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/recall.yaml")));
        match cli.command {
            Commands::Index {
                entry_id,
                text,
                tags,
            } => {
                assert_eq!(entry_id, 42);
                assert_eq!(text, "I went hiking in Da Lat");
                assert_eq!(tags, vec!["travel", "outdoors"]);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn ask_leaves_top_k_to_config() {
        let cli = Cli::parse_from(["recall", "ask", "What did I cook?"]);
        match cli.command {
            Commands::Ask { top_k, json, .. } => {
                assert_eq!(top_k, None);
                assert!(!json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_provider() {
        assert!(Cli::try_parse_from(["recall", "ask", "hello?", "-m", "gpt"]).is_err());
    }
}
