//! # Journal Recall (library root)
//!
//! Retrieval-augmented recall over a personal journal. Journal entries are
//! embedded into a vector index; questions are answered by an LLM prompted
//! with the most similar entries and the recent conversation, and every
//! answered exchange is written back into the index as memory.
//!
//! The crate is organised as:
//! - Entry point for applications ([`orchestrator`]).
//! - Retrieval: embedding backends ([`embedding`]), vector search
//!   ([`vector_store`]) over pluggable storage ([`store`], [`schema`]), and a
//!   keyword co-occurrence graph ([`graph`]).
//! - Generation: LLM providers ([`llm`]), persona ([`template`]) and prompt
//!   assembly ([`prompt`]), conversation memory ([`memory`]).
//! - Plumbing: configuration ([`config`]), shared types ([`models`]), errors
//!   ([`error`]) and the CLI surface ([`commands`]).
//!
//! ## Configuration directory
//! Config and templates live under the per-platform directory returned by
//! [`config_dir`], e.g.:
//!
//! - macOS: `~/Library/Application Support/com.journal-recall.recall`
//! - Linux (XDG): `~/.config/recall`
//! - Windows: `C:\Users\<you>\AppData\Roaming\journal-recall\recall\config`

use directories::ProjectDirs;
use std::error::Error;

pub mod commands;
pub mod config;
pub mod embedding;
pub mod error;
pub mod graph;
pub mod llm;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod schema;
pub mod store;
pub mod template;
pub mod vector_store;

#[cfg(test)]
mod testing;

/// Return the per-platform configuration directory.
///
/// The directory is **not** created by this function; callers that need it
/// should create it with `fs::create_dir_all`.
///
/// # Errors
/// Returns an error if the platform configuration directory cannot be determined
/// (which is rare but possible in heavily sandboxed environments).
///
/// # Examples
/// ```rust
/// let cfg = journal_recall::config_dir().expect("has a config dir");
/// println!("config at {}", cfg.display());
/// ```
pub fn config_dir() -> Result<std::path::PathBuf, Box<dyn Error>> {
    let proj_dirs = ProjectDirs::from("com", "journal-recall", "recall")
        .ok_or("Unable to determine config directory")?;
    Ok(proj_dirs.config_dir().to_path_buf())
}
