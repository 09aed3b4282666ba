//! Main module for the `recall` CLI.
//!
//! Handles tracing setup, configuration loading and dispatch of the parsed
//! subcommand onto a [`RetrievalOrchestrator`].
//!
//! # Examples
//!
//! ```sh
//! recall init
//! recall index 42 "I went hiking in Da Lat" --tag travel
//! recall ask "Where did I go hiking?" -k 3
//! recall ask "Summarise my week" -m self_hosted -n llama3.1:8b --json
//! recall reset --confirm
//! ```

use clap::Parser;
use once_cell::sync::OnceCell;
use std::{
    env,
    error::Error,
    fs,
    path::{Path, PathBuf},
};
use tracing::*;
use tracing_subscriber::EnvFilter;

use journal_recall::commands::{Cli, Commands};
use journal_recall::config::{self, RecallConfig};
use journal_recall::config_dir;
use journal_recall::models::QueryRequest;
use journal_recall::orchestrator::RetrievalOrchestrator;
use journal_recall::template::PromptTemplate;

static TRACING: OnceCell<()> = OnceCell::new();

const DEFAULT_TEMPLATE_NAME: &str = "journal";

fn main() -> Result<(), Box<dyn Error>> {
    TRACING.get_or_init(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
            )
            .with_writer(std::io::stderr)
            .init();
    });
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run())
}

/// Resolve the config file: `--config`, then `./config.yaml` under
/// `IN_TEST_ENVIRONMENT`, then the per-platform config directory.
fn config_path(cli_override: Option<PathBuf>) -> Result<PathBuf, Box<dyn Error>> {
    if let Some(path) = cli_override {
        return Ok(path);
    }
    if env::var("IN_TEST_ENVIRONMENT").is_ok() {
        return Ok(env::current_dir()?.join("config.yaml"));
    }
    Ok(config_dir()?.join("config.yaml"))
}

/// Directory holding the config file; the index database defaults to it.
fn home_dir(config_path: &Path) -> Result<PathBuf, Box<dyn Error>> {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(parent.to_path_buf()),
        _ => Ok(env::current_dir()?),
    }
}

fn load(path: &Path) -> Result<RecallConfig, Box<dyn Error>> {
    let mut config = if path.exists() {
        config::load_config(&path.to_string_lossy())?
    } else {
        debug!("No config at {}, using defaults", path.display());
        RecallConfig::default()
    };
    config.apply_env_overrides();
    config.index.default_path_in(&home_dir(path)?);
    Ok(config)
}

async fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let path = config_path(cli.config)?;

    if let Commands::Init = cli.command {
        return init(&path);
    }

    let config = load(&path)?;
    debug!("Config loaded: {:?}", config);
    let default_top_k = config.retrieval.default_top_k;
    let recall = RetrievalOrchestrator::configure(config).await?;

    match cli.command {
        Commands::Ask {
            question,
            top_k,
            provider,
            model_name,
            json,
        } => {
            let mut request =
                QueryRequest::new(question).with_top_k(top_k.unwrap_or(default_top_k));
            if let Some(provider) = provider {
                request = request.with_provider(provider);
            }
            if let Some(model_name) = model_name {
                request = request.with_model_name(model_name);
            }
            let result = recall.query(request).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", result.answer);
                if !result.references.is_empty() {
                    println!();
                    println!("References:");
                    for reference in &result.references {
                        if reference.tags.is_empty() {
                            println!("  #{}", reference.entry_id);
                        } else {
                            println!("  #{} [{}]", reference.entry_id, reference.tags.join(", "));
                        }
                    }
                }
            }
        }
        Commands::Index {
            entry_id,
            text,
            tags,
        } => {
            if recall.status().await.index_backend == "memory" {
                warn!("Index is in memory only; entry {entry_id} is lost when recall exits");
            }
            match recall.index_entry(entry_id, &text, tags).await? {
                Some(id) => println!("Indexed entry {entry_id} as {id}"),
                None => println!("Entry {entry_id} not indexed"),
            }
        }
        Commands::Reset { confirm } => {
            if !confirm {
                return Err("reset deletes every indexed entry; pass --confirm to proceed".into());
            }
            recall.reset().await?;
            println!("Index reset");
        }
        Commands::Status => {
            println!("{}", serde_json::to_string_pretty(&recall.status().await)?);
        }
        // Handled before configuration.
        Commands::Init => {}
    }

    Ok(())
}

/// Write a default config and the built-in persona as an editable template.
///
/// Existing files are left untouched.
fn init(config_path: &Path) -> Result<(), Box<dyn Error>> {
    let templates = config_dir()?.join("templates");
    info!("Creating template directory: {}", templates.display());
    fs::create_dir_all(&templates)?;

    let template_path = templates.join(format!("{DEFAULT_TEMPLATE_NAME}.yaml"));
    if template_path.exists() {
        info!("Template already exists: {}", template_path.display());
    } else {
        info!("Creating template file: {}", template_path.display());
        fs::write(&template_path, serde_yaml::to_string(&PromptTemplate::default())?)?;
    }

    if config_path.exists() {
        info!("Config already exists: {}", config_path.display());
        return Ok(());
    }
    if let Some(parent) = config_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut config = RecallConfig::default();
    config.retrieval.template = Some(DEFAULT_TEMPLATE_NAME.to_string());
    config.index.default_path_in(&home_dir(config_path)?);
    info!("Creating config file: {}", config_path.display());
    fs::write(config_path, serde_yaml::to_string(&config)?)?;

    Ok(())
}
