//! Inspect operator state persisted in checkpoints and savepoints.
//!
//! ```text
//! bravo checkpoints /data/checkpoints
//! bravo operators /data/checkpoints/chk-42
//! bravo states /data/checkpoints/chk-42 test-reducer --format json
//! bravo window /data/checkpoints test-reducer --kv
//! ```

mod commands;

use std::path::PathBuf;

use anyhow::{Context, Result};
use bravo_core::ReaderConfig;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "bravo")]
#[command(about = "Read operator state from checkpoints and savepoints")]
struct Args {
    /// Reader configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subtasks reconstructed or decoded at the same time
    #[arg(long, global = true)]
    max_concurrent: Option<usize>,

    /// Skip subtasks with corrupt state instead of failing
    #[arg(long, global = true)]
    allow_partial: bool,

    /// Output format: table or json
    #[arg(long, global = true, default_value = "table", value_parser = ["table", "json"])]
    format: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List checkpoint ids below a base directory
    Checkpoints {
        /// Base directory holding chk-<id> directories
        base: PathBuf,
    },

    /// List the operators of a checkpoint
    Operators {
        /// Metadata file, checkpoint directory or base directory
        location: PathBuf,
    },

    /// Show the registered state of every subtask of an operator
    States {
        /// Metadata file, checkpoint directory or base directory
        location: PathBuf,

        /// Operator UID
        uid: String,
    },

    /// Dump window contents of an operator keyed by strings, with string
    /// maps as window contents
    Window {
        /// Metadata file, checkpoint directory or base directory
        location: PathBuf,

        /// Operator UID
        uid: String,

        /// Pair each window's contents with its partitioning key
        #[arg(long)]
        kv: bool,
    },
}

impl Args {
    fn reader_config(&self) -> Result<ReaderConfig> {
        let mut config = match &self.config {
            Some(path) => ReaderConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ReaderConfig::default(),
        };
        if let Some(max) = self.max_concurrent {
            config = config.with_max_concurrent_subtasks(max);
        }
        if self.allow_partial {
            config = config.with_allow_partial(true);
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = args.reader_config()?;
    debug!(?config, "Reader configuration");

    match &args.command {
        Command::Checkpoints { base } => commands::checkpoints::execute(base, &args.format).await,
        Command::Operators { location } => {
            commands::operators::execute(location, &args.format).await
        }
        Command::States { location, uid } => {
            commands::states::execute(location, uid, config, &args.format).await
        }
        Command::Window { location, uid, kv } => {
            commands::window::execute(location, uid, *kv, config, &args.format).await
        }
    }
}
