use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "strata",
    about = "Strata: versioned entity storage with full revision history",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Server configuration file (TOML). Defaults apply when it is absent.
    #[arg(short, long, global = true, default_value = "strata.toml")]
    pub config: PathBuf,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write a configuration file and create the database
    Init(InitArgs),
    /// Create an entity from a JSON document
    Create(CreateArgs),
    /// Read an entity, optionally at a past version
    Get(GetArgs),
    /// Write a new revision of an entity from a JSON document
    Update(UpdateArgs),
    /// Delete an entity, keeping its history
    Delete(DeleteArgs),
    /// List current entities by key prefix
    List(ListArgs),
    /// Show every recorded revision of a key
    History(HistoryArgs),
    /// Show table row counts
    Stats(StatsArgs),
}

#[derive(Args)]
pub struct InitArgs {
    /// Database file for the SQLite backend
    #[arg(long, default_value = ".strata/strata.db")]
    pub db: PathBuf,
    /// Overwrite an existing configuration file
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct CreateArgs {
    /// JSON entity document; `-` reads standard input
    #[arg(short, long)]
    pub file: String,
    /// Creator recorded when the document has none
    #[arg(long)]
    pub created_by: Option<String>,
}

#[derive(Args)]
pub struct GetArgs {
    pub key: String,
    /// Read the revision recorded at this version
    #[arg(long)]
    pub version: Option<u64>,
    /// Omit the body document
    #[arg(long)]
    pub no_body: bool,
    /// Omit the status document
    #[arg(long)]
    pub no_status: bool,
}

#[derive(Args)]
pub struct UpdateArgs {
    /// JSON entity document; `-` reads standard input
    #[arg(short, long)]
    pub file: String,
    /// Only apply if the current revision has this version
    #[arg(long)]
    pub expected_version: Option<u64>,
    /// Updater recorded when the document has none
    #[arg(long)]
    pub updated_by: Option<String>,
}

#[derive(Args)]
pub struct DeleteArgs {
    pub key: String,
    #[arg(long)]
    pub expected_version: Option<u64>,
    /// Recorded on the tombstone revision
    #[arg(long)]
    pub by: Option<String>,
}

#[derive(Args)]
pub struct ListArgs {
    /// Key prefixes; none lists everything
    pub prefixes: Vec<String>,
    /// Label filter as NAME=VALUE; repeatable
    #[arg(short, long = "label", value_parser = parse_label)]
    pub labels: Vec<(String, String)>,
    #[arg(short = 'n', long, default_value = "0")]
    pub limit: usize,
    #[arg(long)]
    pub page_token: Option<String>,
}

#[derive(Args)]
pub struct HistoryArgs {
    pub key: String,
    #[arg(short = 'n', long, default_value = "0")]
    pub limit: usize,
    #[arg(long)]
    pub page_token: Option<String>,
}

#[derive(Args)]
pub struct StatsArgs {}

fn parse_label(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((name, value)) if !name.is_empty() => Ok((name.to_string(), value.to_string())),
        _ => Err(format!("expected NAME=VALUE, got {s:?}")),
    }
}
