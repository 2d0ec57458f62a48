//! # CLI Interface
//!
//! Defines the command-line argument structure for `chequebook-node` using
//! `clap` derive. Supports four subcommands: `run`, `init`, `status`,
//! and `version`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use chequebook_protocol::config::{DEFAULT_METRICS_PORT, DEFAULT_RPC_PORT};

use crate::logging::LogFormat;

/// Chequebook vault node.
///
/// Hosts a single vault: accepts signed calls to deposit, cash cheques and
/// withdraw, persists the ledger, and exposes Prometheus metrics.
#[derive(Parser, Debug)]
#[command(
    name = "chequebook-node",
    about = "Chequebook vault node",
    version,
    propagate_version = true
)]
pub struct ChequebookCli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level subcommands for the node binary.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the vault.
    Run(RunArgs),
    /// Create a data directory with a fresh issuer keypair and vault
    /// manifest.
    Init(InitArgs),
    /// Query the status of a running node via its API.
    Status(StatusArgs),
    /// Print version information and exit.
    Version,
}

/// Arguments for the `run` subcommand.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Data directory holding `vault.json` and the `db/` store.
    #[arg(long, short = 'd', env = "CHEQUEBOOK_DATA_DIR", default_value = ".chequebook")]
    pub data_dir: PathBuf,

    /// Port for the REST and WebSocket API.
    #[arg(long, env = "CHEQUEBOOK_RPC_PORT", default_value_t = DEFAULT_RPC_PORT)]
    pub rpc_port: u16,

    /// Port for the Prometheus metrics endpoint.
    #[arg(long, env = "CHEQUEBOOK_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Log output format: `pretty` or `json`.
    #[arg(long, env = "CHEQUEBOOK_LOG_FORMAT", default_value = "pretty", value_parser = parse_log_format)]
    pub log_format: LogFormat,
}

/// Arguments for the `init` subcommand.
#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Path to the data directory to initialize.
    #[arg(long, short = 'd', env = "CHEQUEBOOK_DATA_DIR", default_value = ".chequebook")]
    pub data_dir: PathBuf,

    /// Hex-encoded Ed25519 issuer secret key to import instead of generating
    /// one.
    #[arg(long, env = "CHEQUEBOOK_ISSUER_KEY")]
    pub issuer_key: Option<String>,

    /// Replace an existing vault: new manifest and key, old store deleted.
    #[arg(long)]
    pub force: bool,
}

/// Arguments for the `status` subcommand.
#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// API endpoint of the running node.
    #[arg(long, default_value = "http://127.0.0.1:9841")]
    pub rpc_url: String,
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    match s.to_ascii_lowercase().as_str() {
        "pretty" => Ok(LogFormat::Pretty),
        "json" => Ok(LogFormat::Json),
        other => Err(format!("unknown log format '{other}', expected pretty or json")),
    }
}
