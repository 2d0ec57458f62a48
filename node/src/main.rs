// Copyright (c) 2026 Chequebook Developers. MIT License.
// See LICENSE for details.

//! # Chequebook Vault Node
//!
//! Entry point for the `chequebook-node` binary. Parses CLI arguments,
//! initializes logging and metrics, restores the vault from disk, and serves
//! the HTTP/WS API.
//!
//! The binary supports four subcommands:
//!
//! - `run`: serve the vault
//! - `init`: create a data directory, issuer key and vault manifest
//! - `status`: query a running node's status endpoint
//! - `version`: print build version information

mod api;
mod auth;
mod cli;
mod logging;
mod manifest;
mod metrics;
mod service;
mod store;

use anyhow::{bail, Context, Result};
use clap::Parser;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast;

use chequebook_protocol::crypto::Keypair;

use cli::{ChequebookCli, Commands};
use logging::LogFormat;
use manifest::VaultManifest;
use metrics::NodeMetrics;
use service::VaultService;
use store::VaultStore;

/// Broadcast channel capacity for live event streaming.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = ChequebookCli::parse();

    match cli.command {
        Commands::Run(args) => run_node(args).await,
        Commands::Init(args) => init_node(args),
        Commands::Status(args) => query_status(args).await,
        Commands::Version => {
            print_version();
            Ok(())
        }
    }
}

/// Serves the vault until SIGINT or SIGTERM.
async fn run_node(args: cli::RunArgs) -> Result<()> {
    logging::init_logging(
        "chequebook_node=info,chequebook_contracts=info,tower_http=info",
        args.log_format,
    );

    tracing::info!(
        rpc_port = args.rpc_port,
        metrics_port = args.metrics_port,
        data_dir = %args.data_dir.display(),
        "starting chequebook-node"
    );

    // --- Manifest ---
    let manifest = VaultManifest::load(&args.data_dir)
        .context("data directory not initialized; run `chequebook-node init` first")?;

    // --- Persistent storage ---
    let db_path = manifest::store_path(&args.data_dir);
    let store = VaultStore::open(&db_path)
        .with_context(|| format!("failed to open store at {}", db_path.display()))?;
    tracing::info!(path = %db_path.display(), "store opened");

    let service = Arc::new(
        VaultService::load_or_create(store, manifest.issuer, manifest.vault_id)
            .context("failed to load vault")?,
    );
    let status = service.status();
    tracing::info!(
        vault_id = %status.vault_id,
        issuer = %status.issuer,
        total_balance = status.total_balance,
        total_paid_out = status.total_paid_out,
        "vault ready"
    );

    // --- Metrics ---
    let node_metrics = Arc::new(NodeMetrics::new());
    node_metrics.observe_totals(status.total_balance, status.total_paid_out);

    // --- Event broadcast ---
    let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

    // --- Application state ---
    let app_state = api::AppState {
        version: format!(
            "{} (protocol {})",
            env!("CARGO_PKG_VERSION"),
            chequebook_protocol::config::PROTOCOL_VERSION,
        ),
        service: Arc::clone(&service),
        event_tx,
        metrics: Arc::clone(&node_metrics),
    };

    // --- API server ---
    let api_router = api::create_router(app_state);
    let api_addr = format!("0.0.0.0:{}", args.rpc_port);
    let api_listener = tokio::net::TcpListener::bind(&api_addr)
        .await
        .with_context(|| format!("failed to bind API listener on {}", api_addr))?;
    tracing::info!("API server listening on {}", api_addr);

    // --- Metrics server ---
    let metrics_router = axum::Router::new()
        .route("/metrics", axum::routing::get(metrics::metrics_handler))
        .with_state(Arc::clone(&node_metrics));
    let metrics_addr = format!("0.0.0.0:{}", args.metrics_port);
    let metrics_listener = tokio::net::TcpListener::bind(&metrics_addr)
        .await
        .with_context(|| format!("failed to bind metrics listener on {}", metrics_addr))?;
    tracing::info!("Metrics server listening on {}", metrics_addr);

    // --- Serve ---
    tokio::select! {
        res = axum::serve(api_listener, api_router) => {
            if let Err(e) = res {
                tracing::error!("API server error: {}", e);
            }
        }
        res = axum::serve(metrics_listener, metrics_router) => {
            if let Err(e) = res {
                tracing::error!("Metrics server error: {}", e);
            }
        }
        res = shutdown_signal() => {
            res?;
            tracing::info!("shutdown signal received, draining connections");
        }
    }

    service.flush().context("failed to flush store")?;
    tracing::info!("chequebook-node stopped");
    Ok(())
}

/// Creates the data directory, issuer key and vault manifest.
fn init_node(args: cli::InitArgs) -> Result<()> {
    logging::init_logging("chequebook_node=info", LogFormat::Pretty);

    let data_dir = &args.data_dir;
    tracing::info!(data_dir = %data_dir.display(), "initializing vault");

    let keypair = match &args.issuer_key {
        Some(hex_key) => Keypair::from_hex(hex_key).context("invalid --issuer-key")?,
        None => Keypair::generate(),
    };
    let (manifest, key_path) = manifest::initialize_data_dir(data_dir, &keypair, args.force)?;

    tracing::info!(
        issuer = %manifest.issuer,
        vault_id = %manifest.vault_id,
        key_path = %key_path.display(),
        "vault initialized"
    );

    println!("Vault initialized successfully.");
    println!("  Data directory : {}", data_dir.display());
    println!("  Vault id       : {}", manifest.vault_id);
    println!("  Issuer         : {}", manifest.issuer);
    println!("  Issuer key     : {}", key_path.display());

    Ok(())
}

/// Queries a running node's status endpoint and prints the result.
async fn query_status(args: cli::StatusArgs) -> Result<()> {
    let url = format!("{}/status", args.rpc_url.trim_end_matches('/'));
    let body = http_get(&url).await?;
    println!("{}", body);
    Ok(())
}

/// Minimal HTTP/1.1 GET over a tokio TCP stream.
async fn http_get(url: &str) -> Result<String> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let target = HttpTarget::parse(url)?;
    let addr = format!("{}:{}", target.host, target.port);
    let mut stream = tokio::net::TcpStream::connect(&addr)
        .await
        .with_context(|| format!("failed to connect to {}", addr))?;

    let request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
        target.path, target.host,
    );
    stream.write_all(request.as_bytes()).await?;
    stream.shutdown().await?;

    let mut buf = Vec::new();
    stream.read_to_end(&mut buf).await?;
    let response = String::from_utf8_lossy(&buf);

    // Everything after the first blank line is the body.
    let body = response
        .split_once("\r\n\r\n")
        .map(|(_, b)| b.to_string())
        .unwrap_or_else(|| response.to_string());

    Ok(body)
}

/// Host, port and path of a plain `http://` URL.
#[derive(Debug, PartialEq, Eq)]
struct HttpTarget {
    host: String,
    port: u16,
    path: String,
}

impl HttpTarget {
    fn parse(url: &str) -> Result<Self> {
        if url.starts_with("https://") {
            bail!("https is not supported by the status command: {}", url);
        }
        let rest = url.strip_prefix("http://").unwrap_or(url);

        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };
        // A bracketed IPv6 literal may contain ':' itself.
        let port_sep = match authority.rfind(']') {
            Some(close) => authority[close..].find(':').map(|i| close + i),
            None => authority.rfind(':'),
        };
        let (host, port) = match port_sep {
            Some(i) => {
                let port = authority[i + 1..]
                    .parse::<u16>()
                    .with_context(|| format!("bad port in {}", url))?;
                (&authority[..i], port)
            }
            None => (authority, 80),
        };
        if host.is_empty() {
            bail!("missing host in URL: {}", url);
        }

        Ok(Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
        })
    }
}

/// Prints version information to stdout.
fn print_version() {
    println!("chequebook-node {}", env!("CARGO_PKG_VERSION"));
    println!("protocol        {}", chequebook_protocol::config::PROTOCOL_VERSION);
    println!(
        "signing         {}",
        chequebook_protocol::config::SIGNING_ALGORITHM
    );
}

/// Waits for SIGINT (Ctrl+C) or SIGTERM, whichever comes first.
///
/// On non-Unix platforms, only Ctrl+C is supported.
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        let mut terminate = signal::unix::signal(signal::unix::SignalKind::terminate())
            .context("failed to install SIGTERM handler")?;
        tokio::select! {
            res = signal::ctrl_c() => res.context("failed to listen for Ctrl+C")?,
            _ = terminate.recv() => {}
        }
    }

    #[cfg(not(unix))]
    signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl+C")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_status_urls() {
        assert_eq!(
            HttpTarget::parse("http://127.0.0.1:9841/status").unwrap(),
            HttpTarget {
                host: "127.0.0.1".into(),
                port: 9841,
                path: "/status".into(),
            }
        );
        assert_eq!(HttpTarget::parse("localhost").unwrap().port, 80);
        assert_eq!(HttpTarget::parse("localhost").unwrap().path, "/");
        assert!(HttpTarget::parse("https://node").is_err());
        assert!(HttpTarget::parse("http://:80/").is_err());
        assert!(HttpTarget::parse("http://host:notaport/").is_err());
    }

    #[test]
    fn parses_ipv6_status_urls() {
        let bare = HttpTarget::parse("http://[::1]/status").unwrap();
        assert_eq!(bare.host, "[::1]");
        assert_eq!(bare.port, 80);
        assert_eq!(bare.path, "/status");

        let with_port = HttpTarget::parse("http://[fe80::2]:9841").unwrap();
        assert_eq!(with_port.host, "[fe80::2]");
        assert_eq!(with_port.port, 9841);
        assert_eq!(with_port.path, "/");
    }
}
