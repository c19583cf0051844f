#![forbid(unsafe_code)]

//! `code-reloader`: serves a page site that reloads live as its sources change.
//!
//! Bootstraps configuration, builds the reload coordinator over the
//! configured source tree, and exposes it through the HTTP host adapter
//! until a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use code_reloader::config::HostConfig;
use code_reloader::host::{builtin_resolver, serve_http, PageDefiner, SiteLifecycle};
use code_reloader::loader::LoaderContext;
use code_reloader::watch::FsWatchBackend;
use code_reloader::{AppError, ReloadCoordinator, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "code-reloader", about = "Live-reloading page server", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the configured HTTP port.
    #[arg(long)]
    port: Option<u16>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("code-reloader bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let mut config = HostConfig::load_from_path(&args.config)?;
    if let Some(port) = args.port {
        config.http_port = port;
    }
    info!(
        source_root = %config.source_root.display(),
        target = %config.target,
        excluded = config.exclude.len(),
        "configuration loaded"
    );

    // ── Build the coordinator ───────────────────────────
    let context = LoaderContext::new(config.layout(), Arc::new(PageDefiner))
        .with_resolver(Arc::new(builtin_resolver()?))
        .with_exclusions(config.exclusions())
        .with_backend(Arc::new(FsWatchBackend));
    let coordinator = ReloadCoordinator::new(SiteLifecycle::new(config.target.clone()), context);

    // Fail fast on a target that cannot be built at all.
    let generation = coordinator.set_up().await?;
    info!(generation = generation.id(), "initial generation ready");
    drop(generation);

    // ── Start the HTTP adapter ──────────────────────────
    let addr = config.http_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::Io(format!("failed to bind {addr}: {err}")))?;

    let ct = CancellationToken::new();
    let server_ct = ct.clone();
    let server_coordinator = coordinator.clone();
    let server_handle = tokio::spawn(async move {
        if let Err(err) = serve_http(server_coordinator, listener, server_ct).await {
            error!(%err, "http host adapter failed");
        }
    });

    info!(%addr, "code-reloader ready");

    // ── Wait for shutdown signal ────────────────────────
    let signal = shutdown_signal().await;
    info!(signal, "shutdown requested; draining requests");
    ct.cancel();

    if let Err(err) = server_handle.await {
        error!(%err, "http host adapter task did not finish cleanly");
    }
    coordinator.shutdown().await;
    info!("code-reloader shut down");

    Ok(())
}

/// Resolve once the process is asked to stop; returns which request it was.
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => tokio::select! {
                () = wait_for_ctrl_c() => "ctrl-c",
                _ = term.recv() => "SIGTERM",
            },
            Err(err) => {
                tracing::warn!(%err, "SIGTERM listener unavailable; reloader stops on ctrl-c only");
                wait_for_ctrl_c().await;
                "ctrl-c"
            }
        }
    }

    #[cfg(not(unix))]
    {
        wait_for_ctrl_c().await;
        "ctrl-c"
    }
}

async fn wait_for_ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "ctrl-c listener failed; stopping the reloader");
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_target(false);

    let installed = match log_format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().with_current_span(true).try_init(),
    };
    installed.map_err(|err| AppError::Config(format!("cannot install log subscriber: {err}")))
}
