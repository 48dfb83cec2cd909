//! vopr-hub - central collector for the randomized simulation fleet.
//!
//! Startup order matters: logging first (so configuration failures are
//! reported through it), then the immutable environment-derived config,
//! then the collaborators, then the two long-lived tasks (ingress server
//! and processing pipeline) wired through a bounded queue.
//!
//! The hub exits 0 only on an external signal; configuration problems
//! exit 1 immediately. A failed artifact write also terminates the hub
//! (the external service manager restarts it): without its append-only
//! store the dedup contract cannot be kept.

use std::process::ExitCode;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vopr_core::config::HubConfig;
use vopr_core::publisher::IssuePublisher;
use vopr_core::resolver::RevisionResolver;
use vopr_core::simulator::Simulator;
use vopr_core::store::ArtifactStore;
use vopr_core::trace::TraceCanonicalizer;
use vopr_core::tracker::TrackerClient;
use vopr_hub::pipeline::Pipeline;
use vopr_hub::server;

/// vopr-hub - bug report collector and replayer
#[derive(Parser, Debug)]
#[command(name = "vopr-hub")]
#[command(version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn init_tracing(debug: bool) {
    let filter = EnvFilter::new(if debug { "debug" } else { "info" });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.debug);

    let config = match HubConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration failure");
            return ExitCode::FAILURE;
        },
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "hub terminated");
            ExitCode::FAILURE
        },
    }
}

async fn run(config: HubConfig) -> anyhow::Result<()> {
    use anyhow::Context as _;

    let store = ArtifactStore::open(&config.issue_directory)
        .with_context(|| format!("opening artifact store at {}", config.issue_directory.display()))?;
    let resolver = RevisionResolver::new(&config.working_directory);
    let simulator = Simulator::new(&config.working_directory);
    let canonicalizer = TraceCanonicalizer::new(config.source_root_name());
    let tracker = TrackerClient::new(&config.repository_url)
        .context("constructing tracker client")?
        .with_token(config.developer_token.clone());
    let publisher = IssuePublisher::new(tracker);

    let listener = TcpListener::bind(&config.listen_address)
        .await
        .with_context(|| format!("binding {}", config.listen_address))?;

    let (queue_tx, queue_rx) = mpsc::channel(server::QUEUE_CAPACITY);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let pipeline = Pipeline::new(
        store,
        resolver,
        simulator,
        canonicalizer,
        publisher,
        queue_rx,
        shutdown_rx.clone(),
    );

    let mut server_task = tokio::spawn(server::run(listener, queue_tx, shutdown_rx));
    let mut pipeline_task = tokio::spawn(pipeline.run());

    let mut sigterm = signal(SignalKind::terminate()).context("registering SIGTERM")?;
    let mut sigint = signal(SignalKind::interrupt()).context("registering SIGINT")?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("received SIGTERM, shutting down");
        },
        _ = sigint.recv() => {
            info!("received SIGINT, shutting down");
        },
        result = &mut pipeline_task => {
            // The pipeline only stops on its own for a fatal store error.
            let _ = shutdown_tx.send(true);
            let _ = server_task.await;
            result.context("pipeline task panicked")??;
            anyhow::bail!("pipeline exited unexpectedly");
        },
        result = &mut server_task => {
            let _ = shutdown_tx.send(true);
            let _ = pipeline_task.await;
            result.context("ingress task panicked")??;
            anyhow::bail!("ingress server exited unexpectedly");
        },
    }

    let _ = shutdown_tx.send(true);
    server_task
        .await
        .context("ingress task panicked")?
        .context("ingress server failed")?;
    pipeline_task
        .await
        .context("pipeline task panicked")?
        .context("pipeline failed")?;

    info!("hub shutdown complete");
    Ok(())
}
