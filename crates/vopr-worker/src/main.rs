//! vopr-worker - one fuzzing slot of the simulation fleet.
//!
//! The worker is deliberately thin: generate a random seed, run the
//! simulator in fast mode, and on failure confirm the seed in diagnostic
//! mode before reporting it to the hub. It keeps no state, no queue, and
//! no retry schedule; a report the hub does not acknowledge is logged and
//! forgotten, because the failure is reproducible and the seed space is
//! endless.

use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;
use vopr_core::config::WorkerConfig;

mod runner;

/// vopr-worker - randomized simulator runner
#[derive(Parser, Debug)]
#[command(name = "vopr-worker")]
#[command(version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    let filter = EnvFilter::new(if args.debug { "debug" } else { "info" });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match WorkerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration failure");
            return ExitCode::FAILURE;
        },
    };

    match runner::run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "worker terminated");
            ExitCode::FAILURE
        },
    }
}
