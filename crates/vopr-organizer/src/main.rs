//! vopr-organizer - per-slot revision assignment.
//!
//! Invoked periodically by an external timer, once per host. Reads the
//! fleet geometry from the environment, asks the tracker for open change
//! requests labelled `vopr`, computes the full fleet assignment, and
//! checks out this slot's revision into its working directory
//! (`{TIGERBEETLE_DIRECTORY}{CURRENT_VOPR}`).

use std::process::ExitCode;

use anyhow::Context as _;
use clap::Parser;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use vopr_core::config::OrganizerConfig;
use vopr_core::resolver::RevisionResolver;
use vopr_core::tracker::TrackerClient;

mod assign;

use assign::{assign_slots, Assignment, MAINLINE_BRANCH};

/// vopr-organizer - fuzzing slot assignment
#[derive(Parser, Debug)]
#[command(name = "vopr-organizer")]
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

    let config = match OrganizerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration failure");
            return ExitCode::FAILURE;
        },
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "organizer failed");
            ExitCode::FAILURE
        },
    }
}

async fn run(config: OrganizerConfig) -> anyhow::Result<()> {
    let tracker =
        TrackerClient::new(&config.repository_url).context("constructing tracker client")?;

    let candidates = tracker
        .list_vopr_candidates(config.num_voprs)
        .await
        .context("enumerating vopr candidates")?;
    info!(count = candidates.len(), "candidate branches resolved");

    let assignments = assign_slots(config.num_voprs, &candidates);
    for (index, assignment) in assignments.iter().enumerate() {
        debug!(slot = index + 1, assignment = %assignment, "fleet assignment");
    }

    // Slots are numbered from 1; a slot beyond the assignment list (which
    // cannot happen with a well-formed config) does nothing.
    let slot = config.current_vopr;
    if slot < 1 || slot > assignments.len() {
        warn!(slot, slots = assignments.len(), "slot outside assignment range");
        return Ok(());
    }

    let slot_dir = config.slot_directory(slot);
    let resolver = RevisionResolver::new(&slot_dir);
    let assignment = &assignments[slot - 1];
    info!(slot, dir = %slot_dir.display(), assignment = %assignment, "checking out");

    match assignment {
        Assignment::Mainline => resolver
            .checkout_branch(MAINLINE_BRANCH)
            .await
            .context("checking out mainline")?,
        Assignment::Candidate(candidate) => resolver
            .checkout_commit(&candidate.head)
            .await
            .with_context(|| format!("checking out candidate {}", candidate.branch))?,
    }

    info!(slot, assignment = %assignment, "slot assignment complete");
    Ok(())
}
