//! The worker loop and report transmission.

use std::time::Duration;

use anyhow::Context as _;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};
use vopr_core::config::WorkerConfig;
use vopr_core::resolver::RevisionResolver;
use vopr_core::simulator::{Mode, Simulator};
use vopr_core::wire::{BugReport, ACK_BYTE};

/// How long to wait for the hub's acknowledgement byte.
const ACK_DEADLINE: Duration = Duration::from_secs(10);

/// Runs seeds forever. Returns only on a fatal condition: a simulator
/// that cannot be spawned, a seed whose diagnostic re-run exits
/// differently from its fast run (the determinism contract is broken and
/// every further report would be suspect), or an unreadable working copy.
pub async fn run(config: WorkerConfig) -> anyhow::Result<()> {
    let simulator = Simulator::new(&config.working_directory);
    let resolver = RevisionResolver::new(&config.working_directory);

    info!(
        work_dir = %config.working_directory.display(),
        hub = %config.hub_address,
        "worker started"
    );

    loop {
        let seed: u64 = rand::random();
        debug!(seed, "running seed");

        let fast = simulator
            .run(seed, Mode::Fast)
            .await
            .context("fast-mode run failed")?;
        if fast.exit_code == 0 {
            continue;
        }

        info!(seed, exit_code = fast.exit_code, "failure found, confirming");
        let diagnostic = simulator
            .run(seed, Mode::Diagnostic)
            .await
            .context("diagnostic-mode run failed")?;
        if diagnostic.exit_code != fast.exit_code {
            anyhow::bail!(
                "seed {seed} is nondeterministic: fast exit {}, diagnostic exit {}",
                fast.exit_code,
                diagnostic.exit_code
            );
        }

        let disposition = diagnostic
            .disposition()
            .with_context(|| format!("seed {seed} exit code is not a failure signal"))?;
        let Some(kind) = disposition.bug_kind() else {
            anyhow::bail!("seed {seed} exited cleanly in diagnostic mode after failing fast mode");
        };

        let commit = resolver
            .head_commit()
            .await
            .context("reading working-copy revision")?;

        let report = BugReport { kind, seed, commit };
        match send_report(&config.hub_address, &report).await {
            Ok(true) => info!(seed, kind = %kind, commit = %commit, "report accepted by hub"),
            Ok(false) => warn!(seed, "hub did not acknowledge report"),
            Err(e) => warn!(seed, error = %e, "failed to send report"),
        }
    }
}

/// Sends one encoded report and waits for the acknowledgement byte.
///
/// Returns `Ok(false)` when the hub closed the connection or let the
/// deadline pass without acknowledging; the caller just logs and moves on.
async fn send_report(hub_address: &str, report: &BugReport) -> anyhow::Result<bool> {
    let mut stream = TcpStream::connect(hub_address)
        .await
        .with_context(|| format!("connecting to hub at {hub_address}"))?;
    stream
        .write_all(&report.encode())
        .await
        .context("writing report")?;

    let mut ack = [0u8; 1];
    match tokio::time::timeout(ACK_DEADLINE, stream.read_exact(&mut ack)).await {
        Err(_) => Ok(false),
        Ok(Err(_)) => Ok(false),
        Ok(Ok(_)) => Ok(ack[0] == ACK_BYTE),
    }
}
