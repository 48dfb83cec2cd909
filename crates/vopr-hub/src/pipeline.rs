//! Report processing pipeline.
//!
//! Exactly one pipeline task consumes the report queue. Serialization is
//! not an implementation shortcut: every replay shares the single working
//! copy, and a replay is CPU- and disk-heavy, so items are processed to
//! completion strictly in arrival order.
//!
//! Each item walks an explicit state machine so progress is observable in
//! the diagnostic log:
//!
//! ```text
//! idle -> early-dedup-check -> resolving -> replaying ->
//! canonicalizing -> late-dedup-check -> persisting -> publishing -> idle
//! ```
//!
//! Correctness and liveness reports are deduplicated before the replay
//! (their key is derivable from wire data); crash reports only after it
//! (their key needs the canonical trace). When the replay's exit
//! disposition disagrees with the reported kind, the replay wins and the
//! mismatch is recorded in the artifact.
//!
//! Error policy per item: an unavailable revision or a broken replay is
//! logged and the item is dropped (no artifact, no issue). A failed issue
//! submission is logged and the artifact stays on disk for manual filing.
//! Only a failed artifact write is fatal: the hub cannot operate without
//! its append-only record.

use anyhow::Context as _;
use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use vopr_core::dedup::DedupKey;
use vopr_core::publisher::IssuePublisher;
use vopr_core::resolver::RevisionResolver;
use vopr_core::simulator::{ExitDisposition, Mode, Simulator};
use vopr_core::store::{Artifact, ArtifactStore, ReplayOutcome, StoreError};
use vopr_core::trace::{CanonicalTrace, TraceCanonicalizer};
use vopr_core::wire::{BugKind, BugReport};

use crate::server::PendingReport;

/// Pipeline stages, in processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Waiting for the next report.
    Idle,
    /// Consulting the store with a wire-derived key (kinds 1 and 2).
    EarlyDedupCheck,
    /// Materializing the reported revision in the working copy.
    Resolving,
    /// Running the simulator in diagnostic mode.
    Replaying,
    /// Normalizing the captured output.
    Canonicalizing,
    /// Consulting the store with the post-replay key.
    LateDedupCheck,
    /// Writing the artifact.
    Persisting,
    /// Filing the issue.
    Publishing,
}

impl Stage {
    /// Stage name as logged.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::EarlyDedupCheck => "early-dedup-check",
            Self::Resolving => "resolving",
            Self::Replaying => "replaying",
            Self::Canonicalizing => "canonicalizing",
            Self::LateDedupCheck => "late-dedup-check",
            Self::Persisting => "persisting",
            Self::Publishing => "publishing",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure mode and outcome established by the replay.
///
/// The replay's exit disposition overrides the wire kind; a clean exit
/// keeps the wire kind and flags the artifact as an unexpected pass.
#[must_use]
pub fn effective_kind(wire_kind: BugKind, disposition: ExitDisposition) -> (BugKind, ReplayOutcome) {
    match disposition.bug_kind() {
        Some(kind) => (kind, ReplayOutcome::Reproduced),
        None => (wire_kind, ReplayOutcome::PassedUnexpectedly),
    }
}

/// Dedup key under which the processed report is persisted.
///
/// Crash failures key on the trace fingerprint; everything else keys on
/// the seed. Computed from the effective kind, so a reclassified report
/// lands under the key of what actually happened.
#[must_use]
pub fn final_key(
    report: &BugReport,
    effective: BugKind,
    trace: Option<&CanonicalTrace>,
) -> DedupKey {
    match effective {
        BugKind::Crash => DedupKey::crash(&report.commit, trace),
        kind => DedupKey::seed_keyed(kind, report.seed, &report.commit),
    }
}

/// The single-consumer processing task.
pub struct Pipeline {
    store: ArtifactStore,
    resolver: RevisionResolver,
    simulator: Simulator,
    canonicalizer: TraceCanonicalizer,
    publisher: IssuePublisher,
    queue: mpsc::Receiver<PendingReport>,
    shutdown: watch::Receiver<bool>,
}

impl Pipeline {
    /// Assembles the pipeline over its collaborators and queue.
    #[must_use]
    pub fn new(
        store: ArtifactStore,
        resolver: RevisionResolver,
        simulator: Simulator,
        canonicalizer: TraceCanonicalizer,
        publisher: IssuePublisher,
        queue: mpsc::Receiver<PendingReport>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            store,
            resolver,
            simulator,
            canonicalizer,
            publisher,
            queue,
            shutdown,
        }
    }

    /// Consumes the queue until shutdown. The item in flight at shutdown
    /// is finished; items still queued are dropped (workers re-emit on
    /// future failures, and every failure is reproducible from its seed).
    ///
    /// # Errors
    ///
    /// Returns an error only for a failed artifact write, which is fatal
    /// to the hub.
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!("pipeline started");
        loop {
            self.transition(Stage::Idle);
            let item = tokio::select! {
                item = self.queue.recv() => {
                    match item {
                        Some(item) => item,
                        None => break,
                    }
                },
                changed = self.shutdown.changed() => {
                    // A dropped sender means the hub is going away too.
                    if changed.is_err() || *self.shutdown.borrow() {
                        break;
                    }
                    continue;
                },
            };
            self.process(item)
                .await
                .context("artifact persistence failed")?;
        }
        info!("pipeline stopped");
        Ok(())
    }

    /// Processes one report to completion.
    ///
    /// Every non-fatal failure is handled here by logging and returning;
    /// only [`StoreError`] escapes.
    async fn process(&self, item: PendingReport) -> Result<(), StoreError> {
        let report = item.report;
        info!(
            kind = %report.kind,
            seed = report.seed,
            commit = %report.commit,
            received_at = %item.received_at,
            "processing report"
        );

        self.transition(Stage::EarlyDedupCheck);
        if let Some(key) = DedupKey::early(&report) {
            if self.store.exists(&key) {
                info!(key = %key, "duplicate report, already filed");
                return Ok(());
            }
        }

        self.transition(Stage::Resolving);
        if let Err(e) = self.resolver.checkout_commit(&report.commit).await {
            warn!(
                commit = %report.commit,
                error = %e,
                "revision unavailable, dropping report"
            );
            return Ok(());
        }

        self.transition(Stage::Replaying);
        let run = match self.simulator.run(report.seed, Mode::Diagnostic).await {
            Ok(run) => run,
            Err(e) => {
                error!(seed = report.seed, error = %e, "replay failed, dropping report");
                return Ok(());
            },
        };
        let disposition = match run.disposition() {
            Ok(disposition) => disposition,
            Err(e) => {
                error!(seed = report.seed, error = %e, "replay exit unmapped, dropping report");
                return Ok(());
            },
        };

        self.transition(Stage::Canonicalizing);
        let trace = self.canonicalizer.canonicalize(&run.output);
        if trace.is_none() {
            debug!(seed = report.seed, "no stack trace recognized in replay output");
        }

        self.transition(Stage::LateDedupCheck);
        let (effective, outcome) = effective_kind(report.kind, disposition);
        let key = final_key(&report, effective, trace.as_ref());
        if self.store.exists(&key) {
            info!(key = %key, "duplicate failure after replay, already filed");
            return Ok(());
        }

        self.transition(Stage::Persisting);
        let parameters = run.parameters();
        let artifact = Artifact {
            report,
            effective_kind: effective,
            canonical_trace: trace,
            parameters,
            log: run.output,
            outcome,
            recorded_at: Utc::now(),
        };
        let path = match self.store.put(&key, &artifact) {
            Ok(path) => path,
            // The pipeline is the only writer, so a racing write cannot
            // happen; a key that appeared since the check means the store
            // already holds this failure.
            Err(StoreError::AlreadyExists { key }) => {
                info!(key = %key, "artifact already present, skipping");
                return Ok(());
            },
            Err(e) => return Err(e),
        };
        info!(key = %key, path = %path.display(), outcome = %artifact.outcome, "artifact persisted");

        self.transition(Stage::Publishing);
        match self.publisher.publish(&artifact).await {
            Ok(issue) => {
                info!(issue = issue.number, url = %issue.url, "issue filed");
            },
            Err(e) => {
                warn!(
                    key = %key,
                    error = %e,
                    "issue submission failed, artifact retained for manual filing"
                );
            },
        }

        Ok(())
    }

    fn transition(&self, stage: Stage) {
        debug!(stage = %stage, "pipeline stage");
    }
}

#[cfg(test)]
mod tests {
    use vopr_core::trace::TraceCanonicalizer;
    use vopr_core::wire::{CommitId, COMMIT_SIZE};

    use super::*;

    fn report(kind: BugKind) -> BugReport {
        BugReport {
            kind,
            seed: 5,
            commit: CommitId::from_bytes([0x33; COMMIT_SIZE]),
        }
    }

    #[test]
    fn replay_disposition_overrides_wire_kind() {
        let (kind, outcome) = effective_kind(BugKind::Correctness, ExitDisposition::Crash);
        assert_eq!(kind, BugKind::Crash);
        assert_eq!(outcome, ReplayOutcome::Reproduced);

        let (kind, outcome) = effective_kind(BugKind::Crash, ExitDisposition::Liveness);
        assert_eq!(kind, BugKind::Liveness);
        assert_eq!(outcome, ReplayOutcome::Reproduced);
    }

    #[test]
    fn clean_exit_keeps_wire_kind_and_flags_pass() {
        let (kind, outcome) = effective_kind(BugKind::Correctness, ExitDisposition::Pass);
        assert_eq!(kind, BugKind::Correctness);
        assert_eq!(outcome, ReplayOutcome::PassedUnexpectedly);
    }

    #[test]
    fn crash_reports_with_equal_traces_share_a_key() {
        let canonicalizer = TraceCanonicalizer::new("tigerbeetle");
        let trace = canonicalizer
            .canonicalize("src/a.zig:1:1: 0xaa in f (simulator)\n")
            .unwrap();

        let mut first = report(BugKind::Crash);
        let mut second = report(BugKind::Crash);
        first.seed = 100;
        second.seed = 200;

        let key_a = final_key(&first, BugKind::Crash, Some(&trace));
        let key_b = final_key(&second, BugKind::Crash, Some(&trace));
        assert_eq!(key_a, key_b);
    }

    #[test]
    fn seed_keyed_failures_differ_per_seed() {
        let mut first = report(BugKind::Liveness);
        let mut second = report(BugKind::Liveness);
        first.seed = 100;
        second.seed = 200;

        let key_a = final_key(&first, BugKind::Liveness, None);
        let key_b = final_key(&second, BugKind::Liveness, None);
        assert_ne!(key_a, key_b);
    }

    #[test]
    fn reclassified_report_keys_on_effective_kind() {
        // Reported as correctness, replay crashed: the key is a crash key
        // and no longer contains the seed.
        let r = report(BugKind::Correctness);
        let key = final_key(&r, BugKind::Crash, None);
        assert!(key.as_str().starts_with("3_"));

        // Matches the early key when nothing was reclassified.
        let r = report(BugKind::Correctness);
        assert_eq!(
            final_key(&r, BugKind::Correctness, None),
            DedupKey::early(&r).unwrap()
        );
    }

    #[test]
    fn stage_names_follow_processing_order() {
        let order = [
            Stage::Idle,
            Stage::EarlyDedupCheck,
            Stage::Resolving,
            Stage::Replaying,
            Stage::Canonicalizing,
            Stage::LateDedupCheck,
            Stage::Persisting,
            Stage::Publishing,
        ];
        let names: Vec<_> = order.iter().map(|s| s.as_str()).collect();
        assert_eq!(
            names,
            [
                "idle",
                "early-dedup-check",
                "resolving",
                "replaying",
                "canonicalizing",
                "late-dedup-check",
                "persisting",
                "publishing"
            ]
        );
    }
}
