//! Dedup keys for bug reports.
//!
//! A key is a filesystem-safe string; two reports are duplicates exactly
//! when their keys are byte-equal, and the artifact store uses the key as
//! the artifact filename, so key presence on disk means "already reported".
//!
//! Correctness and liveness failures are surfaced by a fixed set of
//! simulator assertions, so `(kind, seed, commit)` identifies them and the
//! key can be computed from wire data alone, before any replay. Crash
//! failures need the canonical trace: one `(seed, commit)` pair can crash
//! at different sites across replays of different reports, and different
//! seeds can reach the same crash site.

use crate::trace::CanonicalTrace;
use crate::wire::{BugKind, BugReport, CommitId};

/// A dedup key. Formats:
///
/// - correctness: `1_{seed}_{commit_hex}`
/// - liveness: `2_{seed}_{commit_hex}`
/// - crash: `3_{commit_hex}_{trace_hash_hex}`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey(String);

impl DedupKey {
    /// Key for a correctness or liveness report, derivable from wire data.
    ///
    /// Returns `None` for crash reports, whose key requires the replayed
    /// trace.
    #[must_use]
    pub fn early(report: &BugReport) -> Option<Self> {
        match report.kind {
            BugKind::Correctness | BugKind::Liveness => Some(Self(format!(
                "{}_{}_{}",
                report.kind.as_wire(),
                report.seed,
                report.commit.to_hex()
            ))),
            BugKind::Crash => None,
        }
    }

    /// Key for a seed-identified failure of the given kind.
    ///
    /// Used when the replay reclassifies a crash report as a correctness
    /// or liveness failure.
    ///
    /// # Panics
    ///
    /// Panics if `kind` is [`BugKind::Crash`]; crash keys carry a trace
    /// hash, not a seed.
    #[must_use]
    pub fn seed_keyed(kind: BugKind, seed: u64, commit: &CommitId) -> Self {
        assert!(
            kind != BugKind::Crash,
            "crash keys are trace-keyed, not seed-keyed"
        );
        Self(format!("{}_{}_{}", kind.as_wire(), seed, commit.to_hex()))
    }

    /// Key for a crash failure, available only after replay.
    ///
    /// An absent trace is keyed by the hash of the empty byte string.
    #[must_use]
    pub fn crash(commit: &CommitId, trace: Option<&CanonicalTrace>) -> Self {
        let trace_hash = trace.map_or_else(crate::trace::empty_trace_hash_hex, |t| t.hash_hex());
        Self(format!(
            "{}_{}_{}",
            BugKind::Crash.as_wire(),
            commit.to_hex(),
            trace_hash
        ))
    }

    /// The key as a path-safe string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
