//! Append-only artifact store.
//!
//! One file per processed failure, in a flat directory, named by dedup key.
//! The file's existence is the dedup check, so writes must never be
//! observable half-done: an artifact is written to a temp file in the same
//! directory and renamed into place, and an existing key is never
//! overwritten or deleted.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use thiserror::Error;

use crate::dedup::DedupKey;
use crate::trace::CanonicalTrace;
use crate::wire::{BugKind, BugReport};

/// What the diagnostic replay established about the reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// The replay reproduced a failure.
    Reproduced,
    /// The replay exited cleanly even though a bug was reported.
    PassedUnexpectedly,
}

impl ReplayOutcome {
    /// Tag used in artifact bodies and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Reproduced => "reproduced",
            Self::PassedUnexpectedly => "passed-unexpectedly",
        }
    }
}

impl std::fmt::Display for ReplayOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted record of one processed report.
///
/// Immutable once constructed; the rendered body is both the artifact file
/// content and the issue body.
#[derive(Debug, Clone)]
pub struct Artifact {
    /// The validated wire report that triggered processing.
    pub report: BugReport,
    /// Failure mode established by the replay. Differs from
    /// `report.kind` when the replay reclassified the failure.
    pub effective_kind: BugKind,
    /// Canonicalized stack trace, when one was recognized.
    pub canonical_trace: Option<CanonicalTrace>,
    /// Simulator parameter lines echoed from the diagnostic output.
    pub parameters: Vec<String>,
    /// Full captured diagnostic log.
    pub log: String,
    /// Replay disposition.
    pub outcome: ReplayOutcome,
    /// Wall-clock time the artifact was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl Artifact {
    /// Renders the human-readable body persisted to disk and submitted as
    /// the issue text.
    #[must_use]
    pub fn render_body(&self) -> String {
        use std::fmt::Write as _;

        let mut body = String::new();
        let _ = writeln!(body, "bug kind: {}", self.effective_kind);
        if self.effective_kind != self.report.kind {
            let _ = writeln!(
                body,
                "note: reported as {} but replay produced {}",
                self.report.kind, self.effective_kind
            );
        }
        let _ = writeln!(body, "seed: {}", self.report.seed);
        let _ = writeln!(body, "commit: {}", self.report.commit);
        let _ = writeln!(
            body,
            "recorded: {}",
            self.recorded_at.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        let _ = writeln!(body, "outcome: {}", self.outcome);
        if self.outcome == ReplayOutcome::PassedUnexpectedly {
            let _ = writeln!(
                body,
                "note: the replay exited cleanly; the failure did not reproduce"
            );
        }

        if !self.parameters.is_empty() {
            body.push_str("\nsimulator parameters:\n");
            for line in &self.parameters {
                let _ = writeln!(body, "    {line}");
            }
        }

        if let Some(trace) = &self.canonical_trace {
            body.push_str("\ncanonical stack trace:\n");
            body.push_str(trace.as_str());
        }

        body.push_str("\ndiagnostic log:\n");
        body.push_str(&self.log);
        if !self.log.ends_with('\n') {
            body.push('\n');
        }
        body
    }
}

/// Store failure.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    /// An artifact with this key is already on disk.
    #[error("artifact already exists for key {key}")]
    AlreadyExists {
        /// The colliding key.
        key: String,
    },

    /// Filesystem failure.
    #[error("artifact store I/O: {0}")]
    Io(#[from] std::io::Error),
}

/// Flat-directory artifact store keyed by dedup key.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Opens (and creates if absent) the store directory.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the directory cannot be created.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Returns the store root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether an artifact with this key has been persisted.
    #[must_use]
    pub fn exists(&self, key: &DedupKey) -> bool {
        self.entry_path(key).exists()
    }

    /// Persists an artifact under its key.
    ///
    /// The body is written to a temp file in the store directory and
    /// renamed into place, so `exists` never observes a partial artifact.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] if the key is taken (artifacts
    /// are never overwritten) and [`StoreError::Io`] on filesystem failure.
    pub fn put(&self, key: &DedupKey, artifact: &Artifact) -> Result<PathBuf, StoreError> {
        let path = self.entry_path(key);

        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        tmp.write_all(artifact.render_body().as_bytes())?;
        tmp.flush()?;

        tmp.persist_noclobber(&path).map_err(|err| {
            if err.error.kind() == std::io::ErrorKind::AlreadyExists {
                StoreError::AlreadyExists {
                    key: key.as_str().to_string(),
                }
            } else {
                StoreError::Io(err.error)
            }
        })?;

        Ok(path)
    }

    fn entry_path(&self, key: &DedupKey) -> PathBuf {
        self.root.join(key.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{BugKind, CommitId, COMMIT_SIZE};

    fn artifact(outcome: ReplayOutcome) -> Artifact {
        let report = BugReport {
            kind: BugKind::Correctness,
            seed: 42,
            commit: CommitId::from_bytes([0xab; COMMIT_SIZE]),
        };
        Artifact {
            report,
            effective_kind: BugKind::Correctness,
            canonical_trace: None,
            parameters: vec!["replica_count=3".to_string()],
            log: "info(simulator): seed=42\n".to_string(),
            outcome,
            recorded_at: Utc::now(),
        }
    }

    fn key() -> DedupKey {
        DedupKey::seed_keyed(
            BugKind::Correctness,
            42,
            &CommitId::from_bytes([0xab; COMMIT_SIZE]),
        )
    }

    #[test]
    fn put_then_exists() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();

        assert!(!store.exists(&key()));
        let path = store.put(&key(), &artifact(ReplayOutcome::Reproduced)).unwrap();
        assert!(store.exists(&key()));

        let body = std::fs::read_to_string(path).unwrap();
        assert!(body.contains("bug kind: correctness"));
        assert!(body.contains("seed: 42"));
        assert!(body.contains("replica_count=3"));
    }

    #[test]
    fn never_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();

        store.put(&key(), &artifact(ReplayOutcome::Reproduced)).unwrap();
        let before = std::fs::read_to_string(dir.path().join(key().as_str())).unwrap();

        let err = store
            .put(&key(), &artifact(ReplayOutcome::PassedUnexpectedly))
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));

        let after = std::fs::read_to_string(dir.path().join(key().as_str())).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        store.put(&key(), &artifact(ReplayOutcome::Reproduced)).unwrap();

        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].to_str().unwrap(), key().as_str());
    }

    #[test]
    fn unexpected_pass_is_annotated() {
        let body = artifact(ReplayOutcome::PassedUnexpectedly).render_body();
        assert!(body.contains("outcome: passed-unexpectedly"));
        assert!(body.contains("did not reproduce"));
    }

    #[test]
    fn kind_mismatch_is_annotated() {
        let mut a = artifact(ReplayOutcome::Reproduced);
        a.effective_kind = BugKind::Crash;
        let body = a.render_body();
        assert!(body.contains("bug kind: crash"));
        assert!(body.contains("reported as correctness but replay produced crash"));
    }
}
