//! Working-copy revision resolution.
//!
//! The hub replays every failure against the exact revision it occurred
//! on, in a single working copy owned by the processing task. The resolver
//! materializes revisions there and verifies the result before any replay
//! runs.
//!
//! Checkout sequence: fetch all refs from origin, check out the requested
//! revision, then read back HEAD (or the current branch) and require it to
//! match. A checkout that cannot be verified is treated as failed.
//!
//! All git invocations disable prompts and system configuration
//! (`GIT_TERMINAL_PROMPT=0`, `GIT_CONFIG_NOSYSTEM=1`) so a misconfigured
//! host cannot hang or redirect the hub.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use thiserror::Error;
use tokio::process::Command;

use crate::wire::CommitId;

/// Revision resolution failure.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ResolveError {
    /// `git fetch` failed; the mirror may be unreachable.
    #[error("fetch failed: {reason}")]
    FetchFailed {
        /// Git's stderr, or the spawn error.
        reason: String,
    },

    /// `git checkout` failed; the revision is likely unknown.
    #[error("checkout failed: {reason}")]
    CheckoutFailed {
        /// Git's stderr, or the spawn error.
        reason: String,
    },

    /// The working copy does not match the requested revision after
    /// checkout.
    #[error("checkout verification failed: expected {expected}, found {actual}")]
    VerificationFailed {
        /// Revision that was requested.
        expected: String,
        /// What the working copy reports.
        actual: String,
    },
}

/// Materializes revisions in a working copy.
#[derive(Debug, Clone)]
pub struct RevisionResolver {
    work_dir: PathBuf,
}

impl RevisionResolver {
    /// Creates a resolver over an existing clone at `work_dir`.
    #[must_use]
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
        }
    }

    /// Returns the working-copy path.
    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Checks out a specific commit and verifies HEAD equals it.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::FetchFailed`] if the fetch fails,
    /// [`ResolveError::CheckoutFailed`] if the commit cannot be checked
    /// out (typically an unknown revision), and
    /// [`ResolveError::VerificationFailed`] if HEAD disagrees afterwards.
    pub async fn checkout_commit(&self, commit: &CommitId) -> Result<(), ResolveError> {
        let hex = commit.to_hex();

        self.git(&["fetch", "--all"], |reason| ResolveError::FetchFailed {
            reason: reason.to_string(),
        })
        .await?;

        self.git(&["checkout", &hex], |reason| ResolveError::CheckoutFailed {
            reason: reason.to_string(),
        })
        .await?;

        let head = self
            .git(&["rev-parse", "HEAD"], |reason| {
                ResolveError::CheckoutFailed {
                    reason: reason.to_string(),
                }
            })
            .await?;
        let head = head.trim();
        if head != hex {
            return Err(ResolveError::VerificationFailed {
                expected: hex,
                actual: head.to_string(),
            });
        }

        Ok(())
    }

    /// Checks out a branch by name and verifies it is current.
    ///
    /// Used by the organizer, which assigns mainline by branch name.
    ///
    /// # Errors
    ///
    /// Same taxonomy as [`checkout_commit`](Self::checkout_commit).
    pub async fn checkout_branch(&self, branch: &str) -> Result<(), ResolveError> {
        self.git(&["fetch", "--all"], |reason| ResolveError::FetchFailed {
            reason: reason.to_string(),
        })
        .await?;

        self.git(&["checkout", branch], |reason| ResolveError::CheckoutFailed {
            reason: reason.to_string(),
        })
        .await?;

        let current = self
            .git(&["branch", "--show-current"], |reason| {
                ResolveError::CheckoutFailed {
                    reason: reason.to_string(),
                }
            })
            .await?;
        let current = current.trim();
        if current != branch {
            return Err(ResolveError::VerificationFailed {
                expected: branch.to_string(),
                actual: current.to_string(),
            });
        }

        Ok(())
    }

    /// Reads the revision the working copy is currently on.
    ///
    /// Workers use this to stamp outgoing reports with the revision they
    /// are fuzzing.
    ///
    /// # Errors
    ///
    /// Returns [`ResolveError::CheckoutFailed`] if HEAD cannot be read or
    /// does not parse as an object id.
    pub async fn head_commit(&self) -> Result<CommitId, ResolveError> {
        let head = self
            .git(&["rev-parse", "HEAD"], |reason| {
                ResolveError::CheckoutFailed {
                    reason: reason.to_string(),
                }
            })
            .await?;
        CommitId::from_hex(head.trim()).map_err(|_| ResolveError::CheckoutFailed {
            reason: format!("HEAD is not an object id: {}", head.trim()),
        })
    }

    /// Runs one git command in the working copy and returns its stdout.
    async fn git(
        &self,
        args: &[&str],
        make_error: impl Fn(&str) -> ResolveError,
    ) -> Result<String, ResolveError> {
        let output = Command::new("git")
            .env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_CONFIG_NOSYSTEM", "1")
            .current_dir(&self.work_dir)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| make_error(&format!("failed to spawn git: {e}")))?;

        if !output.status.success() {
            let mut reason = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if reason.is_empty() {
                reason = String::from_utf8_lossy(&output.stdout).trim().to_string();
            }
            if reason.is_empty() {
                reason = "git command failed with no output".to_string();
            }
            return Err(make_error(&reason));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
