//! Issue publisher.
//!
//! Turns a persisted artifact into an issue on the upstream tracker.
//! Publishing is best-effort relative to persistence: the artifact is
//! already on disk when this runs, so a publish that exhausts its retries
//! is logged and abandoned, leaving the artifact for manual filing.

use std::time::Duration;

use tracing::warn;

use crate::store::{Artifact, ReplayOutcome};
use crate::tracker::{IssueRef, TrackerClient, TrackerError};

/// Attempts before giving up on the tracker.
pub const MAX_PUBLISH_ATTEMPTS: u32 = 5;

/// Backoff before the second attempt; doubled for each one after.
pub const PUBLISH_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Files issues for artifacts, with bounded exponential backoff.
#[derive(Debug, Clone)]
pub struct IssuePublisher {
    tracker: TrackerClient,
    backoff_base: Duration,
}

impl IssuePublisher {
    /// Wraps a tracker client (which must carry the filing credential).
    #[must_use]
    pub fn new(tracker: TrackerClient) -> Self {
        Self {
            tracker,
            backoff_base: PUBLISH_BACKOFF_BASE,
        }
    }

    /// Overrides the backoff base, for tests that exercise the retry path.
    #[must_use]
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Renders the issue title for an artifact.
    #[must_use]
    pub fn title(artifact: &Artifact) -> String {
        let base = format!(
            "VOPR {} failure: seed {} on {}",
            artifact.effective_kind,
            artifact.report.seed,
            artifact.report.commit.short_hex()
        );
        match artifact.outcome {
            ReplayOutcome::Reproduced => base,
            ReplayOutcome::PassedUnexpectedly => format!("{base} (passed unexpectedly)"),
        }
    }

    /// Submits the artifact as an issue, retrying transient failures.
    ///
    /// # Errors
    ///
    /// Returns the final [`TrackerError`] after all attempts fail.
    pub async fn publish(&self, artifact: &Artifact) -> Result<IssueRef, TrackerError> {
        let title = Self::title(artifact);
        let body = artifact.render_body();

        let mut attempt = 0u32;
        loop {
            match self.tracker.create_issue(&title, &body).await {
                Ok(issue) => return Ok(issue),
                Err(err) => {
                    attempt += 1;
                    if attempt >= MAX_PUBLISH_ATTEMPTS {
                        return Err(err);
                    }
                    let delay = backoff_delay(self.backoff_base, attempt);
                    warn!(
                        attempt,
                        delay_secs = delay.as_secs(),
                        error = %err,
                        "issue submission failed, backing off"
                    );
                    tokio::time::sleep(delay).await;
                },
            }
        }
    }
}

/// Delay preceding attempt `attempt + 1` (1-based completed attempts).
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base * 2u32.saturating_pow(attempt - 1)
}
