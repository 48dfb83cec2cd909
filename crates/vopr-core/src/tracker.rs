//! Upstream tracker API client.
//!
//! The hub and the organizer talk to the source-hosting REST API for two
//! things: enumerating open change requests labelled `vopr` (candidate
//! branches for fuzzing slots) and filing issues for reproduced failures.
//! Both go through [`TrackerClient`], which owns one persistent HTTP
//! client with bounded timeouts.
//!
//! The issue-filing credential is held as a [`SecretString`] and only
//! exposed while the Authorization header is built.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::wire::CommitId;

/// REST API version header value.
const API_VERSION: &str = "2022-11-28";

/// Change requests fetched per page when enumerating candidates.
const PAGE_SIZE: usize = 100;

/// Label that marks a change request as a fuzzing candidate.
pub const CANDIDATE_LABEL: &str = "vopr";

/// Tracker interaction failure.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TrackerError {
    /// Transport-level failure (connect, timeout, TLS).
    #[error("tracker transport: {0}")]
    Transport(String),

    /// The API answered with a non-success status.
    #[error("tracker API error (status {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, as far as it could be read.
        message: String,
    },

    /// The response body did not decode.
    #[error("tracker response decode: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for TrackerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// A change request labelled as a fuzzing candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Branch name, split out of the API's `owner:branch` head label.
    pub branch: String,
    /// Head-of-branch commit id.
    pub head: CommitId,
}

/// A filed issue.
#[derive(Debug, Clone)]
pub struct IssueRef {
    /// Issue number assigned by the tracker.
    pub number: u64,
    /// Browser URL of the issue.
    pub url: String,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    labels: Vec<Label>,
    head: Head,
}

#[derive(Debug, Deserialize)]
struct Label {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Head {
    label: String,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct CreatedIssue {
    number: u64,
    html_url: String,
}

/// Client for the upstream tracker REST API.
#[derive(Debug, Clone)]
pub struct TrackerClient {
    base_url: String,
    token: Option<SecretString>,
    http: reqwest::Client,
}

impl TrackerClient {
    /// Creates a client for the repository API rooted at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns [`TrackerError::Transport`] if the HTTP client cannot be
    /// constructed.
    pub fn new(base_url: impl Into<String>) -> Result<Self, TrackerError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|e| TrackerError::Transport(e.to_string()))?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            http,
        })
    }

    /// Attaches the bearer credential used for issue filing.
    #[must_use]
    pub fn with_token(mut self, token: SecretString) -> Self {
        self.token = Some(token);
        self
    }

    /// Enumerates up to `count` open `vopr`-labelled change requests,
    /// newest first, paging until the count is reached or pages are
    /// exhausted.
    ///
    /// Heads whose label or sha is malformed are skipped rather than
    /// failing the whole enumeration.
    ///
    /// # Errors
    ///
    /// Returns a [`TrackerError`] if a page request fails.
    pub async fn list_vopr_candidates(&self, count: usize) -> Result<Vec<Candidate>, TrackerError> {
        let mut candidates = Vec::new();
        let mut page = 1usize;

        while candidates.len() < count {
            let url = format!(
                "{}/pulls?state=open&per_page={PAGE_SIZE}&page={page}",
                self.base_url
            );
            let pulls: Vec<PullRequest> = self.get_json(&url).await?;
            let exhausted = pulls.len() < PAGE_SIZE;

            for pull in pulls {
                if !pull.labels.iter().any(|l| l.name == CANDIDATE_LABEL) {
                    continue;
                }
                // Head labels arrive as `owner:branch_name`.
                let Some((_, branch)) = pull.head.label.split_once(':') else {
                    continue;
                };
                if branch.is_empty() {
                    continue;
                }
                let Ok(head) = CommitId::from_hex(&pull.head.sha) else {
                    continue;
                };
                candidates.push(Candidate {
                    branch: branch.to_string(),
                    head,
                });
                if candidates.len() == count {
                    break;
                }
            }

            if exhausted {
                break;
            }
            page += 1;
        }

        Ok(candidates)
    }

    /// Files an issue.
    ///
    /// # Errors
    ///
    /// Returns a [`TrackerError`] on transport failure, non-success
    /// status, or an undecodable response.
    pub async fn create_issue(&self, title: &str, body: &str) -> Result<IssueRef, TrackerError> {
        let url = format!("{}/issues", self.base_url);
        let payload = json!({ "title": title, "body": body });

        let mut request = self
            .http
            .post(&url)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "vopr-hub")
            .header("X-GitHub-Api-Version", API_VERSION)
            .json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".to_string());
            return Err(TrackerError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let created: CreatedIssue = response.json().await?;
        Ok(IssueRef {
            number: created.number,
            url: created.html_url,
        })
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, url: &str) -> Result<T, TrackerError> {
        let response = self
            .http
            .get(url)
            .header("Accept", "application/vnd.github+json")
            .header("User-Agent", "vopr-hub")
            .header("X-GitHub-Api-Version", API_VERSION)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".to_string());
            return Err(TrackerError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}
