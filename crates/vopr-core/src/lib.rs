//! # vopr-core
//!
//! Core library for the VOPR hub, the central collector of the randomized
//! simulation fleet. Workers run the simulator on random seeds and report
//! failures to the hub as compact binary messages; the hub replays each
//! failure against the exact source revision it occurred on, fingerprints
//! the resulting stack trace, and files an issue with the upstream tracker.
//!
//! ## Features
//!
//! - **Wire protocol**: the 45-byte checksummed bug report exchanged between
//!   workers and the hub
//! - **Trace canonicalization**: machine-independent normalization of
//!   simulator stack traces
//! - **Artifact store**: append-only, atomically written failure records
//!   keyed for deduplication
//! - **Revision resolution**: git working-copy management for replaying a
//!   failure on the revision that produced it
//! - **Tracker integration**: candidate-branch enumeration and issue filing
//!   against the upstream hosting API
//! - **Simulator driver**: spawning and byte-accurate output capture of the
//!   simulator child process

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod config;
pub mod dedup;
pub mod publisher;
pub mod resolver;
pub mod simulator;
pub mod store;
pub mod trace;
pub mod tracker;
pub mod wire;

pub use config::{ConfigError, HubConfig, OrganizerConfig, WorkerConfig};
pub use dedup::DedupKey;
pub use store::{Artifact, ArtifactStore, ReplayOutcome};
pub use trace::{CanonicalTrace, TraceCanonicalizer};
pub use wire::{BugKind, BugReport, CommitId, WireError};
