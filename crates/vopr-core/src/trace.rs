//! Stack-trace canonicalization.
//!
//! Two replays of the same seed on the same revision must fingerprint
//! identically no matter which host ran them. The raw simulator output
//! fails that bar in two ways: frame paths carry the absolute prefix of
//! the host's working copy, and frame addresses depend on the load layout
//! of the process. Canonicalization removes both.
//!
//! A frame line has the shape emitted by the simulator's panic handler:
//!
//! ```text
//! /home/ci/tigerbeetle/src/vsr/replica.zig:4821:17: 0x55e2a41f03b2 in vsr.Replica.commit (simulator)
//! ```
//!
//! and canonicalizes to:
//!
//! ```text
//! src/vsr/replica.zig:4821:17: 0x???????????? in vsr.Replica.commit (simulator)
//! ```
//!
//! The trace block is the first contiguous run of frame-format lines in
//! the captured output. Symbol names, line and column numbers, and
//! already-relative paths pass through untouched.
//!
//! # Invariants
//!
//! - Canonicalization is idempotent: re-canonicalizing a canonical trace
//!   yields the same bytes. The address placeholder contains no hex
//!   digits, so it can never match the address pattern again.
//! - Output is byte-exact across hosts that differ only in working-copy
//!   prefix and address layout.

use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

/// Placeholder substituted for every frame address.
///
/// Deliberately free of hex digits so a canonical line never re-matches
/// [`ADDRESS_RE`].
pub const ADDRESS_PLACEHOLDER: &str = "0x????????????";

/// Matches one stack-frame line, canonical or raw.
///
/// The address alternative accepts both a raw hex literal and the
/// placeholder, so block recognition works on already-canonical input.
static FRAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*\S+:\d+:\d+: 0x(?:[0-9a-fA-F]+|\?+) in \S").expect("frame regex is valid")
});

/// Matches a hexadecimal address literal.
static ADDRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"0x[0-9a-fA-F]+").expect("address regex is valid"));

/// A canonicalized stack trace: newline-joined frame lines with a trailing
/// newline, byte-identical across hosts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalTrace(String);

impl CanonicalTrace {
    /// Returns the canonical bytes as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// SHA-256 of the canonical bytes, hex-rendered.
    ///
    /// This is the trace component of the crash dedup key.
    #[must_use]
    pub fn hash_hex(&self) -> String {
        hex::encode(Sha256::digest(self.0.as_bytes()))
    }
}

impl std::fmt::Display for CanonicalTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hex hash of an absent trace: the digest of the empty byte string.
///
/// Crash reports whose replay produced no recognizable trace still need a
/// stable dedup key.
#[must_use]
pub fn empty_trace_hash_hex() -> String {
    hex::encode(Sha256::digest(b""))
}

/// Normalizes raw simulator output into a machine-independent trace.
#[derive(Debug, Clone)]
pub struct TraceCanonicalizer {
    /// Final path component of the working copy, e.g. `tigerbeetle`.
    /// Frame paths are stripped up to and including this directory.
    source_root: String,
}

impl TraceCanonicalizer {
    /// Creates a canonicalizer for a working copy whose root directory is
    /// named `source_root`.
    #[must_use]
    pub fn new(source_root: impl Into<String>) -> Self {
        Self {
            source_root: source_root.into(),
        }
    }

    /// Extracts and canonicalizes the stack trace from captured output.
    ///
    /// Returns `None` when the output contains no frame-format line.
    #[must_use]
    pub fn canonicalize(&self, output: &str) -> Option<CanonicalTrace> {
        let block = select_trace_block(output)?;
        let mut canonical = String::new();
        for line in block {
            let line = self.strip_path_prefix(line);
            let line = ADDRESS_RE.replace_all(&line, ADDRESS_PLACEHOLDER);
            canonical.push_str(&line);
            canonical.push('\n');
        }
        Some(CanonicalTrace(canonical))
    }

    /// Drops everything up to and including the source-root directory from
    /// the leading path of a frame line. Lines whose path does not pass
    /// through the source root are returned unchanged.
    fn strip_path_prefix<'a>(&self, line: &'a str) -> std::borrow::Cow<'a, str> {
        let line = line.trim_start();
        let marker = format!("/{}/", self.source_root);
        match line.find(&marker) {
            Some(idx) => std::borrow::Cow::Owned(line[idx + marker.len()..].to_string()),
            None => std::borrow::Cow::Borrowed(line),
        }
    }
}

/// Selects the first contiguous run of frame-format lines.
fn select_trace_block(output: &str) -> Option<Vec<&str>> {
    let mut block = Vec::new();
    for line in output.lines() {
        if FRAME_RE.is_match(line) {
            block.push(line);
        } else if !block.is_empty() {
            break;
        }
    }
    if block.is_empty() { None } else { Some(block) }
}
