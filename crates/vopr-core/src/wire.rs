//! Fixed-size wire codec for worker bug reports.
//!
//! Every report a worker sends to the hub is exactly one 45-byte message:
//!
//! ```text
//! +---------------------+--------+-------------------+------------------+
//! | Checksum (16 bytes) | Kind   | Seed (8 bytes BE) | Commit (20 bytes)|
//! +---------------------+--------+-------------------+------------------+
//! ```
//!
//! The checksum is the first 16 bytes of the SHA-256 digest of the trailing
//! 29 bytes (kind, seed, commit). A message whose checksum does not match is
//! discarded before any of its fields are interpreted.
//!
//! Decoding validates in a fixed order: length, checksum, kind, commit.
//! The seed field is unconstrained; every 64-bit value is legal.
//!
//! The checksum comparison is constant-time. Reports arrive from the open
//! network, and the comparison must not leak how many prefix bytes of a
//! forged checksum were correct.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Total size of an encoded bug report on the wire.
pub const REPORT_WIRE_SIZE: usize = 45;

/// Length of the truncated SHA-256 checksum prefix.
pub const CHECKSUM_SIZE: usize = 16;

/// Length of the raw commit identifier.
pub const COMMIT_SIZE: usize = 20;

/// Length of the checksummed region (kind, seed, commit).
const SIGNED_REGION_SIZE: usize = REPORT_WIRE_SIZE - CHECKSUM_SIZE;

/// Byte the hub writes back on a successfully enqueued report.
pub const ACK_BYTE: u8 = 0x31;

/// The three failure modes the simulator can detect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BugKind {
    /// A state-machine correctness assertion fired.
    Correctness = 1,
    /// The cluster stopped making progress.
    Liveness = 2,
    /// The simulator process itself crashed.
    Crash = 3,
}

impl BugKind {
    /// Parses the wire tag. Returns `None` for any byte outside {1, 2, 3}.
    #[must_use]
    pub const fn from_wire(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Correctness),
            2 => Some(Self::Liveness),
            3 => Some(Self::Crash),
            _ => None,
        }
    }

    /// Returns the wire tag for this kind.
    #[must_use]
    pub const fn as_wire(self) -> u8 {
        self as u8
    }

    /// Human-readable name, used in logs and issue bodies.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Correctness => "correctness",
            Self::Liveness => "liveness",
            Self::Crash => "crash",
        }
    }
}

impl std::fmt::Display for BugKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source revision identifier: 20 raw bytes of a git object id.
///
/// Rendered as 40 lowercase hex characters when displayed, persisted, or
/// passed to git.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommitId([u8; COMMIT_SIZE]);

impl CommitId {
    /// Wraps 20 raw object-id bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; COMMIT_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parses a 40-character hex rendering, as produced by `git rev-parse`.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::BadCommit`] if the input is not exactly 40 hex
    /// characters.
    pub fn from_hex(hex_str: &str) -> Result<Self, WireError> {
        let hex_str = hex_str.trim();
        if hex_str.len() != COMMIT_SIZE * 2 {
            return Err(WireError::BadCommit {
                rendering: hex_str.to_string(),
            });
        }
        let mut bytes = [0u8; COMMIT_SIZE];
        hex::decode_to_slice(hex_str, &mut bytes).map_err(|_| WireError::BadCommit {
            rendering: hex_str.to_string(),
        })?;
        Ok(Self(bytes))
    }

    /// Returns the raw object-id bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; COMMIT_SIZE] {
        &self.0
    }

    /// Renders the full 40-character lowercase hex id.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Renders the abbreviated 8-character id used in issue titles.
    #[must_use]
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Decode failure for a wire message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum WireError {
    /// Fewer than 45 bytes were supplied.
    #[error("short read: got {len} of {REPORT_WIRE_SIZE} bytes")]
    ShortRead {
        /// Number of bytes actually available.
        len: usize,
    },

    /// The checksum prefix does not match the trailing 29 bytes.
    #[error("checksum mismatch over report body")]
    BadChecksum,

    /// The kind tag is outside the closed set {1, 2, 3}.
    #[error("unknown bug kind tag {tag}")]
    BadKind {
        /// The rejected tag byte.
        tag: u8,
    },

    /// The commit field does not render as a valid hex object id.
    #[error("commit field is not a hex object id: {rendering:?}")]
    BadCommit {
        /// The offending rendering.
        rendering: String,
    },
}

/// A validated bug report.
///
/// Constructed either by a worker (from an observed failure) or by the hub
/// decoder (from wire bytes that passed every check).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BugReport {
    /// Failure mode claimed by the reporting worker.
    pub kind: BugKind,
    /// Seed that produced the failure.
    pub seed: u64,
    /// Source revision the failure occurred on.
    pub commit: CommitId,
}

impl BugReport {
    /// Encodes this report into its 45-byte wire form.
    ///
    /// The layout is stable: checksum, kind, big-endian seed, commit.
    #[must_use]
    pub fn encode(&self) -> [u8; REPORT_WIRE_SIZE] {
        let mut buf = [0u8; REPORT_WIRE_SIZE];
        buf[CHECKSUM_SIZE] = self.kind.as_wire();
        buf[CHECKSUM_SIZE + 1..CHECKSUM_SIZE + 9].copy_from_slice(&self.seed.to_be_bytes());
        buf[CHECKSUM_SIZE + 9..].copy_from_slice(self.commit.as_bytes());

        let digest = checksum(&buf[CHECKSUM_SIZE..]);
        buf[..CHECKSUM_SIZE].copy_from_slice(&digest);
        buf
    }

    /// Decodes a wire message.
    ///
    /// Checks run in order: length, checksum, kind, commit. The first
    /// failing check determines the error; later fields of a rejected
    /// message are never interpreted.
    ///
    /// # Errors
    ///
    /// Returns the corresponding [`WireError`] variant for the first check
    /// that fails.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < REPORT_WIRE_SIZE {
            return Err(WireError::ShortRead { len: buf.len() });
        }
        let buf = &buf[..REPORT_WIRE_SIZE];

        let expected = checksum(&buf[CHECKSUM_SIZE..]);
        if expected.as_slice().ct_eq(&buf[..CHECKSUM_SIZE]).unwrap_u8() == 0 {
            return Err(WireError::BadChecksum);
        }

        let kind = BugKind::from_wire(buf[CHECKSUM_SIZE])
            .ok_or(WireError::BadKind { tag: buf[CHECKSUM_SIZE] })?;

        let mut seed_bytes = [0u8; 8];
        seed_bytes.copy_from_slice(&buf[CHECKSUM_SIZE + 1..CHECKSUM_SIZE + 9]);
        let seed = u64::from_be_bytes(seed_bytes);

        let mut commit_bytes = [0u8; COMMIT_SIZE];
        commit_bytes.copy_from_slice(&buf[CHECKSUM_SIZE + 9..]);
        let commit = CommitId::from_bytes(commit_bytes);

        // Commit ids are validated here at the decoder, not deferred to
        // checkout time: the rendering must be a well-formed hex object id
        // before it is ever interpolated into a git invocation.
        let rendering = commit.to_hex();
        if rendering.len() != COMMIT_SIZE * 2
            || !rendering.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(WireError::BadCommit { rendering });
        }

        Ok(Self { kind, seed, commit })
    }
}

/// Truncated SHA-256 over the checksummed region.
fn checksum(signed_region: &[u8]) -> [u8; CHECKSUM_SIZE] {
    debug_assert_eq!(signed_region.len(), SIGNED_REGION_SIZE);
    let digest = Sha256::digest(signed_region);
    let mut out = [0u8; CHECKSUM_SIZE];
    out.copy_from_slice(&digest[..CHECKSUM_SIZE]);
    out
}
