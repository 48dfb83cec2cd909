//! Slot assignment.
//!
//! Slot 1 always fuzzes mainline. The remaining slots are spread
//! round-robin over the candidate branches: with `n` slots and `k`
//! candidates, each candidate gets `(n - 1) / k` slots, and the first
//! `(n - 1) % k` candidates get one extra. With no candidates at all,
//! every slot fuzzes mainline.
//!
//! Slots are numbered from 1; `assignments[slot - 1]` is slot `slot`'s
//! revision.

use vopr_core::tracker::Candidate;

/// Branch every fleet always fuzzes.
pub const MAINLINE_BRANCH: &str = "main";

/// What a slot is assigned to fuzz.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    /// The mainline branch, checked out by name.
    Mainline,
    /// A candidate change request, checked out by head commit.
    Candidate(Candidate),
}

impl std::fmt::Display for Assignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mainline => f.write_str(MAINLINE_BRANCH),
            Self::Candidate(candidate) => {
                write!(f, "{} ({})", candidate.branch, candidate.head.short_hex())
            },
        }
    }
}

/// Computes the assignment for every slot.
#[must_use]
pub fn assign_slots(num_slots: usize, candidates: &[Candidate]) -> Vec<Assignment> {
    if candidates.is_empty() {
        return vec![Assignment::Mainline; num_slots];
    }

    let mut assignments = Vec::with_capacity(num_slots);
    assignments.push(Assignment::Mainline);

    let repeats = (num_slots - 1) / candidates.len();
    let remainders = (num_slots - 1) % candidates.len();

    for (index, candidate) in candidates.iter().enumerate() {
        for _ in 0..repeats {
            assignments.push(Assignment::Candidate(candidate.clone()));
        }
        if index < remainders {
            assignments.push(Assignment::Candidate(candidate.clone()));
        }
    }

    debug_assert_eq!(assignments.len(), num_slots);
    assignments
}
