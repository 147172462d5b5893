//! Terminal-stage solution extraction and standalone validation.

use core::fmt;

use crate::{
    collision::{StageStore, Stats},
    digest::{base_state, index_digest},
    encoding,
    params::{Params, DIGEST_BYTES},
};

/// A complete solution: `2^k` distinct candidate indices, sorted ascending,
/// whose digests XOR to zero across all `n` bits.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Solution {
    params: Params,
    indices: Vec<u32>,
}

impl Solution {
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// The minimal wire encoding: each index packed into
    /// `collision_bit_length + 1` big-endian bits.
    pub fn to_minimal(&self) -> Vec<u8> {
        encoding::minimal_from_indices(self.params, &self.indices)
    }
}

fn strictly_ascending(indices: &[u32]) -> bool {
    indices.windows(2).all(|w| w[0] < w[1])
}

/// Filters terminal-stage nodes for structural completeness and reports
/// each qualifying solution. Nodes with a zero digest but a malformed
/// ancestor set are dropped and counted; they never abort the pipeline.
pub(crate) fn extract_solutions(
    params: Params,
    store: &StageStore,
    digests: &[u8],
    stats: &mut Stats,
    mut on_solution: impl FnMut(&Solution),
) -> usize {
    let width = params.solution_width();
    let meaningful = params.hash_byte_length();

    let mut found = 0;
    for (slot, ancestors) in store.ancestors.iter().enumerate() {
        // The zero-check covers the full meaningful digest width; the
        // trailing stage window was never merged on, so it decides here.
        let digest = &digests[slot * DIGEST_BYTES..slot * DIGEST_BYTES + meaningful];
        if digest.iter().any(|b| *b != 0) {
            continue;
        }
        if ancestors.len() != width || !strictly_ascending(ancestors) {
            stats.invalid_candidates += 1;
            continue;
        }
        let solution = Solution {
            params,
            indices: ancestors.clone(),
        };
        on_solution(&solution);
        found += 1;
    }
    found
}

/// A candidate index list failed validation.
#[derive(Debug, PartialEq, Eq)]
pub enum InvalidSolution {
    /// The minimal encoding has the wrong byte length.
    Encoding,
    /// The list does not hold exactly `2^k` indices.
    WrongLength { expected: usize, actual: usize },
    /// The list is not sorted ascending.
    OutOfOrder,
    /// An index appears more than once.
    DuplicateIndices,
    /// The re-derived digests do not XOR to zero.
    NonZeroXor,
}

impl fmt::Display for InvalidSolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidSolution::Encoding => f.write_str("malformed minimal encoding"),
            InvalidSolution::WrongLength { expected, actual } => {
                write!(f, "expected {expected} indices, got {actual}")
            }
            InvalidSolution::OutOfOrder => f.write_str("indices are not sorted ascending"),
            InvalidSolution::DuplicateIndices => f.write_str("duplicate indices"),
            InvalidSolution::NonZeroXor => f.write_str("digests do not XOR to zero"),
        }
    }
}

impl std::error::Error for InvalidSolution {}

/// Independently validates an externally supplied index list against
/// `(header, nonce)`: re-derives every digest and checks the count,
/// canonical ordering, and the zero-XOR property over the full `n` bits.
///
/// Needs no solver state, so a pool client can check submissions on its own.
pub fn validate_indices(
    params: Params,
    header: &[u8],
    nonce: &[u8],
    indices: &[u32],
) -> Result<(), InvalidSolution> {
    let expected = params.solution_width();
    if indices.len() != expected {
        return Err(InvalidSolution::WrongLength {
            expected,
            actual: indices.len(),
        });
    }
    for w in indices.windows(2) {
        if w[0] > w[1] {
            return Err(InvalidSolution::OutOfOrder);
        }
        if w[0] == w[1] {
            return Err(InvalidSolution::DuplicateIndices);
        }
    }

    let base = base_state(&params, header, nonce);
    let mut acc = vec![0u8; params.hash_byte_length()];
    for &index in indices {
        let digest = index_digest(&base, index);
        for (a, b) in acc.iter_mut().zip(digest.as_bytes()) {
            *a ^= b;
        }
    }
    if acc.iter().any(|b| *b != 0) {
        return Err(InvalidSolution::NonZeroXor);
    }
    Ok(())
}

/// Validates a minimal-encoded solution, the form a pool submission takes.
pub fn validate_minimal(
    params: Params,
    header: &[u8],
    nonce: &[u8],
    minimal: &[u8],
) -> Result<(), InvalidSolution> {
    let indices =
        encoding::indices_from_minimal(params, minimal).ok_or(InvalidSolution::Encoding)?;
    validate_indices(params, header, nonce, &indices)
}
