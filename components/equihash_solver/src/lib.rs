//! Equihash is a Proof-of-Work algorithm based on a generalization of the
//! Birthday problem which finds colliding hash values. It was designed to be
//! memory-hard; the bottleneck for parallel solver implementations is memory
//! bandwidth.
//!
//! This crate implements the CPU solver core for the `(n, k) = (192, 7)`
//! parameter set: a multi-stage bucketed collision search over personalized
//! Blake2b digests, operating inside a fixed cache-resident memory budget
//! with runtime-selected vector acceleration.
//!
//! The solver is session-oriented: a [`Solver`] owns all working memory for
//! one worker thread and is reused across attempts. Network and pool-protocol
//! concerns live outside this crate; solutions are handed to a callback as
//! sorted candidate-index lists, with [`Solution::to_minimal`] producing the
//! wire encoding.
//!
//! References
//! ==========
//! - Alex Biryukov and Dmitry Khovratovich.
//!   [*Equihash: Asymmetric Proof-of-Work Based on the Generalized Birthday Problem.*][BK16]
//!   NDSS ’16.
//!
//! [BK16]: https://www.internetsociety.org/sites/default/files/blogs-media/equihash-asymmetric-proof-of-work-based-generalized-birthday-problem.pdf

// Catch documentation errors caused by code changes.
#![deny(rustdoc::broken_intra_doc_links)]
#![cfg_attr(docsrs, feature(doc_cfg))]

use core::fmt;

mod arena;
mod collision;
mod digest;
mod encoding;
mod params;
mod simd;
mod solve;
mod validate;

pub use collision::Stats;
pub use params::{
    Config, Params, ARENA_BUDGET_BYTES, DEFAULT_BUCKET_BITS, DEFAULT_BUCKET_CAP,
    DEFAULT_POPULATION, DEFAULT_STAGE_CAP, DIGEST_BYTES, K, N, PERSONALIZATION_PREFIX,
};
pub use simd::{Capabilities, Tier};
pub use solve::{solve, Outcome, Solver};
pub use validate::{validate_indices, validate_minimal, InvalidSolution, Solution};

/// A fatal session-setup failure.
///
/// Setup errors abort the session before any hashing or collision work
/// begins. Negative per-attempt results (no collisions, cancellation) are
/// ordinary [`Outcome`] values, not errors.
#[derive(Debug)]
pub enum Error {
    /// The working arena could not be allocated.
    Allocation {
        /// Bytes the arena layout asked for.
        requested: usize,
    },
    /// A forced acceleration tier is not supported by this host.
    UnsupportedTier {
        /// The tier the configuration demanded.
        requested: Tier,
        /// The best tier the host actually supports.
        detected: Tier,
    },
    /// The `(n, k)` parameters violate the solver's constraints.
    InvalidParams,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Allocation { requested } => {
                write!(f, "failed to allocate {requested} bytes of solver arena")
            }
            Error::UnsupportedTier {
                requested,
                detected,
            } => write!(
                f,
                "forced acceleration tier {} exceeds host support ({})",
                requested.name(),
                detected.name()
            ),
            Error::InvalidParams => f.write_str("invalid equihash parameters"),
        }
    }
}

impl std::error::Error for Error {}
