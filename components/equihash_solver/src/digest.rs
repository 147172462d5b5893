//! Candidate digest generation.
//!
//! Every candidate index `i` in `[0, M)` gets a personalized Blake2b digest
//! of `header || nonce || LE32(i)`. The base state over `header || nonce`
//! is built once per attempt; the scalar path clones it per index, while
//! vector tiers hash whole messages through `blake2b_simd::many` in
//! tier-width batches. Both paths are the same function of the same bytes,
//! so they produce identical digests.

use blake2b_simd::{
    many::{hash_many, HashManyJob},
    Params as Blake2bParams, State,
};
use byteorder::{LittleEndian, WriteBytesExt};

use crate::{
    params::{Params, DIGEST_BYTES},
    simd::Capabilities,
};

/// Indices hashed between two cancellation checks.
const CANCEL_INTERVAL: u32 = 4096;

pub(crate) fn base_params(params: &Params) -> Blake2bParams {
    let mut p = Blake2bParams::new();
    p.hash_length(DIGEST_BYTES).personal(&params.personalization());
    p
}

pub(crate) fn base_state(params: &Params, header: &[u8], nonce: &[u8]) -> State {
    let mut state = base_params(params).to_state();
    state.update(header);
    state.update(nonce);
    state
}

/// Digest for a single candidate index, from a prepared base state.
pub(crate) fn index_digest(base: &State, index: u32) -> blake2b_simd::Hash {
    let mut lei = [0u8; 4];
    (&mut lei[..]).write_u32::<LittleEndian>(index).unwrap();

    let mut state = base.clone();
    state.update(&lei);
    state.finalize()
}

/// Result of filling the initial-digest table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Fill {
    /// All requested (or capacity-capped) digests were generated.
    Complete { generated: u32 },
    /// The cancel predicate fired between batches.
    Cancelled,
}

pub(crate) struct DigestGenerator {
    params: Params,
    /// `header || nonce`, the per-attempt message prefix.
    prefix: Vec<u8>,
    base: State,
}

impl DigestGenerator {
    pub(crate) fn new(params: Params, header: &[u8], nonce: &[u8]) -> Self {
        let mut prefix = Vec::with_capacity(header.len() + nonce.len());
        prefix.extend_from_slice(header);
        prefix.extend_from_slice(nonce);
        DigestGenerator {
            params,
            prefix,
            base: base_state(&params, header, nonce),
        }
    }

    /// Fills `table` with digests for indices `0..requested`, capped to the
    /// table's true capacity; the returned count is authoritative. Polls
    /// `cancel` between batches.
    pub(crate) fn fill(
        &self,
        table: &mut [u8],
        requested: u32,
        caps: &Capabilities,
        cancel: &mut dyn FnMut() -> bool,
    ) -> Fill {
        let capacity = (table.len() / DIGEST_BYTES) as u32;
        let count = requested.min(capacity);
        let width = caps.batch_width();

        let mut next = 0u32;
        while next < count {
            if cancel() {
                return Fill::Cancelled;
            }
            let batch_end = count.min(next + CANCEL_INTERVAL);
            if width == 1 {
                self.fill_scalar(table, next, batch_end);
            } else {
                self.fill_many(table, next, batch_end, width);
            }
            next = batch_end;
        }

        Fill::Complete { generated: count }
    }

    fn fill_scalar(&self, table: &mut [u8], from: u32, to: u32) {
        for i in from..to {
            let hash = index_digest(&self.base, i);
            let at = i as usize * DIGEST_BYTES;
            table[at..at + DIGEST_BYTES].copy_from_slice(hash.as_bytes());
        }
    }

    fn fill_many(&self, table: &mut [u8], from: u32, to: u32, width: usize) {
        let blake = base_params(&self.params);
        let mut inputs: Vec<Vec<u8>> = (0..width)
            .map(|_| {
                let mut m = Vec::with_capacity(self.prefix.len() + 4);
                m.extend_from_slice(&self.prefix);
                m.extend_from_slice(&[0u8; 4]);
                m
            })
            .collect();
        let suffix = self.prefix.len();

        let mut i = from;
        while i < to {
            let lanes = width.min((to - i) as usize);
            for (lane, input) in inputs.iter_mut().take(lanes).enumerate() {
                (&mut input[suffix..])
                    .write_u32::<LittleEndian>(i + lane as u32)
                    .unwrap();
            }

            let mut jobs: Vec<HashManyJob<'_>> = inputs[..lanes]
                .iter()
                .map(|input| HashManyJob::new(&blake, input))
                .collect();
            hash_many(jobs.iter_mut());

            for (lane, job) in jobs.iter().enumerate() {
                let at = (i as usize + lane) * DIGEST_BYTES;
                table[at..at + DIGEST_BYTES].copy_from_slice(job.to_hash().as_bytes());
            }
            i += lanes as u32;
        }
    }
}
