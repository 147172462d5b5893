//! Bucketed multi-stage collision search.
//!
//! Each merge stage partitions its input population by a B-bit window of
//! the digest (B = n / (k + 1), window `s` at bit offset `s * B`), then
//! enumerates pairs inside each bucket. The bucket key is only the high
//! [`Config::bucket_bits`] of the window; a pair is merged solely when its
//! full windows compare equal, so bucket co-membership is a prefilter, not
//! a collision. Merged nodes carry the XOR of their parents' digests and
//! the sorted union of their parents' ancestor sets.

use tracing::debug;

use crate::{
    arena::StageView,
    params::{Config, DIGEST_BYTES},
    simd::Capabilities,
};

/// Extracts `bit_width` bits at `bit_offset` from `bytes`, big-endian
/// (bit 0 is the most-significant bit of `bytes[0]`).
///
/// Windows that straddle byte boundaries are the historically bug-prone
/// case; this is the single place stage windows are read from digests.
pub(crate) fn extract_window(bytes: &[u8], bit_offset: usize, bit_width: usize) -> u32 {
    debug_assert!((1..=32).contains(&bit_width));

    let skip = bit_offset % 8;
    let mut at = bit_offset / 8;
    let mut acc: u64 = 0;
    let mut have = 0;
    while have < skip + bit_width {
        acc = (acc << 8) | u64::from(bytes[at]);
        at += 1;
        have += 8;
    }
    ((acc >> (have - skip - bit_width)) & ((1u64 << bit_width) - 1)) as u32
}

/// Merges two sorted ancestor sets, or returns `None` if they intersect.
///
/// Two sorted sets are disjoint iff their merged sequence has no adjacent
/// duplicate, so disjointness falls out of the merge itself.
pub(crate) fn merge_disjoint(a: &[u32], b: &[u32]) -> Option<Vec<u32>> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            core::cmp::Ordering::Less => {
                out.push(a[i]);
                i += 1;
            }
            core::cmp::Ordering::Greater => {
                out.push(b[j]);
                j += 1;
            }
            core::cmp::Ordering::Equal => return None,
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    Some(out)
}

/// Diagnostic counters for one solve attempt.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stats {
    /// Candidate pairs examined across all stages.
    pub comparisons: u64,
    /// Collision nodes emitted across all stages.
    pub emitted: u64,
    /// Entries dropped because their bucket was at capacity.
    pub truncated_entries: u64,
    /// Entries skipped because their bucket key was out of range.
    pub malformed_keys: u64,
    /// Terminal-stage candidates with a zero digest but a malformed
    /// ancestor set.
    pub invalid_candidates: u64,
}

/// Ancestor sets for the nodes of one stage; node digests live in the
/// arena's stage buffer under the same slot index.
#[derive(Default)]
pub(crate) struct StageStore {
    pub(crate) ancestors: Vec<Vec<u32>>,
}

impl StageStore {
    pub(crate) fn len(&self) -> usize {
        self.ancestors.len()
    }

    pub(crate) fn clear(&mut self) {
        self.ancestors.clear();
    }
}

/// Runs merge stage `stage`, reading `in_count` entries from `view.input`
/// and writing merged nodes to `view.output`. Returns the emitted count.
pub(crate) fn run_stage(
    config: &Config,
    caps: &Capabilities,
    mut view: StageView<'_>,
    in_count: usize,
    prev: Option<&StageStore>,
    out: &mut StageStore,
    stage: usize,
    stats: &mut Stats,
) -> usize {
    out.clear();

    let b = config.params.collision_bit_length();
    let offset = stage * b;
    let key_shift = b - config.bucket_bits as usize;
    let bucket_count = view.buckets.bucket_count();

    // Partition: bucket every entry by the high bits of its stage window.
    // The full window values are kept for the exact-equality check below.
    view.buckets.clear();
    let mut windows = Vec::with_capacity(in_count);
    for slot in 0..in_count {
        let digest = &view.input[slot * DIGEST_BYTES..(slot + 1) * DIGEST_BYTES];
        let window = extract_window(digest, offset, b);
        windows.push(window);

        let bucket = (window >> key_shift) as usize;
        if bucket >= bucket_count {
            stats.malformed_keys += 1;
            continue;
        }
        if !view.buckets.push(bucket, slot as u32) {
            stats.truncated_entries += 1;
        }
    }

    // Enumerate and merge, ascending bucket id, until the stage cap.
    let mut emitted = 0usize;
    'buckets: for bucket in 0..bucket_count {
        let n = view.buckets.len(bucket);
        for i in 0..n {
            for j in (i + 1)..n {
                if emitted >= config.stage_cap {
                    break 'buckets;
                }
                stats.comparisons += 1;

                let a_slot = view.buckets.entry(bucket, i) as usize;
                let b_slot = view.buckets.entry(bucket, j) as usize;
                if windows[a_slot] != windows[b_slot] {
                    continue;
                }

                let joined = match prev {
                    Some(prev) => {
                        match merge_disjoint(
                            &prev.ancestors[a_slot],
                            &prev.ancestors[b_slot],
                        ) {
                            Some(joined) => joined,
                            // Parents share an ancestor; the pair is not a
                            // valid collision node.
                            None => continue,
                        }
                    }
                    // Stage 0 inputs are the candidate indices themselves.
                    None => {
                        let (lo, hi) = (a_slot.min(b_slot) as u32, a_slot.max(b_slot) as u32);
                        vec![lo, hi]
                    }
                };

                let a_digest = &view.input[a_slot * DIGEST_BYTES..(a_slot + 1) * DIGEST_BYTES];
                let b_digest = &view.input[b_slot * DIGEST_BYTES..(b_slot + 1) * DIGEST_BYTES];
                let out_digest =
                    &mut view.output[emitted * DIGEST_BYTES..(emitted + 1) * DIGEST_BYTES];
                caps.xor_digest(a_digest, b_digest, out_digest);

                out.ancestors.push(joined);
                emitted += 1;
            }
        }
    }

    stats.emitted += emitted as u64;
    debug!(
        stage,
        in_count,
        emitted,
        comparisons = stats.comparisons,
        truncated = stats.truncated_entries,
        "collision stage complete"
    );
    emitted
}
