//! Session-scoped working memory.
//!
//! One cache-aligned allocation holds the initial-digest table, the two
//! ping-pong stage buffers, and the bucket index tables. Entries are named
//! by slot index, never by pointer, so buffer swaps cannot leave dangling
//! references. Region access goes through [`Arena::stage_view`], which
//! hands out disjoint borrows: a stage can read its input buffer and write
//! its output buffer, but never both halves of the same buffer.

use byteorder::{ByteOrder, LittleEndian};
use tracing::warn;

use crate::{
    params::{Config, ARENA_BUDGET_BYTES, DIGEST_BYTES},
    Error,
};

const CACHE_LINE: usize = 64;

// The field is only ever touched through byte views; it exists to pin the
// allocation's size and alignment.
#[repr(C, align(64))]
#[derive(Clone, Copy)]
struct Line(#[allow(dead_code)] [u8; CACHE_LINE]);

fn lines(bytes: usize) -> usize {
    bytes.div_ceil(CACHE_LINE)
}

/// Byte sizes of each carved region, all rounded up to a cache line so
/// every region starts aligned.
#[derive(Clone, Copy, Debug)]
struct Layout {
    digests: usize,
    stage: usize,
    bucket_counts: usize,
    bucket_slots: usize,
}

impl Layout {
    fn for_config(config: &Config) -> Self {
        let digests = lines(config.population as usize * DIGEST_BYTES) * CACHE_LINE;
        let stage = lines(config.stage_cap * DIGEST_BYTES) * CACHE_LINE;
        let bucket_counts = lines(config.bucket_count() * 4) * CACHE_LINE;
        let bucket_slots = lines(config.bucket_count() * config.bucket_cap * 4) * CACHE_LINE;
        Layout {
            digests,
            stage,
            bucket_counts,
            bucket_slots,
        }
    }

    fn total(&self) -> usize {
        self.digests + 2 * self.stage + self.bucket_counts + self.bucket_slots
    }
}

pub(crate) struct Arena {
    buf: Vec<Line>,
    layout: Layout,
    capacity: u32,
    bucket_count: usize,
    bucket_cap: usize,
}

impl Arena {
    /// Allocates the arena for `config`. Failure is fatal for the session;
    /// no partial state survives.
    pub(crate) fn allocate(config: &Config) -> Result<Self, Error> {
        let layout = Layout::for_config(config);
        let total = layout.total();

        let mut buf: Vec<Line> = Vec::new();
        buf.try_reserve_exact(lines(total))
            .map_err(|_| Error::Allocation { requested: total })?;
        buf.resize(lines(total), Line([0u8; CACHE_LINE]));

        let arena = Arena {
            buf,
            layout,
            capacity: config.population,
            bucket_count: config.bucket_count(),
            bucket_cap: config.bucket_cap,
        };

        if arena.usage_bytes() > ARENA_BUDGET_BYTES {
            warn!(
                usage = arena.usage_bytes(),
                budget = ARENA_BUDGET_BYTES,
                "arena exceeds the cache-residency budget"
            );
        }

        Ok(arena)
    }

    /// Actual allocated footprint in bytes.
    pub(crate) fn usage_bytes(&self) -> usize {
        self.buf.len() * CACHE_LINE
    }

    /// Digest slots the initial table can hold.
    pub(crate) fn digest_capacity(&self) -> u32 {
        self.capacity
    }

    fn as_bytes_mut(&mut self) -> &mut [u8] {
        let len = self.buf.len() * CACHE_LINE;
        // SAFETY: `Line` is a `repr(C)` wrapper around `[u8; 64]`, so the
        // buffer is `len` contiguous initialized bytes.
        unsafe { core::slice::from_raw_parts_mut(self.buf.as_mut_ptr() as *mut u8, len) }
    }

    /// The initial-digest table, for the generator to fill.
    pub(crate) fn digest_table_mut(&mut self) -> &mut [u8] {
        let len = self.layout.digests;
        &mut self.as_bytes_mut()[..len]
    }

    /// Disjoint borrows for one merge stage: the stage's input population,
    /// its output buffer (stage `s` writes only buffer `s % 2`), and the
    /// bucket tables.
    pub(crate) fn stage_view(&mut self, stage: usize) -> StageView<'_> {
        let layout = self.layout;
        let bucket_count = self.bucket_count;
        let bucket_cap = self.bucket_cap;

        let bytes = self.as_bytes_mut();
        let (digests, rest) = bytes.split_at_mut(layout.digests);
        let (stage_a, rest) = rest.split_at_mut(layout.stage);
        let (stage_b, rest) = rest.split_at_mut(layout.stage);
        let (counts, slots) = rest.split_at_mut(layout.bucket_counts);

        let (input, output): (&[u8], &mut [u8]) = if stage == 0 {
            (digests, stage_a)
        } else if stage % 2 == 0 {
            (stage_b, stage_a)
        } else {
            (stage_a, stage_b)
        };

        StageView {
            input,
            output,
            buckets: Buckets {
                counts,
                slots,
                bucket_count,
                bucket_cap,
            },
        }
    }

    /// Read-only view of a stage output buffer, for the terminal filter.
    pub(crate) fn stage_buffer(&mut self, buffer: usize) -> &[u8] {
        let layout = self.layout;
        let bytes = self.as_bytes_mut();
        let start = layout.digests + buffer * layout.stage;
        &bytes[start..start + layout.stage]
    }
}

pub(crate) struct StageView<'a> {
    /// Digests of the stage's input population, `DIGEST_BYTES` per slot.
    pub(crate) input: &'a [u8],
    /// Output buffer the stage's merged digests are written into.
    pub(crate) output: &'a mut [u8],
    pub(crate) buckets: Buckets<'a>,
}

/// Bucket index tables: per-bucket occupancy counts and fixed-capacity
/// slot lists, both living inside the arena.
pub(crate) struct Buckets<'a> {
    counts: &'a mut [u8],
    slots: &'a mut [u8],
    bucket_count: usize,
    bucket_cap: usize,
}

impl Buckets<'_> {
    pub(crate) fn bucket_count(&self) -> usize {
        self.bucket_count
    }

    /// Resets every bucket to empty. Buckets are rebuilt from scratch each
    /// stage and never persist.
    pub(crate) fn clear(&mut self) {
        self.counts[..self.bucket_count * 4].fill(0);
    }

    pub(crate) fn len(&self, bucket: usize) -> usize {
        LittleEndian::read_u32(&self.counts[bucket * 4..]) as usize
    }

    /// Appends `slot` to `bucket`; returns `false` (dropping the entry)
    /// once the bucket is at capacity.
    pub(crate) fn push(&mut self, bucket: usize, slot: u32) -> bool {
        let n = self.len(bucket);
        if n >= self.bucket_cap {
            return false;
        }
        let at = (bucket * self.bucket_cap + n) * 4;
        LittleEndian::write_u32(&mut self.slots[at..at + 4], slot);
        LittleEndian::write_u32(&mut self.counts[bucket * 4..bucket * 4 + 4], (n + 1) as u32);
        true
    }

    pub(crate) fn entry(&self, bucket: usize, i: usize) -> u32 {
        let at = (bucket * self.bucket_cap + i) * 4;
        LittleEndian::read_u32(&self.slots[at..at + 4])
    }
}
