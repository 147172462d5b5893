//! Algorithm parameters and compiled-in tuning constants.

use byteorder::{ByteOrder, LittleEndian};

use crate::{simd::Tier, Error};

/// Digest bits participating in the collision search.
pub const N: u32 = 192;

/// Collision stage count exponent; a solution joins `2^K` candidate indices.
pub const K: u32 = 7;

/// Bytes of Blake2b output stored per candidate index. The low `N / 8`
/// bytes participate in the stage windows; the remainder is kept so every
/// table slot is a power-of-two stride.
pub const DIGEST_BYTES: usize = 32;

/// Personalization prefix mixed into every candidate digest, ahead of the
/// little-endian `(n, k)` encoding.
pub const PERSONALIZATION_PREFIX: &[u8; 8] = b"ZERO_PoW";

/// Default number of candidate indices hashed per attempt.
///
/// Sized so the initial-digest table (32 MiB) plus stage and bucket tables
/// stay inside [`ARENA_BUDGET_BYTES`]. A full-odds Equihash(192,7)
/// population is `2^25` digests (~1 GiB); within the cache-residency budget
/// most attempts end without a collision chain and the caller retries with
/// a fresh nonce.
pub const DEFAULT_POPULATION: u32 = 1 << 20;

/// Default global cap on collision nodes emitted per stage.
pub const DEFAULT_STAGE_CAP: usize = 1 << 17;

/// Default number of bucket-key bits. The bucket key is the high
/// `bucket_bits` of a stage's collision window.
pub const DEFAULT_BUCKET_BITS: u32 = 13;

/// Default cap on entries per bucket; entries past the cap are dropped and
/// counted as truncated.
pub const DEFAULT_BUCKET_CAP: usize = 192;

/// Soft upper bound on the arena footprint. Exceeding it is a diagnostic
/// warning, not an error; cache residency is a throughput goal.
pub const ARENA_BUDGET_BYTES: usize = 48 * 1024 * 1024;

/// Core `(n, k)` parameter pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Params {
    pub(crate) n: u32,
    pub(crate) k: u32,
}

impl Params {
    /// Returns `Err(Error::InvalidParams)` if the parameters are invalid.
    pub fn new(n: u32, k: u32) -> Result<Self, Error> {
        // We place the following requirements on the parameters:
        // - n is a multiple of 8, so the hash output has an exact byte length.
        // - k >= 3 so the encoded solutions have an exact byte length.
        // - k < n, so the collision bit length is at least 1.
        // - n is a multiple of k + 1, so we have an integer collision bit length.
        if (n % 8 == 0) && (k >= 3) && (k < n) && (n % (k + 1) == 0) {
            Ok(Params { n, k })
        } else {
            Err(Error::InvalidParams)
        }
    }

    /// Bits per stage window: `B = n / (k + 1)`.
    pub fn collision_bit_length(&self) -> usize {
        (self.n / (self.k + 1)) as usize
    }

    /// Bytes needed to hold one stage window.
    pub fn collision_byte_length(&self) -> usize {
        self.collision_bit_length().div_ceil(8)
    }

    /// Meaningful digest bytes: the low `n / 8` bytes of each table slot.
    pub fn hash_byte_length(&self) -> usize {
        (self.n / 8) as usize
    }

    /// Candidate indices in a complete solution: `2^k`.
    pub fn solution_width(&self) -> usize {
        1 << self.k
    }

    /// Merge stages executed before the terminal zero-filter.
    pub(crate) fn merge_stages(&self) -> usize {
        self.k as usize
    }

    /// The 16-byte Blake2b personalization binding digests to `(n, k)`.
    pub(crate) fn personalization(&self) -> [u8; 16] {
        let mut personal = [0u8; 16];
        personal[..8].copy_from_slice(PERSONALIZATION_PREFIX);
        LittleEndian::write_u32(&mut personal[8..12], self.n);
        LittleEndian::write_u32(&mut personal[12..16], self.k);
        personal
    }
}

/// Session configuration: the compiled-in constants, overridable per solver.
#[derive(Clone, Debug)]
pub struct Config {
    pub params: Params,
    /// Candidate indices hashed per attempt (`M`).
    pub population: u32,
    /// Global cap on collision nodes emitted per stage.
    pub stage_cap: usize,
    /// Bucket-key width in bits; must not exceed the collision bit length.
    pub bucket_bits: u32,
    /// Maximum entries retained per bucket.
    pub bucket_cap: usize,
    /// Pin the acceleration tier instead of auto-detecting. Fails at
    /// session setup if the host lacks the tier.
    pub forced_tier: Option<Tier>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            params: Params { n: N, k: K },
            population: DEFAULT_POPULATION,
            stage_cap: DEFAULT_STAGE_CAP,
            bucket_bits: DEFAULT_BUCKET_BITS,
            bucket_cap: DEFAULT_BUCKET_CAP,
            forced_tier: None,
        }
    }
}

impl Config {
    pub(crate) fn bucket_count(&self) -> usize {
        1 << self.bucket_bits
    }

    pub(crate) fn validate(&self) -> Result<(), Error> {
        Params::new(self.params.n, self.params.k)?;
        if self.bucket_bits as usize > self.params.collision_bit_length()
            || self.population == 0
            || self.stage_cap == 0
            || self.bucket_cap < 2
        {
            return Err(Error::InvalidParams);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::{Config, Params, K, N};
    use crate::Error;

    #[test]
    fn parameter_constraints() {
        assert!(Params::new(N, K).is_ok());
        assert!(Params::new(96, 3).is_ok());
        assert!(Params::new(200, 9).is_ok());
        // n not a multiple of 8
        assert_matches!(Params::new(193, 7), Err(Error::InvalidParams));
        // k too small for an exact solution byte length
        assert_matches!(Params::new(192, 2), Err(Error::InvalidParams));
        // n not a multiple of k + 1
        assert_matches!(Params::new(192, 6), Err(Error::InvalidParams));
        // collision bit length would be zero
        assert_matches!(Params::new(8, 9), Err(Error::InvalidParams));
    }

    #[test]
    fn derived_lengths() {
        let p = Params::new(N, K).unwrap();
        assert_eq!(p.collision_bit_length(), 24);
        assert_eq!(p.collision_byte_length(), 3);
        assert_eq!(p.hash_byte_length(), 24);
        assert_eq!(p.solution_width(), 128);
        assert_eq!(p.merge_stages(), 7);

        let p = Params::new(96, 3).unwrap();
        assert_eq!(p.collision_bit_length(), 24);
        assert_eq!(p.hash_byte_length(), 12);
        assert_eq!(p.solution_width(), 8);
    }

    #[test]
    fn personalization_layout() {
        let p = Params::new(N, K).unwrap();
        let personal = p.personalization();
        assert_eq!(&personal[..8], b"ZERO_PoW");
        assert_eq!(&personal[8..12], &[192, 0, 0, 0]);
        assert_eq!(&personal[12..16], &[7, 0, 0, 0]);
    }

    #[test]
    fn config_validation() {
        assert!(Config::default().validate().is_ok());

        let mut over_wide = Config::default();
        over_wide.bucket_bits = 25;
        assert_matches!(over_wide.validate(), Err(Error::InvalidParams));

        let mut empty = Config::default();
        empty.population = 0;
        assert_matches!(empty.validate(), Err(Error::InvalidParams));
    }
}
