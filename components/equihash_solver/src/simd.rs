//! Runtime-selected vector acceleration.
//!
//! The host's best vector-instruction tier is detected once per session and
//! bound into a [`Capabilities`] object that the digest generator and the
//! collision engine borrow for their batch-digest and pairwise-XOR work.
//! Every tier produces byte-identical results for identical inputs; tier
//! choice affects throughput only.

use core::fmt;

use crate::Error;

/// An acceleration tier, ordered from scalar up to 512-bit vectors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Tier {
    Scalar,
    Tier128,
    Tier256,
    Tier512,
}

impl Tier {
    /// Human-readable tier name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Tier::Scalar => "scalar",
            Tier::Tier128 => "128-bit",
            Tier::Tier256 => "256-bit",
            Tier::Tier512 => "512-bit",
        }
    }

    /// Blake2b lanes hashed per batch at this tier.
    pub fn batch_width(&self) -> usize {
        match self {
            Tier::Scalar => 1,
            Tier::Tier128 => 2,
            Tier::Tier256 => 4,
            Tier::Tier512 => 8,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Vector features the host actually exposes, probed once.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct HostFeatures {
    sse41: bool,
    avx2: bool,
    avx512: bool,
}

impl HostFeatures {
    pub(crate) fn detect() -> Self {
        #[cfg(target_arch = "x86_64")]
        {
            HostFeatures {
                sse41: is_x86_feature_detected!("sse4.1"),
                avx2: is_x86_feature_detected!("avx2"),
                avx512: is_x86_feature_detected!("avx512f")
                    && is_x86_feature_detected!("avx512bw"),
            }
        }

        #[cfg(not(target_arch = "x86_64"))]
        {
            HostFeatures::default()
        }
    }

    pub(crate) fn best(&self) -> Tier {
        if self.avx512 {
            Tier::Tier512
        } else if self.avx2 {
            Tier::Tier256
        } else if self.sse41 {
            Tier::Tier128
        } else {
            Tier::Scalar
        }
    }

    fn supports(&self, tier: Tier) -> bool {
        tier <= self.best()
    }
}

/// The tier-bound operation set for one solving session.
///
/// Constructed once at session setup and passed by reference; never
/// re-selected mid-attempt.
#[derive(Clone, Copy, Debug)]
pub struct Capabilities {
    tier: Tier,
}

impl Capabilities {
    /// Binds the highest tier the host supports.
    pub fn new() -> Self {
        Capabilities {
            tier: HostFeatures::detect().best(),
        }
    }

    /// Binds `tier` exactly, refusing at configuration time if the host
    /// does not support it.
    pub fn with_forced(tier: Tier) -> Result<Self, Error> {
        Self::for_features(HostFeatures::detect(), tier)
    }

    pub(crate) fn for_features(features: HostFeatures, tier: Tier) -> Result<Self, Error> {
        if features.supports(tier) {
            Ok(Capabilities { tier })
        } else {
            Err(Error::UnsupportedTier {
                requested: tier,
                detected: features.best(),
            })
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Blake2b lanes the digest generator should batch per `hash_many` call.
    pub fn batch_width(&self) -> usize {
        self.tier.batch_width()
    }

    /// XORs two 32-byte digests into `out`.
    ///
    /// All slices must be exactly [`DIGEST_BYTES`](crate::params::DIGEST_BYTES)
    /// long; `a` and `b` may alias each other but not `out`.
    pub fn xor_digest(&self, a: &[u8], b: &[u8], out: &mut [u8]) {
        debug_assert_eq!(a.len(), 32);
        debug_assert_eq!(b.len(), 32);
        debug_assert_eq!(out.len(), 32);

        match self.tier {
            Tier::Scalar => xor_scalar(a, b, out),
            #[cfg(target_arch = "x86_64")]
            Tier::Tier128 => {
                // SAFETY: SSE2 is baseline on x86_64, and all slices were
                // checked to be 32 bytes.
                unsafe { x86::xor32_sse2(a, b, out) }
            }
            #[cfg(target_arch = "x86_64")]
            Tier::Tier256 | Tier::Tier512 => {
                // A 32-byte digest fits a single 256-bit lane; the 512-bit
                // tier widens hashing batches only.
                //
                // SAFETY: this arm is only reachable when AVX2 was detected
                // (or forced past detection, which `for_features` refuses),
                // and all slices were checked to be 32 bytes.
                unsafe { x86::xor32_avx2(a, b, out) }
            }
            #[cfg(not(target_arch = "x86_64"))]
            _ => xor_scalar(a, b, out),
        }
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::new()
    }
}

fn xor_scalar(a: &[u8], b: &[u8], out: &mut [u8]) {
    for ((o, x), y) in out.iter_mut().zip(a).zip(b) {
        *o = x ^ y;
    }
}

#[cfg(target_arch = "x86_64")]
mod x86 {
    use core::arch::x86_64::*;

    /// # Safety
    ///
    /// Caller must ensure SSE2 is available and that all slices are at
    /// least 32 bytes long.
    #[target_feature(enable = "sse2")]
    pub(super) unsafe fn xor32_sse2(a: &[u8], b: &[u8], out: &mut [u8]) {
        let lo = _mm_xor_si128(
            _mm_loadu_si128(a.as_ptr() as *const __m128i),
            _mm_loadu_si128(b.as_ptr() as *const __m128i),
        );
        let hi = _mm_xor_si128(
            _mm_loadu_si128(a.as_ptr().add(16) as *const __m128i),
            _mm_loadu_si128(b.as_ptr().add(16) as *const __m128i),
        );
        _mm_storeu_si128(out.as_mut_ptr() as *mut __m128i, lo);
        _mm_storeu_si128(out.as_mut_ptr().add(16) as *mut __m128i, hi);
    }

    /// # Safety
    ///
    /// Caller must ensure AVX2 is available and that all slices are at
    /// least 32 bytes long.
    #[target_feature(enable = "avx2")]
    pub(super) unsafe fn xor32_avx2(a: &[u8], b: &[u8], out: &mut [u8]) {
        let r = _mm256_xor_si256(
            _mm256_loadu_si256(a.as_ptr() as *const __m256i),
            _mm256_loadu_si256(b.as_ptr() as *const __m256i),
        );
        _mm256_storeu_si256(out.as_mut_ptr() as *mut __m256i, r);
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use rand::{Rng, SeedableRng};
    use rand_xorshift::XorShiftRng;

    use super::{Capabilities, HostFeatures, Tier};
    use crate::Error;

    fn supported_tiers() -> Vec<Tier> {
        let best = HostFeatures::detect().best();
        [Tier::Scalar, Tier::Tier128, Tier::Tier256, Tier::Tier512]
            .into_iter()
            .filter(|t| *t <= best)
            .collect()
    }

    #[test]
    fn tier_ordering() {
        assert!(Tier::Scalar < Tier::Tier128);
        assert!(Tier::Tier128 < Tier::Tier256);
        assert!(Tier::Tier256 < Tier::Tier512);
        assert_eq!(Tier::Tier256.batch_width(), 4);
    }

    #[test]
    fn forcing_an_unsupported_tier_fails_at_setup() {
        // A host with no vector features at all.
        let none = HostFeatures::default();
        assert_matches!(
            Capabilities::for_features(none, Tier::Tier256),
            Err(Error::UnsupportedTier {
                requested: Tier::Tier256,
                detected: Tier::Scalar,
            })
        );
        assert!(Capabilities::for_features(none, Tier::Scalar).is_ok());

        // Forcing at or below the detected tier always succeeds.
        for tier in supported_tiers() {
            assert!(Capabilities::with_forced(tier).is_ok());
        }
    }

    #[test]
    fn cross_tier_xor_equivalence() {
        let scalar = Capabilities { tier: Tier::Scalar };
        let mut rng = XorShiftRng::seed_from_u64(0x5eed);

        for _ in 0..256 {
            let a: [u8; 32] = rng.gen();
            let b: [u8; 32] = rng.gen();
            let mut want = [0u8; 32];
            scalar.xor_digest(&a, &b, &mut want);

            for tier in supported_tiers() {
                let caps = Capabilities { tier };
                let mut got = [0u8; 32];
                caps.xor_digest(&a, &b, &mut got);
                assert_eq!(got, want, "tier {} diverged from scalar", tier.name());
            }
        }
    }

    proptest! {
        #[test]
        fn xor_laws(a in prop::array::uniform32(any::<u8>()), b in prop::array::uniform32(any::<u8>())) {
            let caps = Capabilities::new();
            let mut zero = [0u8; 32];
            caps.xor_digest(&a, &a, &mut zero);
            prop_assert_eq!(zero, [0u8; 32]);

            let mut ab = [0u8; 32];
            let mut ba = [0u8; 32];
            caps.xor_digest(&a, &b, &mut ab);
            caps.xor_digest(&b, &a, &mut ba);
            prop_assert_eq!(ab, ba);

            let mut back = [0u8; 32];
            caps.xor_digest(&ab, &b, &mut back);
            prop_assert_eq!(back, a);
        }
    }
}
