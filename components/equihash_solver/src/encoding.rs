//! Minimal solution encoding.
//!
//! The wire format packs each candidate index into
//! `collision_bit_length + 1` bits, big-endian, with no padding between
//! indices. For `(192, 7)` that is 25 bits per index and 400 bytes per
//! solution.

use std::io::Cursor;
use std::mem::size_of;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::params::Params;

/// Unpacks `bit_len`-bit big-endian elements into `out_width`-byte values,
/// each preceded by `byte_pad` zero bytes.
pub(crate) fn expand_array(vin: &[u8], bit_len: usize, byte_pad: usize) -> Vec<u8> {
    assert!(bit_len >= 8);
    assert!(u32::BITS as usize >= 7 + bit_len);

    let out_width = bit_len.div_ceil(8) + byte_pad;
    let out_len = 8 * out_width * vin.len() / bit_len;

    // Expansion is a no-op when elements are already whole bytes.
    if out_len == vin.len() {
        return vin.to_vec();
    }

    let mut vout: Vec<u8> = vec![0; out_len];
    let bit_len_mask: u32 = (1 << bit_len) - 1;

    // The low acc_bits bits of acc_value hold pending input, big-endian.
    let mut acc_bits = 0;
    let mut acc_value: u32 = 0;

    let mut j = 0;
    for b in vin {
        acc_value = (acc_value << 8) | u32::from(*b);
        acc_bits += 8;

        // Whenever the accumulator holds a whole element, flush it,
        // masking bit_len across the element's byte boundaries.
        if acc_bits >= bit_len {
            acc_bits -= bit_len;
            for x in byte_pad..out_width {
                let shift = 8 * (out_width - x - 1);
                vout[j + x] =
                    ((acc_value >> (acc_bits + shift)) & ((bit_len_mask >> shift) & 0xFF)) as u8;
            }
            j += out_width;
        }
    }

    vout
}

/// Packs `out_width`-byte values (each preceded by `byte_pad` ignored
/// bytes) into contiguous `bit_len`-bit big-endian elements: the inverse
/// of [`expand_array`].
pub(crate) fn compress_array(vin: &[u8], bit_len: usize, byte_pad: usize) -> Vec<u8> {
    assert!(bit_len >= 8);
    assert!(u32::BITS as usize >= 7 + bit_len);

    let in_width = bit_len.div_ceil(8) + byte_pad;
    let out_len = bit_len * vin.len() / (8 * in_width);

    if out_len == vin.len() {
        return vin.to_vec();
    }

    let mut vout: Vec<u8> = vec![0; out_len];
    let bit_len_mask: u32 = (1 << bit_len) - 1;

    let mut acc_bits = 0;
    let mut acc_value: u32 = 0;

    let mut j = 0;
    for out in vout.iter_mut() {
        // Refill the accumulator with the next input element when it runs
        // short of a whole output byte.
        if acc_bits < 8 {
            acc_value <<= bit_len;
            for x in byte_pad..in_width {
                let masked = vin[j + x] & (((bit_len_mask >> (8 * (in_width - x - 1))) & 0xFF) as u8);
                acc_value |= u32::from(masked) << (8 * (in_width - x - 1));
            }
            j += in_width;
            acc_bits += bit_len;
        }

        acc_bits -= 8;
        *out = (acc_value >> acc_bits) as u8;
    }

    vout
}

/// Encodes a sorted index list into the minimal wire format.
pub(crate) fn minimal_from_indices(p: Params, indices: &[u32]) -> Vec<u8> {
    let c_bit_len = p.collision_bit_length();
    // Big-endian so that lexicographic array comparison is equivalent to
    // integer comparison
    let mut index_bytes = Vec::with_capacity(indices.len() * size_of::<u32>());
    for &index in indices {
        index_bytes.write_u32::<BigEndian>(index).unwrap();
    }

    let byte_pad = size_of::<u32>() - (c_bit_len + 1).div_ceil(8);
    compress_array(&index_bytes, c_bit_len + 1, byte_pad)
}

/// Returns `None` if `minimal` has the wrong length for these parameters.
pub(crate) fn indices_from_minimal(p: Params, minimal: &[u8]) -> Option<Vec<u32>> {
    let c_bit_len = p.collision_bit_length();
    // Division is exact because k >= 3.
    if minimal.len() != ((1 << p.k) * (c_bit_len + 1)) / 8 {
        return None;
    }

    assert!((c_bit_len + 1).div_ceil(8) <= size_of::<u32>());
    let len_indices = u32::BITS as usize * minimal.len() / (c_bit_len + 1);
    let byte_pad = size_of::<u32>() - (c_bit_len + 1).div_ceil(8);

    let mut csr = Cursor::new(expand_array(minimal, c_bit_len + 1, byte_pad));
    let mut ret = Vec::with_capacity(len_indices);

    while let Ok(i) = csr.read_u32::<BigEndian>() {
        ret.push(i);
    }

    Some(ret)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{
        compress_array, expand_array, indices_from_minimal, minimal_from_indices, Params,
    };

    #[test]
    fn array_expansion_straddles_bytes() {
        // 8 25-bit chunks, all ones: the (192, 7) element shape.
        let compact = [0xff; 25];
        let expanded = expand_array(&compact, 25, 0);
        assert_eq!(expanded.len(), 8 * 4);
        for chunk in expanded.chunks(4) {
            assert_eq!(chunk, &[0x01, 0xff, 0xff, 0xff]);
        }

        // 8 11-bit chunks, all ones, 2-byte padding.
        let compact = [0xff; 11];
        let expanded = expand_array(&compact, 11, 2);
        assert_eq!(expanded.len(), 8 * 4);
        for chunk in expanded.chunks(4) {
            assert_eq!(chunk, &[0x00, 0x00, 0x07, 0xff]);
        }
    }

    #[test]
    fn compression_inverts_expansion() {
        let compact: Vec<u8> = (0..25u8).map(|i| i.wrapping_mul(37)).collect();
        let expanded = expand_array(&compact, 25, 0);
        assert_eq!(compress_array(&expanded, 25, 0), compact);

        let compact: Vec<u8> = (0..11u8).map(|i| i.wrapping_mul(29)).collect();
        let expanded = expand_array(&compact, 11, 2);
        assert_eq!(compress_array(&expanded, 11, 2), compact);
    }

    #[test]
    fn minimal_length_is_exact() {
        let p = Params::new(192, 7).unwrap();
        let indices: Vec<u32> = (0..128).map(|i| i * 3 + 1).collect();
        let minimal = minimal_from_indices(p, &indices);
        // 128 indices * 25 bits / 8 = 400 bytes.
        assert_eq!(minimal.len(), 400);
        assert_eq!(indices_from_minimal(p, &minimal), Some(indices));

        // Wrong length is rejected outright.
        assert_eq!(indices_from_minimal(p, &minimal[1..]), None);
    }

    #[test]
    fn small_parameter_round_trip() {
        let p = Params::new(96, 3).unwrap();
        let indices = vec![0, 1, 2, 70, 4096, 65535, 1 << 20, (1 << 25) - 1];
        let minimal = minimal_from_indices(p, &indices);
        assert_eq!(minimal.len(), 25);
        assert_eq!(indices_from_minimal(p, &minimal), Some(indices));
    }

    proptest! {
        #[test]
        fn round_trips_for_192_7(
            seed in prop::collection::btree_set(0u32..(1 << 25), 128)
        ) {
            let p = Params::new(192, 7).unwrap();
            let indices: Vec<u32> = seed.into_iter().collect();
            let minimal = minimal_from_indices(p, &indices);
            prop_assert_eq!(indices_from_minimal(p, &minimal), Some(indices));
        }
    }
}
