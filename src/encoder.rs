//! Packing of raw bytes into plaintext coefficients.
//!
//! Bytes are consumed most significant bit first and laid out as a
//! contiguous bit stream over coefficients of `limit` bits each.

use crate::utils::div_ceil;

/// Coefficients needed to hold `ele_size` bytes at `logt` bits per coefficient
pub fn coefficients_per_element(logt: usize, ele_size: usize) -> usize {
    div_ceil(8 * ele_size, logt)
}

/// Elements that fit into one plaintext of `degree` coefficients. Zero when a
/// single element does not fit.
pub fn elements_per_ptxt(logt: usize, degree: usize, ele_size: usize) -> usize {
    degree / coefficients_per_element(logt, ele_size)
}

/// Plaintexts needed to hold `ele_num` elements. `ele_per_ptxt` must be non zero.
pub fn plaintexts_per_db(logt: usize, degree: usize, ele_num: usize, ele_size: usize) -> usize {
    div_ceil(ele_num, elements_per_ptxt(logt, degree, ele_size))
}

/// Packs `bytes` into `ceil(8 * len / limit)` coefficients of `limit` bits.
/// The last coefficient is left aligned.
pub fn bytes_to_coeffs(limit: usize, bytes: &[u8]) -> Vec<u64> {
    debug_assert!((1..=62).contains(&limit));

    let mut output = vec![0u64; coefficients_per_element(limit, bytes.len())];
    if bytes.is_empty() {
        return output;
    }

    let mut room = limit;
    let mut target = 0;
    for byte in bytes {
        let src = *byte as u64;
        let mut rest = 8;
        while rest > 0 {
            if room == 0 {
                target += 1;
                room = limit;
            }
            let shift = rest.min(room);
            // next `shift` bits of the byte, from the top
            let bits = (src >> (rest - shift)) & ((1 << shift) - 1);
            output[target] = (output[target] << shift) | bits;
            room -= shift;
            rest -= shift;
        }
    }
    output[target] <<= room;

    output
}

/// Inverse of [`bytes_to_coeffs`]: reads `size_out` bytes from the
/// `limit` bit wide coefficients. Bits above `limit` are ignored.
pub fn coeffs_to_bytes(limit: usize, coeffs: &[u64], size_out: usize) -> Vec<u8> {
    debug_assert!((1..=62).contains(&limit));

    let mut output = Vec::with_capacity(size_out);
    let mut current = 0u64;
    let mut room = 8;

    'outer: for coeff in coeffs {
        let mut rest = limit;
        while rest > 0 {
            if output.len() == size_out {
                break 'outer;
            }
            let shift = rest.min(room);
            let bits = (coeff >> (rest - shift)) & ((1 << shift) - 1);
            current = (current << shift) | bits;
            room -= shift;
            rest -= shift;
            if room == 0 {
                output.push(current as u8);
                current = 0;
                room = 8;
            }
        }
    }

    // partially filled trailing byte
    if output.len() < size_out && room < 8 {
        output.push((current << room) as u8);
    }
    output.resize(size_out, 0);
    output
}

/// Splits a flat index into one coordinate per dimension, most significant
/// dimension first.
pub fn compute_indices(desired_index: usize, nvec: &[usize]) -> Vec<usize> {
    let mut product: usize = nvec.iter().product();
    let mut j = desired_index;
    nvec.iter()
        .map(|n| {
            product /= n;
            let index = j / product;
            j %= product;
            index
        })
        .collect()
}

/// Bytes of the element at `offset` inside a plaintext holding
/// `coeffs` (packed at `logt` bits per coefficient).
pub fn decode_element(logt: usize, coeffs: &[u64], offset: usize, ele_size: usize) -> Vec<u8> {
    let bytes = coeffs_to_bytes(logt, coeffs, (offset + 1) * ele_size);
    bytes[offset * ele_size..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{thread_rng, RngCore};

    #[test]
    fn packing_arithmetic() {
        assert_eq!(coefficients_per_element(12, 32), 22);
        assert_eq!(elements_per_ptxt(12, 32, 32), 1);
        assert_eq!(elements_per_ptxt(12, 32, 3), 16);
        assert_eq!(elements_per_ptxt(12, 16, 32), 0);
        assert_eq!(plaintexts_per_db(12, 32, 33, 3), 3);
        // 116 coefficients per element, 35 elements per plaintext
        assert_eq!(plaintexts_per_db(20, 4096, 1000, 288), 29);
    }

    #[test]
    fn bit_layout() {
        // 0xAB 0xCD 0xEF at 12 bits per coefficient
        assert_eq!(bytes_to_coeffs(12, &[0xAB, 0xCD, 0xEF]), vec![0xABC, 0xDEF]);
        // 0xFF at 5 bits: 11111 | 111 (left aligned in 5 bits)
        assert_eq!(bytes_to_coeffs(5, &[0xFF]), vec![0b11111, 0b11100]);
        assert_eq!(coeffs_to_bytes(5, &[0b11111, 0b11100], 1), vec![0xFF]);
        assert!(bytes_to_coeffs(12, &[]).is_empty());
    }

    #[test]
    fn ignores_bits_above_limit() {
        let coeffs = [0xFABC, 0xFDEF];
        assert_eq!(coeffs_to_bytes(12, &coeffs, 3), vec![0xAB, 0xCD, 0xEF]);
    }

    #[test]
    fn round_trip() {
        let mut rng = thread_rng();
        for limit in [1usize, 7, 8, 12, 20, 31, 60] {
            for len in [1usize, 3, 32, 101] {
                let mut bytes = vec![0u8; len];
                rng.fill_bytes(&mut bytes);
                let coeffs = bytes_to_coeffs(limit, &bytes);
                assert_eq!(coeffs.len(), div_ceil(8 * len, limit));
                assert!(coeffs.iter().all(|c| *c < (1 << limit)));
                assert_eq!(coeffs_to_bytes(limit, &coeffs, len), bytes);
            }
        }
    }

    #[test]
    fn packed_elements() {
        let mut rng = thread_rng();
        let mut bytes = vec![0u8; 5 * 7];
        rng.fill_bytes(&mut bytes);
        let coeffs = bytes_to_coeffs(12, &bytes);
        for offset in 0..5 {
            assert_eq!(
                decode_element(12, &coeffs, offset, 7),
                &bytes[offset * 7..(offset + 1) * 7]
            );
        }
    }

    #[test]
    fn indices() {
        assert_eq!(compute_indices(0, &[4, 4]), vec![0, 0]);
        assert_eq!(compute_indices(6, &[4, 4]), vec![1, 2]);
        assert_eq!(compute_indices(23, &[2, 3, 4]), vec![1, 2, 3]);
        assert_eq!(compute_indices(9, &[2, 3, 4]), vec![0, 2, 1]);
        assert_eq!(compute_indices(5, &[8]), vec![5]);
    }
}
