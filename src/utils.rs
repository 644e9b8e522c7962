use num_bigint_dig::{prime::probably_prime, BigUint};
use num_traits::PrimInt;
use rand::RngCore;
use std::mem::size_of;

/// Samples a vector of `size` values from a centered binomial distribution
/// with the given `variance` (1 to 16).
///
/// Ref - https://github.com/tlepoint/fhe.rs/blob/b573138d682e69c3553c2e4ae4a1b7f7a65dbe5d/crates/fhe-util/src/lib.rs#L38
pub fn sample_vec_cbd<R: RngCore>(size: usize, variance: usize, rng: &mut R) -> Vec<i64> {
    assert!((1..=16).contains(&variance));

    let mut out = Vec::with_capacity(size);

    let number_bits = 4 * variance;
    let mask_add = ((u64::MAX >> (64 - number_bits)) >> (2 * variance)) as u128;
    let mask_sub = mask_add << (2 * variance);

    let mut current_pool = rng.next_u64() as u128;
    let mut current_pool_nbits = 64;

    for _ in 0..size {
        if current_pool_nbits < number_bits {
            current_pool |= (rng.next_u64() as u128) << current_pool_nbits;
            current_pool_nbits += 64;
        }
        out.push(
            ((current_pool & mask_add).count_ones() as i64)
                - ((current_pool & mask_sub).count_ones() as i64),
        );
        current_pool >>= number_bits;
        current_pool_nbits -= number_bits;
    }

    out
}

/// Returns number of bits `b` such that `2^b <= value`
///
/// @ref: https://github.com/tlepoint/fhe.rs/blob/27508002ea516d9ba41d0aa756bec7347f8404b2/crates/fhe-util/src/lib.rs#L193
pub fn ilog2<T: PrimInt>(value: T) -> usize {
    size_of::<T>() * 8 - 1 - value.leading_zeros() as usize
}

/// Smallest `b` such that `value <= 2^b`
pub fn ceil_log2(value: u64) -> u32 {
    debug_assert!(value != 0);
    value.next_power_of_two().trailing_zeros()
}

pub fn div_ceil<T: PrimInt>(a: T, b: T) -> T {
    assert!(b != T::zero());
    (a + b - T::one()) / b
}

pub fn is_prime(p: u64) -> bool {
    probably_prime(&BigUint::from(p), 0)
}

/// Finds the largest prime `p` below `upper_bound` with exactly `num_bits`
/// bits and `p ≡ 1 mod modulo`.
///
/// Ref - https://github.com/tlepoint/fhe.rs/blob/b573138d682e69c3553c2e4ae4a1b7f7a65dbe5d/crates/fhe-util/src/lib.rs#L15
pub fn generate_prime(num_bits: usize, modulo: u64, upper_bound: u64) -> Option<u64> {
    if !(10..=62).contains(&num_bits) || modulo == 0 || upper_bound < 2 {
        return None;
    }

    let leading_zeros = (64 - num_bits) as u32;

    let mut tentative_prime = upper_bound - 1;
    while tentative_prime % modulo != 1 && tentative_prime.leading_zeros() == leading_zeros {
        tentative_prime -= 1;
    }

    while tentative_prime.leading_zeros() == leading_zeros
        && !is_prime(tentative_prime)
        && tentative_prime >= modulo
    {
        tentative_prime -= modulo;
    }

    if tentative_prime.leading_zeros() == leading_zeros && is_prime(tentative_prime) {
        Some(tentative_prime)
    } else {
        None
    }
}

/// Generates distinct primes with the requested bit sizes that support a
/// negacyclic NTT of size `degree`.
pub fn generate_moduli(moduli_sizes: &[usize], degree: usize) -> Option<Vec<u64>> {
    let mut moduli: Vec<u64> = vec![];
    for size in moduli_sizes {
        if *size > 62 || *size < 10 {
            return None;
        }

        let mut upper_bound = 1u64 << size;
        loop {
            let prime = generate_prime(*size, 2 * degree as u64, upper_bound)?;
            if !moduli.contains(&prime) {
                moduli.push(prime);
                break;
            }
            upper_bound = prime;
        }
    }

    Some(moduli)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::thread_rng;

    #[test]
    fn prime_generation() {
        for (bits, degree) in [(20usize, 32u64), (50, 4096), (60, 32)] {
            let p = generate_prime(bits, 2 * degree, 1 << bits).unwrap();
            assert_eq!(64 - p.leading_zeros() as usize, bits);
            assert_eq!(p % (2 * degree), 1);
            assert!(is_prime(p));
        }
        assert!(generate_prime(8, 64, 1 << 8).is_none());
    }

    #[test]
    fn moduli_are_distinct() {
        let moduli = generate_moduli(&[50, 50, 55], 64).unwrap();
        assert_eq!(moduli.len(), 3);
        assert_ne!(moduli[0], moduli[1]);
        moduli.iter().for_each(|q| assert_eq!(q % 128, 1));
    }

    #[test]
    fn cbd_is_bounded() {
        let mut rng = thread_rng();
        for variance in [1usize, 10, 16] {
            let v = sample_vec_cbd(1000, variance, &mut rng);
            assert_eq!(v.len(), 1000);
            assert!(v.iter().all(|x| x.unsigned_abs() as usize <= 2 * variance));
        }
    }

    #[test]
    fn logs() {
        assert_eq!(ilog2(4096u64), 12);
        assert_eq!(ilog2(4097u64), 12);
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(5), 3);
        assert_eq!(ceil_log2(8), 3);
        assert_eq!(div_ceil(61u32, 20), 4);
    }
}
