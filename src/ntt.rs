use crate::modulus::Modulus;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Negacyclic number theoretic transform modulo a prime `p` with `p ≡ 1 mod 2n`.
///
/// Forward transform maps coefficients in natural order to evaluations in
/// bit-reversed order; backward transform does the opposite. Pointwise
/// products of transformed vectors correspond to products in `Z_p[X]/(X^n + 1)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NttOperator {
    p: Modulus,
    psi_powers: Vec<u64>,
    psi_powers_shoup: Vec<u64>,
    psi_inv_powers: Vec<u64>,
    psi_inv_powers_shoup: Vec<u64>,
    size_inv: u64,
    size_inv_shoup: u64,
    size: usize,
}

impl NttOperator {
    /// Returns `None` when `p` and `size` do not support a negacyclic NTT.
    pub fn new(p: &Modulus, size: usize) -> Option<Self> {
        if !supports_ntt(p.p, size) {
            return None;
        }

        let psi = primitive_root(2 * size, p)?;
        let psi_inv = p.inv(psi)?;
        let log_size = size.trailing_zeros();

        // powers of psi arranged in bit reversed order, in the sequence
        // they are accessed by the butterflies
        let mut psi_powers = vec![0u64; size];
        let mut psi_inv_powers = vec![0u64; size];
        let mut v = 1u64;
        let mut v_inv = 1u64;
        for i in 0..size {
            let j = bit_reverse(i, log_size);
            psi_powers[j] = v;
            psi_inv_powers[j] = v_inv;
            v = p.mul(v, psi);
            v_inv = p.mul(v_inv, psi_inv);
        }

        let size_inv = p.inv(size as u64)?;

        Some(Self {
            psi_powers_shoup: p.shoup_vec(&psi_powers),
            psi_inv_powers_shoup: p.shoup_vec(&psi_inv_powers),
            psi_powers,
            psi_inv_powers,
            size_inv,
            size_inv_shoup: p.shoup(size_inv),
            p: p.clone(),
            size,
        })
    }

    /// Forward ntt transformation (Cooley-Tukey butterflies)
    ///
    /// Ref - Algorithm 1 of https://eprint.iacr.org/2016/504.pdf
    pub fn forward(&self, a: &mut [u64]) {
        assert!(a.len() == self.size);

        let n = self.size;
        let mut t = n;
        let mut m = 1;
        while m < n {
            t >>= 1;
            for i in 0..m {
                let j1 = 2 * i * t;
                let w = self.psi_powers[m + i];
                let w_shoup = self.psi_powers_shoup[m + i];
                for j in j1..(j1 + t) {
                    let u = a[j];
                    let v = self.p.mul_shoup(a[j + t], w, w_shoup);
                    a[j] = self.p.add(u, v);
                    a[j + t] = self.p.sub(u, v);
                }
            }
            m <<= 1;
        }
    }

    /// Backward ntt transformation (Gentleman-Sande butterflies)
    ///
    /// Ref - Algorithm 2 of https://eprint.iacr.org/2016/504.pdf
    pub fn backward(&self, a: &mut [u64]) {
        assert!(a.len() == self.size);

        let mut t = 1;
        let mut m = self.size;
        while m > 1 {
            let h = m >> 1;
            let mut j1 = 0;
            for i in 0..h {
                let w = self.psi_inv_powers[h + i];
                let w_shoup = self.psi_inv_powers_shoup[h + i];
                for j in j1..(j1 + t) {
                    let u = a[j];
                    let v = a[j + t];
                    a[j] = self.p.add(u, v);
                    a[j + t] = self.p.mul_shoup(self.p.sub(u, v), w, w_shoup);
                }
                j1 += 2 * t;
            }
            t <<= 1;
            m = h;
        }

        a.iter_mut()
            .for_each(|ai| *ai = self.p.mul_shoup(*ai, self.size_inv, self.size_inv_shoup));
    }
}

/// Checks the following for ntt support
/// 1. p % 2n === 1 (to make sure that 2nth roots of unity exist)
/// 2. n is power of 2 and at least 8
fn supports_ntt(p: u64, n: usize) -> bool {
    if !n.is_power_of_two() || n < 8 {
        return false;
    }

    p % ((n as u64) << 1) == 1
}

fn bit_reverse(i: usize, bits: u32) -> usize {
    if bits == 0 {
        return 0;
    }
    i.reverse_bits() >> (usize::BITS - bits)
}

/// Finds a primitive `n`-th root of unity modulo p, `n` a power of two.
fn primitive_root(n: usize, p: &Modulus) -> Option<u64> {
    let lambda = (p.p - 1) / (n as u64);

    let mut rng: ChaCha8Rng = SeedableRng::seed_from_u64(0);
    for _ in 0..100 {
        let root = p.pow(rng.gen_range(2..p.p), lambda);
        if is_primitive_root(root, n, p) {
            return Some(root);
        }
    }

    None
}

/// For `n` a power of two, `v` is a primitive n-th root of unity
/// iff v^(n/2) = -1 mod p.
fn is_primitive_root(v: u64, n: usize, p: &Modulus) -> bool {
    debug_assert!(v < p.p);
    p.pow(v, (n / 2) as u64) == p.p - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::generate_prime;
    use rand::thread_rng;

    fn schoolbook_negacyclic(a: &[u64], b: &[u64], p: &Modulus) -> Vec<u64> {
        let n = a.len();
        let mut out = vec![0u64; n];
        for i in 0..n {
            for j in 0..n {
                let prod = p.mul(a[i], b[j]);
                if i + j < n {
                    out[i + j] = p.add(out[i + j], prod);
                } else {
                    out[i + j - n] = p.sub(out[i + j - n], prod);
                }
            }
        }
        out
    }

    #[test]
    fn rejects_unsupported() {
        assert!(NttOperator::new(&Modulus::new(1153), 6).is_none());
        // 1153 = 1 mod 128 but not mod 256
        assert!(NttOperator::new(&Modulus::new(1153), 64).is_some());
        assert!(NttOperator::new(&Modulus::new(1153), 128).is_none());
    }

    #[test]
    fn forward_backward() {
        let mut rng = thread_rng();
        for n in [8usize, 32, 1024] {
            let p = Modulus::new(generate_prime(50, 2 * n as u64, 1 << 50).unwrap());
            let op = NttOperator::new(&p, n).unwrap();
            let a = p.random_vec(n, &mut rng);
            let mut b = a.clone();
            op.forward(&mut b);
            op.backward(&mut b);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn negacyclic_product() {
        let mut rng = thread_rng();
        let n = 32;
        let p = Modulus::new(generate_prime(40, 2 * n as u64, 1 << 40).unwrap());
        let op = NttOperator::new(&p, n).unwrap();

        let a = p.random_vec(n, &mut rng);
        let b = p.random_vec(n, &mut rng);
        let expected = schoolbook_negacyclic(&a, &b, &p);

        let mut a_ntt = a.clone();
        let mut b_ntt = b.clone();
        op.forward(&mut a_ntt);
        op.forward(&mut b_ntt);
        p.mul_vec(&mut a_ntt, &b_ntt);
        op.backward(&mut a_ntt);

        assert_eq!(a_ntt, expected);
    }
}
