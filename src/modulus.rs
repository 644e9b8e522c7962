use itertools::izip;
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use rand::{distributions::Uniform, Rng, RngCore};

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Modulus {
    pub p: u64,
    barret_hi: u64,
    barret_lo: u64,
}

/// Word sized modulus with Barrett and Shoup reductions.
///
/// All moduli used by the ring layer are below 2^62 so that lazy
/// results in [0, 4p) still fit in a u64.
impl Modulus {
    pub fn new(p: u64) -> Self {
        assert!(p >= 2 && (p >> 62 == 0));

        // `r` in barret reduction
        // 2**128 / p
        let r = ((BigUint::from(1u64) << 128usize) / p)
            .to_u128()
            .unwrap_or(u128::MAX);
        Self {
            p,
            barret_hi: (r >> 64) as u64,
            barret_lo: r as u64,
        }
    }

    /// reduces `a` in [0, 2^64) to [0, 2p)
    ///
    /// x - ((r * x) / 2 ^ 2k) * p
    /// k = 64
    pub fn lazy_reduce_ct(&self, a: u64) -> u64 {
        let low = (a as u128 * (self.barret_lo as u128)) >> 64;
        let high = a as u128 * (self.barret_hi as u128);
        let num = (high + low) >> 64;

        let val = (a as u128) - (num * (self.p as u128));

        debug_assert!(val < 2 * self.p as u128);
        val as u64
    }

    /// reduces `a` in [0, p^2) to [0, 2p)
    pub fn lazy_reduce_u128(&self, a: u128) -> u64 {
        let alo = a as u64;
        let ahi = (a >> 64) as u64;

        let alo_lo = ((alo as u128) * (self.barret_lo as u128)) >> 64;
        let alo_hi = (alo as u128) * (self.barret_hi as u128);
        let ahi_lo = (ahi as u128) * (self.barret_lo as u128);
        let ahi_hi = (ahi as u128) * (self.barret_hi as u128);

        let num = ((alo_hi + ahi_lo + alo_lo) >> 64) + ahi_hi;
        let val = a - (num * (self.p as u128));

        val as u64
    }

    /// `x` must be in the range [0, 2p)
    ///
    /// runs `x < p ? x : x - p`
    /// in constant time
    pub const fn reduce_ct(x: u64, p: u64) -> u64 {
        debug_assert!(p >> 63 == 0);
        debug_assert!(x < 2 * p);

        let (y, _) = x.overflowing_sub(p);
        let xp = x ^ p;
        let yp = y ^ p;
        let xy = xp ^ yp;
        let xxy = x ^ xy;
        let xxy = xxy >> 63;
        let (c, _) = xxy.overflowing_sub(1);
        let r = (c & y) | ((!c) & x);

        debug_assert!(r == x % p);
        r
    }

    pub fn reduce(&self, a: u64) -> u64 {
        Self::reduce_ct(self.lazy_reduce_ct(a), self.p)
    }

    pub fn reduce_u128(&self, a: u128) -> u64 {
        Self::reduce_ct(self.lazy_reduce_u128(a), self.p)
    }

    /// **Warning: this isn't constant time**
    pub fn reduce_biguint(&self, a: &BigUint) -> u64 {
        // remainder is < p, so the conversion cannot fail
        (a % self.p).to_u64().unwrap_or_default()
    }

    pub fn reduce_i64(&self, a: i64) -> u64 {
        let r = self.reduce(a.unsigned_abs());
        if a < 0 {
            self.neg(r)
        } else {
            r
        }
    }

    pub fn reduce_vec_u64(&self, a: &[u64]) -> Vec<u64> {
        a.iter().map(|ar| self.reduce(*ar)).collect()
    }

    pub fn reduce_vec_i64(&self, a: &[i64]) -> Vec<u64> {
        a.iter().map(|ar| self.reduce_i64(*ar)).collect()
    }

    /// Modulus exponentiation
    ///
    /// (a ** r) mod p
    pub fn pow(&self, a: u64, mut r: u64) -> u64 {
        let mut base = self.reduce(a);
        let mut val = 1u64;
        while r > 0 {
            if r & 1 == 1 {
                val = self.mul(val, base);
            }
            base = self.mul(base, base);
            r >>= 1;
        }
        val
    }

    /// Modulus Inverse
    ///
    /// `p` is prime, therefore a^(p-2) = a^(-1) mod p.
    pub fn inv(&self, a: u64) -> Option<u64> {
        let a = self.reduce(a);
        if a == 0 {
            return None;
        }
        Some(self.pow(a, self.p - 2))
    }

    pub fn add(&self, a: u64, b: u64) -> u64 {
        debug_assert!(a < self.p);
        debug_assert!(b < self.p);
        Self::reduce_ct(a + b, self.p)
    }

    pub fn sub(&self, a: u64, b: u64) -> u64 {
        debug_assert!(a < self.p);
        debug_assert!(b < self.p);
        Self::reduce_ct(a + (self.p - b), self.p)
    }

    pub fn mul(&self, a: u64, b: u64) -> u64 {
        debug_assert!(a < self.p);
        debug_assert!(b < self.p);
        self.reduce_u128((a as u128) * (b as u128))
    }

    pub fn neg(&self, a: u64) -> u64 {
        debug_assert!(a < self.p);
        Self::reduce_ct(self.p - a, self.p)
    }

    pub fn add_vec(&self, a: &mut [u64], b: &[u64]) {
        izip!(a, b).for_each(|(ab, b)| *ab = self.add(*ab, *b))
    }

    pub fn sub_vec(&self, a: &mut [u64], b: &[u64]) {
        izip!(a, b).for_each(|(ab, b)| *ab = self.sub(*ab, *b))
    }

    pub fn mul_vec(&self, a: &mut [u64], b: &[u64]) {
        izip!(a, b).for_each(|(ab, b)| *ab = self.mul(*ab, *b))
    }

    pub fn neg_vec(&self, a: &mut [u64]) {
        a.iter_mut().for_each(|ai| *ai = self.neg(*ai))
    }

    pub fn scalar_mul_vec(&self, a: &mut [u64], b: u64) {
        let b = self.reduce(b);
        let b_shoup = self.shoup(b);
        a.iter_mut()
            .for_each(|ai| *ai = self.mul_shoup(*ai, b, b_shoup))
    }

    /// Shoup representation of value
    ///
    /// (a * 2^64)/ p
    pub fn shoup(&self, a: u64) -> u64 {
        debug_assert!(a < self.p);
        (((a as u128) << 64) / (self.p as u128)) as u64
    }

    pub fn shoup_vec(&self, vals: &[u64]) -> Vec<u64> {
        vals.iter().map(|v| self.shoup(*v)).collect()
    }

    pub fn mul_shoup(&self, a: u64, b: u64, b_shoup: u64) -> u64 {
        Self::reduce_ct(self.lazy_mul_shoup(a, b, b_shoup), self.p)
    }

    /// Lazy shoup multiplication of a, b in ct
    ///
    /// returns product in range [0, 2p)
    pub fn lazy_mul_shoup(&self, a: u64, b: u64, b_shoup: u64) -> u64 {
        debug_assert!(b < self.p);
        debug_assert!(b_shoup == self.shoup(b));

        // b_shoup = (b * 2^64) / p
        // q = (a * b_shoup) / 2^64 = (a * b * 2^64) / (p * 2^64) = (a * b) / p
        let q = ((a as u128) * (b_shoup as u128)) >> 64;
        let r = ((a as u128) * (b as u128)).wrapping_sub(q * (self.p as u128)) as u64;

        debug_assert!(r < self.p * 2);

        r
    }

    pub fn random_vec<R: RngCore>(&self, size: usize, rng: &mut R) -> Vec<u64> {
        let uniform_dist = Uniform::from(0..self.p);
        rng.sample_iter(uniform_dist).take(size).collect()
    }

    pub fn modulus(&self) -> u64 {
        self.p
    }

    /// Bit width of the modulus
    pub fn bits(&self) -> u32 {
        64 - self.p.leading_zeros()
    }
}
