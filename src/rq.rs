use crate::{
    error::{PirError, Result},
    modulus::Modulus,
    ntt::NttOperator,
    rns::RnsContext,
    utils::sample_vec_cbd,
};

use itertools::izip;
use ndarray::{Array2, ArrayView2, Axis};
use num_bigint::BigUint;
use rand::{CryptoRng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use sha2::{Digest, Sha256};
use std::{
    fmt::Debug,
    ops::{Add, AddAssign, Mul, MulAssign, Neg, Sub, SubAssign},
    slice::{ChunksExact, ChunksExactMut},
    sync::Arc,
};

/// Substitution exponent
/// substitute x -> x^k, where
/// k is the exponent
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Substitution {
    exponent: usize,
}

impl Substitution {
    /// `exponent` must be odd to define an automorphism of `Z_q[X]/(X^N + 1)`
    pub fn new(ctx: &RqContext, exponent: usize) -> Result<Self> {
        if exponent & 1 == 0 {
            return Err(PirError::InvalidParameters(format!(
                "substitution exponent {exponent} is even"
            )));
        }
        Ok(Substitution {
            exponent: exponent % (2 * ctx.degree),
        })
    }

    pub fn exponent(&self) -> usize {
        self.exponent
    }
}

// Context
#[derive(Clone)]
pub struct RqContext {
    pub moduli_64: Vec<u64>,
    pub moduli: Vec<Modulus>,
    pub rns: Arc<RnsContext>,
    pub ntt_ops: Vec<NttOperator>,
    pub degree: usize,
}

impl PartialEq for RqContext {
    fn eq(&self, other: &Self) -> bool {
        self.degree == other.degree && self.moduli_64 == other.moduli_64
    }
}

impl Eq for RqContext {}

impl Debug for RqContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("moduli", &self.moduli_64)
            .field("degree", &self.degree)
            .finish()
    }
}

impl RqContext {
    pub fn new(moduli_64: &[u64], degree: usize) -> Result<Self> {
        if moduli_64.is_empty() {
            return Err(PirError::InvalidParameters(
                "at least one coefficient modulus is required".into(),
            ));
        }

        let rns = RnsContext::new(moduli_64).ok_or_else(|| {
            PirError::InvalidParameters("coefficient moduli must be pairwise coprime".into())
        })?;
        let moduli = rns.moduli.clone();
        let ntt_ops = moduli
            .iter()
            .map(|m| {
                NttOperator::new(m, degree).ok_or_else(|| {
                    PirError::InvalidParameters(format!(
                        "modulus {} does not support a negacyclic ntt of size {degree}",
                        m.p
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            moduli_64: moduli_64.to_vec(),
            moduli,
            rns: Arc::new(rns),
            ntt_ops,
            degree,
        })
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Representation {
    PowerBasis,
    Ntt,
}

/// Element of `Z_q[X]/(X^N + 1)` stored as one row of residues per modulus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Poly {
    pub context: Arc<RqContext>,
    pub representation: Representation,
    coefficients: Array2<u64>,
}

impl Poly {
    pub fn coefficients(&self) -> ArrayView2<u64> {
        self.coefficients.view()
    }

    /// Residues modulo the `j`th modulus
    pub fn limb(&self, j: usize) -> Option<&[u64]> {
        self.limbs().nth(j)
    }

    pub fn limb_mut(&mut self, j: usize) -> Option<&mut [u64]> {
        self.limbs_mut().nth(j)
    }

    pub(crate) fn limbs(&self) -> ChunksExact<'_, u64> {
        let degree = self.context.degree;
        self.coefficients
            .as_slice()
            .expect("coefficients are always in standard layout")
            .chunks_exact(degree)
    }

    pub(crate) fn limbs_mut(&mut self) -> ChunksExactMut<'_, u64> {
        let degree = self.context.degree;
        self.coefficients
            .as_slice_mut()
            .expect("coefficients are always in standard layout")
            .chunks_exact_mut(degree)
    }

    pub fn change_representation(&mut self, to: Representation) {
        if self.representation == to {
            return;
        }

        let ctx = self.context.clone();
        match to {
            Representation::Ntt => izip!(self.limbs_mut(), ctx.ntt_ops.iter())
                .for_each(|(coefficients, op)| op.forward(coefficients)),
            Representation::PowerBasis => izip!(self.limbs_mut(), ctx.ntt_ops.iter())
                .for_each(|(coefficients, op)| op.backward(coefficients)),
        }
        self.representation = to;
    }

    /// Applies `X -> X^k`. Operates in power basis; a poly in ntt form is
    /// transformed back and forth.
    pub fn substitute(&self, a: &Substitution) -> Poly {
        if self.representation == Representation::Ntt {
            let mut p = self.clone();
            p.change_representation(Representation::PowerBasis);
            let mut p = p.substitute(a);
            p.change_representation(Representation::Ntt);
            return p;
        }

        let mut poly = Poly::zero(&self.context, Representation::PowerBasis);
        let degree = self.context.degree;
        let mask = degree - 1;
        izip!(poly.limbs_mut(), self.limbs(), self.context.moduli.iter()).for_each(
            |(out, input, q)| {
                let mut power = 0usize;
                for coeff in input.iter() {
                    // X^N = -1, so the sign flips whenever
                    // floor(power / N) is odd
                    let slot = &mut out[power & mask];
                    if (power & degree) != 0 {
                        *slot = q.sub(*slot, *coeff);
                    } else {
                        *slot = q.add(*slot, *coeff);
                    }
                    power = (power + a.exponent) & (2 * degree - 1);
                }
            },
        );
        poly
    }

    pub fn zero(ctx: &Arc<RqContext>, representation: Representation) -> Poly {
        Poly {
            context: ctx.clone(),
            representation,
            coefficients: Array2::zeros((ctx.moduli.len(), ctx.degree)),
        }
    }

    pub fn random<R: RngCore + CryptoRng>(
        ctx: &Arc<RqContext>,
        representation: Representation,
        rng: &mut R,
    ) -> Poly {
        let mut poly = Poly::zero(ctx, representation);
        izip!(poly.limbs_mut(), ctx.moduli.iter())
            .for_each(|(coeffs, q)| coeffs.copy_from_slice(&q.random_vec(ctx.degree, rng)));
        poly
    }

    ///
    /// Ref - https://github.com/Janmajayamall/fhe.rs/blob/8aafe4396d0b771e6aa25257c7daa61c109eb367/crates/fhe-math/src/rq/mod.rs#L243
    pub fn random_from_seed(
        ctx: &Arc<RqContext>,
        representation: Representation,
        seed: <ChaCha8Rng as SeedableRng>::Seed,
    ) -> Poly {
        // hash seed into a ChaCha8Rng seed.
        let mut hasher = Sha256::new();
        hasher.update(seed);

        let mut prng =
            ChaCha8Rng::from_seed(<ChaCha8Rng as SeedableRng>::Seed::from(hasher.finalize()));
        Poly::random(ctx, representation, &mut prng)
    }

    pub fn random_small<R: CryptoRng + RngCore>(
        ctx: &Arc<RqContext>,
        representation: Representation,
        variance: usize,
        rng: &mut R,
    ) -> Poly {
        let values = sample_vec_cbd(ctx.degree, variance, rng);
        let mut poly = Poly::try_from_vec_i64(ctx, &values);
        poly.change_representation(representation);
        poly
    }

    /// Power basis poly with `a` as leading coefficients, each reduced modulo
    /// every `q_j`. Extra values beyond the degree are ignored.
    pub fn try_from_vec_u64(ctx: &Arc<RqContext>, a: &[u64]) -> Poly {
        let mut poly = Poly::zero(ctx, Representation::PowerBasis);
        let len = a.len().min(ctx.degree);
        izip!(poly.limbs_mut(), ctx.moduli.iter())
            .for_each(|(coeffs, q)| coeffs[..len].copy_from_slice(&q.reduce_vec_u64(&a[..len])));
        poly
    }

    pub fn try_from_vec_i64(ctx: &Arc<RqContext>, a: &[i64]) -> Poly {
        let mut poly = Poly::zero(ctx, Representation::PowerBasis);
        let len = a.len().min(ctx.degree);
        izip!(poly.limbs_mut(), ctx.moduli.iter())
            .for_each(|(coeffs, q)| coeffs[..len].copy_from_slice(&q.reduce_vec_i64(&a[..len])));
        poly
    }

    pub fn try_from_bigint(ctx: &Arc<RqContext>, a: &[BigUint]) -> Poly {
        let mut poly = Poly::zero(ctx, Representation::PowerBasis);
        let len = a.len().min(ctx.degree);
        izip!(poly.limbs_mut(), ctx.moduli.iter()).for_each(|(coeffs, q)| {
            izip!(coeffs.iter_mut(), a[..len].iter())
                .for_each(|(c, v)| *c = q.reduce_biguint(v))
        });
        poly
    }

    /// Multiplies every coefficient by a scalar given by its residues
    pub fn scalar_mul_rests(&mut self, rests: &[u64]) {
        assert!(rests.len() == self.context.moduli.len());
        let ctx = self.context.clone();
        izip!(self.limbs_mut(), ctx.moduli.iter(), rests.iter())
            .for_each(|(coeffs, q, r)| q.scalar_mul_vec(coeffs, *r));
    }

    pub fn scalar_mul(&mut self, scalar: &BigUint) {
        let rests = self.context.rns.project(scalar);
        self.scalar_mul_rests(&rests);
    }
}

/// Transforms a batch of polys in parallel
pub fn change_representation_batch(polys: &mut [Poly], to: Representation) {
    polys
        .par_iter_mut()
        .for_each(|p| p.change_representation(to));
}

/// Negacyclic multiplication of `src` by `X^index` modulo `q`, written to `dst`.
///
/// `index` must be in [0, 2N). Coefficients that wrap past degree N are
/// negated once; after 2N positions they wrap back to the original sign.
pub fn negacyclic_shift(src: &[u64], index: usize, q: &Modulus, dst: &mut [u64]) {
    let degree = src.len();
    assert!(dst.len() == degree);
    assert!(index < 2 * degree);

    for (i, coeff) in src.iter().enumerate() {
        let target = i + index;
        let wraps = (target / degree) & 1 == 1;
        let slot = target % degree;
        dst[slot] = if wraps { q.neg(*coeff) } else { *coeff };
    }
}

// OPS

impl AddAssign<&Poly> for Poly {
    fn add_assign(&mut self, rhs: &Poly) {
        assert!(self.representation == rhs.representation);
        assert!(self.context == rhs.context);

        let ctx = self.context.clone();
        izip!(self.limbs_mut(), rhs.limbs(), ctx.moduli.iter())
            .for_each(|(a, b, q)| q.add_vec(a, b));
    }
}

impl Add<&Poly> for &Poly {
    type Output = Poly;
    fn add(self, rhs: &Poly) -> Self::Output {
        let mut tmp = self.clone();
        tmp += rhs;
        tmp
    }
}

impl SubAssign<&Poly> for Poly {
    fn sub_assign(&mut self, rhs: &Poly) {
        assert!(self.representation == rhs.representation);
        assert!(self.context == rhs.context);

        let ctx = self.context.clone();
        izip!(self.limbs_mut(), rhs.limbs(), ctx.moduli.iter())
            .for_each(|(a, b, q)| q.sub_vec(a, b));
    }
}

impl Sub<&Poly> for &Poly {
    type Output = Poly;
    fn sub(self, rhs: &Poly) -> Self::Output {
        let mut tmp = self.clone();
        tmp -= rhs;
        tmp
    }
}

impl MulAssign<&Poly> for Poly {
    fn mul_assign(&mut self, rhs: &Poly) {
        assert!(self.representation == Representation::Ntt);
        assert!(rhs.representation == Representation::Ntt);
        assert!(self.context == rhs.context);

        let ctx = self.context.clone();
        izip!(self.limbs_mut(), rhs.limbs(), ctx.moduli.iter())
            .for_each(|(a, b, q)| q.mul_vec(a, b));
    }
}

impl Mul<&Poly> for &Poly {
    type Output = Poly;
    fn mul(self, rhs: &Poly) -> Self::Output {
        let mut tmp = self.clone();
        tmp *= rhs;
        tmp
    }
}

impl Neg for &Poly {
    type Output = Poly;
    fn neg(self) -> Self::Output {
        let mut tmp = self.clone();
        let ctx = self.context.clone();
        izip!(tmp.limbs_mut(), ctx.moduli.iter()).for_each(|(a, q)| q.neg_vec(a));
        tmp
    }
}

impl From<&Poly> for Vec<BigUint> {
    fn from(value: &Poly) -> Self {
        value
            .coefficients()
            .axis_iter(Axis(1))
            .map(|rests| value.context.rns.lift(rests))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::generate_moduli;
    use rand::thread_rng;

    fn context(degree: usize) -> Arc<RqContext> {
        let moduli = generate_moduli(&[50, 55], degree).unwrap();
        Arc::new(RqContext::new(&moduli, degree).unwrap())
    }

    #[test]
    fn rejects_bad_moduli() {
        assert!(RqContext::new(&[], 8).is_err());
        // 1153 = 1 mod 128, not mod 256
        assert!(RqContext::new(&[1153], 128).is_err());
        assert!(RqContext::new(&[1153, 1153], 8).is_err());
    }

    #[test]
    fn change_representation() {
        let ctx = context(32);
        let mut rng = thread_rng();
        for _ in 0..20 {
            let mut p = Poly::random(&ctx, Representation::PowerBasis, &mut rng);
            let q = p.clone();
            p.change_representation(Representation::Ntt);
            assert_ne!(p, q);
            p.change_representation(Representation::PowerBasis);
            assert_eq!(p, q);
        }
    }

    #[test]
    fn substitute() {
        let ctx = context(16);
        let degree = ctx.degree as i64;

        // X -> X^3 maps X^6 to X^18 = -X^2
        let mut values = vec![0i64; ctx.degree];
        values[6] = 5;
        let p = Poly::try_from_vec_i64(&ctx, &values);
        let p3 = p.substitute(&Substitution::new(&ctx, 3).unwrap());
        let mut expected = vec![0i64; ctx.degree];
        expected[(18 - degree) as usize] = -5;
        assert_eq!(p3, Poly::try_from_vec_i64(&ctx, &expected));

        // substitutions compose: 3 * 11 = 1 mod 2N
        let mut rng = thread_rng();
        let mut q = Poly::random(&ctx, Representation::PowerBasis, &mut rng);
        let original = q.clone();
        q.change_representation(Representation::Ntt);
        let mut q = q
            .substitute(&Substitution::new(&ctx, 3).unwrap())
            .substitute(&Substitution::new(&ctx, 11).unwrap());
        q.change_representation(Representation::PowerBasis);
        assert_eq!(q, original);

        assert!(Substitution::new(&ctx, 4).is_err());
    }

    #[test]
    fn monomial_shift_matches_ntt_product() {
        let ctx = context(32);
        let mut rng = thread_rng();
        let p = Poly::random(&ctx, Representation::PowerBasis, &mut rng);

        for index in [0usize, 1, 31, 32, 33, 63] {
            let mut shifted = Poly::zero(&ctx, Representation::PowerBasis);
            for j in 0..ctx.moduli.len() {
                negacyclic_shift(
                    p.limb(j).unwrap(),
                    index,
                    &ctx.moduli[j],
                    shifted.limb_mut(j).unwrap(),
                );
            }

            // X^index as a poly: X^index = -X^(index - N) for index >= N
            let mut monomial = vec![0i64; ctx.degree];
            if index < ctx.degree {
                monomial[index] = 1;
            } else {
                monomial[index - ctx.degree] = -1;
            }
            let mut x = Poly::try_from_vec_i64(&ctx, &monomial);
            x.change_representation(Representation::Ntt);
            let mut expected = p.clone();
            expected.change_representation(Representation::Ntt);
            expected *= &x;
            expected.change_representation(Representation::PowerBasis);

            assert_eq!(shifted, expected);
        }
    }

    #[test]
    fn arithmetic() {
        let ctx = context(32);
        let mut rng = thread_rng();
        let a = Poly::random(&ctx, Representation::Ntt, &mut rng);
        let b = Poly::random(&ctx, Representation::Ntt, &mut rng);

        assert_eq!(&(&a + &b) - &b, a);
        assert_eq!(&a + &(-&a), Poly::zero(&ctx, Representation::Ntt));

        let mut doubled = a.clone();
        doubled.scalar_mul(&BigUint::from(2u64));
        assert_eq!(doubled, &a + &a);
    }

    #[test]
    fn lift_to_bigint() {
        let ctx = context(8);
        let values = [3i64, -1, 0, 7];
        let p = Poly::try_from_vec_i64(&ctx, &values);
        let lifted = Vec::<BigUint>::from(&p);
        assert_eq!(lifted[0], BigUint::from(3u64));
        assert_eq!(lifted[1], ctx.rns.modulus() - 1u64);
        assert_eq!(lifted[4], BigUint::from(0u64));
        assert_eq!(Poly::try_from_bigint(&ctx, &lifted), p);
    }
}
