use std::{collections::HashMap, sync::Arc};

use itertools::izip;
use rand::{CryptoRng, Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::{
    bfv::{Ciphertext, ParmsId, SecretKey},
    error::{PirError, Result},
    rq::{Poly, Representation, RqContext, Substitution},
    utils::div_ceil,
};

/// Power of two gadget used inside every RNS limb during key switching.
///
/// Smaller bases mean more key material and less key switching noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitDecomposition {
    pub log_base: usize,
}

impl Default for BitDecomposition {
    fn default() -> Self {
        BitDecomposition { log_base: 16 }
    }
}

impl BitDecomposition {
    pub fn new(log_base: usize) -> Result<Self> {
        if !(1..=32).contains(&log_base) {
            return Err(PirError::InvalidParameters(format!(
                "decomposition base 2^{log_base} is not supported"
            )));
        }
        Ok(Self { log_base })
    }

    /// Number of digits needed for residues modulo a `bits` wide modulus
    pub fn digits(&self, bits: usize) -> usize {
        div_ceil(bits, self.log_base)
    }
}

/// Key switching key from `from` to the secret key `s`.
///
/// For every limb `i` and digit `k` it holds
/// `(c0_ik, c1_ik) = (-a_ik*s + e_ik + garner_i * 2^(k*log_base) * from, a_ik)`.
#[derive(Debug, Clone)]
pub struct Ksk {
    decomposition: BitDecomposition,
    c0: Vec<Poly>,
    c1: Vec<Poly>,

    /// Context of poly that will be key switched
    ct_context: Arc<RqContext>,
}

impl Ksk {
    pub fn new<R: RngCore + CryptoRng>(
        sk: &SecretKey,
        from: &Poly,
        decomposition: BitDecomposition,
        rng: &mut R,
    ) -> Self {
        let params = sk.params.clone();
        let ctx = params.rq_context.clone();
        debug_assert!(from.representation == Representation::Ntt);

        let sk = sk.ntt_poly();

        let mut c0s = vec![];
        let mut c1s = vec![];
        for (qi, garner) in izip!(ctx.moduli.iter(), ctx.rns.garner.iter()) {
            for k in 0..decomposition.digits(qi.bits() as usize) {
                let mut seed = <ChaCha8Rng as SeedableRng>::Seed::default();
                rng.fill(&mut seed);
                let a = Poly::random_from_seed(&ctx, Representation::Ntt, seed);

                // e
                let mut b = Poly::random_small(&ctx, Representation::Ntt, params.variance, rng);
                // -(a*s) + e
                b -= &(&a * &sk);

                // m = garner * 2^(k * log_base) * from
                let mut m = from.clone();
                m.scalar_mul(&(garner << (k * decomposition.log_base)));

                // -(a*s) + e + m
                b += &m;

                c0s.push(b);
                c1s.push(a);
            }
        }

        Ksk {
            decomposition,
            c0: c0s,
            c1: c1s,
            ct_context: ctx,
        }
    }

    /// Splits every limb of `p` (power basis) into `log_base` bit digits and
    /// lifts each digit to a ring element in ntt form.
    fn decompose(&self, p: &Poly) -> Vec<Poly> {
        let ctx = &self.ct_context;
        let log_base = self.decomposition.log_base;
        let mask = (1u64 << log_base) - 1;

        let mut digits = Vec::with_capacity(self.c0.len());
        izip!(p.limbs(), ctx.moduli.iter()).for_each(|(limb, qi)| {
            for k in 0..self.decomposition.digits(qi.bits() as usize) {
                let values: Vec<u64> = limb.iter().map(|c| (c >> (k * log_base)) & mask).collect();
                let mut digit = Poly::try_from_vec_u64(ctx, &values);
                digit.change_representation(Representation::Ntt);
                digits.push(digit);
            }
        });
        digits
    }

    /// Returns `(c0, c1)` in power basis with `c0 + c1*s ≈ p*from`
    pub fn key_switch(&self, p: &Poly) -> (Poly, Poly) {
        assert!(p.context == self.ct_context);

        let digits = if p.representation == Representation::Ntt {
            let mut tmp = p.clone();
            tmp.change_representation(Representation::PowerBasis);
            self.decompose(&tmp)
        } else {
            self.decompose(p)
        };
        debug_assert!(digits.len() == self.c0.len());

        let mut c0 = Poly::zero(&self.ct_context, Representation::Ntt);
        let mut c1 = Poly::zero(&self.ct_context, Representation::Ntt);
        izip!(digits.iter(), self.c0.iter(), self.c1.iter()).for_each(|(d, k0, k1)| {
            c0 += &(d * k0);
            c1 += &(d * k1);
        });

        c0.change_representation(Representation::PowerBasis);
        c1.change_representation(Representation::PowerBasis);
        (c0, c1)
    }

    pub fn context(&self) -> &Arc<RqContext> {
        &self.ct_context
    }
}

/// Special key that perform key switching operation
/// from `s(X^g)` to `s(X)`, where `g` is the galois element
#[derive(Debug, Clone)]
pub struct GaloisKey {
    ksk: Ksk,
    substitution: Substitution,
}

impl GaloisKey {
    pub fn new<R: RngCore + CryptoRng>(
        sk: &SecretKey,
        element: usize,
        decomposition: BitDecomposition,
        rng: &mut R,
    ) -> Result<Self> {
        let ctx = sk.params.rq_context.clone();
        let substitution = Substitution::new(&ctx, element)?;

        let sk_poly = Poly::try_from_vec_i64(&ctx, &sk.coeffs);
        let mut sk_g_poly = sk_poly.substitute(&substitution);
        sk_g_poly.change_representation(Representation::Ntt);

        Ok(GaloisKey {
            ksk: Ksk::new(sk, &sk_g_poly, decomposition, rng),
            substitution,
        })
    }

    /// Applies `X -> X^g` to the plaintext under `ct`, keeping the secret key
    /// unchanged. The output has the representation of the input.
    pub fn apply(&self, ct: &Ciphertext) -> Result<Ciphertext> {
        if ct.size() != 2 {
            return Err(PirError::InvalidCiphertext(format!(
                "automorphism expects 2 components, got {}",
                ct.size()
            )));
        }
        if ct.context() != self.ksk.context() {
            return Err(PirError::InvalidCiphertext(
                "ciphertext and galois key belong to different rings".into(),
            ));
        }

        let representation = ct.polys()[0].representation;
        let c0_g = ct.polys()[0].substitute(&self.substitution);
        let c1_g = ct.polys()[1].substitute(&self.substitution);

        let (mut c0, mut c1) = self.ksk.key_switch(&c1_g);
        c0.change_representation(representation);
        c1.change_representation(representation);
        c0 += &c0_g;

        Ciphertext::new(vec![c0, c1])
    }
}

/// Galois keys of one client, tagged with the parameters they are used under.
#[derive(Debug, Clone)]
pub struct GaloisKeys {
    parms_id: ParmsId,
    keys: HashMap<usize, GaloisKey>,
}

impl GaloisKeys {
    pub fn generate<R: RngCore + CryptoRng>(
        sk: &SecretKey,
        elements: &[usize],
        decomposition: BitDecomposition,
        rng: &mut R,
    ) -> Result<Self> {
        let mut keys = HashMap::with_capacity(elements.len());
        for g in elements {
            keys.insert(*g, GaloisKey::new(sk, *g, decomposition, rng)?);
        }
        Ok(Self {
            parms_id: sk.params.parms_id,
            keys,
        })
    }

    pub fn parms_id(&self) -> &ParmsId {
        &self.parms_id
    }

    pub(crate) fn set_parms_id(&mut self, parms_id: ParmsId) {
        self.parms_id = parms_id;
    }

    /// Ring the keys were generated for, `None` for an empty key set
    pub fn context(&self) -> Option<&Arc<RqContext>> {
        self.keys.values().next().map(|k| k.ksk.context())
    }

    pub fn contains(&self, element: usize) -> bool {
        self.keys.contains_key(&element)
    }

    pub fn elements(&self) -> Vec<usize> {
        let mut elements: Vec<usize> = self.keys.keys().copied().collect();
        elements.sort_unstable();
        elements
    }

    pub fn apply_galois(&self, ct: &Ciphertext, element: usize) -> Result<Ciphertext> {
        self.keys
            .get(&element)
            .ok_or(PirError::MissingGaloisElement(element))?
            .apply(ct)
    }
}
