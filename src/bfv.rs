use crate::error::{PirError, Result};
use crate::rq::{change_representation_batch, Poly, Representation, RqContext};
use crate::utils::{generate_moduli, ilog2, is_prime, sample_vec_cbd};

use itertools::izip;
use num_bigint::BigUint;
use num_traits::ToPrimitive;
use rand::{CryptoRng, Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use std::{
    fmt::Debug,
    ops::{Add, AddAssign, Mul},
    sync::Arc,
};

/// Variance of the centered binomial distribution used for secrets and errors
pub const DEFAULT_VARIANCE: usize = 10;

/// Digest identifying a set of encryption parameters
pub type ParmsId = [u8; 32];

/// User facing encryption parameters.
///
/// The ring degree and the coefficient moduli are fixed for the lifetime of a
/// server; only the plaintext modulus may change.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionParameters {
    pub degree: usize,
    pub coeff_moduli: Vec<u64>,
    pub plain_modulus: u64,
}

impl EncryptionParameters {
    pub fn new(degree: usize, coeff_moduli: Vec<u64>, plain_modulus: u64) -> Result<Self> {
        let params = Self {
            degree,
            coeff_moduli,
            plain_modulus,
        };
        params.validate()?;
        Ok(params)
    }

    /// Generates NTT friendly moduli of the given bit sizes and uses
    /// `2^plain_bits` as plaintext modulus.
    pub fn with_moduli_sizes(
        degree: usize,
        moduli_sizes: &[usize],
        plain_bits: usize,
    ) -> Result<Self> {
        if !(1..=60).contains(&plain_bits) {
            return Err(PirError::InvalidParameters(format!(
                "plaintext modulus of {plain_bits} bits is not supported"
            )));
        }
        let coeff_moduli = generate_moduli(moduli_sizes, degree).ok_or_else(|| {
            PirError::InvalidParameters(format!(
                "unable to generate moduli of sizes {moduli_sizes:?} for degree {degree}"
            ))
        })?;
        Self::new(degree, coeff_moduli, 1u64 << plain_bits)
    }

    /// N = 4096 with a 109 bit ciphertext modulus and t = 2^20
    pub fn recommended() -> Result<Self> {
        Self::with_moduli_sizes(4096, &[54, 55], 20)
    }

    /// Same ring, different plaintext modulus
    pub fn with_plain_modulus(&self, plain_modulus: u64) -> Result<Self> {
        Self::new(self.degree, self.coeff_moduli.clone(), plain_modulus)
    }

    pub fn validate(&self) -> Result<()> {
        let n = self.degree;
        if !n.is_power_of_two() || n < 8 {
            return Err(PirError::InvalidParameters(format!(
                "degree {n} must be a power of two and at least 8"
            )));
        }

        if self.coeff_moduli.is_empty() {
            return Err(PirError::InvalidParameters(
                "at least one coefficient modulus is required".into(),
            ));
        }

        for (i, q) in self.coeff_moduli.iter().enumerate() {
            if *q >> 62 != 0 || !is_prime(*q) {
                return Err(PirError::InvalidParameters(format!(
                    "coefficient modulus {q} must be a prime below 2^62"
                )));
            }
            if q % (2 * n as u64) != 1 {
                return Err(PirError::InvalidParameters(format!(
                    "coefficient modulus {q} is not 1 mod {}",
                    2 * n
                )));
            }
            if self.coeff_moduli[..i].contains(q) {
                return Err(PirError::InvalidParameters(format!(
                    "coefficient modulus {q} appears twice"
                )));
            }
        }

        let t = self.plain_modulus;
        if t < 2 || !t.is_power_of_two() {
            return Err(PirError::InvalidParameters(format!(
                "plaintext modulus {t} must be a power of two"
            )));
        }
        if self.coeff_moduli.iter().any(|q| *q <= t) {
            return Err(PirError::InvalidParameters(format!(
                "plaintext modulus {t} must be smaller than every coefficient modulus"
            )));
        }

        Ok(())
    }

    /// Number of bits carried by one plaintext coefficient, `log2(t)`
    pub fn plain_bits(&self) -> usize {
        ilog2(self.plain_modulus)
    }

    pub fn parms_id(&self) -> ParmsId {
        let mut hasher = Sha256::new();
        hasher.update((self.degree as u64).to_le_bytes());
        hasher.update((self.coeff_moduli.len() as u64).to_le_bytes());
        self.coeff_moduli
            .iter()
            .for_each(|q| hasher.update(q.to_le_bytes()));
        hasher.update(self.plain_modulus.to_le_bytes());
        hasher.finalize().into()
    }
}

/// Precomputed evaluator context for a set of [`EncryptionParameters`].
pub struct BfvParameters {
    pub degree: usize,
    pub plaintext_modulus: u64,
    pub ciphertext_moduli: Vec<u64>,
    pub rq_context: Arc<RqContext>,

    /// floor(q / t)
    pub delta: BigUint,
    pub variance: usize,
    pub parms_id: ParmsId,

    encryption_parameters: EncryptionParameters,
}

impl BfvParameters {
    pub fn new(params: &EncryptionParameters) -> Result<Self> {
        params.validate()?;

        let rq_context = Arc::new(RqContext::new(&params.coeff_moduli, params.degree)?);
        let delta = rq_context.rns.modulus() / params.plain_modulus;

        Ok(Self {
            degree: params.degree,
            plaintext_modulus: params.plain_modulus,
            ciphertext_moduli: params.coeff_moduli.clone(),
            rq_context,
            delta,
            variance: DEFAULT_VARIANCE,
            parms_id: params.parms_id(),
            encryption_parameters: params.clone(),
        })
    }

    pub fn encryption_parameters(&self) -> &EncryptionParameters {
        &self.encryption_parameters
    }

    /// `log2(t)`
    pub fn plaintext_bits(&self) -> usize {
        self.encryption_parameters.plain_bits()
    }
}

impl PartialEq for BfvParameters {
    fn eq(&self, other: &Self) -> bool {
        self.encryption_parameters == other.encryption_parameters
    }
}

impl Debug for BfvParameters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BfvParameters")
            .field("polynomial_degree", &self.degree)
            .field("moduli", &self.ciphertext_moduli)
            .field("plaintext_modulus", &self.plaintext_modulus)
            .finish()
    }
}

#[derive(Debug)]
pub struct SecretKey {
    pub params: Arc<BfvParameters>,
    pub coeffs: Box<[i64]>,
}

impl SecretKey {
    pub fn generate<R: RngCore + CryptoRng>(params: &Arc<BfvParameters>, rng: &mut R) -> Self {
        let coeffs = sample_vec_cbd(params.degree, params.variance, rng).into_boxed_slice();

        Self {
            params: params.clone(),
            coeffs,
        }
    }

    pub fn new(coeffs: Vec<i64>, params: &Arc<BfvParameters>) -> Self {
        Self {
            params: params.clone(),
            coeffs: coeffs.into_boxed_slice(),
        }
    }

    /// Secret key as a ring element in ntt form
    pub(crate) fn ntt_poly(&self) -> Poly {
        let mut sk = Poly::try_from_vec_i64(&self.params.rq_context, &self.coeffs);
        sk.change_representation(Representation::Ntt);
        sk
    }

    /// Encrypts `Δ * m` with `Δ = floor(q/t)`
    pub fn encrypt<R: RngCore + CryptoRng>(&self, pt: &Plaintext, rng: &mut R) -> Result<Ciphertext> {
        self.encrypt_scaled(pt, &self.params.delta, rng)
    }

    /// Encrypts `scale * m`. Returns a ciphertext in power basis.
    pub fn encrypt_scaled<R: RngCore + CryptoRng>(
        &self,
        pt: &Plaintext,
        scale: &BigUint,
        rng: &mut R,
    ) -> Result<Ciphertext> {
        if pt.poly.context != self.params.rq_context {
            return Err(PirError::InvalidPlaintext(
                "plaintext belongs to a different ring".into(),
            ));
        }

        let mut m = pt.poly.clone();
        m.change_representation(Representation::PowerBasis);
        m.scalar_mul(scale);
        m.change_representation(Representation::Ntt);

        let sk = self.ntt_poly();

        let mut seed = <ChaCha8Rng as SeedableRng>::Seed::default();
        rng.fill(&mut seed);
        let a = Poly::random_from_seed(&self.params.rq_context, Representation::Ntt, seed);

        // a * sk
        let a_s = &a * &sk;

        // e
        let mut b = Poly::random_small(
            &self.params.rq_context,
            Representation::Ntt,
            self.params.variance,
            rng,
        );
        // -(a * sk) + e
        b -= &a_s;
        // b = -(a * sk) + e + m
        b += &m;

        let mut ct = Ciphertext { cts: vec![b, a] };
        ct.transform_from_ntt();
        Ok(ct)
    }

    /// Phase `c0 + c1*s + c2*s^2 + ...` in power basis
    fn phase(&self, ct: &Ciphertext) -> Result<Poly> {
        if ct.cts.is_empty() {
            return Err(PirError::InvalidCiphertext("ciphertext is empty".into()));
        }
        if ct.context() != &self.params.rq_context {
            return Err(PirError::InvalidCiphertext(
                "ciphertext belongs to a different ring".into(),
            ));
        }

        let sk = self.ntt_poly();
        let mut cts = ct.cts.clone();
        change_representation_batch(&mut cts, Representation::Ntt);

        let mut m = cts[0].clone();
        let mut sk_i = sk.clone();
        for c in cts.iter().skip(1) {
            m += &(&sk_i * c);
            sk_i *= &sk;
        }
        m.change_representation(Representation::PowerBasis);
        Ok(m)
    }

    pub fn decrypt(&self, ct: &Ciphertext) -> Result<Plaintext> {
        let m = self.phase(ct)?;

        // [round((t/q) * m)]_t
        let q = self.params.rq_context.rns.modulus();
        let t = self.params.plaintext_modulus;
        let half_q = q >> 1usize;
        let values = Vec::<BigUint>::from(&m)
            .iter()
            .map(|v| {
                let scaled = ((v * t) + &half_q) / q;
                (scaled % t).to_u64().unwrap_or_default()
            })
            .collect::<Vec<u64>>();

        Plaintext::try_from_coefficients(&self.params, &values)
    }

    /// Measures difference between ideal message value in ct space
    /// and the real message value in ct space
    pub fn measure_noise(&self, ct: &Ciphertext) -> Result<usize> {
        let pt = self.decrypt(ct)?;
        let mut m = self.phase(ct)?;

        let mut ideal_m = pt.poly;
        ideal_m.scalar_mul(&self.params.delta);
        m -= &ideal_m;

        let ct_moduli = self.params.rq_context.rns.modulus();
        let noise = Vec::<BigUint>::from(&m)
            .iter()
            .map(|coeff| std::cmp::min(coeff.bits(), (ct_moduli - coeff).bits()) as usize)
            .max()
            .unwrap_or_default();
        Ok(noise)
    }
}

/// Ciphertext made of ring elements that share one context and representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ciphertext {
    pub(crate) cts: Vec<Poly>,
}

impl Ciphertext {
    pub fn new(cts: Vec<Poly>) -> Result<Self> {
        let first = cts
            .first()
            .ok_or_else(|| PirError::InvalidCiphertext("ciphertext is empty".into()))?;
        if cts
            .iter()
            .any(|c| c.context != first.context || c.representation != first.representation)
        {
            return Err(PirError::InvalidCiphertext(
                "components disagree on ring or representation".into(),
            ));
        }
        Ok(Self { cts })
    }

    pub fn polys(&self) -> &[Poly] {
        &self.cts
    }

    /// Number of ring elements
    pub fn size(&self) -> usize {
        self.cts.len()
    }

    pub fn context(&self) -> &Arc<RqContext> {
        &self.cts[0].context
    }

    pub fn is_ntt_form(&self) -> bool {
        self.cts[0].representation == Representation::Ntt
    }

    pub fn transform_to_ntt(&mut self) {
        self.cts
            .iter_mut()
            .for_each(|c| c.change_representation(Representation::Ntt));
    }

    pub fn transform_from_ntt(&mut self) {
        self.cts
            .iter_mut()
            .for_each(|c| c.change_representation(Representation::PowerBasis));
    }

    /// Raw residues of `component` modulo the `j`th coefficient modulus
    pub fn limb(&self, component: usize, j: usize) -> Result<&[u64]> {
        self.cts
            .get(component)
            .and_then(|p| p.limb(j))
            .ok_or_else(|| {
                PirError::InvalidCiphertext(format!("no limb {j} in component {component}"))
            })
    }

    pub fn limb_mut(&mut self, component: usize, j: usize) -> Result<&mut [u64]> {
        self.cts
            .get_mut(component)
            .and_then(|p| p.limb_mut(j))
            .ok_or_else(|| {
                PirError::InvalidCiphertext(format!("no limb {j} in component {component}"))
            })
    }
}

impl AddAssign<&Ciphertext> for Ciphertext {
    fn add_assign(&mut self, rhs: &Ciphertext) {
        assert!(self.cts.len() == rhs.cts.len());
        izip!(self.cts.iter_mut(), rhs.cts.iter()).for_each(|(a, b)| *a += b);
    }
}

impl Add<&Ciphertext> for &Ciphertext {
    type Output = Ciphertext;
    fn add(self, rhs: &Ciphertext) -> Self::Output {
        let mut tmp = self.clone();
        tmp += rhs;
        tmp
    }
}

/// Plaintext multiplication in ntt form
impl Mul<&Plaintext> for &Ciphertext {
    type Output = Ciphertext;
    fn mul(self, rhs: &Plaintext) -> Self::Output {
        assert!(self.is_ntt_form());
        assert!(rhs.is_ntt_form());

        Ciphertext {
            cts: self.cts.iter().map(|c| c * &rhs.poly).collect(),
        }
    }
}

/// Multiplication by a small constant
impl Mul<u64> for &Ciphertext {
    type Output = Ciphertext;
    fn mul(self, rhs: u64) -> Self::Output {
        let rests = vec![rhs; self.context().moduli.len()];
        let mut tmp = self.clone();
        tmp.cts.iter_mut().for_each(|c| c.scalar_mul_rests(&rests));
        tmp
    }
}

/// Ring element with coefficients in `[0, t)`, lifted to the ciphertext ring
/// so that it can be moved to ntt form once and reused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plaintext {
    pub(crate) poly: Poly,
}

impl Plaintext {
    /// Coefficients beyond `values.len()` are zero
    pub fn try_from_coefficients(params: &Arc<BfvParameters>, values: &[u64]) -> Result<Self> {
        if values.len() > params.degree {
            return Err(PirError::InvalidPlaintext(format!(
                "{} coefficients exceed degree {}",
                values.len(),
                params.degree
            )));
        }
        if let Some(v) = values.iter().find(|v| **v >= params.plaintext_modulus) {
            return Err(PirError::InvalidPlaintext(format!(
                "coefficient {v} is not below the plaintext modulus {}",
                params.plaintext_modulus
            )));
        }

        Ok(Self {
            poly: Poly::try_from_vec_u64(&params.rq_context, values),
        })
    }

    pub(crate) fn from_poly(poly: Poly) -> Self {
        Self { poly }
    }

    /// Coefficients in `[0, t)`
    pub fn coefficients(&self) -> Vec<u64> {
        let mut poly = self.poly.clone();
        poly.change_representation(Representation::PowerBasis);
        // values are below every q_j, so the first limb holds them exactly
        poly.limb(0).map(|l| l.to_vec()).unwrap_or_default()
    }

    pub fn context(&self) -> &Arc<RqContext> {
        &self.poly.context
    }

    pub fn is_ntt_form(&self) -> bool {
        self.poly.representation == Representation::Ntt
    }

    pub fn transform_to_ntt(&mut self) {
        self.poly.change_representation(Representation::Ntt);
    }

    pub fn transform_from_ntt(&mut self) {
        self.poly.change_representation(Representation::PowerBasis);
    }
}
