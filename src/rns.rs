use crate::modulus::Modulus;
use itertools::izip;
use ndarray::ArrayView1;
use num_bigint::BigUint;
use num_traits::{One, Zero};

/// Residue number system over pairwise coprime word sized moduli.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RnsContext {
    pub moduli_64: Vec<u64>,
    pub moduli: Vec<Modulus>,
    /// q = q_0 * q_1 * ... * q_{L-1}
    pub product: BigUint,
    /// garner_i = (q / q_i) * [(q / q_i)^-1]_{q_i}
    pub garner: Vec<BigUint>,
}

impl RnsContext {
    /// Returns `None` when the moduli are not pairwise coprime.
    pub fn new(moduli_64: &[u64]) -> Option<Self> {
        let moduli: Vec<Modulus> = moduli_64.iter().map(|m| Modulus::new(*m)).collect();

        let product = moduli_64
            .iter()
            .fold(BigUint::one(), |acc, q| acc * BigUint::from(*q));

        let mut garner = Vec::with_capacity(moduli.len());
        for q in moduli.iter() {
            let q_star = &product / q.p;
            // q_star mod q_i is zero iff q_i shares a factor with another modulus
            let q_star_inv = q.inv(q.reduce_biguint(&q_star))?;
            garner.push(q_star * q_star_inv);
        }

        Some(Self {
            moduli_64: moduli_64.to_vec(),
            moduli,
            product,
            garner,
        })
    }

    /// Lifts residues to the unique representative in [0, q)
    pub fn lift(&self, rests: ArrayView1<u64>) -> BigUint {
        let mut value = BigUint::zero();
        izip!(rests.iter(), self.garner.iter()).for_each(|(r, g)| value += g * *r);
        value % &self.product
    }

    /// Projects value to its residues
    pub fn project(&self, value: &BigUint) -> Vec<u64> {
        self.moduli.iter().map(|q| q.reduce_biguint(value)).collect()
    }

    pub fn modulus(&self) -> &BigUint {
        &self.product
    }
}
