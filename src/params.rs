use serde::{Deserialize, Serialize};

use crate::{
    bfv::EncryptionParameters,
    encoder::{elements_per_ptxt, plaintexts_per_db},
    error::{PirError, Result},
    utils::div_ceil,
};

/// Shape of the database hypercube and the number of plaintexts one
/// ciphertext decomposes into.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PirParams {
    pub nvec: Vec<usize>,
    pub expansion_ratio: usize,
}

/// `2 * sum_j ceil(bits(q_j) / log2(t))`
pub fn expansion_ratio(params: &EncryptionParameters) -> usize {
    let logt = params.plain_bits();
    2 * params
        .coeff_moduli
        .iter()
        .map(|q| div_ceil(64 - q.leading_zeros() as usize, logt))
        .sum::<usize>()
}

impl PirParams {
    pub fn new(nvec: Vec<usize>, params: &EncryptionParameters) -> Result<Self> {
        let pir_params = Self {
            nvec,
            expansion_ratio: expansion_ratio(params),
        };
        pir_params.validate(params)?;
        Ok(pir_params)
    }

    /// Picks a balanced `d` dimensional hypercube large enough for `ele_num`
    /// elements of `ele_size` bytes.
    pub fn generate(
        params: &EncryptionParameters,
        ele_num: usize,
        ele_size: usize,
        d: usize,
    ) -> Result<Self> {
        let logt = params.plain_bits();
        if d == 0 || ele_num == 0 || ele_size == 0 {
            return Err(PirError::InvalidParameters(format!(
                "cannot build a {d} dimensional database of {ele_num} elements of {ele_size} bytes"
            )));
        }
        if elements_per_ptxt(logt, params.degree, ele_size) == 0 {
            return Err(PirError::InvalidParameters(format!(
                "an element of {ele_size} bytes does not fit in one plaintext"
            )));
        }

        let plaintexts = plaintexts_per_db(logt, params.degree, ele_num, ele_size);

        // largest root with root^d <= plaintexts, at least 2
        let mut root = 1usize;
        while (root + 1)
            .checked_pow(d as u32)
            .map_or(false, |p| p <= plaintexts)
        {
            root += 1;
        }
        let mut nvec = vec![root.max(2); d];

        let mut i = 0;
        while nvec.iter().product::<usize>() < plaintexts {
            nvec[i % d] += 1;
            i += 1;
        }

        Self::new(nvec, params)
    }

    pub fn validate(&self, params: &EncryptionParameters) -> Result<()> {
        if self.nvec.is_empty() {
            return Err(PirError::InvalidParameters(
                "dimension vector is empty".into(),
            ));
        }
        if let Some(n) = self
            .nvec
            .iter()
            .find(|n| **n == 0 || **n > params.degree)
        {
            return Err(PirError::InvalidParameters(format!(
                "dimension of size {n} must be in 1..={}",
                params.degree
            )));
        }
        if self.capacity().is_none() {
            return Err(PirError::InvalidParameters(format!(
                "dimension vector {:?} overflows",
                self.nvec
            )));
        }
        Ok(())
    }

    /// Number of plaintexts the hypercube holds
    pub fn capacity(&self) -> Option<usize> {
        self.nvec
            .iter()
            .try_fold(1usize, |acc, n| acc.checked_mul(*n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(plain_bits: usize) -> EncryptionParameters {
        EncryptionParameters::with_moduli_sizes(32, &[50, 55], plain_bits).unwrap()
    }

    #[test]
    fn ratio_follows_plain_modulus() {
        // ceil(50/12) + ceil(55/12) = 5 + 5
        assert_eq!(expansion_ratio(&params(12)), 20);
        // ceil(50/20) + ceil(55/20) = 3 + 3
        assert_eq!(expansion_ratio(&params(20)), 12);

        let pir = PirParams::new(vec![4, 4], &params(12)).unwrap();
        assert_eq!(pir.expansion_ratio, 20);
        assert_eq!(pir.capacity(), Some(16));
    }

    #[test]
    fn rejects_bad_dimensions() {
        let p = params(12);
        assert!(PirParams::new(vec![], &p).is_err());
        assert!(PirParams::new(vec![4, 0], &p).is_err());
        assert!(PirParams::new(vec![33], &p).is_err());
        assert!(PirParams::new(vec![1, 32], &p).is_ok());
    }

    #[test]
    fn generate() {
        let p = params(12);
        // one 32 byte element per plaintext
        let pir = PirParams::generate(&p, 16, 32, 2).unwrap();
        assert_eq!(pir.nvec, vec![4, 4]);

        let pir = PirParams::generate(&p, 17, 32, 2).unwrap();
        assert_eq!(pir.nvec, vec![5, 4]);

        let pir = PirParams::generate(&p, 1, 32, 3).unwrap();
        assert_eq!(pir.nvec, vec![2, 2, 2]);

        let pir = PirParams::generate(&p, 100, 32, 3).unwrap();
        assert!(pir.capacity().unwrap() >= 100);
        assert!(pir.nvec.iter().all(|n| (4..=5).contains(n)));

        assert!(PirParams::generate(&p, 10, 64, 2).is_err());
        assert!(PirParams::generate(&p, 10, 32, 0).is_err());
        // 33 * 33 plaintexts need a dimension larger than the ring degree
        assert!(PirParams::generate(&p, 33 * 33, 32, 2).is_err());
    }
}
