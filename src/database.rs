use std::sync::Arc;

use rayon::prelude::*;
use tracing::debug;

use crate::{
    bfv::{BfvParameters, Plaintext},
    encoder::{bytes_to_coeffs, coefficients_per_element, decode_element, elements_per_ptxt},
    error::{PirError, Result},
    utils::div_ceil,
};

/// How elements of a given size are laid out in plaintexts
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Layout {
    pub logt: usize,
    pub ele_size: usize,
    pub coeff_per_element: usize,
    pub ele_per_ptxt: usize,
    pub bytes_per_ptxt: usize,
    pub coeff_per_ptxt: usize,
}

impl Layout {
    pub fn new(params: &BfvParameters, ele_size: usize) -> Result<Self> {
        if ele_size == 0 {
            return Err(PirError::InvalidDatabase("element size is zero".into()));
        }

        let logt = params.plaintext_bits();
        let ele_per_ptxt = elements_per_ptxt(logt, params.degree, ele_size);
        if ele_per_ptxt == 0 {
            return Err(PirError::InvalidDatabase(format!(
                "an element of {ele_size} bytes needs {} coefficients, the ring has {}",
                coefficients_per_element(logt, ele_size),
                params.degree
            )));
        }

        let coeff_per_element = coefficients_per_element(logt, ele_size);
        Ok(Self {
            logt,
            ele_size,
            coeff_per_element,
            ele_per_ptxt,
            bytes_per_ptxt: ele_per_ptxt * ele_size,
            coeff_per_ptxt: ele_per_ptxt * coeff_per_element,
        })
    }

    /// Plaintexts needed for `ele_num` elements
    pub fn plaintexts(&self, ele_num: usize) -> usize {
        div_ceil(ele_num, self.ele_per_ptxt)
    }

    /// Index of the plaintext holding element `ele_index`
    pub fn fv_index(&self, ele_index: usize) -> usize {
        ele_index / self.ele_per_ptxt
    }

    /// Position of element `ele_index` inside its plaintext
    pub fn fv_offset(&self, ele_index: usize) -> usize {
        ele_index % self.ele_per_ptxt
    }

    /// Bytes of the element at `offset` of a plaintext
    pub fn decode(&self, pt: &Plaintext, offset: usize) -> Vec<u8> {
        decode_element(self.logt, &pt.coefficients(), offset, self.ele_size)
    }
}

/// Hypercube of plaintexts, flattened row major over the dimension vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Database {
    plaintexts: Vec<Plaintext>,
    preprocessed: bool,
}

impl Database {
    /// Packs `ele_num` elements of `ele_size` bytes into exactly `capacity`
    /// plaintexts. Unused coefficients and plaintexts are filled with 1.
    pub fn pack(
        params: &Arc<BfvParameters>,
        capacity: usize,
        bytes: &[u8],
        ele_num: usize,
        ele_size: usize,
    ) -> Result<Self> {
        let layout = Layout::new(params, ele_size)?;

        let db_size = ele_num
            .checked_mul(ele_size)
            .ok_or_else(|| PirError::InvalidDatabase("database size overflows".into()))?;
        if bytes.len() < db_size {
            return Err(PirError::InvalidDatabase(format!(
                "expected {db_size} bytes for {ele_num} elements of {ele_size} bytes, got {}",
                bytes.len()
            )));
        }

        let total = layout.plaintexts(ele_num);
        if total > capacity {
            return Err(PirError::CapacityExceeded {
                needed: total as u64,
                capacity: capacity as u64,
            });
        }
        debug_assert!(layout.coeff_per_ptxt <= params.degree);

        let mut plaintexts = bytes[..db_size]
            .chunks(layout.bytes_per_ptxt)
            .map(|chunk| {
                let mut coefficients = bytes_to_coeffs(layout.logt, chunk);
                debug_assert!(coefficients.len() <= layout.coeff_per_ptxt);
                coefficients.resize(params.degree, 1);
                Plaintext::try_from_coefficients(params, &coefficients)
            })
            .collect::<Result<Vec<_>>>()?;
        debug_assert!(plaintexts.len() == total);

        debug!(
            plaintexts = plaintexts.len(),
            padding = capacity - plaintexts.len(),
            padding_elements = (capacity - plaintexts.len()) * layout.ele_per_ptxt,
            "packed database"
        );

        let padding = Plaintext::try_from_coefficients(params, &vec![1u64; params.degree])?;
        plaintexts.resize(capacity, padding);

        Ok(Self {
            plaintexts,
            preprocessed: false,
        })
    }

    /// Takes ownership of pre-packed plaintexts. The count must equal the
    /// hypercube capacity.
    pub fn from_plaintexts(
        params: &BfvParameters,
        plaintexts: Vec<Plaintext>,
        capacity: usize,
    ) -> Result<Self> {
        if plaintexts.is_empty() {
            return Err(PirError::InvalidDatabase("database is empty".into()));
        }
        if plaintexts.len() != capacity {
            return Err(PirError::InvalidDatabase(format!(
                "{} plaintexts given, the hypercube holds {capacity}",
                plaintexts.len()
            )));
        }
        if plaintexts
            .iter()
            .any(|pt| pt.context() != &params.rq_context)
        {
            return Err(PirError::InvalidDatabase(
                "plaintexts belong to a different ring".into(),
            ));
        }

        Ok(Self {
            plaintexts,
            preprocessed: false,
        })
    }

    pub fn plaintexts(&self) -> &[Plaintext] {
        &self.plaintexts
    }

    pub fn len(&self) -> usize {
        self.plaintexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plaintexts.is_empty()
    }

    pub fn is_preprocessed(&self) -> bool {
        self.preprocessed
    }

    /// Moves every plaintext to ntt form once. Further calls are no-ops.
    pub fn preprocess(&mut self) {
        if !self.preprocessed {
            self.plaintexts
                .par_iter_mut()
                .for_each(|pt| pt.transform_to_ntt());
            self.preprocessed = true;
        }
    }

    /// Drops the preprocessed state, moving plaintexts back to power basis
    pub(crate) fn reset_preprocessing(&mut self) {
        self.plaintexts
            .par_iter_mut()
            .for_each(|pt| pt.transform_from_ntt());
        self.preprocessed = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bfv::EncryptionParameters;
    use rand::{thread_rng, RngCore};

    fn params() -> Arc<BfvParameters> {
        let params = EncryptionParameters::with_moduli_sizes(32, &[50, 55], 12).unwrap();
        Arc::new(BfvParameters::new(&params).unwrap())
    }

    #[test]
    fn layout() {
        let params = params();
        let layout = Layout::new(&params, 3).unwrap();
        assert_eq!(layout.coeff_per_element, 2);
        assert_eq!(layout.ele_per_ptxt, 16);
        assert_eq!(layout.bytes_per_ptxt, 48);
        assert_eq!(layout.fv_index(33), 2);
        assert_eq!(layout.fv_offset(33), 1);

        assert!(Layout::new(&params, 0).is_err());
        assert!(Layout::new(&params, 64).is_err());
    }

    #[test]
    fn pack_unpack() {
        let params = params();
        let mut rng = thread_rng();

        for (ele_num, ele_size) in [(16usize, 32usize), (50, 3), (7, 5), (1, 1)] {
            let mut bytes = vec![0u8; ele_num * ele_size];
            rng.fill_bytes(&mut bytes);

            let layout = Layout::new(&params, ele_size).unwrap();
            let capacity = layout.plaintexts(ele_num) + 3;
            let db = Database::pack(&params, capacity, &bytes, ele_num, ele_size).unwrap();
            assert_eq!(db.len(), capacity);
            assert!(!db.is_preprocessed());

            for i in 0..ele_num {
                let pt = &db.plaintexts()[layout.fv_index(i)];
                assert_eq!(
                    layout.decode(pt, layout.fv_offset(i)),
                    &bytes[i * ele_size..(i + 1) * ele_size]
                );
            }

            // padding plaintexts hold only ones
            assert!(db.plaintexts()[capacity - 1]
                .coefficients()
                .iter()
                .all(|c| *c == 1));
        }
    }

    #[test]
    fn capacity_is_exact_or_error() {
        let params = params();
        let bytes = vec![7u8; 16 * 32];

        for capacity in 1..20 {
            match Database::pack(&params, capacity, &bytes, 16, 32) {
                Ok(db) => {
                    assert!(capacity >= 16);
                    assert_eq!(db.len(), capacity);
                }
                Err(e) => {
                    assert!(capacity < 16);
                    assert_eq!(
                        e,
                        PirError::CapacityExceeded {
                            needed: 16,
                            capacity: capacity as u64
                        }
                    );
                }
            }
        }
    }

    #[test]
    fn rejects_malformed_input() {
        let params = params();
        assert!(matches!(
            Database::pack(&params, 16, &[0u8; 10], 16, 32),
            Err(PirError::InvalidDatabase(_))
        ));
        assert!(matches!(
            Database::pack(&params, 16, &[], 0, 0),
            Err(PirError::InvalidDatabase(_))
        ));
        assert!(matches!(
            Database::from_plaintexts(&params, vec![], 0),
            Err(PirError::InvalidDatabase(_))
        ));

        let pt = Plaintext::try_from_coefficients(&params, &[1, 2]).unwrap();
        assert!(Database::from_plaintexts(&params, vec![pt.clone(); 3], 4).is_err());
        assert!(Database::from_plaintexts(&params, vec![pt; 4], 4).is_ok());
    }

    #[test]
    fn preprocess_is_idempotent() {
        let params = params();
        let bytes = vec![42u8; 4 * 32];
        let mut db = Database::pack(&params, 4, &bytes, 4, 32).unwrap();
        let original = db.clone();

        db.preprocess();
        let once = db.clone();
        assert!(db.is_preprocessed());
        assert!(db.plaintexts().iter().all(|pt| pt.is_ntt_form()));

        db.preprocess();
        assert_eq!(db, once);

        db.reset_preprocessing();
        assert_eq!(db, original);
    }
}
