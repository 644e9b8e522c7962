use std::sync::Arc;

use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};
use tracing::debug;

use crate::{
    bfv::{BfvParameters, Ciphertext, EncryptionParameters, Plaintext, SecretKey},
    database::Layout,
    decompose::compose_from_plaintexts,
    encoder::compute_indices,
    error::{PirError, Result},
    expand::galois_elements,
    ksk::{BitDecomposition, GaloisKeys},
    params::PirParams,
    utils::ceil_log2,
};

/// Holder of the secret key. Builds queries and decodes replies of a
/// [`crate::PirServer`] configured with the same parameters.
#[derive(Debug)]
pub struct PirClient {
    params: Arc<BfvParameters>,
    pir_params: PirParams,
    sk: SecretKey,
    decomposition: BitDecomposition,
}

impl PirClient {
    pub fn new<R: RngCore + CryptoRng>(
        enc_params: &EncryptionParameters,
        pir_params: PirParams,
        rng: &mut R,
    ) -> Result<Self> {
        let params = Arc::new(BfvParameters::new(enc_params)?);
        pir_params.validate(enc_params)?;
        let sk = SecretKey::generate(&params, rng);

        Ok(Self {
            params,
            pir_params,
            sk,
            decomposition: BitDecomposition::default(),
        })
    }

    pub fn with_decomposition(mut self, decomposition: BitDecomposition) -> Self {
        self.decomposition = decomposition;
        self
    }

    /// Follows a parameter change of the server. The secret key is kept, so
    /// galois keys registered earlier stay valid.
    pub fn update_parameters(
        &mut self,
        enc_params: &EncryptionParameters,
        pir_params: PirParams,
    ) -> Result<()> {
        let current = self.params.encryption_parameters();
        if enc_params.degree != current.degree || enc_params.coeff_moduli != current.coeff_moduli {
            return Err(PirError::ParameterMismatch(
                "ring degree and coefficient moduli are fixed".into(),
            ));
        }
        pir_params.validate(enc_params)?;

        let params = Arc::new(BfvParameters::new(enc_params)?);
        self.sk = SecretKey::new(self.sk.coeffs.to_vec(), &params);
        self.params = params;
        self.pir_params = pir_params;
        Ok(())
    }

    pub fn params(&self) -> &Arc<BfvParameters> {
        &self.params
    }

    pub fn pir_params(&self) -> &PirParams {
        &self.pir_params
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.sk
    }

    /// Keys for every galois element the server needs to expand queries
    pub fn generate_galois_keys<R: RngCore + CryptoRng>(&self, rng: &mut R) -> Result<GaloisKeys> {
        GaloisKeys::generate(
            &self.sk,
            &galois_elements(self.params.degree),
            self.decomposition,
            rng,
        )
    }

    /// Plaintext holding element `ele_index`
    pub fn fv_index(&self, ele_index: usize, ele_size: usize) -> Result<usize> {
        Ok(Layout::new(&self.params, ele_size)?.fv_index(ele_index))
    }

    /// Position of element `ele_index` inside its plaintext
    pub fn fv_offset(&self, ele_index: usize, ele_size: usize) -> Result<usize> {
        Ok(Layout::new(&self.params, ele_size)?.fv_offset(ele_index))
    }

    /// One ciphertext per dimension, the `i`th encrypting `X^{idx_i}`
    /// scaled by `floor(q / (t * 2^ceil(log2(n_i))))` so that expansion
    /// yields selectors of plaintext value 1.
    pub fn generate_query<R: RngCore + CryptoRng>(
        &self,
        plaintext_index: usize,
        rng: &mut R,
    ) -> Result<Vec<Ciphertext>> {
        let capacity = self.pir_params.capacity().unwrap_or(usize::MAX);
        if plaintext_index >= capacity {
            return Err(PirError::MalformedQuery(format!(
                "plaintext {plaintext_index} is outside a hypercube of {capacity}"
            )));
        }

        let indices = compute_indices(plaintext_index, &self.pir_params.nvec);
        debug!(plaintext_index, ?indices, "generating query");

        let q = self.params.rq_context.rns.modulus();
        let t = BigUint::from(self.params.plaintext_modulus);

        self.pir_params
            .nvec
            .iter()
            .zip(indices.iter())
            .map(|(n, idx)| -> Result<Ciphertext> {
                let logm = ceil_log2(*n as u64) as usize;
                let scale = q / (&t << logm);

                let mut values = vec![0u64; idx + 1];
                values[*idx] = 1;
                let pt = Plaintext::try_from_coefficients(&self.params, &values)?;
                self.sk.encrypt_scaled(&pt, &scale, rng)
            })
            .collect()
    }

    /// Recovers the selected plaintext from `expansion_ratio^(d-1)` reply
    /// ciphertexts.
    pub fn decode_reply(&self, reply: &[Ciphertext]) -> Result<Plaintext> {
        let ratio = self.pir_params.expansion_ratio;
        let d = self.pir_params.nvec.len();
        let expected = ratio.checked_pow(d as u32 - 1);
        if expected != Some(reply.len()) {
            return Err(PirError::MalformedQuery(format!(
                "reply of {} ciphertexts for {d} dimensions with expansion ratio {ratio}",
                reply.len()
            )));
        }

        let mut cts = reply.to_vec();
        for _ in 1..d {
            let pts = cts
                .iter()
                .map(|ct| self.sk.decrypt(ct))
                .collect::<Result<Vec<_>>>()?;
            cts = pts
                .chunks(ratio)
                .map(|chunk| compose_from_plaintexts(&self.params, chunk))
                .collect::<Result<Vec<_>>>()?;
        }

        match cts.as_slice() {
            [ct] => self.sk.decrypt(ct),
            _ => Err(PirError::Internal(format!(
                "{} ciphertexts left after recomposition",
                cts.len()
            ))),
        }
    }

    /// Bytes of the element at `offset` of a decoded plaintext
    pub fn decode_element(&self, pt: &Plaintext, offset: usize, ele_size: usize) -> Result<Vec<u8>> {
        let layout = Layout::new(&self.params, ele_size)?;
        if offset >= layout.ele_per_ptxt {
            return Err(PirError::InvalidPlaintext(format!(
                "offset {offset} is past the {} elements of a plaintext",
                layout.ele_per_ptxt
            )));
        }
        Ok(layout.decode(pt, offset))
    }
}
