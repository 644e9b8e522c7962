use std::{borrow::Cow, collections::HashMap, sync::Arc};

use rayon::prelude::*;
use tracing::{debug, info, instrument, warn};

use crate::{
    bfv::{BfvParameters, Ciphertext, EncryptionParameters, Plaintext},
    database::Database,
    decompose::decompose_to_plaintexts,
    error::{PirError, Result},
    expand,
    ksk::GaloisKeys,
    params::PirParams,
};

/// PIR server holding one packed database and the galois keys of every
/// registered client.
///
/// Mutating operations take `&mut self` while [`PirServer::generate_reply`]
/// takes `&self`, so a server shared behind a `RwLock` answers queries
/// concurrently and is reconfigured exclusively.
#[derive(Debug)]
pub struct PirServer {
    params: Arc<BfvParameters>,
    pir_params: PirParams,
    db: Option<Database>,
    galois_keys: HashMap<u32, GaloisKeys>,
}

impl PirServer {
    #[instrument(skip_all, fields(degree = enc_params.degree, nvec = ?pir_params.nvec))]
    pub fn new(enc_params: &EncryptionParameters, pir_params: PirParams) -> Result<Self> {
        let params = Arc::new(BfvParameters::new(enc_params)?);
        pir_params.validate(enc_params)?;

        info!(
            plain_modulus = enc_params.plain_modulus,
            expansion_ratio = pir_params.expansion_ratio,
            "created server"
        );
        Ok(Self {
            params,
            pir_params,
            db: None,
            galois_keys: HashMap::new(),
        })
    }

    /// Switches to new parameters. Only the plaintext modulus and the
    /// hypercube may change; the ring degree and coefficient moduli are fixed
    /// for the lifetime of the server.
    ///
    /// Registered keys are re-tagged and the database drops its preprocessed
    /// state.
    #[instrument(skip_all, fields(nvec = ?pir_params.nvec))]
    pub fn update_parameters(
        &mut self,
        enc_params: &EncryptionParameters,
        pir_params: PirParams,
    ) -> Result<()> {
        let current = self.params.encryption_parameters();
        if enc_params.degree != current.degree {
            return Err(PirError::ParameterMismatch(format!(
                "ring degree cannot change from {} to {}",
                current.degree, enc_params.degree
            )));
        }
        if enc_params.coeff_moduli != current.coeff_moduli {
            return Err(PirError::ParameterMismatch(format!(
                "coefficient moduli cannot change from {:?} to {:?}",
                current.coeff_moduli, enc_params.coeff_moduli
            )));
        }
        pir_params.validate(enc_params)?;
        let params = Arc::new(BfvParameters::new(enc_params)?);

        self.params = params;
        self.pir_params = pir_params;
        for keys in self.galois_keys.values_mut() {
            keys.set_parms_id(self.params.parms_id);
        }
        if let Some(db) = self.db.as_mut() {
            db.reset_preprocessing();
        }

        info!(
            plain_modulus = enc_params.plain_modulus,
            expansion_ratio = self.pir_params.expansion_ratio,
            clients = self.galois_keys.len(),
            "updated parameters"
        );
        Ok(())
    }

    pub fn params(&self) -> &Arc<BfvParameters> {
        &self.params
    }

    pub fn pir_params(&self) -> &PirParams {
        &self.pir_params
    }

    pub fn database(&self) -> Option<&Database> {
        self.db.as_ref()
    }

    fn capacity(&self) -> Result<usize> {
        self.pir_params.capacity().ok_or_else(|| {
            PirError::InvalidParameters(format!(
                "dimension vector {:?} overflows",
                self.pir_params.nvec
            ))
        })
    }

    /// Replaces the database with already encoded plaintexts, one per slot of
    /// the hypercube.
    #[instrument(skip_all, fields(plaintexts = plaintexts.len()))]
    pub fn set_database(&mut self, plaintexts: Vec<Plaintext>) -> Result<()> {
        let db = Database::from_plaintexts(&self.params, plaintexts, self.capacity()?)?;
        info!(plaintexts = db.len(), "loaded database");
        self.db = Some(db);
        Ok(())
    }

    /// Packs `ele_num` elements of `ele_size` bytes and replaces the database.
    #[instrument(skip_all, fields(ele_num = ele_num, ele_size = ele_size))]
    pub fn set_database_from_bytes(
        &mut self,
        bytes: &[u8],
        ele_num: usize,
        ele_size: usize,
    ) -> Result<()> {
        let db = Database::pack(&self.params, self.capacity()?, bytes, ele_num, ele_size)?;
        info!(plaintexts = db.len(), "loaded database");
        self.db = Some(db);
        Ok(())
    }

    /// Moves the database to ntt form. Calling it again is a no-op.
    pub fn preprocess_database(&mut self) -> Result<()> {
        let db = self.db.as_mut().ok_or(PirError::DatabaseNotSet)?;
        if !db.is_preprocessed() {
            db.preprocess();
            debug!(plaintexts = db.len(), "preprocessed database");
        }
        Ok(())
    }

    /// Stores the galois keys of `client_id`, replacing earlier ones.
    #[instrument(skip_all, fields(client_id = client_id))]
    pub fn set_galois_key(&mut self, client_id: u32, mut keys: GaloisKeys) -> Result<()> {
        if let Some(ctx) = keys.context() {
            if ctx != &self.params.rq_context {
                return Err(PirError::InvalidParameters(
                    "galois keys were generated for a different ring".into(),
                ));
            }
        }

        keys.set_parms_id(self.params.parms_id);
        let elements = keys.elements().len();
        if self.galois_keys.insert(client_id, keys).is_some() {
            warn!(client_id, "replaced galois keys");
        }
        info!(client_id, elements, "registered galois keys");
        Ok(())
    }

    /// Expands one query ciphertext into `m` selectors with the keys of
    /// `client_id`.
    pub fn expand_query(
        &self,
        encrypted: &Ciphertext,
        m: usize,
        client_id: u32,
    ) -> Result<Vec<Ciphertext>> {
        let keys = self
            .galois_keys
            .get(&client_id)
            .ok_or(PirError::GaloisKeyNotFound(client_id))?;
        expand::expand_query(keys, encrypted, m)
    }

    fn check_query(&self, query: &[Ciphertext]) -> Result<()> {
        if query.len() != self.pir_params.nvec.len() {
            return Err(PirError::MalformedQuery(format!(
                "expected {} ciphertexts, one per dimension, got {}",
                self.pir_params.nvec.len(),
                query.len()
            )));
        }
        for (i, ct) in query.iter().enumerate() {
            if ct.size() != 2 {
                return Err(PirError::MalformedQuery(format!(
                    "ciphertext {i} has {} components",
                    ct.size()
                )));
            }
            if ct.context() != &self.params.rq_context {
                return Err(PirError::MalformedQuery(format!(
                    "ciphertext {i} belongs to a different ring"
                )));
            }
        }
        Ok(())
    }

    /// Answers `query` for `client_id`.
    ///
    /// Each dimension selects one hyperplane of the current buffer. Results of
    /// every dimension but the last are decomposed into `expansion_ratio`
    /// plaintexts which become the buffer of the next dimension, so the reply
    /// holds `expansion_ratio^(d-1)` ciphertexts.
    #[instrument(skip_all, fields(client_id = client_id, dimensions = query.len()))]
    pub fn generate_reply(&self, query: &[Ciphertext], client_id: u32) -> Result<Vec<Ciphertext>> {
        let db = self.db.as_ref().ok_or(PirError::DatabaseNotSet)?;
        let keys = self
            .galois_keys
            .get(&client_id)
            .ok_or(PirError::GaloisKeyNotFound(client_id))?;
        self.check_query(query)?;

        let nvec = &self.pir_params.nvec;
        let mut product = self.capacity()?;
        if db.len() != product {
            return Err(PirError::InvalidDatabase(format!(
                "database holds {} plaintexts, the hypercube {product}",
                db.len()
            )));
        }

        let mut cur: Cow<[Plaintext]> = Cow::Borrowed(db.plaintexts());

        for (i, (n, q)) in nvec.iter().zip(query.iter()).enumerate() {
            let mut selectors = expand::expand_query(keys, q, *n)?;
            selectors
                .par_iter_mut()
                .for_each(|ct| ct.transform_to_ntt());

            if i > 0 || !db.is_preprocessed() {
                cur.to_mut()
                    .par_iter_mut()
                    .for_each(|pt| pt.transform_to_ntt());
            }

            product /= n;

            let mut intermediate: Vec<Ciphertext> = (0..product)
                .into_par_iter()
                .map(|k| {
                    let mut acc = &selectors[0] * &cur[k];
                    for (j, sel) in selectors.iter().enumerate().skip(1) {
                        acc += &(sel * &cur[k + j * product]);
                    }
                    acc
                })
                .collect();
            intermediate
                .par_iter_mut()
                .for_each(|ct| ct.transform_from_ntt());

            debug!(dimension = i, size = *n, results = intermediate.len(), "folded dimension");

            if i == nvec.len() - 1 {
                return Ok(intermediate);
            }

            let ratio = self.pir_params.expansion_ratio;
            let decomposed = intermediate
                .par_iter()
                .map(|ct| decompose_to_plaintexts(&self.params, ct, ratio))
                .collect::<Result<Vec<_>>>()?;
            cur = Cow::Owned(decomposed.into_iter().flatten().collect());
            product *= ratio;
        }

        Err(PirError::Internal(
            "reply generation ended without reaching the last dimension".into(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bfv::SecretKey,
        ksk::BitDecomposition,
    };
    use rand::thread_rng;

    fn setup() -> (EncryptionParameters, PirServer) {
        let enc = EncryptionParameters::with_moduli_sizes(32, &[50, 55], 12).unwrap();
        let pir = PirParams::new(vec![4, 4], &enc).unwrap();
        let server = PirServer::new(&enc, pir).unwrap();
        (enc, server)
    }

    fn keys(server: &PirServer) -> (SecretKey, GaloisKeys) {
        let mut rng = thread_rng();
        let sk = SecretKey::generate(server.params(), &mut rng);
        let keys = GaloisKeys::generate(
            &sk,
            &expand::galois_elements(server.params().degree),
            BitDecomposition::default(),
            &mut rng,
        )
        .unwrap();
        (sk, keys)
    }

    #[test]
    fn database_injection() {
        let (_, mut server) = setup();
        let pt = Plaintext::try_from_coefficients(server.params(), &[3, 1, 4]).unwrap();

        assert!(matches!(
            server.set_database(vec![]),
            Err(PirError::InvalidDatabase(_))
        ));
        assert!(matches!(
            server.set_database(vec![pt.clone(); 15]),
            Err(PirError::InvalidDatabase(_))
        ));
        assert!(server.database().is_none());
        assert_eq!(server.preprocess_database(), Err(PirError::DatabaseNotSet));

        server.set_database(vec![pt; 16]).unwrap();
        assert_eq!(server.database().unwrap().len(), 16);
        server.preprocess_database().unwrap();
        server.preprocess_database().unwrap();
        assert!(server.database().unwrap().is_preprocessed());
    }

    #[test]
    fn parameter_updates() {
        let (enc, mut server) = setup();
        let (_, keys) = keys(&server);
        server.set_galois_key(7, keys).unwrap();
        server
            .set_database_from_bytes(&[9u8; 16 * 32], 16, 32)
            .unwrap();
        server.preprocess_database().unwrap();

        let updated = enc.with_plain_modulus(1 << 16).unwrap();
        let pir = PirParams::new(vec![4, 4], &updated).unwrap();
        server.update_parameters(&updated, pir).unwrap();
        assert_eq!(server.galois_keys[&7].parms_id(), &updated.parms_id());
        assert!(!server.database().unwrap().is_preprocessed());
        // 2 * (ceil(50/16) + ceil(55/16))
        assert_eq!(server.pir_params().expansion_ratio, 16);

        let other = EncryptionParameters::with_moduli_sizes(32, &[50, 54], 12).unwrap();
        let pir = PirParams::new(vec![4, 4], &other).unwrap();
        assert!(matches!(
            server.update_parameters(&other, pir),
            Err(PirError::ParameterMismatch(_))
        ));

        let other = EncryptionParameters::with_moduli_sizes(64, &[50, 55], 12).unwrap();
        let pir = PirParams::new(vec![4, 4], &other).unwrap();
        assert!(matches!(
            server.update_parameters(&other, pir),
            Err(PirError::ParameterMismatch(_))
        ));
        // rejected updates leave the server untouched
        assert_eq!(server.params().plaintext_modulus, 1 << 16);
    }

    #[test]
    fn key_registration() {
        let (enc, mut server) = setup();
        let (_, keys) = keys(&server);
        server.set_galois_key(1, keys.clone()).unwrap();
        server.set_galois_key(1, keys).unwrap();
        assert_eq!(server.galois_keys.len(), 1);

        let other = EncryptionParameters::with_moduli_sizes(64, &[50, 55], 12).unwrap();
        let other = Arc::new(BfvParameters::new(&other).unwrap());
        let mut rng = thread_rng();
        let sk = SecretKey::generate(&other, &mut rng);
        let foreign = GaloisKeys::generate(&sk, &[3], BitDecomposition::default(), &mut rng).unwrap();
        assert!(server.set_galois_key(2, foreign).is_err());
        assert_eq!(server.galois_keys[&1].parms_id(), &enc.parms_id());
    }

    #[test]
    fn reply_preconditions() {
        let (_, mut server) = setup();
        let (sk, keys) = keys(&server);
        let mut rng = thread_rng();
        let pt = Plaintext::try_from_coefficients(server.params(), &[1]).unwrap();
        let ct = sk.encrypt(&pt, &mut rng).unwrap();
        let query = vec![ct.clone(), ct.clone()];

        assert_eq!(
            server.generate_reply(&query, 0),
            Err(PirError::DatabaseNotSet)
        );
        server
            .set_database_from_bytes(&[1u8; 16 * 32], 16, 32)
            .unwrap();
        let err = server.generate_reply(&query, 0).unwrap_err();
        assert!(err.is_missing_registration());
        assert!(server.expand_query(&ct, 4, 0).unwrap_err().is_missing_registration());

        server.set_galois_key(0, keys).unwrap();
        assert!(matches!(
            server.generate_reply(&query[..1], 0),
            Err(PirError::MalformedQuery(_))
        ));
        let three = Ciphertext::new(vec![ct.polys()[0].clone(); 3]).unwrap();
        assert!(matches!(
            server.generate_reply(&[ct.clone(), three], 0),
            Err(PirError::MalformedQuery(_))
        ));
        assert_eq!(server.generate_reply(&query, 0).unwrap().len(), 20);
    }
}
