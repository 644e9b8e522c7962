//! Error types for the PIR server

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PirError {
    /// The client never registered galois keys. The caller can register
    /// keys for `client_id` and retry.
    #[error("no galois keys registered for client {0}")]
    GaloisKeyNotFound(u32),

    #[error("galois keys do not contain element {0}")]
    MissingGaloisElement(usize),

    #[error("invalid encryption parameters: {0}")]
    InvalidParameters(String),

    #[error("parameter update rejected: {0}")]
    ParameterMismatch(String),

    #[error("database needs {needed} plaintexts but the hypercube holds {capacity}")]
    CapacityExceeded { needed: u64, capacity: u64 },

    #[error("invalid database: {0}")]
    InvalidDatabase(String),

    #[error("no database has been loaded")]
    DatabaseNotSet,

    #[error("malformed query: {0}")]
    MalformedQuery(String),

    #[error("decomposition produced {actual} plaintexts, expected {expected}")]
    DecompositionMismatch { expected: usize, actual: usize },

    #[error("invalid ciphertext: {0}")]
    InvalidCiphertext(String),

    #[error("invalid plaintext: {0}")]
    InvalidPlaintext(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl PirError {
    /// Whether the failure is a missing client registration rather than
    /// a malformed input.
    pub fn is_missing_registration(&self) -> bool {
        matches!(self, PirError::GaloisKeyNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, PirError>;
