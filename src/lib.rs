//! Server side of single server computational PIR over BFV.
//!
//! The database is packed into a hypercube of plaintexts. A query carries one
//! compressed ciphertext per dimension, which the server expands into one hot
//! selectors with galois automorphisms. Each dimension is an encrypted dot
//! product in ntt form, and results feeding the next dimension are decomposed
//! into plaintext digits.

pub mod bfv;
pub mod client;
pub mod database;
pub mod decompose;
pub mod encoder;
pub mod error;
pub mod expand;
pub mod ksk;
pub mod modulus;
pub mod ntt;
pub mod params;
pub mod rns;
pub mod rq;
pub mod server;
pub mod utils;

pub use bfv::{BfvParameters, Ciphertext, EncryptionParameters, Plaintext, SecretKey};
pub use client::PirClient;
pub use database::{Database, Layout};
pub use error::{PirError, Result};
pub use ksk::{BitDecomposition, GaloisKeys};
pub use params::PirParams;
pub use server::PirServer;
