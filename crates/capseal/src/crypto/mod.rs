//! Cryptographic primitives: key pairs and signature payloads.
//!
//! Ed25519 is the default signature algorithm, with NIST P-256 ECDSA as
//! the selectable alternative. Signing and verification are synchronous
//! CPU work; no I/O happens here.

pub mod keys;
pub(crate) mod signing;

pub use keys::{Algorithm, KeyPair, PrivateKey, PublicKey};
