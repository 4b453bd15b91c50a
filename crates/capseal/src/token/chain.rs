//! Signature chain: per-block key pairs linked by signatures.
//!
//! Block `n`'s signature covers its payload and the public key of block
//! `n+1`'s key pair, so verification is an iterative walk from the root
//! public key through every block, with early exit on the first
//! failure. Any holder can append: the token carries the final "next"
//! private key, and appending generates a fresh key pair for the new
//! tail. The root key only ever signs block 0.

use log::debug;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto::signing::{block_signature_payload, external_signature_payload};
use crate::crypto::{PrivateKey, PublicKey};
use crate::error::{Result, TokenError};

/// A third party's signature over a block it contributed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalSignature {
    pub public_key: PublicKey,
    pub signature: Vec<u8>,
}

/// A serialized block with its chaining material.
///
/// `data` holds the exact bytes that were signed; parsing never
/// re-serializes, so signatures stay valid across round trips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedBlock {
    pub data: Vec<u8>,
    pub next_key: PublicKey,
    pub signature: Vec<u8>,
    pub external_signature: Option<ExternalSignature>,
}

impl SignedBlock {
    /// Deterministic identifier for external revocation lists:
    /// SHA-256 of the block signature.
    pub fn revocation_id(&self) -> Vec<u8> {
        Sha256::digest(&self.signature).to_vec()
    }
}

/// Sign a block payload into the chain.
pub(crate) fn sign_block(
    signer: &PrivateKey,
    data: Vec<u8>,
    external_signature: Option<ExternalSignature>,
    next_key: &PublicKey,
) -> SignedBlock {
    let payload = block_signature_payload(
        &data,
        external_signature.as_ref().map(|e| &e.public_key),
        next_key,
    );
    let signature = signer.sign(&payload);
    SignedBlock {
        data,
        next_key: next_key.clone(),
        signature,
        external_signature,
    }
}

/// Walk the chain from the root public key through every block.
///
/// Fails closed: the first bad signature aborts verification, and the
/// carried proof key must match the last block's embedded next key.
pub(crate) fn verify_chain(
    root: &PublicKey,
    blocks: &[SignedBlock],
    proof_public: &PublicKey,
) -> Result<()> {
    let mut current = root.clone();
    for (i, signed) in blocks.iter().enumerate() {
        let payload = block_signature_payload(
            &signed.data,
            signed.external_signature.as_ref().map(|e| &e.public_key),
            &signed.next_key,
        );
        current
            .verify(&payload, &signed.signature)
            .map_err(|_| TokenError::InvalidBlockSignature { block: i })?;

        if let Some(external) = &signed.external_signature {
            let external_payload = external_signature_payload(&signed.data, &current);
            external
                .public_key
                .verify(&external_payload, &external.signature)
                .map_err(|_| TokenError::InvalidExternalSignature { block: i })?;
        }

        current = signed.next_key.clone();
    }
    if &current != proof_public {
        return Err(TokenError::ProofKeyMismatch);
    }
    debug!("verified signature chain over {} block(s)", blocks.len());
    Ok(())
}
