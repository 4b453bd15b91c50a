//! Wire format: bincode framing of the signature chain, plus base64
//! text helpers shared with snapshots.
//!
//! The `data` bytes inside each [`SignedBlock`] are preserved verbatim,
//! so serializing and parsing round-trips byte-for-byte.

use serde::{Deserialize, Serialize};

use crate::crypto::Algorithm;
use crate::error::{Result, TokenError};

use super::chain::SignedBlock;

/// Version of the container encoding itself (not the block schema).
pub(crate) const FORMAT_VERSION: u32 = 1;

/// The serialized token container.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct WireToken {
    pub format_version: u32,
    /// Cleartext root key hint for multi-root deployments. Not signed;
    /// only used to select which root public key to verify against.
    pub root_key_id: Option<u32>,
    /// Authority block first, then attenuation blocks in order.
    pub blocks: Vec<SignedBlock>,
    /// Private key matching the last block's embedded next key, carried
    /// so any holder can append.
    pub proof_algorithm: Algorithm,
    pub proof_key: Vec<u8>,
}

pub(crate) fn token_to_bytes(token: &WireToken) -> Result<Vec<u8>> {
    bincode::serialize(token).map_err(|e| TokenError::Serialization(e.to_string()))
}

pub(crate) fn token_from_bytes(bytes: &[u8]) -> Result<WireToken> {
    let token: WireToken = bincode::deserialize(bytes)
        .map_err(|e| TokenError::Format(format!("malformed token bytes: {e}")))?;
    if token.format_version != FORMAT_VERSION {
        return Err(TokenError::Format(format!(
            "unsupported format version {}",
            token.format_version
        )));
    }
    if token.blocks.is_empty() {
        return Err(TokenError::Format("token has no authority block".into()));
    }
    Ok(token)
}

pub(crate) fn b64_encode(bytes: &[u8]) -> String {
    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, bytes)
}

pub(crate) fn b64_decode(text: &str) -> Result<Vec<u8>> {
    base64::Engine::decode(&base64::engine::general_purpose::STANDARD, text.trim())
        .map_err(|e| TokenError::Format(format!("invalid base64: {e}")))
}
