//! Third-party blocks: statements signed by a key other than the
//! chain's, so an authorizer can trust them by signer rather than by
//! block position.
//!
//! The exchange is a round trip. The token holder produces a
//! [`ThirdPartyRequest`] naming the chain key the next block will hang
//! off. The external party builds a block, signs it under a separate
//! domain tag bound to that key, and returns a [`ThirdPartyBlock`].
//! The holder then calls [`Token::append_third_party`] to splice it in.
//!
//! [`Token::append_third_party`]: super::Token::append_third_party

use serde::{Deserialize, Serialize};

use crate::builder::BlockBuilder;
use crate::crypto::signing::external_signature_payload;
use crate::crypto::{KeyPair, PrivateKey, PublicKey};
use crate::error::{Result, TokenError};

use super::chain::ExternalSignature;
use super::wire::{b64_decode, b64_encode};

/// A request for an externally signed block.
///
/// Carries the chain public key the new block's signature must bind to.
/// It contains no token contents, so the external party learns nothing
/// about the token it is attenuating.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThirdPartyRequest {
    previous_key: PublicKey,
}

impl ThirdPartyRequest {
    pub(crate) fn new(previous_key: PublicKey) -> Self {
        Self { previous_key }
    }

    /// The chain key the signed block will be bound to.
    pub fn previous_key(&self) -> &PublicKey {
        &self.previous_key
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| TokenError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| TokenError::Format(format!("malformed third-party request: {e}")))
    }

    pub fn to_base64(&self) -> Result<String> {
        Ok(b64_encode(&self.to_bytes()?))
    }

    pub fn from_base64(text: &str) -> Result<Self> {
        Self::from_bytes(&b64_decode(text)?)
    }

    /// Sign a block in answer to this request.
    ///
    /// The signer's public key is embedded in the block payload before
    /// signing, so it is covered by both the external signature and,
    /// once appended, the chain signature.
    pub fn create_block(
        &self,
        signer: &PrivateKey,
        builder: &BlockBuilder,
    ) -> Result<ThirdPartyBlock> {
        let signer_public = KeyPair::from_private_key(signer).public().clone();
        let mut block = builder.build_block()?;
        block.external_key = Some(signer_public.clone());
        block.version = block.required_version();
        let data =
            bincode::serialize(&block).map_err(|e| TokenError::Serialization(e.to_string()))?;
        let payload = external_signature_payload(&data, &self.previous_key);
        let signature = signer.sign(&payload);
        Ok(ThirdPartyBlock {
            data,
            external_signature: ExternalSignature {
                public_key: signer_public,
                signature,
            },
        })
    }
}

/// An externally signed block, ready to be appended to the token whose
/// request produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThirdPartyBlock {
    data: Vec<u8>,
    external_signature: ExternalSignature,
}

impl ThirdPartyBlock {
    pub(crate) fn into_parts(self) -> (Vec<u8>, ExternalSignature) {
        (self.data, self.external_signature)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| TokenError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| TokenError::Format(format!("malformed third-party block: {e}")))
    }

    pub fn to_base64(&self) -> Result<String> {
        Ok(b64_encode(&self.to_bytes()?))
    }

    pub fn from_base64(text: &str) -> Result<Self> {
        Self::from_bytes(&b64_decode(text)?)
    }
}
