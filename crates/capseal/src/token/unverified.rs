//! Tokens parsed without signature verification.
//!
//! Useful when the root key is not yet known, e.g. to read the root key
//! id or inspect block contents before fetching the right key. Nothing
//! read from an unverified token can be trusted until `verify` runs.

use crate::builder::BlockBuilder;
use crate::crypto::{Algorithm, PublicKey};
use crate::error::Result;

use super::wire::{b64_decode, token_from_bytes};
use super::{RootKeyProvider, Token};

/// A structurally parsed token whose signatures have not been checked.
#[derive(Debug, Clone)]
pub struct UnverifiedToken {
    inner: Token,
}

impl UnverifiedToken {
    /// Parse a token without verifying its signature chain.
    pub fn from_bytes(bytes: &[u8]) -> Result<UnverifiedToken> {
        Ok(UnverifiedToken {
            inner: Token::from_wire(token_from_bytes(bytes)?)?,
        })
    }

    /// Parse a base64-encoded token without verifying signatures.
    pub fn from_base64(text: &str) -> Result<UnverifiedToken> {
        Self::from_bytes(&b64_decode(text)?)
    }

    /// Check the signature chain and promote to a verified [`Token`].
    pub fn verify<P: RootKeyProvider>(self, root: P) -> Result<Token> {
        let root = root.root_key(self.inner.root_key_id)?;
        super::chain::verify_chain(&root, &self.inner.blocks, self.inner.proof_key.public())?;
        Ok(self.inner)
    }

    /// The cleartext root key hint, readable before verification.
    pub fn root_key_id(&self) -> Option<u32> {
        self.inner.root_key_id
    }

    pub fn block_count(&self) -> usize {
        self.inner.block_count()
    }

    pub fn block_source(&self, index: usize) -> Result<String> {
        self.inner.block_source(index)
    }

    pub fn block_context(&self, index: usize) -> Result<Option<String>> {
        self.inner.block_context(index)
    }

    pub fn block_external_key(&self, index: usize) -> Result<Option<PublicKey>> {
        self.inner.block_external_key(index)
    }

    pub fn revocation_ids(&self) -> Vec<Vec<u8>> {
        self.inner.revocation_ids()
    }

    /// Append an attenuation block. Appending needs only the carried
    /// proof key, never the root key.
    pub fn append(&self, block: &BlockBuilder) -> Result<UnverifiedToken> {
        Ok(UnverifiedToken {
            inner: self.inner.append(block)?,
        })
    }

    /// Append with an explicit chaining key algorithm.
    pub fn append_with_algorithm(
        &self,
        block: &BlockBuilder,
        algorithm: Algorithm,
    ) -> Result<UnverifiedToken> {
        Ok(UnverifiedToken {
            inner: self.inner.append_with_algorithm(block, algorithm)?,
        })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.inner.to_bytes()
    }

    pub fn to_base64(&self) -> Result<String> {
        self.inner.to_base64()
    }
}

impl std::fmt::Display for UnverifiedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.inner.fmt(f)
    }
}
