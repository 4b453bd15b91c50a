//! Token assembly: the signed block chain and its operations.
//!
//! A token is immutable once built. `append` and `append_third_party`
//! return a new token value; the original keeps verifying and
//! authorizing exactly as before.

pub mod block;
pub mod chain;
pub mod third_party;
pub mod unverified;
pub(crate) mod wire;

use log::debug;

use crate::authorizer::Authorizer;
use crate::builder::{AuthorizerBuilder, BlockBuilder, TokenBuilder};
use crate::crypto::signing::external_signature_payload;
use crate::crypto::{Algorithm, KeyPair, PrivateKey, PublicKey};
use crate::error::{Result, TokenError};

use block::{Block, MAX_SCHEMA_VERSION, MIN_SCHEMA_VERSION};
use chain::{sign_block, verify_chain, SignedBlock};
use third_party::{ThirdPartyBlock, ThirdPartyRequest};
use wire::{b64_decode, b64_encode, token_from_bytes, token_to_bytes, WireToken, FORMAT_VERSION};

/// Selects the root public key to verify a token against.
///
/// Tokens carry an optional cleartext root key id so deployments with
/// rotated or multiple root keys can pick the right one.
pub trait RootKeyProvider {
    fn root_key(&self, root_key_id: Option<u32>) -> Result<PublicKey>;
}

impl RootKeyProvider for PublicKey {
    fn root_key(&self, _root_key_id: Option<u32>) -> Result<PublicKey> {
        Ok(self.clone())
    }
}

impl RootKeyProvider for &PublicKey {
    fn root_key(&self, _root_key_id: Option<u32>) -> Result<PublicKey> {
        Ok((*self).clone())
    }
}

impl<F> RootKeyProvider for F
where
    F: Fn(Option<u32>) -> Result<PublicKey>,
{
    fn root_key(&self, root_key_id: Option<u32>) -> Result<PublicKey> {
        self(root_key_id)
    }
}

/// A verified capability token.
#[derive(Debug, Clone)]
pub struct Token {
    pub(crate) root_key_id: Option<u32>,
    pub(crate) blocks: Vec<SignedBlock>,
    pub(crate) proof_key: KeyPair,
    pub(crate) parsed: Vec<Block>,
}

impl Token {
    /// Start building a new token.
    pub fn builder() -> TokenBuilder {
        TokenBuilder::new()
    }

    /// Sign an authority block with the root private key.
    pub(crate) fn mint(
        root: &PrivateKey,
        root_key_id: Option<u32>,
        block: Block,
    ) -> Result<Token> {
        let data = serialize_block(&block)?;
        let next = KeyPair::generate(root.algorithm());
        let signed = sign_block(root, data, None, next.public());
        debug!("minted token with authority block ({} bytes)", signed.data.len());
        Ok(Token {
            root_key_id,
            blocks: vec![signed],
            proof_key: next,
            parsed: vec![block],
        })
    }

    /// Parse and verify a serialized token against a root public key.
    pub fn from_bytes<P: RootKeyProvider>(bytes: &[u8], root: P) -> Result<Token> {
        let token = Self::from_wire(token_from_bytes(bytes)?)?;
        let root = root.root_key(token.root_key_id)?;
        verify_chain(&root, &token.blocks, token.proof_key.public())?;
        Ok(token)
    }

    /// Parse and verify a base64-encoded token.
    pub fn from_base64<P: RootKeyProvider>(text: &str, root: P) -> Result<Token> {
        Self::from_bytes(&b64_decode(text)?, root)
    }

    /// Structural parse without signature verification.
    pub(crate) fn from_wire(wire: WireToken) -> Result<Token> {
        let proof_private = PrivateKey::from_bytes(&wire.proof_key, wire.proof_algorithm)?;
        let parsed = parse_blocks(&wire.blocks)?;
        Ok(Token {
            root_key_id: wire.root_key_id,
            blocks: wire.blocks,
            proof_key: KeyPair::from_private_key(&proof_private),
            parsed,
        })
    }

    pub(crate) fn to_wire(&self) -> WireToken {
        WireToken {
            format_version: FORMAT_VERSION,
            root_key_id: self.root_key_id,
            blocks: self.blocks.clone(),
            proof_algorithm: self.proof_key.algorithm(),
            proof_key: self.proof_key.private().to_bytes().to_vec(),
        }
    }

    /// Serialize to raw bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        token_to_bytes(&self.to_wire())
    }

    /// Serialize to base64 text.
    pub fn to_base64(&self) -> Result<String> {
        Ok(b64_encode(&self.to_bytes()?))
    }

    /// Number of blocks, authority included.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Datalog source of block `index`.
    pub fn block_source(&self, index: usize) -> Result<String> {
        self.parsed
            .get(index)
            .map(Block::print)
            .ok_or_else(|| TokenError::Format(format!("no block at index {index}")))
    }

    /// Context string of block `index`.
    pub fn block_context(&self, index: usize) -> Result<Option<String>> {
        self.parsed
            .get(index)
            .map(|b| b.context.clone())
            .ok_or_else(|| TokenError::Format(format!("no block at index {index}")))
    }

    /// External signing key of block `index`, if it is a third-party
    /// block.
    pub fn block_external_key(&self, index: usize) -> Result<Option<PublicKey>> {
        self.parsed
            .get(index)
            .map(|b| b.external_key.clone())
            .ok_or_else(|| TokenError::Format(format!("no block at index {index}")))
    }

    /// The cleartext root key hint carried by the token.
    pub fn root_key_id(&self) -> Option<u32> {
        self.root_key_id
    }

    /// One revocation id per block, in block order.
    pub fn revocation_ids(&self) -> Vec<Vec<u8>> {
        self.blocks.iter().map(SignedBlock::revocation_id).collect()
    }

    /// Append an attenuation block, returning a new token.
    pub fn append(&self, block: &BlockBuilder) -> Result<Token> {
        self.append_with_algorithm(block, self.proof_key.algorithm())
    }

    /// Append an attenuation block whose chaining key pair uses the
    /// given algorithm.
    pub fn append_with_algorithm(
        &self,
        block: &BlockBuilder,
        algorithm: Algorithm,
    ) -> Result<Token> {
        self.append_parsed(block.build_block()?, algorithm)
    }

    pub(crate) fn append_parsed(&self, block: Block, algorithm: Algorithm) -> Result<Token> {
        let data = serialize_block(&block)?;
        let next = KeyPair::generate(algorithm);
        let signed = sign_block(self.proof_key.private(), data, None, next.public());

        let mut blocks = self.blocks.clone();
        blocks.push(signed);
        let mut parsed = self.parsed.clone();
        parsed.push(block);
        Ok(Token {
            root_key_id: self.root_key_id,
            blocks,
            proof_key: next,
            parsed,
        })
    }

    /// Produce the request an external party needs to contribute a
    /// signed block to this token.
    pub fn third_party_request(&self) -> ThirdPartyRequest {
        ThirdPartyRequest::new(self.proof_key.public().clone())
    }

    /// Attach a third-party block, returning a new token.
    ///
    /// The block's external signature is verified here against the
    /// declared external key before it enters the chain.
    pub fn append_third_party(
        &self,
        external_key: &PublicKey,
        block: ThirdPartyBlock,
    ) -> Result<Token> {
        let (data, external_signature) = block.into_parts();
        if &external_signature.public_key != external_key {
            return Err(TokenError::InvalidKey(
                "third-party block was signed by a different key".into(),
            ));
        }
        let payload = external_signature_payload(&data, self.proof_key.public());
        external_signature
            .public_key
            .verify(&payload, &external_signature.signature)
            .map_err(|_| TokenError::InvalidExternalSignature {
                block: self.blocks.len(),
            })?;

        let parsed_block: Block = bincode::deserialize(&data)
            .map_err(|e| TokenError::Format(format!("malformed third-party block: {e}")))?;
        if parsed_block.external_key.as_ref() != Some(&external_signature.public_key) {
            return Err(TokenError::Format(
                "third-party block does not declare its signing key".into(),
            ));
        }

        let next = KeyPair::generate(self.proof_key.algorithm());
        let signed = sign_block(
            self.proof_key.private(),
            data,
            Some(external_signature),
            next.public(),
        );
        let mut blocks = self.blocks.clone();
        blocks.push(signed);
        let mut parsed = self.parsed.clone();
        parsed.push(parsed_block);
        Ok(Token {
            root_key_id: self.root_key_id,
            blocks,
            proof_key: next,
            parsed,
        })
    }

    /// Build an authorizer over this token with no local additions.
    pub fn authorizer(&self) -> Result<Authorizer> {
        AuthorizerBuilder::new().build(self)
    }

    pub(crate) fn parsed_blocks(&self) -> &[Block] {
        &self.parsed
    }
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, block) in self.parsed.iter().enumerate() {
            if i == 0 {
                writeln!(f, "authority:")?;
            } else {
                writeln!(f, "block {i}:")?;
            }
            write!(f, "{block}")?;
        }
        Ok(())
    }
}

fn serialize_block(block: &Block) -> Result<Vec<u8>> {
    bincode::serialize(block).map_err(|e| TokenError::Serialization(e.to_string()))
}

fn parse_blocks(blocks: &[SignedBlock]) -> Result<Vec<Block>> {
    let mut parsed = Vec::with_capacity(blocks.len());
    for (i, signed) in blocks.iter().enumerate() {
        let block: Block = bincode::deserialize(&signed.data)
            .map_err(|e| TokenError::Format(format!("malformed block {i}: {e}")))?;
        if block.version < MIN_SCHEMA_VERSION || block.version > MAX_SCHEMA_VERSION {
            return Err(TokenError::Format(format!(
                "block {i} has unsupported schema version {}",
                block.version
            )));
        }
        match (&block.external_key, &signed.external_signature) {
            (Some(declared), Some(external)) if declared == &external.public_key => {}
            (None, None) => {}
            _ => {
                return Err(TokenError::Format(format!(
                    "block {i} external key does not match its signature record"
                )))
            }
        }
        parsed.push(block);
    }
    Ok(parsed)
}
