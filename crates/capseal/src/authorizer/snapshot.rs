//! Authorizer snapshots: a serializable record of every input the
//! authorizer evaluated, for replay, audit or offline debugging.
//!
//! A snapshot carries no signatures. Restoring one trusts the recorded
//! block contents as-is, which is the point: it reproduces a past
//! authorization decision without needing the token or any key.

use serde::{Deserialize, Serialize};

use crate::datalog::{Check, Fact, Policy, Rule, RunLimits};
use crate::error::{Result, TokenError};
use crate::token::block::Block;
use crate::token::wire::{b64_decode, b64_encode};

/// The recorded inputs of one authorizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizerSnapshot {
    /// Token blocks, authority first, as parsed at verification time.
    pub(crate) blocks: Vec<Block>,
    pub(crate) facts: Vec<Fact>,
    pub(crate) rules: Vec<Rule>,
    pub(crate) checks: Vec<Check>,
    pub(crate) policies: Vec<Policy>,
    pub(crate) limits: RunLimits,
}

impl AuthorizerSnapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(|e| TokenError::Serialization(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| TokenError::Format(format!("malformed snapshot: {e}")))
    }

    pub fn to_base64(&self) -> Result<String> {
        Ok(b64_encode(&self.to_bytes()?))
    }

    pub fn from_base64(text: &str) -> Result<Self> {
        Self::from_bytes(&b64_decode(text)?)
    }
}
