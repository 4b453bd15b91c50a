//! Scope declarations.
//!
//! A scope restricts which blocks' facts a rule, check or policy query
//! may read. The default (no scope declared) is the authority block,
//! the declaring block, and the authorizer.

use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;

/// Fact-visibility declaration attached to a rule body, written
/// `trusting authority`, `trusting previous` or
/// `trusting ed25519/<hex>` in source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// Facts from the authority block (and the authorizer).
    Authority,
    /// Facts from every block up to and including the declaring one.
    Previous,
    /// Facts from blocks signed by this external public key.
    PublicKey(PublicKey),
    /// Builder-time substitution point, written `{name}`.
    Parameter(String),
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Scope::Authority => f.write_str("authority"),
            Scope::Previous => f.write_str("previous"),
            Scope::PublicKey(key) => write!(f, "{key}"),
            Scope::Parameter(name) => write!(f, "{{{name}}}"),
        }
    }
}
