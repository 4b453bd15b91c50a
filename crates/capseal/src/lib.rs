//! Capseal — capability tokens with offline attenuation.
//!
//! A token is a chain of cryptographically signed blocks carrying
//! datalog facts, rules and checks. Any holder can append a block that
//! narrows what the token authorizes, without contacting the issuer;
//! verification walks the signature chain from a single root public
//! key. Authorization evaluates all blocks together with
//! authorizer-side facts and policies under a bounded fixpoint engine.

pub mod authorizer;
pub mod builder;
pub mod crypto;
pub mod datalog;
pub mod error;
pub mod time;
pub mod token;

// Re-export primary types
pub use error::{
    FailedCheck, FailedLogic, MatchedPolicy, Result, RunLimitError, TokenError,
};
pub use token::third_party::{ThirdPartyBlock, ThirdPartyRequest};
pub use token::unverified::UnverifiedToken;
pub use token::{RootKeyProvider, Token};

// Re-export builder types
pub use builder::{AuthorizerBuilder, BlockBuilder, TokenBuilder};

// Re-export authorizer types
pub use authorizer::{snapshot::AuthorizerSnapshot, Authorizer};

// Re-export language types
pub use datalog::{Check, Fact, Policy, PolicyKind, Predicate, Rule, RunLimits, Scope, Term};

// Re-export key types
pub use crypto::{Algorithm, KeyPair, PrivateKey, PublicKey};
