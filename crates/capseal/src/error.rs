//! Error types for capseal.
//!
//! All errors are strongly typed and propagated without panicking.
//! Authorization failures are never downgraded: a failing check or a
//! matching deny policy always surfaces as an error to the caller.

/// Token error types covering construction, parsing, cryptography,
/// evaluation and authorization.
#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Signature verification failed")]
    SignatureInvalid,

    #[error("Signature verification failed for block {block}")]
    InvalidBlockSignature { block: usize },

    #[error("External signature verification failed for block {block}")]
    InvalidExternalSignature { block: usize },

    #[error("Token proof key does not match the last block's next key")]
    ProofKeyMismatch,

    #[error("No root public key available for root key id {0:?}")]
    UnknownRootKeyId(Option<u32>),

    #[error("Invalid token format: {0}")]
    Format(String),

    #[error("Syntax error: {message} at `{fragment}`")]
    Syntax { message: String, fragment: String },

    #[error("Invalid fact: {0}")]
    InvalidFact(String),

    #[error("Invalid rule: {0}")]
    InvalidRule(String),

    #[error("Missing value for parameter {{{0}}}")]
    MissingParameter(String),

    #[error("Unknown parameter {{{0}}}")]
    UnknownParameter(String),

    #[error("Builder already consumed by a merge operation")]
    AlreadyConsumed,

    #[error("Evaluation budget exceeded: {0}")]
    RunLimit(#[from] RunLimitError),

    #[error("Authorization failed: {0}")]
    FailedLogic(#[from] FailedLogic),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Fatal resource errors raised by the fixpoint engine, distinct from
/// authorization failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RunLimitError {
    #[error("too many facts generated")]
    TooManyFacts,

    #[error("too many iterations")]
    TooManyIterations,

    #[error("evaluation timed out")]
    Timeout,
}

/// Authorization failures, carrying enough detail to identify which
/// check or policy refused the request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailedLogic {
    #[error("{} check(s) failed: {}", .checks.len(), format_checks(.checks))]
    Unauthorized {
        /// The policy that would have matched, had the checks passed.
        policy: MatchedPolicy,
        /// Every check that had no satisfying binding.
        checks: Vec<FailedCheck>,
    },

    #[error("A deny policy matched (policy index {0})")]
    Denied(usize),

    #[error("No policy matched the request")]
    NoMatchingPolicy,
}

/// Outcome of the ordered policy pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchedPolicy {
    Allow(usize),
    Deny(usize),
    None,
}

/// A single check that failed, with its position in the token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailedCheck {
    Block {
        block_id: usize,
        check_id: usize,
        rule: String,
    },
    Authorizer {
        check_id: usize,
        rule: String,
    },
}

impl std::fmt::Display for FailedCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailedCheck::Block {
                block_id,
                check_id,
                rule,
            } => write!(f, "block {block_id} check {check_id}: {rule}"),
            FailedCheck::Authorizer { check_id, rule } => {
                write!(f, "authorizer check {check_id}: {rule}")
            }
        }
    }
}

fn format_checks(checks: &[FailedCheck]) -> String {
    checks
        .iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenience Result alias.
pub type Result<T> = std::result::Result<T, TokenError>;
