//! The authorization language: terms, facts, rules, checks, policies,
//! and the fixpoint evaluation engine.

pub mod engine;
pub mod expression;
pub mod predicate;
pub mod rule;
pub mod scope;
pub mod symbol;
pub mod term;

pub use engine::{Origin, RunLimits, TrustedOrigins, World, AUTHORIZER_BLOCK_ID};
pub use expression::{BinaryOp, Expression, ExpressionError, UnaryOp};
pub use predicate::{Fact, Predicate};
pub use rule::{Check, Policy, PolicyKind, Rule};
pub use scope::Scope;
pub use symbol::SymbolTable;
pub use term::Term;
