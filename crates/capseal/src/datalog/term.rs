//! Typed terms of the authorization language.
//!
//! A term is either a literal (integer, string, boolean, byte array,
//! date, set), a logic variable, or a builder-time parameter awaiting
//! substitution. Equality and ordering are structural. Sets are kept in
//! `BTreeSet`s, hold elements of a single type, and may not contain
//! variables, parameters or nested sets.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TokenError};

/// A single value in a predicate or expression.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Term {
    /// Logic variable, written `$name` in source.
    Variable(String),
    /// 64-bit signed integer.
    Integer(i64),
    /// UTF-8 string.
    Str(String),
    /// Boolean.
    Bool(bool),
    /// Raw byte array, written `hex:<hex>` in source.
    Bytes(Vec<u8>),
    /// Seconds since Unix epoch, written as RFC 3339 in source.
    Date(u64),
    /// Homogeneous set of ground, non-set terms.
    Set(BTreeSet<Term>),
    /// Builder-time substitution point, written `{name}` in source.
    ///
    /// Parameters never reach a signed block or the evaluation engine:
    /// builders reject statements with unsubstituted parameters.
    Parameter(String),
}

impl Term {
    /// Build a set term. Elements must share a single type; variables,
    /// parameters and nested sets are rejected.
    pub fn set<I: IntoIterator<Item = Term>>(items: I) -> Result<Term> {
        let mut set = BTreeSet::new();
        let mut element_kind = None;
        for item in items {
            match &item {
                Term::Variable(_) => {
                    return Err(TokenError::InvalidFact(
                        "sets cannot contain variables".into(),
                    ))
                }
                Term::Parameter(_) => {
                    return Err(TokenError::InvalidFact(
                        "sets cannot contain parameters".into(),
                    ))
                }
                Term::Set(_) => {
                    return Err(TokenError::InvalidFact("sets cannot be nested".into()))
                }
                _ => {}
            }
            let kind = std::mem::discriminant(&item);
            if *element_kind.get_or_insert(kind) != kind {
                return Err(TokenError::InvalidFact(
                    "set elements must all have the same type".into(),
                ));
            }
            set.insert(item);
        }
        Ok(Term::Set(set))
    }

    /// True if the term contains no variable.
    pub fn is_ground(&self) -> bool {
        !matches!(self, Term::Variable(_))
    }

    /// The parameter name, if this term is an unsubstituted parameter.
    pub fn parameter_name(&self) -> Option<&str> {
        match self {
            Term::Parameter(name) => Some(name),
            _ => None,
        }
    }
}

impl From<i64> for Term {
    fn from(v: i64) -> Self {
        Term::Integer(v)
    }
}

impl From<&str> for Term {
    fn from(v: &str) -> Self {
        Term::Str(v.to_string())
    }
}

impl From<String> for Term {
    fn from(v: String) -> Self {
        Term::Str(v)
    }
}

impl From<bool> for Term {
    fn from(v: bool) -> Self {
        Term::Bool(v)
    }
}

impl From<Vec<u8>> for Term {
    fn from(v: Vec<u8>) -> Self {
        Term::Bytes(v)
    }
}

fn escape_string(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Variable(name) => write!(f, "${name}"),
            Term::Integer(i) => write!(f, "{i}"),
            Term::Str(s) => write!(f, "\"{}\"", escape_string(s)),
            Term::Bool(b) => write!(f, "{b}"),
            Term::Bytes(b) => write!(f, "hex:{}", hex::encode(b)),
            Term::Date(secs) => write!(f, "{}", crate::time::secs_to_rfc3339(*secs)),
            Term::Set(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Term::Parameter(name) => write!(f, "{{{name}}}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_rejects_variables() {
        let result = Term::set([Term::Variable("x".into())]);
        assert!(result.is_err());
    }

    #[test]
    fn test_set_rejects_nested_sets() {
        let inner = Term::set([Term::Integer(1)]).unwrap();
        assert!(Term::set([inner]).is_err());
    }

    #[test]
    fn test_set_rejects_mixed_element_types() {
        assert!(matches!(
            Term::set([Term::Integer(1), Term::Str("a".into())]),
            Err(TokenError::InvalidFact(_))
        ));
        assert!(matches!(
            Term::set([Term::Date(0), Term::Integer(0)]),
            Err(TokenError::InvalidFact(_))
        ));
        assert!(Term::set([Term::Integer(1), Term::Integer(2)]).is_ok());
    }

    #[test]
    fn test_set_collapses_duplicates() {
        let set = Term::set([Term::Integer(1), Term::Integer(1), Term::Integer(2)]).unwrap();
        match set {
            Term::Set(items) => assert_eq!(items.len(), 2),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(Term::Integer(-3).to_string(), "-3");
        assert_eq!(Term::Str("a\"b".into()).to_string(), "\"a\\\"b\"");
        assert_eq!(Term::Variable("user".into()).to_string(), "$user");
        assert_eq!(Term::Bytes(vec![0xde, 0xad]).to_string(), "hex:dead");
        assert_eq!(Term::Parameter("p".into()).to_string(), "{p}");
        assert_eq!(
            Term::set([Term::Integer(2), Term::Integer(1)]).unwrap().to_string(),
            "[1, 2]"
        );
    }

    #[test]
    fn test_structural_ordering() {
        assert!(Term::Integer(1) < Term::Integer(2));
        assert_eq!(Term::Str("a".into()), Term::Str("a".into()));
        assert_ne!(Term::Integer(1), Term::Str("1".into()));
    }
}
