//! Predicates and facts.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TokenError};

use super::term::Term;

/// A named tuple of terms, e.g. `right("file1", "read")`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Predicate {
    pub name: String,
    pub terms: Vec<Term>,
}

impl Predicate {
    pub fn new<N: Into<String>>(name: N, terms: Vec<Term>) -> Self {
        Self {
            name: name.into(),
            terms,
        }
    }

    /// Variable names appearing in this predicate.
    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().filter_map(|t| match t {
            Term::Variable(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// First unsubstituted parameter, if any.
    pub fn first_parameter(&self) -> Option<&str> {
        self.terms.iter().find_map(|t| t.parameter_name())
    }

    pub(crate) fn substitute_parameter(&mut self, name: &str, value: &Term) -> bool {
        let mut substituted = false;
        for term in &mut self.terms {
            if term.parameter_name() == Some(name) {
                *term = value.clone();
                substituted = true;
            }
        }
        substituted
    }
}

impl std::fmt::Display for Predicate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{term}")?;
        }
        write!(f, ")")
    }
}

/// A fact: a predicate that must be ground before it enters a block or
/// the authorizer.
///
/// Parsed facts may temporarily carry `{parameter}` terms; builders
/// validate groundedness when the fact is added.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Fact {
    pub predicate: Predicate,
}

impl Fact {
    /// Build a fact from a name and terms.
    pub fn new<N: Into<String>>(name: N, terms: Vec<Term>) -> Self {
        Self {
            predicate: Predicate::new(name, terms),
        }
    }

    /// The predicate name.
    pub fn name(&self) -> &str {
        &self.predicate.name
    }

    /// Substitute a `{name}` parameter with a concrete term.
    pub fn set<T: Into<Term>>(&mut self, name: &str, value: T) -> Result<()> {
        let value = value.into();
        if self.predicate.substitute_parameter(name, &value) {
            Ok(())
        } else {
            Err(TokenError::UnknownParameter(name.to_string()))
        }
    }

    /// Check that the fact is ground and fully substituted.
    pub fn validate(&self) -> Result<()> {
        if let Some(param) = self.predicate.first_parameter() {
            return Err(TokenError::MissingParameter(param.to_string()));
        }
        if self.predicate.variables().next().is_some() {
            return Err(TokenError::InvalidFact(format!(
                "fact {} contains variables",
                self.predicate.name
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for Fact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.predicate)
    }
}

impl std::str::FromStr for Fact {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self> {
        crate::builder::parser::parse_fact(s)
    }
}
