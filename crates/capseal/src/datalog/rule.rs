//! Rules, checks and policies.
//!
//! A rule derives new facts from matching bindings. A check is a list
//! of alternative rule bodies, satisfied when any alternative has at
//! least one solution. A policy is a check tagged allow or deny,
//! resolved in declaration order by the authorizer.

use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;
use crate::error::{Result, TokenError};

use super::expression::Expression;
use super::predicate::Predicate;
use super::scope::Scope;
use super::term::Term;

/// A datalog rule: `head <- body predicates, expressions [trusting …]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rule {
    pub head: Predicate,
    pub body: Vec<Predicate>,
    pub expressions: Vec<Expression>,
    pub scopes: Vec<Scope>,
}

impl Rule {
    pub fn new(
        head: Predicate,
        body: Vec<Predicate>,
        expressions: Vec<Expression>,
        scopes: Vec<Scope>,
    ) -> Self {
        Self {
            head,
            body,
            expressions,
            scopes,
        }
    }

    /// Check the rule is safe to evaluate: every head and expression
    /// variable is bound by a body predicate, and no `{parameter}` or
    /// scope parameter remains.
    pub fn validate(&self) -> Result<()> {
        if let Some(param) = self.first_parameter() {
            return Err(TokenError::MissingParameter(param.to_string()));
        }
        let bound: Vec<&str> = self.body.iter().flat_map(|p| p.variables()).collect();
        for var in self.head.variables() {
            if !bound.contains(&var) {
                return Err(TokenError::InvalidRule(format!(
                    "head variable ${var} does not appear in the rule body"
                )));
            }
        }
        let mut expr_vars = Vec::new();
        for expr in &self.expressions {
            expr.variables(&mut expr_vars);
        }
        for var in &expr_vars {
            if !bound.contains(&var.as_str()) {
                return Err(TokenError::InvalidRule(format!(
                    "expression variable ${var} does not appear in the rule body"
                )));
            }
        }
        Ok(())
    }

    /// First unsubstituted parameter anywhere in the rule, if any.
    pub fn first_parameter(&self) -> Option<&str> {
        self.head
            .first_parameter()
            .or_else(|| self.body.iter().find_map(|p| p.first_parameter()))
            .or_else(|| self.expressions.iter().find_map(|e| e.first_parameter()))
            .or_else(|| {
                self.scopes.iter().find_map(|s| match s {
                    Scope::Parameter(name) => Some(name.as_str()),
                    _ => None,
                })
            })
    }

    /// Substitute a `{name}` term parameter.
    pub fn set<T: Into<Term>>(&mut self, name: &str, value: T) -> Result<()> {
        let value = value.into();
        let mut substituted = self.head.substitute_parameter(name, &value);
        for pred in &mut self.body {
            substituted |= pred.substitute_parameter(name, &value);
        }
        for expr in &mut self.expressions {
            substituted |= expr.substitute_parameter(name, &value);
        }
        if substituted {
            Ok(())
        } else {
            Err(TokenError::UnknownParameter(name.to_string()))
        }
    }

    /// Substitute a `{name}` scope parameter with a public key.
    pub fn set_scope(&mut self, name: &str, key: &PublicKey) -> Result<()> {
        let mut substituted = false;
        for scope in &mut self.scopes {
            if matches!(scope, Scope::Parameter(p) if p == name) {
                *scope = Scope::PublicKey(key.clone());
                substituted = true;
            }
        }
        if substituted {
            Ok(())
        } else {
            Err(TokenError::UnknownParameter(name.to_string()))
        }
    }

    pub(crate) fn fmt_body(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for pred in &self.body {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{pred}")?;
        }
        for expr in &self.expressions {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            write!(f, "{expr}")?;
        }
        if !self.scopes.is_empty() {
            write!(f, " trusting ")?;
            for (i, scope) in self.scopes.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{scope}")?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Display for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <- ", self.head)?;
        self.fmt_body(f)
    }
}

impl std::str::FromStr for Rule {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self> {
        crate::builder::parser::parse_rule(s)
    }
}

/// A check: one or more alternative queries, written
/// `check if body (or body)*`. The check passes when any query has at
/// least one solution.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Check {
    pub queries: Vec<Rule>,
}

impl Check {
    pub fn new(queries: Vec<Rule>) -> Self {
        Self { queries }
    }

    pub fn validate(&self) -> Result<()> {
        if self.queries.is_empty() {
            return Err(TokenError::InvalidRule("check has no query".into()));
        }
        for query in &self.queries {
            if let Some(param) = query.first_parameter() {
                return Err(TokenError::MissingParameter(param.to_string()));
            }
        }
        Ok(())
    }

    pub fn set<T: Into<Term>>(&mut self, name: &str, value: T) -> Result<()> {
        let value = value.into();
        let mut substituted = false;
        for query in &mut self.queries {
            if query.set(name, value.clone()).is_ok() {
                substituted = true;
            }
        }
        if substituted {
            Ok(())
        } else {
            Err(TokenError::UnknownParameter(name.to_string()))
        }
    }

    pub fn set_scope(&mut self, name: &str, key: &PublicKey) -> Result<()> {
        let mut substituted = false;
        for query in &mut self.queries {
            if query.set_scope(name, key).is_ok() {
                substituted = true;
            }
        }
        if substituted {
            Ok(())
        } else {
            Err(TokenError::UnknownParameter(name.to_string()))
        }
    }
}

impl std::fmt::Display for Check {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "check if ")?;
        for (i, query) in self.queries.iter().enumerate() {
            if i > 0 {
                write!(f, " or ")?;
            }
            query.fmt_body(f)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Check {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self> {
        crate::builder::parser::parse_check(s)
    }
}

/// Whether a matching policy authorizes or refuses the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PolicyKind {
    Allow,
    Deny,
}

/// An authorizer policy, written `allow if body` or `deny if body`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Policy {
    pub kind: PolicyKind,
    pub queries: Vec<Rule>,
}

impl Policy {
    pub fn new(kind: PolicyKind, queries: Vec<Rule>) -> Self {
        Self { kind, queries }
    }

    pub fn validate(&self) -> Result<()> {
        if self.queries.is_empty() {
            return Err(TokenError::InvalidRule("policy has no query".into()));
        }
        for query in &self.queries {
            if let Some(param) = query.first_parameter() {
                return Err(TokenError::MissingParameter(param.to_string()));
            }
        }
        Ok(())
    }

    pub fn set<T: Into<Term>>(&mut self, name: &str, value: T) -> Result<()> {
        let value = value.into();
        let mut substituted = false;
        for query in &mut self.queries {
            if query.set(name, value.clone()).is_ok() {
                substituted = true;
            }
        }
        if substituted {
            Ok(())
        } else {
            Err(TokenError::UnknownParameter(name.to_string()))
        }
    }

    pub fn set_scope(&mut self, name: &str, key: &PublicKey) -> Result<()> {
        let mut substituted = false;
        for query in &mut self.queries {
            if query.set_scope(name, key).is_ok() {
                substituted = true;
            }
        }
        if substituted {
            Ok(())
        } else {
            Err(TokenError::UnknownParameter(name.to_string()))
        }
    }
}

impl std::fmt::Display for Policy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            PolicyKind::Allow => write!(f, "allow if ")?,
            PolicyKind::Deny => write!(f, "deny if ")?,
        }
        for (i, query) in self.queries.iter().enumerate() {
            if i > 0 {
                write!(f, " or ")?;
            }
            query.fmt_body(f)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Policy {
    type Err = TokenError;

    fn from_str(s: &str) -> Result<Self> {
        crate::builder::parser::parse_policy(s)
    }
}
