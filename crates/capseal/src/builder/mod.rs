//! Builders for blocks, tokens and authorizers.
//!
//! Builders collect validated statements and hand them to the signing
//! or evaluation layer in one step. A builder merged into another is
//! consumed; further use reports [`TokenError::AlreadyConsumed`].

pub mod authorizer;
pub(crate) mod parser;

pub use authorizer::AuthorizerBuilder;

use std::collections::{HashMap, HashSet};

use crate::crypto::{PrivateKey, PublicKey};
use crate::datalog::{Check, Fact, Rule, Term};
use crate::error::{Result, TokenError};
use crate::token::block::Block;
use crate::token::Token;

use parser::{parse_source, Statement};

#[derive(Debug, Clone, Default)]
struct BlockInner {
    facts: Vec<Fact>,
    rules: Vec<Rule>,
    checks: Vec<Check>,
    context: Option<String>,
}

/// Substitute parameters into parsed statements and reject names that
/// matched nothing.
fn apply_parameters(
    statements: &mut [Statement],
    parameters: &HashMap<String, Term>,
    scope_parameters: &HashMap<String, PublicKey>,
) -> Result<()> {
    let mut used: HashSet<&str> = HashSet::new();
    for statement in statements.iter_mut() {
        for (name, value) in parameters {
            let substituted = match statement {
                Statement::Fact(fact) => fact.set(name, value.clone()).is_ok(),
                Statement::Rule(rule) => rule.set(name, value.clone()).is_ok(),
                Statement::Check(check) => check.set(name, value.clone()).is_ok(),
                Statement::Policy(policy) => policy.set(name, value.clone()).is_ok(),
            };
            if substituted {
                used.insert(name);
            }
        }
        for (name, key) in scope_parameters {
            let substituted = match statement {
                Statement::Fact(_) => false,
                Statement::Rule(rule) => rule.set_scope(name, key).is_ok(),
                Statement::Check(check) => check.set_scope(name, key).is_ok(),
                Statement::Policy(policy) => policy.set_scope(name, key).is_ok(),
            };
            if substituted {
                used.insert(name);
            }
        }
    }
    for name in parameters.keys().chain(scope_parameters.keys()) {
        if !used.contains(name.as_str()) {
            return Err(TokenError::UnknownParameter(name.clone()));
        }
    }
    Ok(())
}

/// Collects the contents of one block before signing.
#[derive(Debug, Clone)]
pub struct BlockBuilder {
    inner: Option<BlockInner>,
}

impl Default for BlockBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockBuilder {
    pub fn new() -> Self {
        Self {
            inner: Some(BlockInner::default()),
        }
    }

    fn inner_mut(&mut self) -> Result<&mut BlockInner> {
        self.inner.as_mut().ok_or(TokenError::AlreadyConsumed)
    }

    fn inner_ref(&self) -> Result<&BlockInner> {
        self.inner.as_ref().ok_or(TokenError::AlreadyConsumed)
    }

    /// Add a ground, fully substituted fact.
    pub fn add_fact(&mut self, fact: Fact) -> Result<()> {
        fact.validate()?;
        self.inner_mut()?.facts.push(fact);
        Ok(())
    }

    /// Add a validated rule.
    pub fn add_rule(&mut self, rule: Rule) -> Result<()> {
        rule.validate()?;
        self.inner_mut()?.rules.push(rule);
        Ok(())
    }

    /// Add a validated check.
    pub fn add_check(&mut self, check: Check) -> Result<()> {
        check.validate()?;
        for query in &check.queries {
            query.validate()?;
        }
        self.inner_mut()?.checks.push(check);
        Ok(())
    }

    /// Parse a source string and add every statement in it. Policies
    /// are only meaningful on an authorizer and are rejected here.
    pub fn add_code(&mut self, source: &str) -> Result<()> {
        self.add_code_with_params(source, &HashMap::new(), &HashMap::new())
    }

    /// Like [`add_code`](Self::add_code), substituting `{name}` term
    /// and scope parameters before validation.
    ///
    /// Statements are committed all-or-nothing: if any statement fails
    /// to validate, the builder keeps its previous contents.
    pub fn add_code_with_params(
        &mut self,
        source: &str,
        parameters: &HashMap<String, Term>,
        scope_parameters: &HashMap<String, PublicKey>,
    ) -> Result<()> {
        let mut statements = parse_source(source)?;
        apply_parameters(&mut statements, parameters, scope_parameters)?;
        let mut staged = BlockInner::default();
        for statement in statements {
            match statement {
                Statement::Fact(fact) => {
                    fact.validate()?;
                    staged.facts.push(fact);
                }
                Statement::Rule(rule) => {
                    rule.validate()?;
                    staged.rules.push(rule);
                }
                Statement::Check(check) => {
                    check.validate()?;
                    for query in &check.queries {
                        query.validate()?;
                    }
                    staged.checks.push(check);
                }
                Statement::Policy(_) => {
                    return Err(TokenError::InvalidRule(
                        "policies can only be added to an authorizer".into(),
                    ))
                }
            }
        }
        let inner = self.inner_mut()?;
        inner.facts.extend(staged.facts);
        inner.rules.extend(staged.rules);
        inner.checks.extend(staged.checks);
        Ok(())
    }

    /// Attach free-form metadata to the block.
    pub fn set_context(&mut self, context: impl Into<String>) -> Result<()> {
        self.inner_mut()?.context = Some(context.into());
        Ok(())
    }

    /// Move another builder's statements into this one, consuming it.
    pub fn merge(&mut self, other: &mut BlockBuilder) -> Result<()> {
        let taken = other.inner.take().ok_or(TokenError::AlreadyConsumed)?;
        let inner = self.inner_mut()?;
        inner.facts.extend(taken.facts);
        inner.rules.extend(taken.rules);
        inner.checks.extend(taken.checks);
        if inner.context.is_none() {
            inner.context = taken.context;
        }
        Ok(())
    }

    /// Assemble the block. The builder stays usable afterwards.
    pub(crate) fn build_block(&self) -> Result<Block> {
        let inner = self.inner_ref()?;
        Ok(Block::new(
            inner.facts.clone(),
            inner.rules.clone(),
            inner.checks.clone(),
            inner.context.clone(),
        ))
    }

    pub(crate) fn take_parts(&mut self) -> Result<(Vec<Fact>, Vec<Rule>, Vec<Check>)> {
        let taken = self.inner.take().ok_or(TokenError::AlreadyConsumed)?;
        Ok((taken.facts, taken.rules, taken.checks))
    }
}

/// Builds a token's authority block and signs it with a root key.
#[derive(Debug, Clone, Default)]
pub struct TokenBuilder {
    authority: BlockBuilder,
    root_key_id: Option<u32>,
}

impl TokenBuilder {
    pub fn new() -> Self {
        Self {
            authority: BlockBuilder::new(),
            root_key_id: None,
        }
    }

    pub fn add_fact(&mut self, fact: Fact) -> Result<()> {
        self.authority.add_fact(fact)
    }

    pub fn add_rule(&mut self, rule: Rule) -> Result<()> {
        self.authority.add_rule(rule)
    }

    pub fn add_check(&mut self, check: Check) -> Result<()> {
        self.authority.add_check(check)
    }

    pub fn add_code(&mut self, source: &str) -> Result<()> {
        self.authority.add_code(source)
    }

    pub fn add_code_with_params(
        &mut self,
        source: &str,
        parameters: &HashMap<String, Term>,
        scope_parameters: &HashMap<String, PublicKey>,
    ) -> Result<()> {
        self.authority
            .add_code_with_params(source, parameters, scope_parameters)
    }

    pub fn set_context(&mut self, context: impl Into<String>) -> Result<()> {
        self.authority.set_context(context)
    }

    /// Record a cleartext hint naming which root key signs this token.
    pub fn set_root_key_id(&mut self, id: u32) {
        self.root_key_id = Some(id);
    }

    pub fn merge(&mut self, other: &mut BlockBuilder) -> Result<()> {
        self.authority.merge(other)
    }

    /// Sign the authority block and mint the token.
    pub fn build(&self, root: &PrivateKey) -> Result<Token> {
        Token::mint(root, self.root_key_id, self.authority.build_block()?)
    }
}
