//! Builder for authorization contexts.

use std::collections::HashMap;

use crate::authorizer::snapshot::AuthorizerSnapshot;
use crate::authorizer::{Authorizer, AuthorizerData};
use crate::crypto::PublicKey;
use crate::datalog::{Check, Fact, Policy, Rule, RunLimits, Term};
use crate::error::{Result, TokenError};
use crate::time::now_secs;
use crate::token::Token;

use super::parser::{parse_source, Statement};
use super::{apply_parameters, BlockBuilder};

#[derive(Debug, Clone, Default)]
struct AuthorizerInner {
    facts: Vec<Fact>,
    rules: Vec<Rule>,
    checks: Vec<Check>,
    policies: Vec<Policy>,
    limits: RunLimits,
    use_time: bool,
}

/// Collects authorizer-side facts, rules, checks and policies, then
/// builds an [`Authorizer`] over a verified token.
#[derive(Debug, Clone)]
pub struct AuthorizerBuilder {
    inner: Option<AuthorizerInner>,
}

impl Default for AuthorizerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthorizerBuilder {
    pub fn new() -> Self {
        Self {
            inner: Some(AuthorizerInner::default()),
        }
    }

    fn inner_mut(&mut self) -> Result<&mut AuthorizerInner> {
        self.inner.as_mut().ok_or(TokenError::AlreadyConsumed)
    }

    fn inner_ref(&self) -> Result<&AuthorizerInner> {
        self.inner.as_ref().ok_or(TokenError::AlreadyConsumed)
    }

    pub fn add_fact(&mut self, fact: Fact) -> Result<()> {
        fact.validate()?;
        self.inner_mut()?.facts.push(fact);
        Ok(())
    }

    pub fn add_rule(&mut self, rule: Rule) -> Result<()> {
        rule.validate()?;
        self.inner_mut()?.rules.push(rule);
        Ok(())
    }

    pub fn add_check(&mut self, check: Check) -> Result<()> {
        check.validate()?;
        for query in &check.queries {
            query.validate()?;
        }
        self.inner_mut()?.checks.push(check);
        Ok(())
    }

    /// Policies are matched in the order they were added.
    pub fn add_policy(&mut self, policy: Policy) -> Result<()> {
        policy.validate()?;
        for query in &policy.queries {
            query.validate()?;
        }
        self.inner_mut()?.policies.push(policy);
        Ok(())
    }

    /// Parse a source string and add every statement, policies
    /// included.
    pub fn add_code(&mut self, source: &str) -> Result<()> {
        self.add_code_with_params(source, &HashMap::new(), &HashMap::new())
    }

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
        let mut staged = AuthorizerInner::default();
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
                Statement::Policy(policy) => {
                    policy.validate()?;
                    for query in &policy.queries {
                        query.validate()?;
                    }
                    staged.policies.push(policy);
                }
            }
        }
        let inner = self.inner_mut()?;
        inner.facts.extend(staged.facts);
        inner.rules.extend(staged.rules);
        inner.checks.extend(staged.checks);
        inner.policies.extend(staged.policies);
        Ok(())
    }

    /// Add a `time(<now>)` fact when the authorizer is built, sampled
    /// once so every check sees the same instant.
    pub fn set_time(&mut self) -> Result<()> {
        self.inner_mut()?.use_time = true;
        Ok(())
    }

    /// Override the evaluation budget.
    pub fn set_limits(&mut self, limits: RunLimits) -> Result<()> {
        self.inner_mut()?.limits = limits;
        Ok(())
    }

    /// Move another authorizer builder's contents into this one,
    /// consuming it.
    pub fn merge(&mut self, other: &mut AuthorizerBuilder) -> Result<()> {
        let taken = other.inner.take().ok_or(TokenError::AlreadyConsumed)?;
        let inner = self.inner_mut()?;
        inner.facts.extend(taken.facts);
        inner.rules.extend(taken.rules);
        inner.checks.extend(taken.checks);
        inner.policies.extend(taken.policies);
        inner.use_time |= taken.use_time;
        Ok(())
    }

    /// Move a block builder's statements into the authorizer,
    /// consuming it. The statements evaluate with authorizer trust.
    pub fn merge_block(&mut self, other: &mut BlockBuilder) -> Result<()> {
        let (facts, rules, checks) = other.take_parts()?;
        let inner = self.inner_mut()?;
        inner.facts.extend(facts);
        inner.rules.extend(rules);
        inner.checks.extend(checks);
        Ok(())
    }

    fn data(&self) -> Result<AuthorizerData> {
        let inner = self.inner_ref()?;
        let mut facts = inner.facts.clone();
        if inner.use_time {
            facts.push(Fact::new("time", vec![Term::Date(now_secs())]));
        }
        Ok(AuthorizerData {
            facts,
            rules: inner.rules.clone(),
            checks: inner.checks.clone(),
            policies: inner.policies.clone(),
            limits: inner.limits.clone(),
        })
    }

    /// Record the builder's current contents as a snapshot. The
    /// snapshot carries no token blocks; those are only attached by
    /// [`build`](Self::build).
    pub fn snapshot(&self) -> Result<AuthorizerSnapshot> {
        let data = self.data()?;
        Ok(AuthorizerSnapshot {
            blocks: Vec::new(),
            facts: data.facts,
            rules: data.rules,
            checks: data.checks,
            policies: data.policies,
            limits: data.limits,
        })
    }

    /// Restore a builder from a snapshot taken with
    /// [`snapshot`](Self::snapshot).
    ///
    /// Snapshots recorded from an authorizer with token blocks attached
    /// are replayed with [`Authorizer::from_snapshot`] instead.
    pub fn from_snapshot(snapshot: AuthorizerSnapshot) -> Result<Self> {
        if !snapshot.blocks.is_empty() {
            return Err(TokenError::Format(
                "snapshot carries token blocks and cannot restore a builder".into(),
            ));
        }
        Ok(Self {
            inner: Some(AuthorizerInner {
                facts: snapshot.facts,
                rules: snapshot.rules,
                checks: snapshot.checks,
                policies: snapshot.policies,
                limits: snapshot.limits,
                use_time: false,
            }),
        })
    }

    /// Build an authorizer over a verified token. The builder stays
    /// usable afterwards.
    pub fn build(&self, token: &Token) -> Result<Authorizer> {
        Ok(Authorizer::from_parts(
            token.parsed_blocks().to_vec(),
            self.data()?,
        ))
    }

    /// Build an authorizer with no token, evaluating authorizer-side
    /// statements only.
    pub fn build_unauthenticated(&self) -> Result<Authorizer> {
        Ok(Authorizer::from_parts(Vec::new(), self.data()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KeyPair;
    use crate::error::FailedLogic;

    fn sample_token() -> Token {
        let root = KeyPair::new();
        let mut builder = Token::builder();
        builder
            .add_code(r#"user("alice"); right("file1", "read");"#)
            .unwrap();
        builder.build(root.private()).unwrap()
    }

    #[test]
    fn test_authorize_token() {
        let token = sample_token();
        let mut builder = AuthorizerBuilder::new();
        builder
            .add_code(
                r#"
                resource("file1");
                operation("read");
                allow if right($res, $op), resource($res), operation($op);
                "#,
            )
            .unwrap();
        let mut authorizer = builder.build(&token).unwrap();
        assert_eq!(authorizer.authorize().unwrap(), 0);
    }

    #[test]
    fn test_unauthenticated_authorizer() {
        let mut builder = AuthorizerBuilder::new();
        builder
            .add_code(r#"user("admin"); allow if user("admin");"#)
            .unwrap();
        let mut authorizer = builder.build_unauthenticated().unwrap();
        assert!(authorizer.authorize().is_ok());
    }

    #[test]
    fn test_set_time_enables_expiry_checks() {
        let root = KeyPair::new();
        let mut token_builder = Token::builder();
        // Expired long ago
        token_builder
            .add_code(r#"check if time($t), $t <= 2000-01-01T00:00:00Z"#)
            .unwrap();
        let token = token_builder.build(root.private()).unwrap();

        let mut builder = AuthorizerBuilder::new();
        builder.set_time().unwrap();
        builder.add_code("allow if true").unwrap();
        let mut authorizer = builder.build(&token).unwrap();
        assert!(matches!(
            authorizer.authorize(),
            Err(TokenError::FailedLogic(FailedLogic::Unauthorized { .. }))
        ));
    }

    #[test]
    fn test_custom_limits_flow_through() {
        let limits = RunLimits {
            max_facts: 5,
            ..RunLimits::default()
        };
        let mut builder = AuthorizerBuilder::new();
        builder.set_limits(limits.clone()).unwrap();
        builder.add_code("allow if true").unwrap();
        let authorizer = builder.build_unauthenticated().unwrap();
        assert_eq!(authorizer.limits(), &limits);
    }

    #[test]
    fn test_merge_block_runs_with_authorizer_trust() {
        let token = sample_token();
        let mut block = BlockBuilder::new();
        block.add_code(r#"operation("read");"#).unwrap();
        let mut builder = AuthorizerBuilder::new();
        builder.merge_block(&mut block).unwrap();
        builder
            .add_code(r#"allow if right($r, $op), operation($op);"#)
            .unwrap();
        let mut authorizer = builder.build(&token).unwrap();
        assert!(authorizer.authorize().is_ok());
        assert!(matches!(
            block.add_code(r#"x("y")"#),
            Err(TokenError::AlreadyConsumed)
        ));
    }

    #[test]
    fn test_failed_add_code_leaves_builder_unchanged() {
        let mut builder = AuthorizerBuilder::new();
        builder.add_code(r#"resource("file1");"#).unwrap();
        assert!(matches!(
            builder.add_code(r#"operation("read"); q($x) <- p($y);"#),
            Err(TokenError::InvalidRule(_))
        ));
        let snapshot = builder.snapshot().unwrap();
        assert_eq!(snapshot.facts.len(), 1);
        assert_eq!(snapshot.facts[0].to_string(), "resource(\"file1\")");
        assert!(snapshot.rules.is_empty());
    }

    #[test]
    fn test_builder_snapshot_roundtrip() {
        let limits = RunLimits {
            max_iterations: 42,
            ..RunLimits::default()
        };
        let mut builder = AuthorizerBuilder::new();
        builder.set_limits(limits.clone()).unwrap();
        builder
            .add_code(
                r#"
                resource("file1");
                check if resource("file1");
                allow if true;
                "#,
            )
            .unwrap();

        let encoded = builder.snapshot().unwrap().to_base64().unwrap();
        let restored =
            AuthorizerBuilder::from_snapshot(AuthorizerSnapshot::from_base64(&encoded).unwrap())
                .unwrap();
        let mut authorizer = restored.build_unauthenticated().unwrap();
        assert_eq!(authorizer.limits(), &limits);
        assert_eq!(authorizer.authorize().unwrap(), 0);
    }

    #[test]
    fn test_builder_rejects_snapshot_with_token_blocks() {
        let token = sample_token();
        let authorizer = token.authorizer().unwrap();
        assert!(matches!(
            AuthorizerBuilder::from_snapshot(authorizer.snapshot()),
            Err(TokenError::Format(_))
        ));
    }

    #[test]
    fn test_builder_merge_consumes_source() {
        let mut left = AuthorizerBuilder::new();
        let mut right = AuthorizerBuilder::new();
        right.add_code("allow if true").unwrap();
        left.merge(&mut right).unwrap();
        assert!(right.add_code("deny if true").is_err());
        let mut authorizer = left.build_unauthenticated().unwrap();
        assert!(authorizer.authorize().is_ok());
    }
}
