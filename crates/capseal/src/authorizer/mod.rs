//! Authorization: evaluates a token's blocks together with
//! authorizer-side facts, rules, checks and policies.
//!
//! Every check in every block and on the authorizer must pass, and the
//! first matching policy (in declaration order) decides the outcome.
//! Failing checks are all collected before the verdict is returned, so
//! callers can report everything that refused the request.

pub mod snapshot;

use log::debug;

use crate::datalog::{
    Check, Fact, Origin, Policy, PolicyKind, Rule, RunLimits, World, AUTHORIZER_BLOCK_ID,
};
use crate::error::{FailedCheck, FailedLogic, MatchedPolicy, Result};
use crate::token::block::Block;

use snapshot::AuthorizerSnapshot;

/// Authorizer-side inputs, kept apart from token blocks so snapshots
/// can reproduce them.
#[derive(Debug, Clone, Default)]
pub(crate) struct AuthorizerData {
    pub facts: Vec<Fact>,
    pub rules: Vec<Rule>,
    pub checks: Vec<Check>,
    pub policies: Vec<Policy>,
    pub limits: RunLimits,
}

/// A fully loaded authorization context, ready to evaluate.
#[derive(Debug, Clone)]
pub struct Authorizer {
    blocks: Vec<Block>,
    data: AuthorizerData,
    world: World,
    evaluated: bool,
}

impl Authorizer {
    pub(crate) fn from_parts(blocks: Vec<Block>, data: AuthorizerData) -> Authorizer {
        let mut world = World::new();
        world.set_block_count(blocks.len());
        for (i, block) in blocks.iter().enumerate() {
            if let Some(key) = &block.external_key {
                world.register_external_key(key.clone(), i);
            }
            for fact in &block.facts {
                world.add_fact(Origin::single(i), fact.clone());
            }
            for rule in &block.rules {
                world.add_rule(i, rule.clone());
            }
        }
        for fact in &data.facts {
            world.add_fact(Origin::authorizer(), fact.clone());
        }
        for rule in &data.rules {
            world.add_rule(AUTHORIZER_BLOCK_ID, rule.clone());
        }
        Authorizer {
            blocks,
            data,
            world,
            evaluated: false,
        }
    }

    fn run_world(&mut self) -> Result<()> {
        if !self.evaluated {
            self.world.run(&self.data.limits)?;
            self.evaluated = true;
        }
        Ok(())
    }

    /// Evaluate all checks and policies.
    ///
    /// Returns the index of the allow policy that matched. Any failing
    /// check, a matching deny policy, or no matching policy at all is
    /// an error.
    pub fn authorize(&mut self) -> Result<usize> {
        self.run_world()?;

        let mut failed = Vec::new();
        for (block_id, block) in self.blocks.iter().enumerate() {
            for (check_id, check) in block.checks.iter().enumerate() {
                let passed = check
                    .queries
                    .iter()
                    .any(|query| self.world.query_match(query, block_id));
                if !passed {
                    failed.push(FailedCheck::Block {
                        block_id,
                        check_id,
                        rule: check.to_string(),
                    });
                }
            }
        }
        for (check_id, check) in self.data.checks.iter().enumerate() {
            let passed = check
                .queries
                .iter()
                .any(|query| self.world.query_match(query, AUTHORIZER_BLOCK_ID));
            if !passed {
                failed.push(FailedCheck::Authorizer {
                    check_id,
                    rule: check.to_string(),
                });
            }
        }

        let mut matched = MatchedPolicy::None;
        for (i, policy) in self.data.policies.iter().enumerate() {
            let hit = policy
                .queries
                .iter()
                .any(|query| self.world.query_match(query, AUTHORIZER_BLOCK_ID));
            if hit {
                matched = match policy.kind {
                    PolicyKind::Allow => MatchedPolicy::Allow(i),
                    PolicyKind::Deny => MatchedPolicy::Deny(i),
                };
                break;
            }
        }

        if !failed.is_empty() {
            debug!("authorization refused: {} failing check(s)", failed.len());
            return Err(FailedLogic::Unauthorized {
                policy: matched,
                checks: failed,
            }
            .into());
        }
        match matched {
            MatchedPolicy::Allow(i) => {
                debug!("authorization granted by policy {i}");
                Ok(i)
            }
            MatchedPolicy::Deny(i) => Err(FailedLogic::Denied(i).into()),
            MatchedPolicy::None => Err(FailedLogic::NoMatchingPolicy.into()),
        }
    }

    /// Run a query rule against the evaluated world and collect the
    /// facts it produces. The query runs with authorizer trust, so its
    /// scopes decide which blocks it reads.
    pub fn query(&mut self, rule: &Rule) -> Result<Vec<Fact>> {
        rule.validate()?;
        self.run_world()?;
        Ok(self.world.query_rule(rule, AUTHORIZER_BLOCK_ID))
    }

    /// The evaluation budget in force.
    pub fn limits(&self) -> &RunLimits {
        &self.data.limits
    }

    /// Capture the authorizer's inputs for later replay or audit.
    pub fn snapshot(&self) -> AuthorizerSnapshot {
        AuthorizerSnapshot {
            blocks: self.blocks.clone(),
            facts: self.data.facts.clone(),
            rules: self.data.rules.clone(),
            checks: self.data.checks.clone(),
            policies: self.data.policies.clone(),
            limits: self.data.limits.clone(),
        }
    }

    /// Rebuild an authorizer from a snapshot. No signature material is
    /// involved; the snapshot is trusted as recorded.
    pub fn from_snapshot(snapshot: AuthorizerSnapshot) -> Authorizer {
        Authorizer::from_parts(
            snapshot.blocks,
            AuthorizerData {
                facts: snapshot.facts,
                rules: snapshot.rules,
                checks: snapshot.checks,
                policies: snapshot.policies,
                limits: snapshot.limits,
            },
        )
    }

    /// Human-readable listing of the full evaluation context.
    pub fn print_world(&self) -> String {
        let mut out = self.world.dump();
        out.push_str("checks:\n");
        for (block_id, block) in self.blocks.iter().enumerate() {
            for check in &block.checks {
                out.push_str(&format!("  [block {block_id}] {check}\n"));
            }
        }
        for check in &self.data.checks {
            out.push_str(&format!("  [authorizer] {check}\n"));
        }
        out.push_str("policies:\n");
        for policy in &self.data.policies {
            out.push_str(&format!("  {policy}\n"));
        }
        out
    }
}

impl std::fmt::Display for Authorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.print_world())
    }
}
