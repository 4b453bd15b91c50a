//! Fixpoint evaluation.
//!
//! The world holds every fact visible to the authorizer, tagged with the
//! origin blocks that produced it, plus every rule in scope. Running the
//! world repeatedly applies all rules until no new fact is derived or a
//! resource budget is exceeded. Scope enforcement happens at read time:
//! a rule only joins over facts whose origin set is covered by the
//! rule's trusted origins, so later blocks can narrow but never widen
//! what earlier blocks authorize.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::time::{Duration, Instant};

use log::trace;
use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;
use crate::error::{Result, RunLimitError};

use super::predicate::{Fact, Predicate};
use super::rule::Rule;
use super::scope::Scope;
use super::term::Term;

/// Pseudo block id for facts and rules added directly to the authorizer.
pub const AUTHORIZER_BLOCK_ID: usize = usize::MAX;

/// The set of block ids that contributed to a fact.
///
/// A fact loaded from block `i` has origin `{i}`; a fact derived by a
/// rule carries the union of the origins of every fact it matched, plus
/// the id of the block declaring the rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Origin(BTreeSet<usize>);

impl Origin {
    /// Origin of a fact introduced by a single block.
    pub fn single(block_id: usize) -> Self {
        let mut set = BTreeSet::new();
        set.insert(block_id);
        Self(set)
    }

    /// Origin of an authorizer-local fact.
    pub fn authorizer() -> Self {
        Self::single(AUTHORIZER_BLOCK_ID)
    }

    pub fn insert(&mut self, block_id: usize) {
        self.0.insert(block_id);
    }

    pub fn union(&self, other: &Origin) -> Origin {
        Origin(self.0.union(&other.0).copied().collect())
    }

    pub fn block_ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.0.iter().copied()
    }
}

/// The block ids a rule, check or policy query may read facts from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrustedOrigins(BTreeSet<usize>);

impl TrustedOrigins {
    /// Compute trusted origins for a query declared in `current_block`.
    ///
    /// With no scope declared the default applies: the authority block,
    /// the declaring block, and the authorizer.
    pub fn from_scopes(
        scopes: &[Scope],
        current_block: usize,
        block_count: usize,
        blocks_by_external_key: &HashMap<PublicKey, Vec<usize>>,
    ) -> Self {
        let mut ids = BTreeSet::new();
        ids.insert(current_block);
        ids.insert(AUTHORIZER_BLOCK_ID);
        if scopes.is_empty() {
            ids.insert(0);
        }
        for scope in scopes {
            match scope {
                Scope::Authority => {
                    ids.insert(0);
                }
                Scope::Previous => {
                    let last = if current_block == AUTHORIZER_BLOCK_ID {
                        block_count.saturating_sub(1)
                    } else {
                        current_block
                    };
                    for id in 0..=last {
                        ids.insert(id);
                    }
                }
                Scope::PublicKey(key) => {
                    if let Some(blocks) = blocks_by_external_key.get(key) {
                        ids.extend(blocks.iter().copied());
                    }
                }
                // Validated away before evaluation
                Scope::Parameter(_) => {}
            }
        }
        Self(ids)
    }

    /// True if every contributing block of `origin` is trusted.
    pub fn contains(&self, origin: &Origin) -> bool {
        origin.0.iter().all(|id| self.0.contains(id))
    }
}

/// All facts, indexed by origin. Set semantics: duplicate derivations
/// collapse.
#[derive(Debug, Clone, Default)]
pub struct FactSet {
    inner: HashMap<Origin, HashSet<Fact>>,
}

impl FactSet {
    /// Insert a fact; returns true if it was not already present.
    pub fn insert(&mut self, origin: Origin, fact: Fact) -> bool {
        self.inner.entry(origin).or_default().insert(fact)
    }

    /// Total number of facts.
    pub fn len(&self) -> usize {
        self.inner.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate facts whose origin is covered by `trusted`.
    pub fn iter_trusted<'a>(
        &'a self,
        trusted: &'a TrustedOrigins,
    ) -> impl Iterator<Item = (&'a Origin, &'a Fact)> {
        self.inner
            .iter()
            .filter(move |(origin, _)| trusted.contains(origin))
            .flat_map(|(origin, facts)| facts.iter().map(move |f| (origin, f)))
    }

    /// Iterate every fact with its origin.
    pub fn iter_all(&self) -> impl Iterator<Item = (&Origin, &Fact)> {
        self.inner
            .iter()
            .flat_map(|(origin, facts)| facts.iter().map(move |f| (origin, f)))
    }
}

/// Budgets bounding a single evaluation run.
///
/// Exceeding any bound aborts evaluation with a fatal error, distinct
/// from an authorization failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunLimits {
    pub max_facts: usize,
    pub max_iterations: usize,
    pub max_time: Duration,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_facts: 1000,
            max_iterations: 100,
            max_time: Duration::from_millis(1),
        }
    }
}

/// Try to match a single fact against a body predicate, extending the
/// given bindings. Returns the extended bindings on success.
fn match_predicate(
    pattern: &Predicate,
    fact: &Predicate,
    bindings: &HashMap<String, Term>,
) -> Option<HashMap<String, Term>> {
    if pattern.name != fact.name || pattern.terms.len() != fact.terms.len() {
        return None;
    }
    let mut extended = bindings.clone();
    for (pattern_term, fact_term) in pattern.terms.iter().zip(&fact.terms) {
        match pattern_term {
            Term::Variable(name) => match extended.get(name) {
                Some(bound) if bound != fact_term => return None,
                Some(_) => {}
                None => {
                    extended.insert(name.clone(), fact_term.clone());
                }
            },
            // Parameters never reach evaluation
            Term::Parameter(_) => return None,
            literal => {
                if literal != fact_term {
                    return None;
                }
            }
        }
    }
    Some(extended)
}

/// One satisfying assignment for a rule body.
#[derive(Debug, Clone)]
struct Match {
    bindings: HashMap<String, Term>,
    origin: Origin,
}

/// All bindings satisfying a rule's body predicates and expressions
/// against the trusted subset of `facts`.
fn rule_bindings(rule: &Rule, facts: &FactSet, trusted: &TrustedOrigins) -> Vec<Match> {
    let mut matches = vec![Match {
        bindings: HashMap::new(),
        origin: Origin::default(),
    }];

    for pattern in &rule.body {
        let mut next = Vec::new();
        for m in &matches {
            for (origin, fact) in facts.iter_trusted(trusted) {
                if let Some(bindings) = match_predicate(pattern, &fact.predicate, &m.bindings) {
                    next.push(Match {
                        bindings,
                        origin: m.origin.union(origin),
                    });
                }
            }
        }
        matches = next;
        if matches.is_empty() {
            return matches;
        }
    }

    matches.retain(|m| {
        rule.expressions.iter().all(|expr| {
            match expr.evaluate(&m.bindings) {
                Ok(Term::Bool(true)) => true,
                // A non-boolean result or evaluation error rejects the
                // binding; it is never fatal.
                Ok(_) => false,
                Err(e) => {
                    trace!("expression rejected binding: {e}");
                    false
                }
            }
        })
    });
    matches
}

/// Ground a rule head under a binding. None if any head variable ends
/// up unbound (the rule validator prevents this for block rules).
fn ground_head(head: &Predicate, bindings: &HashMap<String, Term>) -> Option<Fact> {
    let mut terms = Vec::with_capacity(head.terms.len());
    for term in &head.terms {
        match term {
            Term::Variable(name) => terms.push(bindings.get(name)?.clone()),
            Term::Parameter(_) => return None,
            literal => terms.push(literal.clone()),
        }
    }
    Some(Fact::new(head.name.clone(), terms))
}

/// The fact/rule universe for one evaluation.
#[derive(Debug, Clone, Default)]
pub struct World {
    facts: FactSet,
    rules: Vec<(usize, Rule)>,
    blocks_by_external_key: HashMap<PublicKey, Vec<usize>>,
    block_count: usize,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_fact(&mut self, origin: Origin, fact: Fact) {
        self.facts.insert(origin, fact);
    }

    pub fn add_rule(&mut self, block_id: usize, rule: Rule) {
        self.rules.push((block_id, rule));
    }

    /// Record that `block_id` was signed by an external key, making its
    /// facts visible to queries scoped to that key.
    pub fn register_external_key(&mut self, key: PublicKey, block_id: usize) {
        self.blocks_by_external_key
            .entry(key)
            .or_default()
            .push(block_id);
    }

    pub fn set_block_count(&mut self, count: usize) {
        self.block_count = count;
    }

    pub fn facts(&self) -> &FactSet {
        &self.facts
    }

    pub fn trusted_origins(&self, scopes: &[Scope], current_block: usize) -> TrustedOrigins {
        TrustedOrigins::from_scopes(
            scopes,
            current_block,
            self.block_count,
            &self.blocks_by_external_key,
        )
    }

    /// Run rule application to fixpoint, within the given budgets.
    pub fn run(&mut self, limits: &RunLimits) -> Result<()> {
        let start = Instant::now();
        for iteration in 0..limits.max_iterations {
            let mut derived: Vec<(Origin, Fact)> = Vec::new();
            for (block_id, rule) in &self.rules {
                let trusted = self.trusted_origins(&rule.scopes, *block_id);
                for m in rule_bindings(rule, &self.facts, &trusted) {
                    if let Some(fact) = ground_head(&rule.head, &m.bindings) {
                        let mut origin = m.origin;
                        origin.insert(*block_id);
                        derived.push((origin, fact));
                    }
                }
                if start.elapsed() > limits.max_time {
                    return Err(RunLimitError::Timeout.into());
                }
            }

            let mut added = false;
            for (origin, fact) in derived {
                added |= self.facts.insert(origin, fact);
            }
            if self.facts.len() > limits.max_facts {
                return Err(RunLimitError::TooManyFacts.into());
            }
            if !added {
                trace!("fixpoint reached after {} iteration(s)", iteration + 1);
                return Ok(());
            }
        }
        Err(RunLimitError::TooManyIterations.into())
    }

    /// True if the query's body has at least one satisfying binding.
    pub fn query_match(&self, query: &Rule, block_id: usize) -> bool {
        let trusted = self.trusted_origins(&query.scopes, block_id);
        !rule_bindings(query, &self.facts, &trusted).is_empty()
    }

    /// All facts produced by applying `rule` once against the current
    /// fact set. Does not modify the world.
    pub fn query_rule(&self, rule: &Rule, block_id: usize) -> Vec<Fact> {
        let trusted = self.trusted_origins(&rule.scopes, block_id);
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for m in rule_bindings(rule, &self.facts, &trusted) {
            if let Some(fact) = ground_head(&rule.head, &m.bindings) {
                if seen.insert(fact.clone()) {
                    out.push(fact);
                }
            }
        }
        out
    }

    /// Human-readable listing of all facts and rules, for diagnostics.
    pub fn dump(&self) -> String {
        let mut facts: Vec<String> = self.facts.iter_all().map(|(_, f)| f.to_string()).collect();
        facts.sort();
        let mut out = String::from("facts:\n");
        for fact in facts {
            out.push_str("  ");
            out.push_str(&fact);
            out.push('\n');
        }
        out.push_str("rules:\n");
        for (block_id, rule) in &self.rules {
            if *block_id == AUTHORIZER_BLOCK_ID {
                out.push_str(&format!("  [authorizer] {rule}\n"));
            } else {
                out.push_str(&format!("  [block {block_id}] {rule}\n"));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datalog::expression::{BinaryOp, Expression};
    use crate::error::TokenError;

    fn fact(name: &str, args: &[&str]) -> Fact {
        Fact::new(
            name,
            args.iter().map(|a| Term::Str(a.to_string())).collect(),
        )
    }

    fn var(name: &str) -> Term {
        Term::Variable(name.to_string())
    }

    #[test]
    fn test_simple_derivation() {
        let mut world = World::new();
        world.set_block_count(1);
        world.add_fact(Origin::single(0), fact("user", &["alice"]));
        world.add_rule(
            0,
            Rule::new(
                Predicate::new("member", vec![var("u")]),
                vec![Predicate::new("user", vec![var("u")])],
                vec![],
                vec![],
            ),
        );
        world.run(&RunLimits::default()).unwrap();

        let query = Rule::new(
            Predicate::new("member", vec![var("u")]),
            vec![Predicate::new("member", vec![var("u")])],
            vec![],
            vec![],
        );
        let results = world.query_rule(&query, AUTHORIZER_BLOCK_ID);
        assert_eq!(results, vec![fact("member", &["alice"])]);
    }

    #[test]
    fn test_transitive_closure() {
        let mut world = World::new();
        world.set_block_count(1);
        for (a, b) in [("a", "b"), ("b", "c"), ("c", "d")] {
            world.add_fact(Origin::single(0), fact("parent", &[a, b]));
        }
        // ancestor($x, $y) <- parent($x, $y)
        world.add_rule(
            0,
            Rule::new(
                Predicate::new("ancestor", vec![var("x"), var("y")]),
                vec![Predicate::new("parent", vec![var("x"), var("y")])],
                vec![],
                vec![],
            ),
        );
        // ancestor($x, $z) <- ancestor($x, $y), ancestor($y, $z)
        world.add_rule(
            0,
            Rule::new(
                Predicate::new("ancestor", vec![var("x"), var("z")]),
                vec![
                    Predicate::new("ancestor", vec![var("x"), var("y")]),
                    Predicate::new("ancestor", vec![var("y"), var("z")]),
                ],
                vec![],
                vec![],
            ),
        );
        world.run(&RunLimits::default()).unwrap();

        let query = Rule::new(
            Predicate::new("ancestor", vec![Term::Str("a".into()), var("y")]),
            vec![Predicate::new(
                "ancestor",
                vec![Term::Str("a".into()), var("y")],
            )],
            vec![],
            vec![],
        );
        let results = world.query_rule(&query, AUTHORIZER_BLOCK_ID);
        assert_eq!(results.len(), 3); // b, c, d
    }

    #[test]
    fn test_expression_filters_bindings() {
        let mut world = World::new();
        world.set_block_count(1);
        world.add_fact(
            Origin::single(0),
            Fact::new("age", vec![Term::Str("alice".into()), Term::Integer(25)]),
        );
        world.add_fact(
            Origin::single(0),
            Fact::new("age", vec![Term::Str("bob".into()), Term::Integer(12)]),
        );
        world.add_rule(
            0,
            Rule::new(
                Predicate::new("adult", vec![var("name")]),
                vec![Predicate::new("age", vec![var("name"), var("age")])],
                vec![Expression::Binary(
                    BinaryOp::GreaterOrEqual,
                    Box::new(Expression::Value(var("age"))),
                    Box::new(Expression::Value(Term::Integer(18))),
                )],
                vec![],
            ),
        );
        world.run(&RunLimits::default()).unwrap();

        let query = Rule::new(
            Predicate::new("adult", vec![var("n")]),
            vec![Predicate::new("adult", vec![var("n")])],
            vec![],
            vec![],
        );
        assert_eq!(
            world.query_rule(&query, AUTHORIZER_BLOCK_ID),
            vec![Fact::new("adult", vec![Term::Str("alice".into())])]
        );
    }

    #[test]
    fn test_default_scope_hides_later_blocks() {
        let mut world = World::new();
        world.set_block_count(2);
        world.add_fact(Origin::single(1), fact("evil", &["fact"]));
        // Rule declared in the authority block must not see block 1 facts.
        let query = Rule::new(
            Predicate::new("query", vec![]),
            vec![Predicate::new("evil", vec![var("x")])],
            vec![],
            vec![],
        );
        assert!(!world.query_match(&query, 0));
        // The block that declared the fact sees it.
        assert!(world.query_match(&query, 1));
        // An authorizer query trusting previous sees it too.
        let trusting_previous = Rule::new(
            Predicate::new("query", vec![]),
            vec![Predicate::new("evil", vec![var("x")])],
            vec![],
            vec![Scope::Previous],
        );
        assert!(world.query_match(&trusting_previous, AUTHORIZER_BLOCK_ID));
    }

    #[test]
    fn test_external_key_scope() {
        let external = crate::crypto::KeyPair::new();
        let mut world = World::new();
        world.set_block_count(2);
        world.register_external_key(external.public().clone(), 1);
        world.add_fact(Origin::single(1), fact("external", &["fact"]));

        let scoped = Rule::new(
            Predicate::new("query", vec![]),
            vec![Predicate::new("external", vec![var("x")])],
            vec![],
            vec![Scope::PublicKey(external.public().clone())],
        );
        assert!(world.query_match(&scoped, AUTHORIZER_BLOCK_ID));

        let authority_only = Rule::new(
            Predicate::new("query", vec![]),
            vec![Predicate::new("external", vec![var("x")])],
            vec![],
            vec![Scope::Authority],
        );
        assert!(!world.query_match(&authority_only, AUTHORIZER_BLOCK_ID));
    }

    #[test]
    fn test_derived_origin_tracks_sources() {
        let mut world = World::new();
        world.set_block_count(2);
        world.add_fact(Origin::single(0), fact("a", &["x"]));
        // Block 1 rule reading its own block and authority.
        world.add_rule(
            1,
            Rule::new(
                Predicate::new("b", vec![var("v")]),
                vec![Predicate::new("a", vec![var("v")])],
                vec![],
                vec![],
            ),
        );
        world.run(&RunLimits::default()).unwrap();

        // The derived fact has origin {0, 1}: invisible to a query that
        // only trusts the authority block.
        let query = Rule::new(
            Predicate::new("query", vec![]),
            vec![Predicate::new("b", vec![var("v")])],
            vec![],
            vec![],
        );
        assert!(!world.query_match(&query, 0));
        assert!(world.query_match(&query, 1));
    }

    #[test]
    fn test_fact_budget_exceeded() {
        // 40 facts joined pairwise derive 1600 pairs, well past the budget.
        let mut world = World::new();
        world.set_block_count(1);
        for i in 0..40 {
            world.add_fact(Origin::single(0), Fact::new("n", vec![Term::Integer(i)]));
        }
        world.add_rule(
            0,
            Rule::new(
                Predicate::new("pair", vec![var("x"), var("y")]),
                vec![
                    Predicate::new("n", vec![var("x")]),
                    Predicate::new("n", vec![var("y")]),
                ],
                vec![],
                vec![],
            ),
        );
        let limits = RunLimits {
            max_facts: 100,
            max_iterations: 100,
            max_time: Duration::from_secs(10),
        };
        match world.run(&limits) {
            Err(TokenError::RunLimit(RunLimitError::TooManyFacts)) => {}
            other => panic!("expected TooManyFacts, got {other:?}"),
        }
    }

    #[test]
    fn test_iteration_budget_exceeded() {
        // Transitive closure over a 20-edge chain grows paths one hop
        // per iteration, so 5 iterations cannot reach fixpoint.
        let mut world = World::new();
        world.set_block_count(1);
        for i in 0..20 {
            world.add_fact(
                Origin::single(0),
                Fact::new("edge", vec![Term::Integer(i), Term::Integer(i + 1)]),
            );
        }
        world.add_rule(
            0,
            Rule::new(
                Predicate::new("path", vec![var("x"), var("y")]),
                vec![Predicate::new("edge", vec![var("x"), var("y")])],
                vec![],
                vec![],
            ),
        );
        world.add_rule(
            0,
            Rule::new(
                Predicate::new("path", vec![var("x"), var("z")]),
                vec![
                    Predicate::new("path", vec![var("x"), var("y")]),
                    Predicate::new("edge", vec![var("y"), var("z")]),
                ],
                vec![],
                vec![],
            ),
        );
        let limits = RunLimits {
            max_facts: 100_000,
            max_iterations: 5,
            max_time: Duration::from_secs(10),
        };
        match world.run(&limits) {
            Err(TokenError::RunLimit(RunLimitError::TooManyIterations)) => {}
            other => panic!("expected TooManyIterations, got {other:?}"),
        }
    }

    #[test]
    fn test_time_budget_exceeded() {
        let mut world = World::new();
        world.set_block_count(1);
        for i in 0..30 {
            world.add_fact(Origin::single(0), Fact::new("n", vec![Term::Integer(i)]));
        }
        world.add_rule(
            0,
            Rule::new(
                Predicate::new("pair", vec![var("x"), var("y")]),
                vec![
                    Predicate::new("n", vec![var("x")]),
                    Predicate::new("n", vec![var("y")]),
                ],
                vec![],
                vec![],
            ),
        );
        let limits = RunLimits {
            max_facts: 100_000,
            max_iterations: 100,
            max_time: Duration::ZERO,
        };
        match world.run(&limits) {
            Err(TokenError::RunLimit(RunLimitError::Timeout)) => {}
            other => panic!("expected Timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_query_with_no_body_predicates() {
        let world = World::new();
        let always = Rule::new(
            Predicate::new("query", vec![]),
            vec![],
            vec![Expression::Value(Term::Bool(true))],
            vec![],
        );
        assert!(world.query_match(&always, AUTHORIZER_BLOCK_ID));

        let never = Rule::new(
            Predicate::new("query", vec![]),
            vec![],
            vec![Expression::Value(Term::Bool(false))],
            vec![],
        );
        assert!(!world.query_match(&never, AUTHORIZER_BLOCK_ID));
    }
}
