//! A single token block: ordered datalog statements plus metadata.

use serde::{Deserialize, Serialize};

use crate::crypto::PublicKey;
use crate::datalog::{Check, Fact, Rule, SymbolTable};

/// Lowest schema version this implementation accepts.
pub const MIN_SCHEMA_VERSION: u32 = 3;
/// Version written for blocks using only baseline features.
pub const DEFAULT_SCHEMA_VERSION: u32 = 3;
/// Version written for blocks carrying an external key or scopes.
pub const THIRD_PARTY_SCHEMA_VERSION: u32 = 4;
/// Highest schema version this implementation accepts.
pub const MAX_SCHEMA_VERSION: u32 = 4;

/// The signed content of one block in a token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Strings interned by this block's statements.
    pub symbols: SymbolTable,
    pub facts: Vec<Fact>,
    pub rules: Vec<Rule>,
    pub checks: Vec<Check>,
    /// Free-form metadata, not interpreted by the engine.
    pub context: Option<String>,
    pub version: u32,
    /// Set only for third-party blocks: the key whose signature vouches
    /// for this block's contents, distinct from the chaining key.
    pub external_key: Option<PublicKey>,
}

impl Block {
    /// Assemble a block, interning symbols and stamping the schema
    /// version its features require.
    pub fn new(
        facts: Vec<Fact>,
        rules: Vec<Rule>,
        checks: Vec<Check>,
        context: Option<String>,
    ) -> Self {
        let mut symbols = SymbolTable::new();
        for fact in &facts {
            symbols.add_predicate(&fact.predicate);
        }
        for rule in &rules {
            symbols.add_rule(rule);
        }
        for check in &checks {
            symbols.add_check(check);
        }
        let mut block = Self {
            symbols,
            facts,
            rules,
            checks,
            context,
            version: DEFAULT_SCHEMA_VERSION,
            external_key: None,
        };
        block.version = block.required_version();
        block
    }

    /// The schema version this block's features require.
    pub fn required_version(&self) -> u32 {
        let has_scopes = self
            .rules
            .iter()
            .any(|r| !r.scopes.is_empty())
            || self
                .checks
                .iter()
                .any(|c| c.queries.iter().any(|q| !q.scopes.is_empty()));
        if self.external_key.is_some() || has_scopes {
            THIRD_PARTY_SCHEMA_VERSION
        } else {
            DEFAULT_SCHEMA_VERSION
        }
    }

    /// Render the block's statements as source text.
    pub fn print(&self) -> String {
        let mut out = String::new();
        for fact in &self.facts {
            out.push_str(&fact.to_string());
            out.push_str(";\n");
        }
        for rule in &self.rules {
            out.push_str(&rule.to_string());
            out.push_str(";\n");
        }
        for check in &self.checks {
            out.push_str(&check.to_string());
            out.push_str(";\n");
        }
        out
    }
}

impl std::fmt::Display for Block {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.print())
    }
}
