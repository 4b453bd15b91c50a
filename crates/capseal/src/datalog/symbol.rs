//! Per-block symbol tables.
//!
//! Each block interns the distinct strings its statements use:
//! predicate names, variable names and string terms. The table travels
//! with the block for diagnostics and is rebuilt when a block is loaded.

use serde::{Deserialize, Serialize};

use super::expression::Expression;
use super::predicate::Predicate;
use super::rule::{Check, Rule};
use super::term::Term;

/// An interned string table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolTable {
    symbols: Vec<String>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a string, returning its index.
    pub fn insert(&mut self, symbol: &str) -> u64 {
        if let Some(index) = self.get(symbol) {
            return index;
        }
        self.symbols.push(symbol.to_string());
        (self.symbols.len() - 1) as u64
    }

    /// Index of an already interned string.
    pub fn get(&self, symbol: &str) -> Option<u64> {
        self.symbols
            .iter()
            .position(|s| s == symbol)
            .map(|i| i as u64)
    }

    /// String at an index.
    pub fn lookup(&self, index: u64) -> Option<&str> {
        self.symbols.get(index as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.symbols.iter().map(String::as_str)
    }

    pub fn add_predicate(&mut self, predicate: &Predicate) {
        self.insert(&predicate.name);
        for term in &predicate.terms {
            self.add_term(term);
        }
    }

    pub fn add_term(&mut self, term: &Term) {
        match term {
            Term::Str(s) => {
                self.insert(s);
            }
            Term::Variable(v) => {
                self.insert(v);
            }
            Term::Set(items) => {
                for item in items {
                    self.add_term(item);
                }
            }
            _ => {}
        }
    }

    pub fn add_expression(&mut self, expression: &Expression) {
        match expression {
            Expression::Value(term) => self.add_term(term),
            Expression::Unary(_, inner) => self.add_expression(inner),
            Expression::Binary(_, lhs, rhs) => {
                self.add_expression(lhs);
                self.add_expression(rhs);
            }
        }
    }

    pub fn add_rule(&mut self, rule: &Rule) {
        self.add_predicate(&rule.head);
        for pred in &rule.body {
            self.add_predicate(pred);
        }
        for expr in &rule.expressions {
            self.add_expression(expr);
        }
    }

    pub fn add_check(&mut self, check: &Check) {
        for query in &check.queries {
            self.add_rule(query);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_dedup() {
        let mut table = SymbolTable::new();
        let a = table.insert("user");
        let b = table.insert("resource");
        let again = table.insert("user");
        assert_eq!(a, again);
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_lookup() {
        let mut table = SymbolTable::new();
        let index = table.insert("read");
        assert_eq!(table.lookup(index), Some("read"));
        assert_eq!(table.lookup(99), None);
    }

    #[test]
    fn test_add_predicate_interns_names_and_strings() {
        let mut table = SymbolTable::new();
        table.add_predicate(&Predicate::new(
            "right",
            vec![
                Term::Str("file1".into()),
                Term::Variable("op".into()),
                Term::Integer(1),
            ],
        ));
        assert!(table.get("right").is_some());
        assert!(table.get("file1").is_some());
        assert!(table.get("op").is_some());
        assert_eq!(table.len(), 3);
    }
}
