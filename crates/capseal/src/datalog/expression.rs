//! Expression AST and evaluation.
//!
//! Expressions filter candidate bindings during rule application. Any
//! type mismatch, unbound variable, overflow or division by zero makes
//! the expression fail for that binding; the binding is rejected and
//! evaluation carries on. Expression failures are never fatal.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use super::term::Term;

/// Boolean/arithmetic/string/set expression over terms and variables.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expression {
    Value(Term),
    Unary(UnaryOp, Box<Expression>),
    Binary(BinaryOp, Box<Expression>, Box<Expression>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    /// Boolean negation, `!e`.
    Negate,
    /// Explicit grouping, `(e)`.
    Parens,
    /// String/bytes/set length, `e.length()`.
    Length,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOp {
    LessThan,
    GreaterThan,
    LessOrEqual,
    GreaterOrEqual,
    Equal,
    NotEqual,
    /// String containment, set membership, or set superset.
    Contains,
    /// String prefix, `s.starts_with(p)`.
    Prefix,
    /// String suffix, `s.ends_with(p)`.
    Suffix,
    /// Integer addition or string concatenation.
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Intersection,
    Union,
}

/// Why an expression rejected a binding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpressionError {
    #[error("unbound variable ${0}")]
    UnboundVariable(String),

    #[error("unsubstituted parameter {{{0}}}")]
    UnexpectedParameter(String),

    #[error("type mismatch")]
    TypeMismatch,

    #[error("integer overflow")]
    Overflow,

    #[error("division by zero")]
    DivideByZero,
}

impl Expression {
    /// Evaluate under the given variable bindings.
    pub fn evaluate(&self, bindings: &HashMap<String, Term>) -> Result<Term, ExpressionError> {
        match self {
            Expression::Value(Term::Variable(name)) => bindings
                .get(name)
                .cloned()
                .ok_or_else(|| ExpressionError::UnboundVariable(name.clone())),
            Expression::Value(Term::Parameter(name)) => {
                Err(ExpressionError::UnexpectedParameter(name.clone()))
            }
            Expression::Value(term) => Ok(term.clone()),
            Expression::Unary(op, inner) => {
                let value = inner.evaluate(bindings)?;
                evaluate_unary(*op, value)
            }
            Expression::Binary(op, lhs, rhs) => {
                let left = lhs.evaluate(bindings)?;
                let right = rhs.evaluate(bindings)?;
                evaluate_binary(*op, left, right)
            }
        }
    }

    /// Variable names referenced by this expression.
    pub fn variables(&self, out: &mut Vec<String>) {
        match self {
            Expression::Value(Term::Variable(name)) => out.push(name.clone()),
            Expression::Value(_) => {}
            Expression::Unary(_, inner) => inner.variables(out),
            Expression::Binary(_, lhs, rhs) => {
                lhs.variables(out);
                rhs.variables(out);
            }
        }
    }

    /// First unsubstituted parameter, if any.
    pub fn first_parameter(&self) -> Option<&str> {
        match self {
            Expression::Value(term) => term.parameter_name(),
            Expression::Unary(_, inner) => inner.first_parameter(),
            Expression::Binary(_, lhs, rhs) => {
                lhs.first_parameter().or_else(|| rhs.first_parameter())
            }
        }
    }

    pub(crate) fn substitute_parameter(&mut self, name: &str, value: &Term) -> bool {
        match self {
            Expression::Value(term) => {
                if term.parameter_name() == Some(name) {
                    *term = value.clone();
                    true
                } else {
                    false
                }
            }
            Expression::Unary(_, inner) => inner.substitute_parameter(name, value),
            Expression::Binary(_, lhs, rhs) => {
                let l = lhs.substitute_parameter(name, value);
                let r = rhs.substitute_parameter(name, value);
                l || r
            }
        }
    }
}

fn evaluate_unary(op: UnaryOp, value: Term) -> Result<Term, ExpressionError> {
    match (op, value) {
        (UnaryOp::Negate, Term::Bool(b)) => Ok(Term::Bool(!b)),
        (UnaryOp::Parens, value) => Ok(value),
        (UnaryOp::Length, Term::Str(s)) => Ok(Term::Integer(s.len() as i64)),
        (UnaryOp::Length, Term::Bytes(b)) => Ok(Term::Integer(b.len() as i64)),
        (UnaryOp::Length, Term::Set(s)) => Ok(Term::Integer(s.len() as i64)),
        _ => Err(ExpressionError::TypeMismatch),
    }
}

fn evaluate_binary(op: BinaryOp, left: Term, right: Term) -> Result<Term, ExpressionError> {
    use BinaryOp::*;
    use Term::{Bool, Bytes, Date, Integer, Set, Str};

    match (op, left, right) {
        // Comparisons
        (LessThan, Integer(a), Integer(b)) => Ok(Bool(a < b)),
        (GreaterThan, Integer(a), Integer(b)) => Ok(Bool(a > b)),
        (LessOrEqual, Integer(a), Integer(b)) => Ok(Bool(a <= b)),
        (GreaterOrEqual, Integer(a), Integer(b)) => Ok(Bool(a >= b)),
        (LessThan, Date(a), Date(b)) => Ok(Bool(a < b)),
        (GreaterThan, Date(a), Date(b)) => Ok(Bool(a > b)),
        (LessOrEqual, Date(a), Date(b)) => Ok(Bool(a <= b)),
        (GreaterOrEqual, Date(a), Date(b)) => Ok(Bool(a >= b)),

        // Equality on matching types
        (Equal, a, b) if same_kind(&a, &b) => Ok(Bool(a == b)),
        (NotEqual, a, b) if same_kind(&a, &b) => Ok(Bool(a != b)),

        // Arithmetic and string concatenation
        (Add, Integer(a), Integer(b)) => {
            a.checked_add(b).map(Integer).ok_or(ExpressionError::Overflow)
        }
        (Add, Str(a), Str(b)) => Ok(Str(a + &b)),
        (Sub, Integer(a), Integer(b)) => {
            a.checked_sub(b).map(Integer).ok_or(ExpressionError::Overflow)
        }
        (Mul, Integer(a), Integer(b)) => {
            a.checked_mul(b).map(Integer).ok_or(ExpressionError::Overflow)
        }
        (Div, Integer(_), Integer(0)) => Err(ExpressionError::DivideByZero),
        (Div, Integer(a), Integer(b)) => {
            a.checked_div(b).map(Integer).ok_or(ExpressionError::Overflow)
        }

        // Strings
        (Contains, Str(a), Str(b)) => Ok(Bool(a.contains(&b))),
        (Prefix, Str(a), Str(b)) => Ok(Bool(a.starts_with(&b))),
        (Suffix, Str(a), Str(b)) => Ok(Bool(a.ends_with(&b))),

        // Sets
        (Contains, Set(a), Set(b)) => Ok(Bool(b.is_subset(&a))),
        (Contains, Set(a), item) if !matches!(item, Set(_)) => Ok(Bool(a.contains(&item))),
        (Intersection, Set(a), Set(b)) => {
            Ok(Set(a.intersection(&b).cloned().collect::<BTreeSet<_>>()))
        }
        (Union, Set(a), Set(b)) => Ok(Set(a.union(&b).cloned().collect::<BTreeSet<_>>())),

        // Booleans
        (And, Bool(a), Bool(b)) => Ok(Bool(a && b)),
        (Or, Bool(a), Bool(b)) => Ok(Bool(a || b)),

        _ => Err(ExpressionError::TypeMismatch),
    }
}

fn same_kind(a: &Term, b: &Term) -> bool {
    std::mem::discriminant(a) == std::mem::discriminant(b)
        && !matches!(a, Term::Variable(_) | Term::Parameter(_))
}

fn fmt_operand(f: &mut std::fmt::Formatter<'_>, e: &Expression) -> std::fmt::Result {
    // Parenthesize nested infix operations so printed sources reparse
    // with the same structure.
    match e {
        Expression::Binary(op, _, _) if infix_symbol(*op).is_some() => write!(f, "({e})"),
        _ => write!(f, "{e}"),
    }
}

fn infix_symbol(op: BinaryOp) -> Option<&'static str> {
    use BinaryOp::*;
    match op {
        LessThan => Some("<"),
        GreaterThan => Some(">"),
        LessOrEqual => Some("<="),
        GreaterOrEqual => Some(">="),
        Equal => Some("=="),
        NotEqual => Some("!="),
        Add => Some("+"),
        Sub => Some("-"),
        Mul => Some("*"),
        Div => Some("/"),
        And => Some("&&"),
        Or => Some("||"),
        _ => None,
    }
}

fn method_name(op: BinaryOp) -> &'static str {
    use BinaryOp::*;
    match op {
        Contains => "contains",
        Prefix => "starts_with",
        Suffix => "ends_with",
        Intersection => "intersection",
        Union => "union",
        _ => unreachable!("not a method operator"),
    }
}

impl std::fmt::Display for Expression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Expression::Value(term) => write!(f, "{term}"),
            Expression::Unary(UnaryOp::Negate, inner) => {
                write!(f, "!")?;
                fmt_operand(f, inner)
            }
            Expression::Unary(UnaryOp::Parens, inner) => write!(f, "({inner})"),
            Expression::Unary(UnaryOp::Length, inner) => {
                fmt_operand(f, inner)?;
                write!(f, ".length()")
            }
            Expression::Binary(op, lhs, rhs) => {
                if let Some(symbol) = infix_symbol(*op) {
                    fmt_operand(f, lhs)?;
                    write!(f, " {symbol} ")?;
                    fmt_operand(f, rhs)?;
                    Ok(())
                } else {
                    fmt_operand(f, lhs)?;
                    write!(f, ".{}({rhs})", method_name(*op))
                }
            }
        }
    }
}
