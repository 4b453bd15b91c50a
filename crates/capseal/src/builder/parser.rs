//! Recursive-descent parser for the authorization language.
//!
//! Parses facts, rules, checks, policies and multi-statement source
//! strings into the datalog AST. Parameters (`{name}`) are accepted
//! anywhere a term or scope may appear; builders reject statements
//! whose parameters are still unsubstituted.

use crate::crypto::PublicKey;
use crate::datalog::{
    BinaryOp, Check, Expression, Fact, Policy, PolicyKind, Predicate, Rule, Scope, Term, UnaryOp,
};
use crate::error::{Result, TokenError};
use crate::time::rfc3339_to_secs;

/// A single parsed statement from a source string.
#[derive(Debug, Clone)]
pub(crate) enum Statement {
    Fact(Fact),
    Rule(Rule),
    Check(Check),
    Policy(Policy),
}

/// Parse one fact, e.g. `right("file1", "read")`.
pub(crate) fn parse_fact(input: &str) -> Result<Fact> {
    let mut p = Parser::new(input);
    let predicate = p.predicate()?;
    p.finish()?;
    if predicate.variables().next().is_some() {
        return Err(TokenError::InvalidFact(format!(
            "fact {} contains variables",
            predicate.name
        )));
    }
    Ok(Fact { predicate })
}

/// Parse one rule, e.g. `right($f, "read") <- owner($u, $f)`.
pub(crate) fn parse_rule(input: &str) -> Result<Rule> {
    let mut p = Parser::new(input);
    let rule = p.rule()?;
    p.finish()?;
    Ok(rule)
}

/// Parse one check, e.g. `check if admin() or owner($u)`.
pub(crate) fn parse_check(input: &str) -> Result<Check> {
    let mut p = Parser::new(input);
    let check = p.check()?;
    p.finish()?;
    Ok(check)
}

/// Parse one policy, e.g. `allow if user($u)`.
pub(crate) fn parse_policy(input: &str) -> Result<Policy> {
    let mut p = Parser::new(input);
    let policy = p.policy()?;
    p.finish()?;
    Ok(policy)
}

/// Parse a source string of `;`-separated statements.
pub(crate) fn parse_source(input: &str) -> Result<Vec<Statement>> {
    let mut p = Parser::new(input);
    let mut statements = Vec::new();
    loop {
        p.skip_ws();
        if p.at_end() {
            break;
        }
        let statement = if p.at_keyword("check") {
            Statement::Check(p.check()?)
        } else if p.at_keyword("allow") || p.at_keyword("deny") {
            Statement::Policy(p.policy()?)
        } else {
            let mark = p.pos;
            let predicate = p.predicate()?;
            p.skip_ws();
            if p.rest().starts_with("<-") {
                p.pos = mark;
                Statement::Rule(p.rule()?)
            } else {
                if predicate.variables().next().is_some() {
                    return Err(TokenError::InvalidFact(format!(
                        "fact {} contains variables",
                        predicate.name
                    )));
                }
                Statement::Fact(Fact { predicate })
            }
        };
        statements.push(statement);
        p.skip_ws();
        if !p.eat(";") && !p.at_end() {
            return Err(p.error("expected `;` between statements"));
        }
    }
    Ok(statements)
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn error(&self, message: &str) -> TokenError {
        TokenError::Syntax {
            message: message.to_string(),
            fragment: self.rest().chars().take(30).collect(),
        }
    }

    fn skip_ws(&mut self) {
        loop {
            let rest = self.rest();
            if let Some(c) = rest.chars().next() {
                if c.is_whitespace() {
                    self.pos += c.len_utf8();
                    continue;
                }
            }
            if rest.starts_with("//") {
                match rest.find('\n') {
                    Some(i) => self.pos += i + 1,
                    None => self.pos = self.input.len(),
                }
                continue;
            }
            break;
        }
    }

    /// Consume `token` if it is next (after whitespace).
    fn eat(&mut self, token: &str) -> bool {
        self.skip_ws();
        if self.rest().starts_with(token) {
            self.pos += token.len();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> Result<()> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(&format!("expected `{token}`")))
        }
    }

    /// True if the next token is `keyword` followed by a word boundary.
    fn at_keyword(&mut self, keyword: &str) -> bool {
        self.skip_ws();
        let rest = self.rest();
        rest.starts_with(keyword)
            && !rest[keyword.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_alphanumeric() || c == '_')
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.at_keyword(keyword) {
            self.pos += keyword.len();
            true
        } else {
            false
        }
    }

    fn ident(&mut self) -> Result<String> {
        self.skip_ws();
        let rest = self.rest();
        let mut len = 0;
        for c in rest.chars() {
            let ok = if len == 0 {
                c.is_ascii_alphabetic() || c == '_'
            } else {
                c.is_ascii_alphanumeric() || c == '_'
            };
            if !ok {
                break;
            }
            len += c.len_utf8();
        }
        if len == 0 {
            return Err(self.error("expected an identifier"));
        }
        self.pos += len;
        Ok(rest[..len].to_string())
    }

    // ── Terms ──

    fn term(&mut self) -> Result<Term> {
        self.skip_ws();
        let rest = self.rest();
        if rest.starts_with('$') {
            self.pos += 1;
            return Ok(Term::Variable(self.ident()?));
        }
        if rest.starts_with('{') {
            self.pos += 1;
            let name = self.ident()?;
            self.expect("}")?;
            return Ok(Term::Parameter(name));
        }
        if rest.starts_with('"') {
            return self.string_literal();
        }
        if rest.starts_with("hex:") {
            self.pos += 4;
            return self.hex_literal();
        }
        if rest.starts_with('[') {
            return self.set_literal();
        }
        if self.eat_keyword("true") {
            return Ok(Term::Bool(true));
        }
        if self.eat_keyword("false") {
            return Ok(Term::Bool(false));
        }
        self.number_or_date()
    }

    fn string_literal(&mut self) -> Result<Term> {
        // opening quote already seen
        self.pos += 1;
        let mut out = String::new();
        let mut chars = self.rest().char_indices();
        while let Some((i, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += i + 1;
                    return Ok(Term::Str(out));
                }
                '\\' => match chars.next() {
                    Some((_, '"')) => out.push('"'),
                    Some((_, '\\')) => out.push('\\'),
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, 'r')) => out.push('\r'),
                    _ => return Err(self.error("invalid escape sequence in string")),
                },
                _ => out.push(c),
            }
        }
        Err(self.error("unterminated string literal"))
    }

    fn hex_literal(&mut self) -> Result<Term> {
        let rest = self.rest();
        let len = rest
            .find(|c: char| !c.is_ascii_hexdigit())
            .unwrap_or(rest.len());
        let bytes =
            hex::decode(&rest[..len]).map_err(|_| self.error("invalid hex byte literal"))?;
        self.pos += len;
        Ok(Term::Bytes(bytes))
    }

    fn set_literal(&mut self) -> Result<Term> {
        self.expect("[")?;
        let mut items = Vec::new();
        if !self.eat("]") {
            loop {
                items.push(self.term()?);
                if self.eat("]") {
                    break;
                }
                self.expect(",")?;
            }
        }
        Term::set(items)
    }

    /// Integers and RFC 3339 dates both start with digits; a date is
    /// recognized by `-` after a four-digit year.
    fn number_or_date(&mut self) -> Result<Term> {
        self.skip_ws();
        let rest = self.rest();
        let negative = rest.starts_with('-');
        let digits_start = usize::from(negative);
        let digit_len = rest[digits_start..]
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len() - digits_start);
        if digit_len == 0 {
            return Err(self.error("expected a term"));
        }
        let after_digits = digits_start + digit_len;
        if !negative && digit_len == 4 && rest[after_digits..].starts_with('-') {
            let date_len = rest
                .find(|c: char| {
                    !(c.is_ascii_digit() || matches!(c, '-' | ':' | '+' | 'T' | 'Z' | '.'))
                })
                .unwrap_or(rest.len());
            let secs = rfc3339_to_secs(&rest[..date_len])
                .ok_or_else(|| self.error("invalid RFC 3339 date"))?;
            self.pos += date_len;
            return Ok(Term::Date(secs));
        }
        let value: i64 = rest[..after_digits]
            .parse()
            .map_err(|_| self.error("integer out of range"))?;
        self.pos += after_digits;
        Ok(Term::Integer(value))
    }

    // ── Predicates and rule bodies ──

    fn predicate(&mut self) -> Result<Predicate> {
        let name = self.ident()?;
        self.expect("(")?;
        let mut terms = Vec::new();
        if !self.eat(")") {
            loop {
                terms.push(self.term()?);
                if self.eat(")") {
                    break;
                }
                self.expect(",")?;
            }
        }
        Ok(Predicate::new(name, terms))
    }

    /// Predicates, expressions and an optional trailing `trusting`
    /// clause, comma-separated.
    fn rule_body(&mut self) -> Result<(Vec<Predicate>, Vec<Expression>, Vec<Scope>)> {
        let mut predicates = Vec::new();
        let mut expressions = Vec::new();
        loop {
            self.skip_ws();
            let mark = self.pos;
            let is_predicate = self
                .ident()
                .is_ok_and(|name| name != "true" && name != "false" && self.eat("("));
            self.pos = mark;
            if is_predicate {
                predicates.push(self.predicate()?);
            } else {
                expressions.push(self.expression()?);
            }
            if !self.eat(",") {
                break;
            }
        }
        let mut scopes = Vec::new();
        if self.eat_keyword("trusting") {
            loop {
                scopes.push(self.scope()?);
                if !self.eat(",") {
                    break;
                }
            }
        }
        Ok((predicates, expressions, scopes))
    }

    fn scope(&mut self) -> Result<Scope> {
        self.skip_ws();
        if self.eat_keyword("authority") {
            return Ok(Scope::Authority);
        }
        if self.eat_keyword("previous") {
            return Ok(Scope::Previous);
        }
        if self.rest().starts_with('{') {
            self.pos += 1;
            let name = self.ident()?;
            self.expect("}")?;
            return Ok(Scope::Parameter(name));
        }
        // algorithm-prefixed public key, e.g. ed25519/<hex>
        let rest = self.rest();
        let len = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || c == '/'))
            .unwrap_or(rest.len());
        let key = PublicKey::from_hex(&rest[..len])
            .map_err(|_| self.error("expected authority, previous or a public key"))?;
        self.pos += len;
        Ok(Scope::PublicKey(key))
    }

    fn rule(&mut self) -> Result<Rule> {
        let head = self.predicate()?;
        self.expect("<-")?;
        let (body, expressions, scopes) = self.rule_body()?;
        Ok(Rule::new(head, body, expressions, scopes))
    }

    fn check(&mut self) -> Result<Check> {
        if !self.eat_keyword("check") || !self.eat_keyword("if") {
            return Err(self.error("expected `check if`"));
        }
        Ok(Check::new(self.queries()?))
    }

    fn policy(&mut self) -> Result<Policy> {
        let kind = if self.eat_keyword("allow") {
            PolicyKind::Allow
        } else if self.eat_keyword("deny") {
            PolicyKind::Deny
        } else {
            return Err(self.error("expected `allow` or `deny`"));
        };
        if !self.eat_keyword("if") {
            return Err(self.error("expected `if`"));
        }
        Ok(Policy::new(kind, self.queries()?))
    }

    /// `or`-separated rule bodies sharing an empty head.
    fn queries(&mut self) -> Result<Vec<Rule>> {
        let mut queries = Vec::new();
        loop {
            let (body, expressions, scopes) = self.rule_body()?;
            queries.push(Rule::new(
                Predicate::new("query", vec![]),
                body,
                expressions,
                scopes,
            ));
            if !self.eat_keyword("or") {
                break;
            }
        }
        Ok(queries)
    }

    // ── Expressions ──
    //
    // Precedence, loosest first: `||`, `&&`, comparisons, `+ -`, `* /`,
    // unary `!`, postfix method calls.

    fn expression(&mut self) -> Result<Expression> {
        self.expr_or()
    }

    fn expr_or(&mut self) -> Result<Expression> {
        let mut lhs = self.expr_and()?;
        while self.eat("||") {
            let rhs = self.expr_and()?;
            lhs = Expression::Binary(BinaryOp::Or, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn expr_and(&mut self) -> Result<Expression> {
        let mut lhs = self.expr_cmp()?;
        while self.eat("&&") {
            let rhs = self.expr_cmp()?;
            lhs = Expression::Binary(BinaryOp::And, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    /// Comparisons are non-associative: `a < b < c` is a syntax error.
    fn expr_cmp(&mut self) -> Result<Expression> {
        let lhs = self.expr_add()?;
        let op = if self.eat("<=") {
            BinaryOp::LessOrEqual
        } else if self.eat(">=") {
            BinaryOp::GreaterOrEqual
        } else if self.eat("==") {
            BinaryOp::Equal
        } else if self.eat("!=") {
            BinaryOp::NotEqual
        } else if self.eat("<") {
            BinaryOp::LessThan
        } else if self.eat(">") {
            BinaryOp::GreaterThan
        } else {
            return Ok(lhs);
        };
        let rhs = self.expr_add()?;
        Ok(Expression::Binary(op, Box::new(lhs), Box::new(rhs)))
    }

    fn expr_add(&mut self) -> Result<Expression> {
        let mut lhs = self.expr_mul()?;
        loop {
            let op = if self.eat("+") {
                BinaryOp::Add
            } else if self.eat("-") {
                BinaryOp::Sub
            } else {
                return Ok(lhs);
            };
            let rhs = self.expr_mul()?;
            lhs = Expression::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn expr_mul(&mut self) -> Result<Expression> {
        let mut lhs = self.expr_unary()?;
        loop {
            let op = if self.eat("*") {
                BinaryOp::Mul
            } else if self.eat("/") {
                BinaryOp::Div
            } else {
                return Ok(lhs);
            };
            let rhs = self.expr_unary()?;
            lhs = Expression::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn expr_unary(&mut self) -> Result<Expression> {
        if self.eat("!") {
            let inner = self.expr_unary()?;
            return Ok(Expression::Unary(UnaryOp::Negate, Box::new(inner)));
        }
        self.expr_postfix()
    }

    fn expr_postfix(&mut self) -> Result<Expression> {
        let mut expr = self.expr_primary()?;
        while self.eat(".") {
            let method = self.ident()?;
            self.expect("(")?;
            if method == "length" {
                self.expect(")")?;
                expr = Expression::Unary(UnaryOp::Length, Box::new(expr));
                continue;
            }
            let op = match method.as_str() {
                "contains" => BinaryOp::Contains,
                "starts_with" => BinaryOp::Prefix,
                "ends_with" => BinaryOp::Suffix,
                "intersection" => BinaryOp::Intersection,
                "union" => BinaryOp::Union,
                _ => return Err(self.error(&format!("unknown method `{method}`"))),
            };
            let arg = self.expression()?;
            self.expect(")")?;
            expr = Expression::Binary(op, Box::new(expr), Box::new(arg));
        }
        Ok(expr)
    }

    fn expr_primary(&mut self) -> Result<Expression> {
        if self.eat("(") {
            let inner = self.expression()?;
            self.expect(")")?;
            return Ok(Expression::Unary(UnaryOp::Parens, Box::new(inner)));
        }
        Ok(Expression::Value(self.term()?))
    }

    /// Assert only trailing whitespace remains.
    fn finish(&mut self) -> Result<()> {
        self.skip_ws();
        if self.at_end() {
            Ok(())
        } else {
            Err(self.error("unexpected trailing input"))
        }
    }
}
