//! Integration test: role-based access control modeled in the
//! authorization language.
//!
//! The authority block carries roles and a rule deriving rights from
//! role membership; the authorizer supplies the request context and
//! resolves ordered allow/deny policies.

use capseal::{AuthorizerBuilder, BlockBuilder, FailedLogic, KeyPair, Token, TokenError};

fn issue_token(root: &KeyPair, user: &str, role: &str) -> Token {
    let mut builder = Token::builder();
    builder
        .add_code(&format!(
            r#"
            user("{user}");
            member("{user}", "{role}");
            role_right("admin", "read");
            role_right("admin", "write");
            role_right("admin", "delete");
            role_right("auditor", "read");
            right($res, $op) <- resource($res), member($u, $r), role_right($r, $op);
            "#
        ))
        .expect("authority code should parse");
    builder.build(root.private()).expect("minting should succeed")
}

fn request(token: &Token, operation: &str) -> Result<usize, TokenError> {
    let mut builder = AuthorizerBuilder::new();
    builder
        .add_code(&format!(
            r#"
            resource("ledger");
            operation("{operation}");
            deny if banned($u), user($u);
            allow if right($res, $op), resource($res), operation($op);
            "#
        ))
        .expect("authorizer code should parse");
    builder.build(token)?.authorize()
}

#[test]
fn admin_can_write_auditor_cannot() {
    let root = KeyPair::new();
    let admin = issue_token(&root, "alice", "admin");
    let auditor = issue_token(&root, "bob", "auditor");

    assert!(request(&admin, "write").is_ok());
    assert!(request(&auditor, "read").is_ok());
    assert!(matches!(
        request(&auditor, "write"),
        Err(TokenError::FailedLogic(FailedLogic::NoMatchingPolicy))
    ));
}

#[test]
fn deny_policy_takes_priority_in_order() {
    let root = KeyPair::new();
    let token = issue_token(&root, "alice", "admin");

    let mut builder = AuthorizerBuilder::new();
    builder
        .add_code(
            r#"
            resource("ledger");
            operation("read");
            banned("alice");
            deny if banned($u), user($u);
            allow if right($res, $op), resource($res), operation($op);
            "#,
        )
        .unwrap();
    let mut authorizer = builder.build(&token).unwrap();
    assert!(matches!(
        authorizer.authorize(),
        Err(TokenError::FailedLogic(FailedLogic::Denied(0)))
    ));
}

#[test]
fn attenuated_token_cannot_regain_rights() {
    let root = KeyPair::new();
    let admin = issue_token(&root, "alice", "admin");

    // Attenuate to read-only
    let mut block = BlockBuilder::new();
    block
        .add_code(r#"check if operation("read");"#)
        .unwrap();
    let read_only = admin.append(&block).unwrap();

    // A later block claiming more membership changes nothing: its facts
    // are invisible to the authority block's derivation rule.
    let mut escalate = BlockBuilder::new();
    escalate
        .add_code(r#"member("alice", "admin"); role_right("admin", "delete");"#)
        .unwrap();
    let escalated = read_only.append(&escalate).unwrap();

    assert!(matches!(
        request(&escalated, "delete"),
        Err(TokenError::FailedLogic(FailedLogic::Unauthorized { .. }))
    ));
    assert!(request(&escalated, "read").is_ok());
}

#[test]
fn query_lists_derived_rights() {
    let root = KeyPair::new();
    let token = issue_token(&root, "alice", "admin");

    let mut builder = AuthorizerBuilder::new();
    builder.add_code(r#"resource("ledger");"#).unwrap();
    let mut authorizer = builder.build(&token).unwrap();

    let query = r#"allowed($op) <- right("ledger", $op)"#
        .parse()
        .expect("query should parse");
    let facts = authorizer.query(&query).expect("query should run");
    assert_eq!(facts.len(), 3); // read, write, delete
}
