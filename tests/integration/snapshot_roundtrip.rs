//! Integration test: authorizer snapshots.
//!
//! A snapshot records every input of an authorization decision so the
//! decision can be replayed later, without the token or any key.

use capseal::{
    Authorizer, AuthorizerBuilder, AuthorizerSnapshot, BlockBuilder, KeyPair, RunLimits, Token,
};

fn sample_authorizer() -> Authorizer {
    let root = KeyPair::new();
    let mut builder = Token::builder();
    builder
        .add_code(r#"user("alice"); right("file1", "read");"#)
        .unwrap();
    let token = builder.build(root.private()).unwrap();

    let mut block = BlockBuilder::new();
    block.add_code(r#"check if operation("read");"#).unwrap();
    let token = token.append(&block).unwrap();

    let mut authorizer_builder = AuthorizerBuilder::new();
    authorizer_builder
        .add_code(
            r#"
            resource("file1");
            operation("read");
            allow if right($res, $op), resource($res), operation($op);
            "#,
        )
        .unwrap();
    authorizer_builder
        .set_limits(RunLimits {
            max_facts: 500,
            ..RunLimits::default()
        })
        .unwrap();
    authorizer_builder.build(&token).unwrap()
}

#[test]
fn snapshot_replays_the_same_decision() {
    let mut original = sample_authorizer();
    let snapshot = original.snapshot();
    let text = snapshot.to_base64().expect("snapshot should serialize");

    // Restore in a context with no token and no keys
    let snapshot = AuthorizerSnapshot::from_base64(&text).expect("snapshot should parse");
    let mut restored = Authorizer::from_snapshot(snapshot);

    let original_policy = original.authorize().expect("original should authorize");
    let restored_policy = restored.authorize().expect("restored should authorize");
    assert_eq!(original_policy, restored_policy);
}

#[test]
fn snapshot_preserves_limits_and_world() {
    let authorizer = sample_authorizer();
    let snapshot = authorizer.snapshot();
    let restored = Authorizer::from_snapshot(snapshot);

    assert_eq!(restored.limits().max_facts, 500);
    // Block checks and authorizer policies both survive the round trip
    let world = restored.print_world();
    assert!(world.contains(r#"check if operation("read")"#));
    assert!(world.contains("allow if"));
    assert!(world.contains(r#"user("alice")"#));
}

#[test]
fn snapshot_taken_before_evaluation_excludes_derived_facts() {
    let root = KeyPair::new();
    let mut builder = Token::builder();
    builder
        .add_code(r#"user("alice"); admin($u) <- user($u);"#)
        .unwrap();
    let token = builder.build(root.private()).unwrap();

    let mut authorizer_builder = AuthorizerBuilder::new();
    authorizer_builder.add_code("allow if admin($u)").unwrap();
    let mut authorizer = authorizer_builder.build(&token).unwrap();
    authorizer.authorize().expect("derivation should allow");

    // The snapshot records inputs, not the derived admin() fact; the
    // restored authorizer re-derives it and reaches the same verdict.
    let snapshot = authorizer.snapshot();
    let mut restored = Authorizer::from_snapshot(snapshot);
    assert!(restored.authorize().is_ok());
}
