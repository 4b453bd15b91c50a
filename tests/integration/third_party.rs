//! Integration test: third-party blocks.
//!
//! An external authority contributes a signed block over a
//! request/response round trip; the authorizer trusts its facts by
//! signer key rather than by block position.

use capseal::{
    AuthorizerBuilder, BlockBuilder, FailedLogic, KeyPair, ThirdPartyBlock, ThirdPartyRequest,
    Token, TokenError,
};

fn base_token(root: &KeyPair) -> Token {
    let mut builder = Token::builder();
    builder
        .add_code(r#"user("alice"); right("file1", "read");"#)
        .unwrap();
    builder.build(root.private()).unwrap()
}

#[test]
fn third_party_block_round_trip() {
    let root = KeyPair::new();
    let external = KeyPair::new();
    let token = base_token(&root);

    // ── Step 1: The holder produces a request ───────────────────────────
    let request = token.third_party_request();
    let request_text = request.to_base64().unwrap();

    // ── Step 2: The external party signs a block ────────────────────────
    let request = ThirdPartyRequest::from_base64(&request_text).unwrap();
    let mut block = BlockBuilder::new();
    block.add_code(r#"approved("audit");"#).unwrap();
    let signed = request
        .create_block(external.private(), &block)
        .expect("external signing should succeed");
    let block_text = signed.to_base64().unwrap();

    // ── Step 3: The holder appends it ───────────────────────────────────
    let signed = ThirdPartyBlock::from_base64(&block_text).unwrap();
    let token = token
        .append_third_party(external.public(), signed)
        .expect("append should succeed");
    assert_eq!(token.block_count(), 2);
    assert_eq!(
        token.block_external_key(1).unwrap().as_ref(),
        Some(external.public())
    );

    // The token still verifies against the root alone
    let text = token.to_base64().unwrap();
    let token = Token::from_base64(&text, root.public()).expect("chain should verify");

    // ── Step 4: Authorize, trusting the external signer ─────────────────
    let mut builder = AuthorizerBuilder::new();
    builder
        .add_code(&format!(
            r#"
            check if approved($what) trusting {};
            allow if user($u);
            "#,
            external.public()
        ))
        .unwrap();
    let mut authorizer = builder.build(&token).unwrap();
    assert!(authorizer.authorize().is_ok());
}

#[test]
fn unscoped_check_does_not_see_third_party_facts() {
    let root = KeyPair::new();
    let external = KeyPair::new();
    let token = base_token(&root);

    let request = token.third_party_request();
    let mut block = BlockBuilder::new();
    block.add_code(r#"approved("audit");"#).unwrap();
    let signed = request.create_block(external.private(), &block).unwrap();
    let token = token.append_third_party(external.public(), signed).unwrap();

    // Without a key scope the authorizer check only reads the authority
    // block and its own facts, so the third-party fact stays invisible.
    let mut builder = AuthorizerBuilder::new();
    builder
        .add_code("check if approved($what); allow if true;")
        .unwrap();
    let mut authorizer = builder.build(&token).unwrap();
    assert!(matches!(
        authorizer.authorize(),
        Err(TokenError::FailedLogic(FailedLogic::Unauthorized { .. }))
    ));
}

#[test]
fn wrong_signer_key_is_rejected_at_append() {
    let root = KeyPair::new();
    let external = KeyPair::new();
    let impostor = KeyPair::new();
    let token = base_token(&root);

    let request = token.third_party_request();
    let mut block = BlockBuilder::new();
    block.add_code(r#"approved("audit");"#).unwrap();
    let signed = request.create_block(external.private(), &block).unwrap();

    assert!(matches!(
        token.append_third_party(impostor.public(), signed),
        Err(TokenError::InvalidKey(_))
    ));
}

#[test]
fn block_signed_for_another_token_is_rejected() {
    let root = KeyPair::new();
    let external = KeyPair::new();
    let token_a = base_token(&root);
    let token_b = base_token(&root);

    // Signed against token A's chain key, appended to token B
    let request = token_a.third_party_request();
    let mut block = BlockBuilder::new();
    block.add_code(r#"approved("audit");"#).unwrap();
    let signed = request.create_block(external.private(), &block).unwrap();

    assert!(matches!(
        token_b.append_third_party(external.public(), signed),
        Err(TokenError::InvalidExternalSignature { block: 1 })
    ));
}

#[test]
fn scope_parameter_names_the_signer_at_runtime() {
    let root = KeyPair::new();
    let external = KeyPair::new();
    let token = base_token(&root);

    let request = token.third_party_request();
    let mut block = BlockBuilder::new();
    block.add_code(r#"approved("audit");"#).unwrap();
    let signed = request.create_block(external.private(), &block).unwrap();
    let token = token.append_third_party(external.public(), signed).unwrap();

    let mut builder = AuthorizerBuilder::new();
    builder
        .add_code_with_params(
            "check if approved($what) trusting {auditor}; allow if true;",
            &std::collections::HashMap::new(),
            &std::collections::HashMap::from([("auditor".to_string(), external.public().clone())]),
        )
        .unwrap();
    let mut authorizer = builder.build(&token).unwrap();
    assert!(authorizer.authorize().is_ok());
}
