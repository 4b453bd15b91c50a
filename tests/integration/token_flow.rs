//! Integration test: full token lifecycle.
//!
//! Covers the complete flow:
//! 1. Mint a token from an authority block
//! 2. Serialize and re-verify it
//! 3. Attenuate it offline
//! 4. Authorize requests against the attenuated token
//! 5. Revocation ids and tamper detection

use capseal::{
    Algorithm, AuthorizerBuilder, BlockBuilder, FailedLogic, KeyPair, PublicKey, Token,
    TokenBuilder, TokenError, UnverifiedToken,
};

fn authorize(token: &Token, code: &str) -> Result<usize, TokenError> {
    let mut builder = AuthorizerBuilder::new();
    builder.add_code(code).expect("authorizer code should parse");
    builder.build(token).expect("authorizer should build").authorize()
}

#[test]
fn full_token_lifecycle() {
    // ── Step 1: Mint ────────────────────────────────────────────────────
    let root = KeyPair::new();
    let mut builder = TokenBuilder::new();
    builder
        .add_code(r#"user("alice"); right("file1", "read"); right("file1", "write");"#)
        .expect("authority code should parse");
    let token = builder.build(root.private()).expect("minting should succeed");
    assert_eq!(token.block_count(), 1);

    // ── Step 2: Serialize and re-verify ─────────────────────────────────
    let text = token.to_base64().expect("serialization should succeed");
    let token = Token::from_base64(&text, root.public()).expect("verification should succeed");
    assert!(token.block_source(0).unwrap().contains(r#"user("alice")"#));

    // ── Step 3: Attenuate offline, without the root key ─────────────────
    let mut restrict = BlockBuilder::new();
    restrict
        .add_code(r#"check if operation("read");"#)
        .expect("block code should parse");
    let attenuated = token.append(&restrict).expect("append should succeed");
    assert_eq!(attenuated.block_count(), 2);
    // The original token is untouched
    assert_eq!(token.block_count(), 1);

    // The attenuated token still verifies against the same root
    let text = attenuated.to_base64().unwrap();
    let attenuated =
        Token::from_base64(&text, root.public()).expect("attenuated token should verify");

    // ── Step 4: Authorize ───────────────────────────────────────────────
    let read = r#"
        resource("file1");
        operation("read");
        allow if right($res, $op), resource($res), operation($op);
    "#;
    assert_eq!(authorize(&attenuated, read).expect("read should be allowed"), 0);

    let write = r#"
        resource("file1");
        operation("write");
        allow if right($res, $op), resource($res), operation($op);
    "#;
    // The original token still allows write; the attenuated one refuses.
    assert!(authorize(&token, write).is_ok());
    match authorize(&attenuated, write) {
        Err(TokenError::FailedLogic(FailedLogic::Unauthorized { checks, .. })) => {
            assert_eq!(checks.len(), 1);
        }
        other => panic!("expected Unauthorized, got {other:?}"),
    }

    // ── Step 5: Revocation ids ──────────────────────────────────────────
    let ids = attenuated.revocation_ids();
    assert_eq!(ids.len(), 2);
    // The shared prefix of the chain has identical revocation ids
    assert_eq!(ids[0], token.revocation_ids()[0]);
    assert_ne!(ids[0], ids[1]);
}

#[test]
fn tampered_token_is_rejected() {
    let root = KeyPair::new();
    let mut builder = TokenBuilder::new();
    builder.add_code(r#"user("alice");"#).unwrap();
    let token = builder.build(root.private()).unwrap();

    let mut bytes = token.to_bytes().unwrap();
    // Flip one bit somewhere in the middle of the payload
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0x01;
    let result = Token::from_bytes(&bytes, root.public());
    assert!(result.is_err(), "tampered token must not verify");
}

#[test]
fn wrong_root_key_is_rejected() {
    let root = KeyPair::new();
    let other = KeyPair::new();
    let mut builder = TokenBuilder::new();
    builder.add_code(r#"user("alice");"#).unwrap();
    let token = builder.build(root.private()).unwrap();

    let bytes = token.to_bytes().unwrap();
    assert!(matches!(
        Token::from_bytes(&bytes, other.public()),
        Err(TokenError::InvalidBlockSignature { block: 0 })
    ));
}

#[test]
fn root_key_provider_selects_by_id() {
    let old_root = KeyPair::new();
    let new_root = KeyPair::new();
    let mut builder = TokenBuilder::new();
    builder.add_code(r#"user("alice");"#).unwrap();
    builder.set_root_key_id(2);
    let token = builder.build(new_root.private()).unwrap();
    let bytes = token.to_bytes().unwrap();

    let old_public = old_root.public().clone();
    let new_public = new_root.public().clone();
    let provider = move |id: Option<u32>| -> Result<PublicKey, TokenError> {
        match id {
            Some(1) => Ok(old_public.clone()),
            Some(2) => Ok(new_public.clone()),
            other => Err(TokenError::UnknownRootKeyId(other)),
        }
    };
    let token = Token::from_bytes(&bytes, provider).expect("provider should find key 2");
    assert_eq!(token.root_key_id(), Some(2));
}

#[test]
fn unverified_token_inspects_then_verifies() {
    let root = KeyPair::new();
    let mut builder = TokenBuilder::new();
    builder.add_code(r#"user("alice");"#).unwrap();
    builder.set_root_key_id(42);
    let token = builder.build(root.private()).unwrap();
    let text = token.to_base64().unwrap();

    let unverified = UnverifiedToken::from_base64(&text).expect("parsing needs no key");
    assert_eq!(unverified.root_key_id(), Some(42));
    assert_eq!(unverified.block_count(), 1);

    // Appending works without the root key
    let mut block = BlockBuilder::new();
    block.add_code(r#"check if operation("read");"#).unwrap();
    let appended = unverified.append(&block).unwrap();
    assert_eq!(appended.block_count(), 2);

    let verified = appended.verify(root.public()).expect("chain should verify");
    assert_eq!(verified.block_count(), 2);
}

#[test]
fn secp256r1_tokens_verify_and_attenuate() {
    let root = KeyPair::generate(Algorithm::Secp256r1);
    let mut builder = TokenBuilder::new();
    builder.add_code(r#"user("alice");"#).unwrap();
    let token = builder.build(root.private()).unwrap();

    let mut block = BlockBuilder::new();
    block.add_code(r#"check if operation("read");"#).unwrap();
    // Chain keys may switch algorithm mid-token
    let attenuated = token
        .append_with_algorithm(&block, Algorithm::Ed25519)
        .unwrap();

    let text = attenuated.to_base64().unwrap();
    let restored = Token::from_base64(&text, root.public()).expect("mixed chain should verify");
    assert_eq!(restored.block_count(), 2);
}

#[test]
fn expired_token_fails_with_current_time() {
    let root = KeyPair::new();
    let mut builder = TokenBuilder::new();
    builder
        .add_code(r#"user("alice"); check if time($t), $t <= 2020-01-01T00:00:00Z;"#)
        .unwrap();
    let token = builder.build(root.private()).unwrap();

    let mut authorizer_builder = AuthorizerBuilder::new();
    authorizer_builder.add_code("allow if true").unwrap();
    authorizer_builder.set_time().unwrap();
    let mut authorizer = authorizer_builder.build(&token).unwrap();
    assert!(matches!(
        authorizer.authorize(),
        Err(TokenError::FailedLogic(FailedLogic::Unauthorized { .. }))
    ));
}
