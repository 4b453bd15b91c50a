//! Signature payload construction for the block chain.
//!
//! Block `n`'s signature covers the serialized block bytes, the block's
//! declared external key (for third-party blocks), and the public key of
//! block `n+1`'s key pair. External signatures cover the block bytes and
//! the chain key that signs the block, under a distinct domain tag, so
//! the two kinds of signature can never be confused for one another.

use super::keys::PublicKey;

const BLOCK_DOMAIN: &[u8] = b"\0capseal-block\0";
const EXTERNAL_DOMAIN: &[u8] = b"\0capseal-external\0";

/// Payload signed by the chain key of a block.
pub(crate) fn block_signature_payload(
    data: &[u8],
    external_key: Option<&PublicKey>,
    next_key: &PublicKey,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(BLOCK_DOMAIN.len() + data.len() + 64);
    out.extend_from_slice(BLOCK_DOMAIN);
    push_bytes(&mut out, data);
    match external_key {
        Some(key) => {
            out.push(1);
            push_key(&mut out, key);
        }
        None => out.push(0),
    }
    push_key(&mut out, next_key);
    out
}

/// Payload signed by a third party over a block it contributes.
///
/// `previous_key` is the chain key that will sign the block into the
/// token, binding the external signature to one position in one chain.
pub(crate) fn external_signature_payload(data: &[u8], previous_key: &PublicKey) -> Vec<u8> {
    let mut out = Vec::with_capacity(EXTERNAL_DOMAIN.len() + data.len() + 48);
    out.extend_from_slice(EXTERNAL_DOMAIN);
    push_bytes(&mut out, data);
    push_key(&mut out, previous_key);
    out
}

fn push_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    out.extend_from_slice(&(bytes.len() as u64).to_le_bytes());
    out.extend_from_slice(bytes);
}

fn push_key(out: &mut Vec<u8>, key: &PublicKey) {
    out.extend_from_slice(&key.algorithm().tag().to_le_bytes());
    push_bytes(out, &key.to_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::keys::KeyPair;

    #[test]
    fn test_payload_binds_next_key() {
        let next_a = KeyPair::new();
        let next_b = KeyPair::new();
        let p1 = block_signature_payload(b"data", None, next_a.public());
        let p2 = block_signature_payload(b"data", None, next_b.public());
        assert_ne!(p1, p2);
    }

    #[test]
    fn test_payload_binds_external_key() {
        let next = KeyPair::new();
        let external = KeyPair::new();
        let p1 = block_signature_payload(b"data", None, next.public());
        let p2 = block_signature_payload(b"data", Some(external.public()), next.public());
        assert_ne!(p1, p2);
    }

    #[test]
    fn test_block_and_external_domains_differ() {
        let key = KeyPair::new();
        let block = block_signature_payload(b"data", None, key.public());
        let external = external_signature_payload(b"data", key.public());
        assert_ne!(block, external);
    }

    #[test]
    fn test_payload_deterministic() {
        let next = KeyPair::new();
        assert_eq!(
            block_signature_payload(b"data", None, next.public()),
            block_signature_payload(b"data", None, next.public())
        );
    }
}
