//! Key pairs for block signing.
//!
//! Every block in a token chain owns an ephemeral asymmetric key pair.
//! Ed25519 is the default algorithm; NIST P-256 ECDSA (`secp256r1`) is
//! available as an alternative. Keys import and export as raw bytes,
//! the textual `<algorithm>/<hex>` form, PEM and DER.

use ed25519_dalek::Signer as _;
use p256::ecdsa::signature::Signer as _;
use p256::ecdsa::signature::Verifier as _;
use pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{Result, TokenError};

/// Signature algorithm of a key pair.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum Algorithm {
    #[default]
    Ed25519,
    Secp256r1,
}

impl Algorithm {
    /// Lowercase name used in the textual key form.
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Ed25519 => "ed25519",
            Algorithm::Secp256r1 => "secp256r1",
        }
    }

    /// Parse an algorithm name.
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "ed25519" => Ok(Algorithm::Ed25519),
            "secp256r1" => Ok(Algorithm::Secp256r1),
            other => Err(TokenError::InvalidKey(format!(
                "unknown algorithm: {other}"
            ))),
        }
    }

    pub(crate) fn tag(&self) -> u32 {
        match self {
            Algorithm::Ed25519 => 0,
            Algorithm::Secp256r1 => 1,
        }
    }
}

impl std::fmt::Display for Algorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A public key, stored as validated raw bytes.
///
/// Kept as `(algorithm, bytes)` rather than the backend key types so it
/// can be ordered, hashed, serialized, and used as a datalog scope.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey {
    algorithm: Algorithm,
    bytes: Vec<u8>,
}

impl PublicKey {
    /// Build a public key from raw bytes (32 bytes Ed25519, SEC1 for P-256).
    pub fn from_bytes(bytes: &[u8], algorithm: Algorithm) -> Result<Self> {
        match algorithm {
            Algorithm::Ed25519 => {
                let arr: [u8; 32] = bytes.try_into().map_err(|_| {
                    TokenError::InvalidKey("ed25519 public key must be 32 bytes".into())
                })?;
                ed25519_dalek::VerifyingKey::from_bytes(&arr)
                    .map_err(|e| TokenError::InvalidKey(format!("invalid ed25519 key: {e}")))?;
            }
            Algorithm::Secp256r1 => {
                p256::ecdsa::VerifyingKey::from_sec1_bytes(bytes)
                    .map_err(|e| TokenError::InvalidKey(format!("invalid secp256r1 key: {e}")))?;
            }
        }
        Ok(Self {
            algorithm,
            bytes: bytes.to_vec(),
        })
    }

    /// Parse the textual form `<algorithm>/<hex>`.
    pub fn from_hex(text: &str) -> Result<Self> {
        let (alg, hex_part) = text.split_once('/').ok_or_else(|| {
            TokenError::InvalidKey("expected <algorithm>/<hex> public key".into())
        })?;
        let algorithm = Algorithm::from_name(alg)?;
        let bytes = hex::decode(hex_part)
            .map_err(|e| TokenError::InvalidKey(format!("invalid hex: {e}")))?;
        Self::from_bytes(&bytes, algorithm)
    }

    /// Import from a SubjectPublicKeyInfo PEM document.
    pub fn from_pem(pem: &str) -> Result<Self> {
        if let Ok(key) = ed25519_dalek::VerifyingKey::from_public_key_pem(pem) {
            return Self::from_bytes(key.as_bytes(), Algorithm::Ed25519);
        }
        let key = p256::ecdsa::VerifyingKey::from_public_key_pem(pem)
            .map_err(|e| TokenError::InvalidKey(format!("invalid public key PEM: {e}")))?;
        Self::from_bytes(key.to_encoded_point(true).as_bytes(), Algorithm::Secp256r1)
    }

    /// Import from a SubjectPublicKeyInfo DER document.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        if let Ok(key) = ed25519_dalek::VerifyingKey::from_public_key_der(der) {
            return Self::from_bytes(key.as_bytes(), Algorithm::Ed25519);
        }
        let key = p256::ecdsa::VerifyingKey::from_public_key_der(der)
            .map_err(|e| TokenError::InvalidKey(format!("invalid public key DER: {e}")))?;
        Self::from_bytes(key.to_encoded_point(true).as_bytes(), Algorithm::Secp256r1)
    }

    /// Raw byte encoding.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    /// Textual form `<algorithm>/<hex>`.
    pub fn to_hex(&self) -> String {
        format!("{}/{}", self.algorithm.name(), hex::encode(&self.bytes))
    }

    /// Export as a SubjectPublicKeyInfo PEM document.
    pub fn to_pem(&self) -> Result<String> {
        match self.algorithm {
            Algorithm::Ed25519 => self
                .ed25519()?
                .to_public_key_pem(LineEnding::LF)
                .map_err(|e| TokenError::InvalidKey(format!("PEM export failed: {e}"))),
            Algorithm::Secp256r1 => self
                .secp256r1()?
                .to_public_key_pem(LineEnding::LF)
                .map_err(|e| TokenError::InvalidKey(format!("PEM export failed: {e}"))),
        }
    }

    /// Export as a SubjectPublicKeyInfo DER document.
    pub fn to_der(&self) -> Result<Vec<u8>> {
        let doc = match self.algorithm {
            Algorithm::Ed25519 => self.ed25519()?.to_public_key_der(),
            Algorithm::Secp256r1 => self.secp256r1()?.to_public_key_der(),
        };
        doc.map(|d| d.as_bytes().to_vec())
            .map_err(|e| TokenError::InvalidKey(format!("DER export failed: {e}")))
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Verify a detached signature over `message`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<()> {
        match self.algorithm {
            Algorithm::Ed25519 => {
                let sig = ed25519_dalek::Signature::from_slice(signature)
                    .map_err(|_| TokenError::SignatureInvalid)?;
                self.ed25519()?
                    .verify_strict(message, &sig)
                    .map_err(|_| TokenError::SignatureInvalid)
            }
            Algorithm::Secp256r1 => {
                let sig = p256::ecdsa::Signature::from_slice(signature)
                    .map_err(|_| TokenError::SignatureInvalid)?;
                self.secp256r1()?
                    .verify(message, &sig)
                    .map_err(|_| TokenError::SignatureInvalid)
            }
        }
    }

    fn ed25519(&self) -> Result<ed25519_dalek::VerifyingKey> {
        let arr: [u8; 32] = self.bytes.as_slice().try_into().map_err(|_| {
            TokenError::InvalidKey("ed25519 public key must be 32 bytes".into())
        })?;
        ed25519_dalek::VerifyingKey::from_bytes(&arr)
            .map_err(|e| TokenError::InvalidKey(format!("invalid ed25519 key: {e}")))
    }

    fn secp256r1(&self) -> Result<p256::ecdsa::VerifyingKey> {
        p256::ecdsa::VerifyingKey::from_sec1_bytes(&self.bytes)
            .map_err(|e| TokenError::InvalidKey(format!("invalid secp256r1 key: {e}")))
    }
}

impl std::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Serialize, Deserialize)]
struct PublicKeyRepr {
    algorithm: Algorithm,
    bytes: Vec<u8>,
}

impl Serialize for PublicKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        PublicKeyRepr {
            algorithm: self.algorithm,
            bytes: self.bytes.clone(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let repr = PublicKeyRepr::deserialize(deserializer)?;
        PublicKey::from_bytes(&repr.bytes, repr.algorithm).map_err(serde::de::Error::custom)
    }
}

/// A private signing key.
///
/// Exported byte forms are wrapped in [`Zeroizing`] so callers do not
/// leave key material in freed memory; the backend key types zeroize
/// themselves on drop.
#[derive(Clone)]
pub struct PrivateKey(KeyInner);

#[derive(Clone)]
enum KeyInner {
    Ed25519(ed25519_dalek::SigningKey),
    Secp256r1(p256::ecdsa::SigningKey),
}

impl PrivateKey {
    /// Generate a random Ed25519 private key.
    pub fn generate() -> Self {
        Self::generate_with_algorithm(Algorithm::Ed25519)
    }

    /// Generate a random private key with the given algorithm.
    pub fn generate_with_algorithm(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Ed25519 => Self(KeyInner::Ed25519(ed25519_dalek::SigningKey::generate(
                &mut rand::thread_rng(),
            ))),
            Algorithm::Secp256r1 => Self(KeyInner::Secp256r1(p256::ecdsa::SigningKey::random(
                &mut rand::thread_rng(),
            ))),
        }
    }

    /// Reconstruct a private key from raw bytes.
    pub fn from_bytes(bytes: &[u8], algorithm: Algorithm) -> Result<Self> {
        match algorithm {
            Algorithm::Ed25519 => {
                let arr: [u8; 32] = bytes.try_into().map_err(|_| {
                    TokenError::InvalidKey("ed25519 private key must be 32 bytes".into())
                })?;
                Ok(Self(KeyInner::Ed25519(ed25519_dalek::SigningKey::from_bytes(
                    &arr,
                ))))
            }
            Algorithm::Secp256r1 => {
                let key = p256::ecdsa::SigningKey::from_slice(bytes)
                    .map_err(|e| TokenError::InvalidKey(format!("invalid secp256r1 key: {e}")))?;
                Ok(Self(KeyInner::Secp256r1(key)))
            }
        }
    }

    /// Parse the textual form `<algorithm>-private/<hex>`.
    pub fn from_hex(text: &str) -> Result<Self> {
        let (prefix, hex_part) = text.split_once('/').ok_or_else(|| {
            TokenError::InvalidKey("expected <algorithm>-private/<hex> private key".into())
        })?;
        let alg_name = prefix.strip_suffix("-private").ok_or_else(|| {
            TokenError::InvalidKey("private key prefix must end in -private".into())
        })?;
        let algorithm = Algorithm::from_name(alg_name)?;
        let bytes = Zeroizing::new(
            hex::decode(hex_part)
                .map_err(|e| TokenError::InvalidKey(format!("invalid hex: {e}")))?,
        );
        Self::from_bytes(&bytes, algorithm)
    }

    /// Import from a PKCS#8 PEM document.
    pub fn from_pem(pem: &str) -> Result<Self> {
        if let Ok(key) = ed25519_dalek::SigningKey::from_pkcs8_pem(pem) {
            return Ok(Self(KeyInner::Ed25519(key)));
        }
        let key = p256::ecdsa::SigningKey::from_pkcs8_pem(pem)
            .map_err(|e| TokenError::InvalidKey(format!("invalid private key PEM: {e}")))?;
        Ok(Self(KeyInner::Secp256r1(key)))
    }

    /// Import from a PKCS#8 DER document.
    pub fn from_der(der: &[u8]) -> Result<Self> {
        if let Ok(key) = ed25519_dalek::SigningKey::from_pkcs8_der(der) {
            return Ok(Self(KeyInner::Ed25519(key)));
        }
        let key = p256::ecdsa::SigningKey::from_pkcs8_der(der)
            .map_err(|e| TokenError::InvalidKey(format!("invalid private key DER: {e}")))?;
        Ok(Self(KeyInner::Secp256r1(key)))
    }

    /// Raw byte encoding.
    pub fn to_bytes(&self) -> Zeroizing<Vec<u8>> {
        match &self.0 {
            KeyInner::Ed25519(key) => Zeroizing::new(key.to_bytes().to_vec()),
            KeyInner::Secp256r1(key) => Zeroizing::new(key.to_bytes().to_vec()),
        }
    }

    /// Textual form `<algorithm>-private/<hex>`.
    pub fn to_hex(&self) -> String {
        format!(
            "{}-private/{}",
            self.algorithm().name(),
            hex::encode(self.to_bytes().as_slice())
        )
    }

    /// Export as a PKCS#8 PEM document.
    pub fn to_pem(&self) -> Result<Zeroizing<String>> {
        let pem = match &self.0 {
            KeyInner::Ed25519(key) => key.to_pkcs8_pem(LineEnding::LF),
            KeyInner::Secp256r1(key) => key.to_pkcs8_pem(LineEnding::LF),
        };
        pem.map_err(|e| TokenError::InvalidKey(format!("PEM export failed: {e}")))
    }

    /// Export as a PKCS#8 DER document.
    pub fn to_der(&self) -> Result<Zeroizing<Vec<u8>>> {
        let der = match &self.0 {
            KeyInner::Ed25519(key) => key.to_pkcs8_der(),
            KeyInner::Secp256r1(key) => key.to_pkcs8_der(),
        };
        der.map(|d| Zeroizing::new(d.as_bytes().to_vec()))
            .map_err(|e| TokenError::InvalidKey(format!("DER export failed: {e}")))
    }

    pub fn algorithm(&self) -> Algorithm {
        match &self.0 {
            KeyInner::Ed25519(_) => Algorithm::Ed25519,
            KeyInner::Secp256r1(_) => Algorithm::Secp256r1,
        }
    }

    /// The corresponding public key.
    pub fn public(&self) -> PublicKey {
        match &self.0 {
            KeyInner::Ed25519(key) => PublicKey {
                algorithm: Algorithm::Ed25519,
                bytes: key.verifying_key().as_bytes().to_vec(),
            },
            KeyInner::Secp256r1(key) => PublicKey {
                algorithm: Algorithm::Secp256r1,
                bytes: key
                    .verifying_key()
                    .to_encoded_point(true)
                    .as_bytes()
                    .to_vec(),
            },
        }
    }

    /// Produce a detached signature over `message`.
    ///
    /// Both backends sign deterministically (Ed25519 and RFC 6979 ECDSA),
    /// so repeated signing of the same payload yields the same bytes.
    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        match &self.0 {
            KeyInner::Ed25519(key) => key.sign(message).to_bytes().to_vec(),
            KeyInner::Secp256r1(key) => {
                let sig: p256::ecdsa::Signature = key.sign(message);
                sig.to_bytes().to_vec()
            }
        }
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never expose private key material in debug output
        f.debug_struct("PrivateKey")
            .field("algorithm", &self.algorithm())
            .finish_non_exhaustive()
    }
}

/// A signing key pair (private key plus cached public key).
#[derive(Debug, Clone)]
pub struct KeyPair {
    private: PrivateKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a random Ed25519 key pair.
    pub fn new() -> Self {
        Self::generate(Algorithm::Ed25519)
    }

    /// Generate a random key pair with the given algorithm.
    pub fn generate(algorithm: Algorithm) -> Self {
        let private = PrivateKey::generate_with_algorithm(algorithm);
        let public = private.public();
        Self { private, public }
    }

    /// Build a key pair from an existing private key.
    pub fn from_private_key(private: &PrivateKey) -> Self {
        let public = private.public();
        Self {
            private: private.clone(),
            public,
        }
    }

    pub fn private(&self) -> &PrivateKey {
        &self.private
    }

    pub fn public(&self) -> &PublicKey {
        &self.public
    }

    pub fn algorithm(&self) -> Algorithm {
        self.private.algorithm()
    }
}

impl Default for KeyPair {
    fn default() -> Self {
        Self::new()
    }
}
