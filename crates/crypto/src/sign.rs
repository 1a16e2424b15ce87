//! Signature suites.
//!
//! The suite accepted by a network is a consensus parameter; every suite
//! verifies a detached signature over the request bytes without the
//! signature field. `Empty` accepts everything and is meant for tests.

use crate::{hash::sha256, CryptoError};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signer, Verifier};
use rand::rngs::OsRng;
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SignatureSuite {
    /// Ed25519 with randomly generated keys.
    Ed25519,
    /// Ed25519 with keys derived deterministically from provided entropy;
    /// verification is identical to `Ed25519`.
    Ed25519Det,
    /// The empty suite: zero-length signatures, always valid.
    Empty,
}

impl SignatureSuite {
    pub fn name(&self) -> &'static str {
        match self {
            SignatureSuite::Ed25519 => "ed25519",
            SignatureSuite::Ed25519Det => "ed25519det",
            SignatureSuite::Empty => "empty",
        }
    }
}

impl FromStr for SignatureSuite {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ed25519" => Ok(SignatureSuite::Ed25519),
            "ed25519det" => Ok(SignatureSuite::Ed25519Det),
            "empty" => Ok(SignatureSuite::Empty),
            other => Err(CryptoError::UnknownSuite(other.to_string())),
        }
    }
}

impl fmt::Display for SignatureSuite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A signing key pair of some suite.
#[derive(Clone)]
pub struct KeyPair {
    suite: SignatureSuite,
    signing: Option<ed25519_dalek::SigningKey>,
}

impl KeyPair {
    /// Generates a fresh key pair. For `Ed25519Det` callers should prefer
    /// [`KeyPair::from_entropy`].
    pub fn generate(suite: SignatureSuite) -> Self {
        let signing = match suite {
            SignatureSuite::Empty => None,
            _ => Some(ed25519_dalek::SigningKey::generate(&mut OsRng)),
        };
        Self { suite, signing }
    }

    /// Derives the key pair deterministically from entropy: the secret key
    /// is the SHA-256 of the provided bytes.
    pub fn from_entropy(suite: SignatureSuite, entropy: &[u8]) -> Self {
        let signing = match suite {
            SignatureSuite::Empty => None,
            _ => Some(ed25519_dalek::SigningKey::from_bytes(&sha256(entropy))),
        };
        Self { suite, signing }
    }

    pub fn suite(&self) -> SignatureSuite {
        self.suite
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        match &self.signing {
            None => Vec::new(),
            Some(key) => key.sign(message).to_bytes().to_vec(),
        }
    }

    pub fn public_key(&self) -> PublicKey {
        let bytes = match &self.signing {
            None => Vec::new(),
            Some(key) => key.verifying_key().to_bytes().to_vec(),
        };
        PublicKey {
            suite: self.suite,
            bytes,
        }
    }
}

/// A verification key of some suite. The byte content is opaque for the
/// `Empty` suite, which lets tests store arbitrary key strings.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PublicKey {
    suite: SignatureSuite,
    bytes: Vec<u8>,
}

impl PublicKey {
    pub fn new(suite: SignatureSuite, bytes: Vec<u8>) -> Self {
        Self { suite, bytes }
    }

    /// Decodes the base64 key material stored on accounts. The bytes are
    /// only validated when a real suite verifies with them.
    pub fn from_base64(suite: SignatureSuite, encoded: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| CryptoError::InvalidKey(format!("bad base64: {e}")))?;
        Ok(Self { suite, bytes })
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn suite(&self) -> SignatureSuite {
        self.suite
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Verifies a detached signature. Never panics on malformed input:
    /// undecodable keys or signatures verify as `false` for real suites.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        match self.suite {
            SignatureSuite::Empty => true,
            SignatureSuite::Ed25519 | SignatureSuite::Ed25519Det => {
                let Ok(key_bytes) = <&[u8; 32]>::try_from(self.bytes.as_slice()) else {
                    return false;
                };
                let Ok(key) = ed25519_dalek::VerifyingKey::from_bytes(key_bytes) else {
                    return false;
                };
                let Ok(sig_bytes) = <&[u8; 64]>::try_from(signature) else {
                    return false;
                };
                let sig = ed25519_dalek::Signature::from_bytes(sig_bytes);
                key.verify(message, &sig).is_ok()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_and_verify() {
        let pair = KeyPair::generate(SignatureSuite::Ed25519);
        let msg = b"an admissible request";
        let sig = pair.sign(msg);
        assert!(pair.public_key().verify(msg, &sig));
        assert!(!pair.public_key().verify(b"another message", &sig));
    }

    #[test]
    fn deterministic_derivation_is_stable() {
        let a = KeyPair::from_entropy(SignatureSuite::Ed25519Det, b"seed");
        let b = KeyPair::from_entropy(SignatureSuite::Ed25519Det, b"seed");
        assert_eq!(a.public_key().as_bytes(), b.public_key().as_bytes());
    }

    #[test]
    fn empty_suite_accepts_anything() {
        let key = PublicKey::from_base64(SignatureSuite::Empty, "MAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA")
            .unwrap();
        assert!(key.verify(b"whatever", &[]));
    }

    #[test]
    fn malformed_key_fails_closed() {
        let key = PublicKey::new(SignatureSuite::Ed25519, vec![1, 2, 3]);
        assert!(!key.verify(b"msg", &[0u8; 64]));
    }
}
