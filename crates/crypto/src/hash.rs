//! SHA-256 hashing and the derivation of transaction references.

use arca_types::marshalling::{to_bytes, Marshallable};
use arca_types::{TransactionReference, TransactionRequest};
use sha2::{Digest, Sha256};

/// SHA-256 of arbitrary bytes.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// The reference of a request: the hash of its full canonical encoding.
/// This is the identity replayed requests are deduplicated by.
pub fn reference_of(request: &TransactionRequest) -> Result<TransactionReference, crate::CryptoError> {
    let bytes = to_bytes(request)?;
    Ok(TransactionReference(sha256(&bytes)))
}

/// Hash of any marshallable bean's canonical bytes.
pub fn hash_of<T: Marshallable>(bean: &T) -> Result<[u8; 32], crate::CryptoError> {
    Ok(sha256(&to_bytes(bean)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        // SHA-256 of the empty string.
        assert_eq!(
            hex::encode(sha256(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
