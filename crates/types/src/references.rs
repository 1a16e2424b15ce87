//! References to committed transactions and to storage-resident objects.

use crate::error::MarshallingError;
use crate::marshalling::{Marshallable, MarshallingContext, UnmarshallingContext};
use std::fmt;

/// A 32-byte opaque identifier of a previously committed transaction: the
/// SHA-256 of the committed request bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionReference(pub [u8; 32]);

impl TransactionReference {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for TransactionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TransactionReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx:{}", &hex::encode(self.0)[..16])
    }
}

impl Marshallable for TransactionReference {
    fn marshal(&self, w: &mut MarshallingContext) -> Result<(), MarshallingError> {
        w.write_raw(&self.0);
        Ok(())
    }

    fn unmarshal(r: &mut UnmarshallingContext<'_>) -> Result<Self, MarshallingError> {
        let bytes = r.read_raw(32)?;
        Ok(Self(bytes.try_into().unwrap()))
    }
}

/// Identifies one storage object: the transaction that created it plus the
/// progressive number of the object within that transaction's allocation.
///
/// Totally ordered lexicographically on `(transaction, progressive)`; this
/// order is used wherever determinism requires iterating objects.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorageReference {
    pub transaction: TransactionReference,
    pub progressive: u64,
}

impl StorageReference {
    pub fn new(transaction: TransactionReference, progressive: u64) -> Self {
        Self {
            transaction,
            progressive,
        }
    }

    /// Encoding used inside composite shapes (histories, compact updates,
    /// transfers) where the containing selector already fixes the kind.
    pub fn marshal_without_selector(
        &self,
        w: &mut MarshallingContext,
    ) -> Result<(), MarshallingError> {
        self.transaction.marshal(w)?;
        w.write_u64(self.progressive);
        Ok(())
    }

    pub fn unmarshal_without_selector(
        r: &mut UnmarshallingContext<'_>,
    ) -> Result<Self, MarshallingError> {
        let transaction = TransactionReference::unmarshal(r)?;
        let progressive = r.read_u64()?;
        Ok(Self {
            transaction,
            progressive,
        })
    }
}

impl fmt::Display for StorageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.transaction, self.progressive)
    }
}

impl fmt::Debug for StorageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}#{}", self.transaction, self.progressive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(b: u8) -> TransactionReference {
        TransactionReference([b; 32])
    }

    #[test]
    fn storage_reference_order_is_lexicographic() {
        let a = StorageReference::new(tx(1), 9);
        let b = StorageReference::new(tx(2), 0);
        let c = StorageReference::new(tx(2), 1);
        assert!(a < b && b < c);
    }

    #[test]
    fn reference_roundtrip() {
        let r = StorageReference::new(tx(7), 42);
        let mut w = MarshallingContext::new();
        r.marshal_without_selector(&mut w).unwrap();
        let bytes = w.finish();
        assert_eq!(bytes.len(), 40);
        let mut ctx = UnmarshallingContext::new(&bytes);
        assert_eq!(
            StorageReference::unmarshal_without_selector(&mut ctx).unwrap(),
            r
        );
    }
}
