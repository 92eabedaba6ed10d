//! Core type definitions for the journal engine.

use std::fmt;

/// Unique identifier for a journalled transaction.
///
/// Transaction ids are strictly monotonic and never reused. The on-disk
/// field is signed so the validator can classify a negative id as garbage
/// rather than reinterpret it as an enormous unsigned value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub i64);

impl TransactionId {
    /// Creates a new transaction id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw id value.
    #[must_use]
    pub const fn as_i64(self) -> i64 {
        self.0
    }

    /// Returns the id reinterpreted as the payload hash seed.
    #[must_use]
    pub const fn hash_seed(self) -> u64 {
        self.0 as u64
    }

    /// Whether this is the bootstrap transaction of a fresh store.
    ///
    /// The bootstrap transaction writes before the in-memory counter is
    /// incremented, so it is exempt from the follows-the-predecessor
    /// ordering rule.
    #[must_use]
    pub const fn is_initial(self) -> bool {
        self.0 == 1
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_ordering() {
        let t1 = TransactionId::new(1);
        let t2 = TransactionId::new(2);
        assert!(t1 < t2);
    }

    #[test]
    fn transaction_id_initial() {
        assert!(TransactionId::new(1).is_initial());
        assert!(!TransactionId::new(2).is_initial());
        assert!(!TransactionId::new(-1).is_initial());
    }

    #[test]
    fn transaction_id_display() {
        assert_eq!(format!("{}", TransactionId::new(42)), "txn:42");
    }
}
