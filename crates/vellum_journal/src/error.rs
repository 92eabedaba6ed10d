//! Error types for the journal engine.

use thiserror::Error;
use vellum_pager::PagerError;

use crate::types::TransactionId;

/// Result type for journal operations.
pub type JournalResult<T> = Result<T, JournalError>;

/// Errors that can occur while reading a journal.
///
/// Only two kinds of failure surface as `Err`: resource errors from the
/// pagers and structural corruption. Recoverable tail defects (garbage or
/// torn tails, decompression failures) never do - they end the pass
/// cleanly, set the header-update flag, and report through the recovery
/// callback.
#[derive(Debug, Error)]
pub enum JournalError {
    /// Pager resource error.
    #[error("pager error: {0}")]
    Pager(#[from] PagerError),

    /// The journal violates a structural invariant.
    ///
    /// A hash-valid transaction in the wrong place, a page reference past
    /// the transaction's own high-water mark, an echoed page number that
    /// does not match, or a payload overrun. The store must refuse to
    /// open on this error.
    #[error("journal corruption in {journal}: transaction {tx_id}: {message}")]
    Corruption {
        /// Name of the offending journal file.
        journal: String,
        /// Id of the offending transaction.
        tx_id: i64,
        /// The violated invariant.
        message: String,
    },
}

impl JournalError {
    /// Creates a structural corruption error.
    pub fn corruption(
        journal: impl Into<String>,
        tx_id: TransactionId,
        message: impl Into<String>,
    ) -> Self {
        Self::Corruption {
            journal: journal.into(),
            tx_id: tx_id.as_i64(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corruption_display_names_journal_and_transaction() {
        let err = JournalError::corruption(
            "journal.0001",
            TransactionId::new(4),
            "does not follow transaction txn:2",
        );
        let text = err.to_string();
        assert!(text.contains("journal.0001"));
        assert!(text.contains('4'));
        assert!(text.contains("does not follow"));
    }
}
