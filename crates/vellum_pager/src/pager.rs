//! Pager trait definition.

use std::collections::HashSet;

use crate::error::{PagerError, PagerResult};

/// Token identifying the transaction state on whose behalf mappings are
/// made.
///
/// The recovery pass registers itself with every pager it touches by
/// passing its token to [`Pager::ensure_mapped`]; when the pass is
/// disposed, [`Pager::release_tx`] lets the pager drop whatever mapping
/// state it accumulated for that token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TxState(u64);

impl TxState {
    /// Creates a transaction-state token.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw token value.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

/// A page-addressed byte window over a backing store.
///
/// Pagers present their backing as a contiguous run of fixed-size pages.
/// Callers first guarantee allocation with [`ensure_continuous`], make the
/// range accessible with [`ensure_mapped`], then borrow it with [`range`]
/// or [`range_mut`]. A borrowed range may span several pages; the slice is
/// stable for as long as the borrow lives.
///
/// # Invariants
///
/// - `ensure_continuous(p, n)` leaves at least `p + n` pages allocated
/// - `range(p, len)` returns exactly the bytes starting at page `p`
/// - growing never moves previously written bytes
/// - every destination page is unprotected exactly once before writing and
///   re-protected exactly once after; implementations check the bracketing
///   even where the protection toggle itself is a no-op
///
/// # Implementors
///
/// - [`crate::MemoryPager`] - in-memory scratch
/// - [`crate::FilePager`] - buffered file window
/// - [`crate::MmapPager`] - memory-mapped file
///
/// [`ensure_continuous`]: Pager::ensure_continuous
/// [`ensure_mapped`]: Pager::ensure_mapped
/// [`range`]: Pager::range
/// [`range_mut`]: Pager::range_mut
pub trait Pager: Send {
    /// Returns the page size in bytes (a power of two, at least 4096).
    fn page_size(&self) -> usize;

    /// Guarantees that at least `first_page + count` pages are allocated,
    /// growing the backing store if needed. New pages read as zeroes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store cannot grow.
    fn ensure_continuous(&mut self, first_page: u64, count: u64) -> PagerResult<()>;

    /// Makes `count` pages starting at `first_page` accessible to the
    /// given transaction state.
    ///
    /// # Errors
    ///
    /// Returns an error if the range lies beyond the current allocation
    /// or cannot be brought into memory.
    fn ensure_mapped(&mut self, tx: TxState, first_page: u64, count: u64) -> PagerResult<()>;

    /// Borrows `len` bytes starting at `first_page`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is not allocated or not mapped.
    fn range(&self, first_page: u64, len: usize) -> PagerResult<&[u8]>;

    /// Mutably borrows `len` bytes starting at `first_page`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range is not allocated, not mapped, or
    /// overlaps a write-protected page on an enforcing backing.
    fn range_mut(&mut self, first_page: u64, len: usize) -> PagerResult<&mut [u8]>;

    /// Removes write protection from the pages covering `len` bytes
    /// starting at `first_page`.
    ///
    /// # Errors
    ///
    /// Returns an error if any covered page is already unprotected.
    fn unprotect_range(&mut self, first_page: u64, len: usize) -> PagerResult<()>;

    /// Restores write protection on the pages covering `len` bytes
    /// starting at `first_page`.
    ///
    /// # Errors
    ///
    /// Returns an error if any covered page is not currently unprotected.
    fn protect_range(&mut self, first_page: u64, len: usize) -> PagerResult<()>;

    /// Flushes pending writes to the backing store.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> PagerResult<()>;

    /// Returns the total allocation in bytes.
    fn total_allocation_size(&self) -> u64;

    /// Returns the number of allocated pages.
    fn allocated_pages(&self) -> u64;

    /// Notifies the pager that a transaction state has been disposed,
    /// releasing any per-transaction mapping extensions.
    fn release_tx(&mut self, tx: TxState);

    /// Borrows a single page.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Pager::range`].
    fn page(&self, page_number: u64) -> PagerResult<&[u8]> {
        let len = self.page_size();
        self.range(page_number, len)
    }

    /// Mutably borrows a single page.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Pager::range_mut`].
    fn page_mut(&mut self, page_number: u64) -> PagerResult<&mut [u8]> {
        let len = self.page_size();
        self.range_mut(page_number, len)
    }
}

/// Tracks the unprotect/protect bracketing for one backing store.
///
/// The ledger does not decide whether writes are rejected (that is the
/// backing's call); it only verifies that every page is unprotected at
/// most once at a time and never re-protected without a matching
/// unprotect.
#[derive(Debug, Default)]
pub(crate) struct ProtectionLedger {
    unprotected: HashSet<u64>,
}

impl ProtectionLedger {
    /// Marks a page run as unprotected.
    pub(crate) fn unprotect(&mut self, first_page: u64, count: u64) -> PagerResult<()> {
        for page in first_page..first_page + count {
            if !self.unprotected.insert(page) {
                return Err(PagerError::UnbalancedProtection {
                    page,
                    message: "page is already unprotected".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Marks a page run as protected again.
    pub(crate) fn protect(&mut self, first_page: u64, count: u64) -> PagerResult<()> {
        for page in first_page..first_page + count {
            if !self.unprotected.remove(&page) {
                return Err(PagerError::UnbalancedProtection {
                    page,
                    message: "page was not unprotected".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Returns whether the page is currently writable.
    pub(crate) fn is_writable(&self, page: u64) -> bool {
        self.unprotected.contains(&page)
    }
}

/// Number of whole pages covering `len` bytes.
pub(crate) fn pages_for(len: usize, page_size: usize) -> u64 {
    (len as u64).div_ceil(page_size as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_balanced_bracketing() {
        let mut ledger = ProtectionLedger::default();
        ledger.unprotect(3, 2).unwrap();
        assert!(ledger.is_writable(3));
        assert!(ledger.is_writable(4));
        assert!(!ledger.is_writable(5));
        ledger.protect(3, 2).unwrap();
        assert!(!ledger.is_writable(3));
    }

    #[test]
    fn ledger_rejects_double_unprotect() {
        let mut ledger = ProtectionLedger::default();
        ledger.unprotect(1, 1).unwrap();
        let err = ledger.unprotect(1, 1).unwrap_err();
        assert!(matches!(err, PagerError::UnbalancedProtection { page: 1, .. }));
    }

    #[test]
    fn ledger_rejects_unmatched_protect() {
        let mut ledger = ProtectionLedger::default();
        let err = ledger.protect(7, 1).unwrap_err();
        assert!(matches!(err, PagerError::UnbalancedProtection { page: 7, .. }));
    }

    #[test]
    fn pages_for_rounds_up() {
        assert_eq!(pages_for(0, 4096), 0);
        assert_eq!(pages_for(1, 4096), 1);
        assert_eq!(pages_for(4096, 4096), 1);
        assert_eq!(pages_for(4097, 4096), 2);
    }
}
