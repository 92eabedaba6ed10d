//! In-memory pager for scratch regions and testing.

use std::collections::HashSet;

use crate::error::{PagerError, PagerResult};
use crate::pager::{pages_for, Pager, ProtectionLedger, TxState};

/// An in-memory pager.
///
/// This backing stores all pages in a `Vec<u8>` and is suitable for:
/// - Recovery scratch regions (decompressed transaction payloads)
/// - Unit and integration tests
/// - Ephemeral stores that don't need persistence
///
/// # Write Protection
///
/// By default, protection toggles only verify bracketing. A pager created
/// with [`MemoryPager::with_protection`] additionally rejects mutable
/// access to protected pages, which lets tests prove that every write is
/// bracketed by an unprotect/protect pair.
///
/// # Example
///
/// ```rust
/// use vellum_pager::{MemoryPager, Pager, TxState};
///
/// let mut pager = MemoryPager::new(4096);
/// pager.ensure_continuous(0, 1).unwrap();
/// pager.ensure_mapped(TxState::new(0), 0, 1).unwrap();
/// pager.range_mut(0, 4).unwrap().copy_from_slice(b"page");
/// assert_eq!(pager.range(0, 4).unwrap(), b"page".as_slice());
/// ```
#[derive(Debug)]
pub struct MemoryPager {
    page_size: usize,
    data: Vec<u8>,
    ledger: ProtectionLedger,
    enforce_protection: bool,
    active_txs: HashSet<u64>,
}

impl MemoryPager {
    /// Creates a new empty in-memory pager.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            data: Vec::new(),
            ledger: ProtectionLedger::default(),
            enforce_protection: false,
            active_txs: HashSet::new(),
        }
    }

    /// Creates an in-memory pager that rejects writes to protected pages.
    ///
    /// Freshly allocated pages start out protected; a caller must
    /// unprotect them before mutating.
    #[must_use]
    pub fn with_protection(page_size: usize) -> Self {
        Self {
            enforce_protection: true,
            ..Self::new(page_size)
        }
    }

    /// Creates an in-memory pager seeded with existing bytes.
    ///
    /// The data is zero-padded up to the next whole page. Useful for
    /// handing a prebuilt journal image to the recovery engine.
    #[must_use]
    pub fn with_data(page_size: usize, mut data: Vec<u8>) -> Self {
        let padded = (data.len() as u64).div_ceil(page_size as u64) * page_size as u64;
        data.resize(padded as usize, 0);
        Self {
            data,
            ..Self::new(page_size)
        }
    }

    /// Returns a copy of all bytes in the pager.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.clone()
    }

    fn check_range(&self, first_page: u64, len: usize) -> PagerResult<(usize, usize)> {
        let start = first_page * self.page_size as u64;
        let end = start + len as u64;
        if end > self.data.len() as u64 {
            return Err(PagerError::BeyondAllocation {
                first_page,
                count: pages_for(len, self.page_size),
                allocated: self.allocated_pages(),
            });
        }
        Ok((start as usize, end as usize))
    }
}

impl Pager for MemoryPager {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn ensure_continuous(&mut self, first_page: u64, count: u64) -> PagerResult<()> {
        let needed = (first_page + count) * self.page_size as u64;
        if needed > self.data.len() as u64 {
            self.data.resize(needed as usize, 0);
        }
        Ok(())
    }

    fn ensure_mapped(&mut self, tx: TxState, first_page: u64, count: u64) -> PagerResult<()> {
        let allocated = self.allocated_pages();
        if first_page + count > allocated {
            return Err(PagerError::BeyondAllocation {
                first_page,
                count,
                allocated,
            });
        }
        self.active_txs.insert(tx.id());
        Ok(())
    }

    fn range(&self, first_page: u64, len: usize) -> PagerResult<&[u8]> {
        let (start, end) = self.check_range(first_page, len)?;
        Ok(&self.data[start..end])
    }

    fn range_mut(&mut self, first_page: u64, len: usize) -> PagerResult<&mut [u8]> {
        let (start, end) = self.check_range(first_page, len)?;
        if self.enforce_protection {
            for page in first_page..first_page + pages_for(len, self.page_size) {
                if !self.ledger.is_writable(page) {
                    return Err(PagerError::ProtectedWrite { page });
                }
            }
        }
        Ok(&mut self.data[start..end])
    }

    fn unprotect_range(&mut self, first_page: u64, len: usize) -> PagerResult<()> {
        self.ledger.unprotect(first_page, pages_for(len, self.page_size))
    }

    fn protect_range(&mut self, first_page: u64, len: usize) -> PagerResult<()> {
        self.ledger.protect(first_page, pages_for(len, self.page_size))
    }

    fn flush(&mut self) -> PagerResult<()> {
        // Nothing pending for an in-memory backing
        Ok(())
    }

    fn total_allocation_size(&self) -> u64 {
        self.data.len() as u64
    }

    fn allocated_pages(&self) -> u64 {
        self.data.len() as u64 / self.page_size as u64
    }

    fn release_tx(&mut self, tx: TxState) {
        self.active_txs.remove(&tx.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: usize = 4096;
    const TX: TxState = TxState::new(7);

    #[test]
    fn memory_new_is_empty() {
        let pager = MemoryPager::new(PAGE);
        assert_eq!(pager.allocated_pages(), 0);
        assert_eq!(pager.total_allocation_size(), 0);
    }

    #[test]
    fn memory_grow_zero_fills() {
        let mut pager = MemoryPager::new(PAGE);
        pager.ensure_continuous(2, 1).unwrap();
        assert_eq!(pager.allocated_pages(), 3);
        assert!(pager.range(0, 3 * PAGE).unwrap().iter().all(|b| *b == 0));
    }

    #[test]
    fn memory_grow_preserves_data() {
        let mut pager = MemoryPager::new(PAGE);
        pager.ensure_continuous(0, 1).unwrap();
        pager.range_mut(0, 4).unwrap().copy_from_slice(b"keep");
        pager.ensure_continuous(0, 8).unwrap();
        assert_eq!(pager.range(0, 4).unwrap(), b"keep".as_slice());
    }

    #[test]
    fn memory_range_spans_pages() {
        let mut pager = MemoryPager::new(PAGE);
        pager.ensure_continuous(0, 3).unwrap();
        let range = pager.range_mut(1, 2 * PAGE).unwrap();
        range.fill(0xAB);
        assert!(pager.range(1, 2 * PAGE).unwrap().iter().all(|b| *b == 0xAB));
        assert!(pager.range(0, PAGE).unwrap().iter().all(|b| *b == 0));
    }

    #[test]
    fn memory_range_past_end_fails() {
        let mut pager = MemoryPager::new(PAGE);
        pager.ensure_continuous(0, 1).unwrap();
        let result = pager.range(0, 2 * PAGE);
        assert!(matches!(result, Err(PagerError::BeyondAllocation { .. })));
    }

    #[test]
    fn memory_ensure_mapped_rejects_unallocated() {
        let mut pager = MemoryPager::new(PAGE);
        pager.ensure_continuous(0, 2).unwrap();
        assert!(pager.ensure_mapped(TX, 0, 2).is_ok());
        let result = pager.ensure_mapped(TX, 1, 4);
        assert!(matches!(result, Err(PagerError::BeyondAllocation { .. })));
    }

    #[test]
    fn memory_with_data_pads_to_page() {
        let pager = MemoryPager::with_data(PAGE, vec![0xFF; 100]);
        assert_eq!(pager.allocated_pages(), 1);
        let range = pager.range(0, PAGE).unwrap();
        assert!(range[..100].iter().all(|b| *b == 0xFF));
        assert!(range[100..].iter().all(|b| *b == 0));
    }

    #[test]
    fn memory_protection_enforced() {
        let mut pager = MemoryPager::with_protection(PAGE);
        pager.ensure_continuous(0, 2).unwrap();

        let result = pager.range_mut(0, PAGE);
        assert!(matches!(result, Err(PagerError::ProtectedWrite { page: 0 })));

        pager.unprotect_range(0, PAGE).unwrap();
        pager.range_mut(0, PAGE).unwrap().fill(0x11);
        pager.protect_range(0, PAGE).unwrap();

        let result = pager.range_mut(0, PAGE);
        assert!(matches!(result, Err(PagerError::ProtectedWrite { page: 0 })));
    }

    #[test]
    fn memory_protection_bracketing_checked() {
        let mut pager = MemoryPager::new(PAGE);
        pager.ensure_continuous(0, 1).unwrap();
        pager.unprotect_range(0, PAGE).unwrap();
        assert!(pager.unprotect_range(0, PAGE).is_err());
        pager.protect_range(0, PAGE).unwrap();
        assert!(pager.protect_range(0, PAGE).is_err());
    }

    #[test]
    fn memory_release_tx_clears_registration() {
        let mut pager = MemoryPager::new(PAGE);
        pager.ensure_continuous(0, 1).unwrap();
        pager.ensure_mapped(TX, 0, 1).unwrap();
        assert!(pager.active_txs.contains(&TX.id()));
        pager.release_tx(TX);
        assert!(pager.active_txs.is_empty());
    }
}
