//! Memory-mapped pager.
//!
//! The only module in the workspace that uses `unsafe`: the mapping calls
//! themselves. Everything layered on top works through checked slices.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};
use tracing::debug;

use crate::error::{PagerError, PagerResult};
use crate::pager::{pages_for, Pager, ProtectionLedger, TxState};

/// A memory-mapped file pager.
///
/// The whole file is mapped read-write; growing the backing store extends
/// the file with `set_len` and remaps. Previously returned borrows cannot
/// outlive a remap (the borrow checker ties them to the pager), so a grow
/// never invalidates live slices.
///
/// # Durability
///
/// [`Pager::flush`] flushes the mapping. The OS may write pages back
/// earlier at its own discretion.
#[derive(Debug)]
pub struct MmapPager {
    path: PathBuf,
    file: File,
    /// `None` while the file is empty (a zero-length mapping is invalid).
    map: Option<MmapMut>,
    page_size: usize,
    allocated_pages: u64,
    ledger: ProtectionLedger,
    active_txs: HashSet<u64>,
}

impl MmapPager {
    /// Opens or creates a memory-mapped pager at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or mapped, or its
    /// length is not a whole number of pages.
    pub fn open(path: &Path, page_size: usize) -> PagerResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let len = file.metadata()?.len();
        if len % page_size as u64 != 0 {
            return Err(PagerError::UnalignedLength { len, page_size });
        }

        let map = if len == 0 {
            None
        } else {
            Some(map_file(&file)?)
        };

        Ok(Self {
            path: path.to_path_buf(),
            file,
            map,
            page_size,
            allocated_pages: len / page_size as u64,
            ledger: ProtectionLedger::default(),
            active_txs: HashSet::new(),
        })
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn check_range(&self, first_page: u64, len: usize) -> PagerResult<(usize, usize)> {
        let start = first_page * self.page_size as u64;
        let end = start + len as u64;
        if end > self.total_allocation_size() {
            return Err(PagerError::BeyondAllocation {
                first_page,
                count: pages_for(len, self.page_size),
                allocated: self.allocated_pages,
            });
        }
        Ok((start as usize, end as usize))
    }

    fn mapping(&self, first_page: u64, len: usize) -> PagerResult<&MmapMut> {
        self.map
            .as_ref()
            .ok_or(PagerError::NotMapped { first_page, len })
    }
}

fn map_file(file: &File) -> PagerResult<MmapMut> {
    // Safety: the pager owns the file handle for its whole lifetime and
    // is the single writer to the mapping.
    let map = unsafe { MmapOptions::new().map_mut(file)? };
    Ok(map)
}

impl Pager for MmapPager {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn ensure_continuous(&mut self, first_page: u64, count: u64) -> PagerResult<()> {
        let needed = first_page + count;
        if needed > self.allocated_pages {
            self.file.set_len(needed * self.page_size as u64)?;
            self.map = Some(map_file(&self.file)?);
            debug!(
                pages = needed - self.allocated_pages,
                path = %self.path.display(),
                "grew mapping"
            );
            self.allocated_pages = needed;
        }
        Ok(())
    }

    fn ensure_mapped(&mut self, tx: TxState, first_page: u64, count: u64) -> PagerResult<()> {
        if first_page + count > self.allocated_pages {
            return Err(PagerError::BeyondAllocation {
                first_page,
                count,
                allocated: self.allocated_pages,
            });
        }
        self.active_txs.insert(tx.id());
        // The whole allocation is always mapped on 64-bit targets.
        Ok(())
    }

    fn range(&self, first_page: u64, len: usize) -> PagerResult<&[u8]> {
        let (start, end) = self.check_range(first_page, len)?;
        let map = self.mapping(first_page, len)?;
        Ok(&map[start..end])
    }

    fn range_mut(&mut self, first_page: u64, len: usize) -> PagerResult<&mut [u8]> {
        let (start, end) = self.check_range(first_page, len)?;
        let map = self
            .map
            .as_mut()
            .ok_or(PagerError::NotMapped { first_page, len })?;
        Ok(&mut map[start..end])
    }

    fn unprotect_range(&mut self, first_page: u64, len: usize) -> PagerResult<()> {
        self.ledger.unprotect(first_page, pages_for(len, self.page_size))
    }

    fn protect_range(&mut self, first_page: u64, len: usize) -> PagerResult<()> {
        self.ledger.protect(first_page, pages_for(len, self.page_size))
    }

    fn flush(&mut self) -> PagerResult<()> {
        if let Some(map) = &self.map {
            map.flush()?;
        }
        Ok(())
    }

    fn total_allocation_size(&self) -> u64 {
        self.allocated_pages * self.page_size as u64
    }

    fn allocated_pages(&self) -> u64 {
        self.allocated_pages
    }

    fn release_tx(&mut self, tx: TxState) {
        self.active_txs.remove(&tx.id());
    }
}
