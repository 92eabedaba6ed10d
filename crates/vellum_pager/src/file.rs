//! File-backed pager with a buffered window.

use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{PagerError, PagerResult};
use crate::pager::{pages_for, Pager, ProtectionLedger, TxState};

/// A file-backed pager.
///
/// The pager keeps an in-memory window over a prefix of the file.
/// `ensure_mapped` extends the window by reading from the file;
/// `flush`/`sync` write dirty pages back. Accessing a range that has not
/// been mapped is an error, which keeps callers honest about the
/// ensure-then-access discipline.
///
/// # Durability
///
/// - [`Pager::flush`] writes the window back and flushes to the OS
/// - [`FilePager::sync`] additionally calls `sync_all` so data and
///   metadata reach the disk
///
/// Dropping the pager does **not** flush; the owner decides when dirty
/// pages become durable.
#[derive(Debug)]
pub struct FilePager {
    path: PathBuf,
    file: File,
    page_size: usize,
    /// Buffered prefix of the file, always `mapped_pages * page_size` long.
    window: Vec<u8>,
    mapped_pages: u64,
    allocated_pages: u64,
    dirty: bool,
    ledger: ProtectionLedger,
    active_txs: HashSet<u64>,
}

impl FilePager {
    /// Opens or creates a file-backed pager at the given path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or its length is not
    /// a whole number of pages.
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

        Ok(Self {
            path: path.to_path_buf(),
            file,
            page_size,
            window: Vec::new(),
            mapped_pages: 0,
            allocated_pages: len / page_size as u64,
            dirty: false,
            ledger: ProtectionLedger::default(),
            active_txs: HashSet::new(),
        })
    }

    /// Opens or creates a file-backed pager, creating parent directories
    /// if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if directories cannot be created or the file
    /// cannot be opened.
    pub fn open_with_create_dirs(path: &Path, page_size: usize) -> PagerResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path, page_size)
    }

    /// Returns the path to the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes dirty pages back, flushes, and syncs file metadata.
    ///
    /// # Errors
    ///
    /// Returns an error if the write-back or sync fails.
    pub fn sync(&mut self) -> PagerResult<()> {
        self.flush()?;
        self.file.sync_all()?;
        Ok(())
    }

    fn write_back(&mut self) -> PagerResult<()> {
        if !self.dirty {
            return Ok(());
        }
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.window)?;
        self.dirty = false;
        Ok(())
    }

    fn check_mapped(&self, first_page: u64, len: usize) -> PagerResult<(usize, usize)> {
        let start = first_page * self.page_size as u64;
        let end = start + len as u64;
        if end > self.window.len() as u64 {
            return Err(PagerError::NotMapped { first_page, len });
        }
        Ok((start as usize, end as usize))
    }
}

impl Pager for FilePager {
    fn page_size(&self) -> usize {
        self.page_size
    }

    fn ensure_continuous(&mut self, first_page: u64, count: u64) -> PagerResult<()> {
        let needed = first_page + count;
        if needed > self.allocated_pages {
            self.file.set_len(needed * self.page_size as u64)?;
            debug!(
                pages = needed - self.allocated_pages,
                path = %self.path.display(),
                "grew file backing"
            );
            self.allocated_pages = needed;
        }
        Ok(())
    }

    fn ensure_mapped(&mut self, tx: TxState, first_page: u64, count: u64) -> PagerResult<()> {
        let needed = first_page + count;
        if needed > self.allocated_pages {
            return Err(PagerError::BeyondAllocation {
                first_page,
                count,
                allocated: self.allocated_pages,
            });
        }
        if needed > self.mapped_pages {
            // Extend the window prefix up to and including the range.
            let old_len = self.window.len();
            let new_len = (needed * self.page_size as u64) as usize;
            self.window.resize(new_len, 0);
            self.file.seek(SeekFrom::Start(old_len as u64))?;
            self.file.read_exact(&mut self.window[old_len..])?;
            self.mapped_pages = needed;
        }
        self.active_txs.insert(tx.id());
        Ok(())
    }

    fn range(&self, first_page: u64, len: usize) -> PagerResult<&[u8]> {
        let (start, end) = self.check_mapped(first_page, len)?;
        Ok(&self.window[start..end])
    }

    fn range_mut(&mut self, first_page: u64, len: usize) -> PagerResult<&mut [u8]> {
        let (start, end) = self.check_mapped(first_page, len)?;
        self.dirty = true;
        Ok(&mut self.window[start..end])
    }

    fn unprotect_range(&mut self, first_page: u64, len: usize) -> PagerResult<()> {
        self.ledger.unprotect(first_page, pages_for(len, self.page_size))
    }

    fn protect_range(&mut self, first_page: u64, len: usize) -> PagerResult<()> {
        self.ledger.protect(first_page, pages_for(len, self.page_size))
    }

    fn flush(&mut self) -> PagerResult<()> {
        self.write_back()?;
        self.file.flush()?;
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
        if self.active_txs.is_empty() && !self.dirty {
            // Read-only window is cheap to rebuild; drop it with the tx.
            self.window.clear();
            self.mapped_pages = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const PAGE: usize = 4096;
    const TX: TxState = TxState::new(1);

    #[test]
    fn file_create_new() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pages.bin");

        let pager = FilePager::open(&path, PAGE).unwrap();
        assert_eq!(pager.allocated_pages(), 0);
        assert!(path.exists());
    }

    #[test]
    fn file_write_and_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pages.bin");

        let mut pager = FilePager::open(&path, PAGE).unwrap();
        pager.ensure_continuous(0, 2).unwrap();
        pager.ensure_mapped(TX, 0, 2).unwrap();
        pager.range_mut(1, PAGE).unwrap().fill(0xCD);
        assert!(pager.range(1, PAGE).unwrap().iter().all(|b| *b == 0xCD));
    }

    #[test]
    fn file_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pages.bin");

        {
            let mut pager = FilePager::open(&path, PAGE).unwrap();
            pager.ensure_continuous(0, 2).unwrap();
            pager.ensure_mapped(TX, 0, 2).unwrap();
            pager.range_mut(0, 4).unwrap().copy_from_slice(b"durb");
            pager.sync().unwrap();
        }

        {
            let mut pager = FilePager::open(&path, PAGE).unwrap();
            assert_eq!(pager.allocated_pages(), 2);
            pager.ensure_mapped(TX, 0, 2).unwrap();
            assert_eq!(pager.range(0, 4).unwrap(), b"durb".as_slice());
        }
    }

    #[test]
    fn file_unmapped_access_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pages.bin");

        let mut pager = FilePager::open(&path, PAGE).unwrap();
        pager.ensure_continuous(0, 2).unwrap();
        let result = pager.range(0, PAGE);
        assert!(matches!(result, Err(PagerError::NotMapped { .. })));
    }

    #[test]
    fn file_ensure_mapped_rejects_unallocated() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pages.bin");

        let mut pager = FilePager::open(&path, PAGE).unwrap();
        pager.ensure_continuous(0, 1).unwrap();
        let result = pager.ensure_mapped(TX, 0, 2);
        assert!(matches!(result, Err(PagerError::BeyondAllocation { .. })));
    }

    #[test]
    fn file_unaligned_length_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pages.bin");
        std::fs::write(&path, vec![0u8; PAGE + 100]).unwrap();

        let result = FilePager::open(&path, PAGE);
        assert!(matches!(result, Err(PagerError::UnalignedLength { .. })));
    }

    #[test]
    fn file_release_tx_drops_clean_window() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pages.bin");

        let mut pager = FilePager::open(&path, PAGE).unwrap();
        pager.ensure_continuous(0, 2).unwrap();
        pager.ensure_mapped(TX, 0, 2).unwrap();
        assert_eq!(pager.mapped_pages, 2);
        pager.release_tx(TX);
        assert_eq!(pager.mapped_pages, 0);
    }

    #[test]
    fn file_release_tx_keeps_dirty_window() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pages.bin");

        let mut pager = FilePager::open(&path, PAGE).unwrap();
        pager.ensure_continuous(0, 1).unwrap();
        pager.ensure_mapped(TX, 0, 1).unwrap();
        pager.range_mut(0, 1).unwrap()[0] = 0xEE;
        pager.release_tx(TX);
        assert_eq!(pager.mapped_pages, 1);
        assert_eq!(pager.range(0, 1).unwrap()[0], 0xEE);
    }

    #[test]
    fn file_create_with_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("store").join("pages.bin");

        let pager = FilePager::open_with_create_dirs(&path, PAGE).unwrap();
        assert_eq!(pager.allocated_pages(), 0);
        assert!(path.exists());
    }
}
