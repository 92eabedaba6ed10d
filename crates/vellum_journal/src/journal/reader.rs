//! Journal reader - the recovery driver.
//!
//! Drives a 4 KiB cursor through the journal, resolves a header at each
//! position, decompresses accepted payloads into the recovery pager, and
//! materialises page images into the data pager. One reader owns all
//! three pagers for the duration of a pass; recovery is single-threaded
//! and blocking.

use tracing::{debug, warn};
use vellum_pager::{Pager, TxState};

use crate::diff::apply_diff;
use crate::error::{JournalError, JournalResult};
use crate::journal::header::{PageInfo, TransactionHeader, PAGE_INFO_SIZE, TX_HEADER_SIZE};
use crate::journal::validator::{block_position, probe_header, resolve_header, HeaderDisposition};
use crate::journal::JOURNAL_BLOCK_SIZE;
use crate::types::TransactionId;

/// Source tag passed to the recovery-error callback.
const CALLBACK_SOURCE: &str = "journal-recovery";

/// Callback message for a torn or uncommitted trailing transaction.
const TX_NOT_COMMITTED: &str = "transaction not committed";

/// Callback invoked for each recoverable defect observed during a pass.
///
/// Arguments are the reporting source, a human-readable message, and the
/// underlying error when one exists. The reader never logs defects as its
/// only channel - the callback is the authoritative report.
pub type RecoveryErrorCallback =
    Box<dyn FnMut(&str, &str, Option<&(dyn std::error::Error + 'static)>)>;

/// Per-pass recovery parameters.
pub struct RecoveryOptions {
    last_synced_tx_id: TransactionId,
    on_recoverable_error: Option<RecoveryErrorCallback>,
}

impl RecoveryOptions {
    /// Creates options with the given durability watermark.
    ///
    /// Transactions with an id at or below the watermark are already
    /// materialised in the data file and are skipped without writes.
    #[must_use]
    pub fn new(last_synced_tx_id: TransactionId) -> Self {
        Self {
            last_synced_tx_id,
            on_recoverable_error: None,
        }
    }

    /// Attaches a recovery-error callback.
    #[must_use]
    pub fn with_callback(mut self, callback: RecoveryErrorCallback) -> Self {
        self.on_recoverable_error = Some(callback);
        self
    }

    fn report(&mut self, message: &str, cause: Option<&(dyn std::error::Error + 'static)>) {
        if let Some(callback) = &mut self.on_recoverable_error {
            callback(CALLBACK_SOURCE, message, cause);
        }
    }
}

/// Reads a journal and replays its committed transactions into the data
/// pager.
///
/// The reader owns the journal pager (read-only source), the data pager
/// (mutable destination), and the recovery pager (scratch for
/// decompressed payloads). It is the transaction-state object for all
/// three: every mapping is registered under its token, and dropping the
/// reader notifies the pagers so per-transaction mappings can be
/// released.
///
/// A pass ends in one of three ways: the journal is exhausted, a
/// recoverable tail defect stops it cleanly (leaving
/// [`require_header_update`] set), or structural corruption aborts it
/// with an error.
///
/// [`require_header_update`]: JournalReader::require_header_update
pub struct JournalReader {
    journal_name: String,
    journal: Box<dyn Pager>,
    data: Box<dyn Pager>,
    recovery: Box<dyn Pager>,
    tx: TxState,
    cursor_4kb: u64,
    capacity_4kb: u64,
    last_header: Option<TransactionHeader>,
    /// Whether this pass has accepted a header yet. The bootstrap
    /// exemption (id 1 accepted regardless of the anchor) applies only
    /// before the first acceptance.
    accepted_in_pass: bool,
    require_header_update: bool,
}

impl JournalReader {
    /// Creates a reader over three already-opened pagers.
    ///
    /// `journal_name` identifies the journal in corruption messages.
    /// `anchor` is the last transaction header accepted by a previous
    /// pass (from the store's file header), or `None` on a fresh store.
    ///
    /// The data and recovery pagers must share a page size, and the
    /// journal page size must be a multiple of 4 KiB.
    #[must_use]
    pub fn new(
        journal_name: impl Into<String>,
        journal: Box<dyn Pager>,
        data: Box<dyn Pager>,
        recovery: Box<dyn Pager>,
        anchor: Option<TransactionHeader>,
    ) -> Self {
        debug_assert_eq!(data.page_size(), recovery.page_size());
        debug_assert_eq!(journal.page_size() as u64 % JOURNAL_BLOCK_SIZE, 0);

        let capacity_4kb = journal.total_allocation_size() / JOURNAL_BLOCK_SIZE;
        Self {
            journal_name: journal_name.into(),
            journal,
            data,
            recovery,
            tx: TxState::new(0),
            cursor_4kb: 0,
            capacity_4kb,
            last_header: anchor,
            accepted_in_pass: false,
            require_header_update: false,
        }
    }

    /// Seeds the cursor, in 4 KiB blocks, for resuming from a checkpoint.
    pub fn set_start_page(&mut self, cursor_4kb: u64) {
        self.cursor_4kb = cursor_4kb;
    }

    /// The next read offset in 4 KiB blocks.
    ///
    /// After a pass this is where the outer store appends new writes.
    #[must_use]
    pub fn next_4kb(&self) -> u64 {
        self.cursor_4kb
    }

    /// The last accepted transaction header, if any.
    #[must_use]
    pub fn last_transaction_header(&self) -> Option<&TransactionHeader> {
        self.last_header.as_ref()
    }

    /// Whether a recoverable defect requires the store to rewrite its
    /// file header after recovery. Sticky for the life of the reader.
    #[must_use]
    pub fn require_header_update(&self) -> bool {
        self.require_header_update
    }

    /// The journal pager.
    #[must_use]
    pub fn journal_pager(&self) -> &dyn Pager {
        &*self.journal
    }

    /// The data pager.
    #[must_use]
    pub fn data_pager(&self) -> &dyn Pager {
        &*self.data
    }

    /// The data pager, mutably. The outer store flushes through this once
    /// recovery is done.
    pub fn data_pager_mut(&mut self) -> &mut dyn Pager {
        &mut *self.data
    }

    /// Processes one transaction.
    ///
    /// Returns `Ok(true)` when a transaction was applied or skipped and
    /// the cursor advanced, `Ok(false)` when the pass is over (journal
    /// exhausted or a recoverable tail defect observed).
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::Corruption`] on a structural invariant
    /// violation; pager failures propagate as fatal.
    pub fn read_one(&mut self, options: &mut RecoveryOptions) -> JournalResult<bool> {
        if self.cursor_4kb >= self.capacity_4kb {
            return Ok(false);
        }

        let disposition = resolve_header(
            &mut *self.journal,
            self.tx,
            &self.journal_name,
            self.cursor_4kb,
            self.capacity_4kb,
            self.last_header.as_ref(),
            !self.accepted_in_pass,
        )?;

        match disposition {
            HeaderDisposition::End => Ok(false),
            HeaderDisposition::Torn { tx_id } => {
                self.require_header_update = true;
                warn!(
                    %tx_id,
                    cursor_4kb = self.cursor_4kb,
                    "torn transaction at the journal tail"
                );
                options.report(TX_NOT_COMMITTED, None);
                // A torn record can also be the overwrite frontier of a
                // reused journal; scan past it for reuse evidence.
                self.scan_for_reuse(options)?;
                Ok(false)
            }
            HeaderDisposition::Garbage { stale } => {
                self.handle_garbage(options, stale)?;
                Ok(false)
            }
            HeaderDisposition::Valid(header) => {
                if header.tx_id <= options.last_synced_tx_id {
                    // Already materialised in the data file; advance past
                    // it without issuing any writes.
                    self.cursor_4kb += transaction_blocks(&header);
                    debug!(
                        tx_id = %header.tx_id,
                        "skipping transaction already synced to the data file"
                    );
                    self.last_header = Some(header);
                    self.accepted_in_pass = true;
                    return Ok(true);
                }
                self.apply_transaction(options, header)
            }
        }
    }

    /// Drives [`read_one`] until the pass is over.
    ///
    /// Afterwards the caller inspects [`last_transaction_header`] and
    /// [`require_header_update`] to decide whether to rewrite the store's
    /// file header.
    ///
    /// # Errors
    ///
    /// Same conditions as [`read_one`].
    ///
    /// [`read_one`]: JournalReader::read_one
    /// [`last_transaction_header`]: JournalReader::last_transaction_header
    /// [`require_header_update`]: JournalReader::require_header_update
    pub fn recover_and_validate(&mut self, options: &mut RecoveryOptions) -> JournalResult<()> {
        while self.read_one(options)? {}
        debug!(
            cursor_4kb = self.cursor_4kb,
            require_header_update = self.require_header_update,
            "recovery pass complete"
        );
        Ok(())
    }

    /// Handles a garbage classification: report reuse when the garbage is
    /// a stale transaction, then scan forward for more reuse evidence.
    /// The cursor stays at the last valid position either way.
    fn handle_garbage(&mut self, options: &mut RecoveryOptions, stale: bool) -> JournalResult<()> {
        if stale {
            self.require_header_update = true;
            warn!(
                cursor_4kb = self.cursor_4kb,
                "stale transaction under the cursor; journal was reused"
            );
            options.report("stale transaction from a reused journal", None);
        }
        self.scan_for_reuse(options)
    }

    /// Scans forward one block at a time from the block after the cursor.
    /// A hash-valid header anywhere past the damage means the journal was
    /// reused and the file header must be rewritten; the cursor itself
    /// never moves.
    fn scan_for_reuse(&mut self, options: &mut RecoveryOptions) -> JournalResult<()> {
        let mut probe = self.cursor_4kb + 1;
        while probe < self.capacity_4kb {
            if probe_header(&mut *self.journal, self.tx, probe, self.capacity_4kb)? {
                self.require_header_update = true;
                warn!(
                    found_at_4kb = probe,
                    cursor_4kb = self.cursor_4kb,
                    "valid transaction beyond a damaged region; journal was reused"
                );
                options.report("valid transaction found beyond a damaged region", None);
                return Ok(());
            }
            probe += 1;
        }
        Ok(())
    }

    /// Decompresses an accepted transaction into the recovery pager and
    /// materialises its pages into the data pager.
    fn apply_transaction(
        &mut self,
        options: &mut RecoveryOptions,
        header: TransactionHeader,
    ) -> JournalResult<bool> {
        let journal_name = self.journal_name.clone();
        let page_size = self.data.page_size();
        let uncompressed = header.uncompressed_size;

        // Stage the payload: allocate, map, and zero the scratch range so
        // the tail of the last page is deterministic.
        let scratch_pages = uncompressed.div_ceil(page_size as u64);
        self.recovery.ensure_continuous(0, scratch_pages)?;
        self.recovery.ensure_mapped(self.tx, 0, scratch_pages)?;
        self.recovery
            .range_mut(0, (scratch_pages * page_size as u64) as usize)?
            .fill(0);

        {
            let journal_page_size = self.journal.page_size();
            let (first_page, offset) = block_position(self.cursor_4kb, journal_page_size);
            let total = offset + TX_HEADER_SIZE + header.compressed_size as usize;
            // The validator already mapped the payload for the hash check.
            let src = self.journal.range(first_page, total)?;
            let compressed = &src[offset + TX_HEADER_SIZE..];
            let dst = self.recovery.range_mut(0, uncompressed as usize)?;

            match lz4_flex::block::decompress_into(compressed, dst) {
                Ok(written) if written as u64 == uncompressed => {}
                Ok(written) => {
                    self.require_header_update = true;
                    warn!(
                        tx_id = %header.tx_id,
                        written,
                        expected = uncompressed,
                        "transaction payload decompressed to an unexpected length"
                    );
                    options.report(
                        "transaction payload decompressed to an unexpected length",
                        None,
                    );
                    return Ok(false);
                }
                Err(err) => {
                    self.require_header_update = true;
                    warn!(
                        tx_id = %header.tx_id,
                        error = %err,
                        "transaction payload failed to decompress"
                    );
                    options.report("transaction payload failed to decompress", Some(&err));
                    return Ok(false);
                }
            }
        }

        let count = header.page_count as usize;
        let table_len = count
            .checked_mul(PAGE_INFO_SIZE)
            .filter(|len| *len as u64 <= uncompressed)
            .ok_or_else(|| {
                JournalError::corruption(
                    &journal_name,
                    header.tx_id,
                    "page-info table exceeds the declared payload size",
                )
            })?;

        let infos: Vec<PageInfo> = {
            let table = self.recovery.range(0, table_len)?;
            table
                .chunks_exact(PAGE_INFO_SIZE)
                .map(PageInfo::decode)
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| {
                    JournalError::corruption(
                        &journal_name,
                        header.tx_id,
                        "truncated page-info table",
                    )
                })?
        };

        // Every page must fall inside the transaction's own high-water
        // mark before anything is written.
        for info in &infos {
            if info.page_number > header.last_page_number.max(0) as u64 {
                return Err(JournalError::corruption(
                    &journal_name,
                    header.tx_id,
                    format!(
                        "page {} lies beyond the last page number {}",
                        info.page_number, header.last_page_number
                    ),
                ));
            }
        }

        let payload = self.recovery.range(0, uncompressed as usize)?;
        let mut offset = table_len as u64;

        for info in &infos {
            if uncompressed - offset < 8 {
                return Err(JournalError::corruption(
                    &journal_name,
                    header.tx_id,
                    format!(
                        "payload overrun reading the echoed number of page {}",
                        info.page_number
                    ),
                ));
            }
            let echoed = read_u64(payload, offset as usize);
            offset += 8;
            if echoed != info.page_number {
                return Err(JournalError::corruption(
                    &journal_name,
                    header.tx_id,
                    format!(
                        "echoed page number {echoed} does not match page-info entry {}",
                        info.page_number
                    ),
                ));
            }

            let consumed = info.payload_len();
            if consumed > uncompressed - offset {
                return Err(JournalError::corruption(
                    &journal_name,
                    header.tx_id,
                    format!(
                        "payload overrun reading the image of page {}",
                        info.page_number
                    ),
                ));
            }
            let src = &payload[offset as usize..(offset + consumed) as usize];

            let dest_pages = info.size.div_ceil(page_size as u64);
            self.data.ensure_continuous(info.page_number, dest_pages)?;
            self.data.ensure_mapped(self.tx, info.page_number, dest_pages)?;

            self.data.unprotect_range(info.page_number, info.size as usize)?;
            let dst = self.data.range_mut(info.page_number, info.size as usize)?;
            if info.is_verbatim() {
                dst.copy_from_slice(src);
            } else if let Err(err) = apply_diff(dst, src) {
                return Err(JournalError::corruption(
                    &journal_name,
                    header.tx_id,
                    format!("malformed diff for page {}: {err}", info.page_number),
                ));
            }
            self.data.protect_range(info.page_number, info.size as usize)?;

            offset += consumed;
        }

        self.cursor_4kb += transaction_blocks(&header);
        debug!(
            tx_id = %header.tx_id,
            pages = infos.len(),
            cursor_4kb = self.cursor_4kb,
            "applied transaction"
        );
        self.last_header = Some(header);
        self.accepted_in_pass = true;
        Ok(true)
    }
}

impl Drop for JournalReader {
    fn drop(&mut self) {
        // Disposal event: let the pagers drop per-transaction mappings.
        let tx = self.tx;
        self.journal.release_tx(tx);
        self.data.release_tx(tx);
        self.recovery.release_tx(tx);
    }
}

/// Number of 4 KiB blocks a transaction record occupies on disk.
fn transaction_blocks(header: &TransactionHeader) -> u64 {
    (TX_HEADER_SIZE as u64 + header.compressed_size).div_ceil(JOURNAL_BLOCK_SIZE)
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_pager::MemoryPager;

    const PAGE: usize = 8192;

    fn empty_reader(capacity_4kb: u64) -> JournalReader {
        let image = vec![0u8; (capacity_4kb * JOURNAL_BLOCK_SIZE) as usize];
        JournalReader::new(
            "journal.test",
            Box::new(MemoryPager::with_data(PAGE, image)),
            Box::new(MemoryPager::new(PAGE)),
            Box::new(MemoryPager::new(PAGE)),
            None,
        )
    }

    #[test]
    fn transaction_blocks_rounds_up() {
        let mut header = TransactionHeader {
            tx_id: TransactionId::new(1),
            last_page_number: 1,
            page_count: 1,
            flags: 0,
            compressed_size: 0,
            uncompressed_size: 0,
            hash: 0,
        };
        assert_eq!(transaction_blocks(&header), 1);

        header.compressed_size = JOURNAL_BLOCK_SIZE - TX_HEADER_SIZE as u64;
        assert_eq!(transaction_blocks(&header), 1);

        header.compressed_size += 1;
        assert_eq!(transaction_blocks(&header), 2);
    }

    #[test]
    fn capacity_derived_from_journal_allocation() {
        let reader = empty_reader(256);
        assert_eq!(reader.capacity_4kb, 256);
        assert_eq!(reader.next_4kb(), 0);
    }

    #[test]
    fn set_start_page_seeds_cursor() {
        let mut reader = empty_reader(256);
        reader.set_start_page(17);
        assert_eq!(reader.next_4kb(), 17);
    }

    #[test]
    fn empty_journal_reads_nothing() {
        let mut reader = empty_reader(256);
        let mut options = RecoveryOptions::new(TransactionId::new(0));
        assert!(!reader.read_one(&mut options).unwrap());
        assert!(!reader.require_header_update());
        assert!(reader.last_transaction_header().is_none());
        assert_eq!(reader.next_4kb(), 0);
    }

    #[test]
    fn cursor_past_capacity_is_done() {
        let mut reader = empty_reader(8);
        reader.set_start_page(8);
        let mut options = RecoveryOptions::new(TransactionId::new(0));
        assert!(!reader.read_one(&mut options).unwrap());
    }
}
