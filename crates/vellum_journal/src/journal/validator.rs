//! Transaction header validation.
//!
//! Resolves the bytes at a 4 KiB cursor position into a classification:
//! a valid header to replay, garbage (unwritten tail or stale data from a
//! reused journal), a torn transaction, or the end of the journal. A
//! hash-valid transaction that breaks the id sequence is fatal: the hash
//! is seeded with the transaction id, so a false positive against
//! arbitrary bytes is astronomically unlikely - if the sequence is broken
//! anyway, real data is missing.

use vellum_pager::{Pager, TxState};

use crate::error::{JournalError, JournalResult};
use crate::journal::header::{payload_hash, TransactionHeader, TX_HEADER_SIZE};
use crate::journal::JOURNAL_BLOCK_SIZE;
use crate::types::TransactionId;

/// Classification of the bytes at a cursor position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HeaderDisposition {
    /// A structurally valid, hash-valid, committed transaction that
    /// continues the sequence.
    Valid(TransactionHeader),
    /// Not a usable header. `stale` is set when the bytes are a
    /// hash-valid header from an older transaction - evidence that the
    /// journal file was reused.
    Garbage {
        /// Whether the bytes are a stale transaction rather than noise.
        stale: bool,
    },
    /// A plausible header whose payload hash does not match, or whose
    /// commit bit is clear: the writer did not finish.
    Torn {
        /// Id claimed by the torn header.
        tx_id: TransactionId,
    },
    /// The cursor is at or past the end of the journal.
    End,
}

/// Resolves a candidate transaction header at `cursor_4kb`.
///
/// `first_in_pass` is true until the pass accepts its first header. Only
/// that first header may claim the bootstrap exemption: a fresh store's
/// id-1 transaction is accepted regardless of the anchor, but an id-1
/// header showing up after other accepted transactions is an old
/// incarnation's bootstrap record surviving in a reused file and goes
/// through the ordering check like anything else (classifying it as
/// stale garbage instead of replaying it).
///
/// # Errors
///
/// Returns [`JournalError::Corruption`] for a hash-valid transaction that
/// is out of order or structurally impossible; pager failures propagate.
pub(crate) fn resolve_header(
    journal: &mut dyn Pager,
    tx: TxState,
    journal_name: &str,
    cursor_4kb: u64,
    capacity_4kb: u64,
    last_header: Option<&TransactionHeader>,
    first_in_pass: bool,
) -> JournalResult<HeaderDisposition> {
    if cursor_4kb >= capacity_4kb {
        return Ok(HeaderDisposition::End);
    }

    let Some(header) = read_candidate(journal, tx, cursor_4kb)? else {
        return Ok(HeaderDisposition::Garbage { stale: false });
    };
    if header.tx_id.as_i64() < 0 {
        return Ok(HeaderDisposition::Garbage { stale: false });
    }

    let Some(hash_ok) = hash_check(journal, tx, cursor_4kb, capacity_4kb, &header)? else {
        // The declared payload does not fit in the journal: tail noise.
        return Ok(HeaderDisposition::Garbage { stale: false });
    };

    let bootstrap_exempt = first_in_pass && header.tx_id.is_initial();
    if let Some(last) = last_header {
        if !bootstrap_exempt {
            let delta = header.tx_id.as_i64() - last.tx_id.as_i64();
            if delta < 0 {
                // An older transaction under the cursor: the journal file
                // was reused and we have run past the live region.
                return Ok(HeaderDisposition::Garbage { stale: hash_ok });
            }
            if !hash_ok {
                return Ok(HeaderDisposition::Torn { tx_id: header.tx_id });
            }
            if delta != 1 {
                return Err(JournalError::corruption(
                    journal_name,
                    header.tx_id,
                    format!(
                        "hash-valid transaction does not follow {} \
                         (id gap of {delta}); a transaction is missing",
                        last.tx_id
                    ),
                ));
            }
            if !header.is_committed() {
                return Ok(HeaderDisposition::Torn { tx_id: header.tx_id });
            }
            if header.last_page_number <= 0 {
                return Err(JournalError::corruption(
                    journal_name,
                    header.tx_id,
                    format!(
                        "committed transaction has last page number {}",
                        header.last_page_number
                    ),
                ));
            }
            return Ok(HeaderDisposition::Valid(header));
        }
    }

    if !hash_ok || !header.is_committed() {
        return Ok(HeaderDisposition::Torn { tx_id: header.tx_id });
    }
    Ok(HeaderDisposition::Valid(header))
}

/// Whether a hash-valid header sits at `cursor_4kb`.
///
/// Used by the forward scan after garbage: any hash-valid header later in
/// the file is evidence of journal reuse, regardless of its id.
pub(crate) fn probe_header(
    journal: &mut dyn Pager,
    tx: TxState,
    cursor_4kb: u64,
    capacity_4kb: u64,
) -> JournalResult<bool> {
    if cursor_4kb >= capacity_4kb {
        return Ok(false);
    }
    let Some(header) = read_candidate(journal, tx, cursor_4kb)? else {
        return Ok(false);
    };
    if header.tx_id.as_i64() < 0 {
        return Ok(false);
    }
    Ok(hash_check(journal, tx, cursor_4kb, capacity_4kb, &header)?.unwrap_or(false))
}

/// Splits a 4 KiB cursor into a journal page number and byte offset
/// within that page.
pub(crate) fn block_position(cursor_4kb: u64, page_size: usize) -> (u64, usize) {
    let blocks_per_page = page_size as u64 / JOURNAL_BLOCK_SIZE;
    let page = cursor_4kb / blocks_per_page;
    let offset = ((cursor_4kb % blocks_per_page) * JOURNAL_BLOCK_SIZE) as usize;
    (page, offset)
}

/// Reads the candidate header at the cursor, or `None` when the bytes do
/// not carry the journal marker.
fn read_candidate(
    journal: &mut dyn Pager,
    tx: TxState,
    cursor_4kb: u64,
) -> JournalResult<Option<TransactionHeader>> {
    let page_size = journal.page_size();
    let (page, offset) = block_position(cursor_4kb, page_size);
    journal.ensure_mapped(tx, page, 1)?;
    let bytes = journal.range(page, page_size)?;
    Ok(TransactionHeader::decode(&bytes[offset..offset + TX_HEADER_SIZE]))
}

/// Verifies the payload hash of a candidate header.
///
/// Returns `None` when the declared compressed payload cannot fit between
/// the cursor and the end of the journal, `Some(valid)` otherwise. May
/// extend the journal mapping forward to cover the payload.
fn hash_check(
    journal: &mut dyn Pager,
    tx: TxState,
    cursor_4kb: u64,
    capacity_4kb: u64,
    header: &TransactionHeader,
) -> JournalResult<Option<bool>> {
    let remaining = (capacity_4kb - cursor_4kb) * JOURNAL_BLOCK_SIZE;
    if TX_HEADER_SIZE as u64 + header.compressed_size > remaining {
        return Ok(None);
    }

    let page_size = journal.page_size();
    let (page, offset) = block_position(cursor_4kb, page_size);
    let total = offset + TX_HEADER_SIZE + header.compressed_size as usize;
    journal.ensure_mapped(tx, page, (total as u64).div_ceil(page_size as u64))?;
    let bytes = journal.range(page, total)?;
    let payload = &bytes[offset + TX_HEADER_SIZE..];

    Ok(Some(payload_hash(header.tx_id, payload) == header.hash))
}
