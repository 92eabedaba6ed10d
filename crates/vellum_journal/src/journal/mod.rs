//! Write-ahead journal format and recovery.
//!
//! The journal is a sequence of transaction records, each starting on a
//! 4 KiB boundary:
//!
//! ```text
//! | header (64) | compressed payload (N) | zero padding to next 4 KiB |
//! ```
//!
//! The payload, once decompressed, is:
//!
//! ```text
//! | page-info (24) x page_count | per page: echoed page number (8),
//!   then size bytes verbatim OR diff_size bytes of diff encoding |
//! ```
//!
//! All integers are little-endian. The journal is addressed in 4 KiB
//! blocks so a torn tail is bounded to 4 KiB regardless of the page size;
//! the data file is addressed in whole pages.
//!
//! ## Recovery Policy
//!
//! Recovery distinguishes **recoverable tail defects** from **fatal
//! corruption**:
//!
//! ### Recoverable (pass ends cleanly, header update flagged)
//!
//! - Garbage where a header should be - the unwritten tail of the journal
//! - A stale transaction from a previous use of a reused journal file
//! - A hash mismatch or missing commit flag on the trailing transaction
//! - A payload that fails to decompress
//!
//! These represent crashes mid-write or journal reuse. The engine stops at
//! the last valid position, sets the header-update flag, and reports each
//! defect through the recovery callback.
//!
//! ### Fatal (the store must not open)
//!
//! - A hash-valid transaction that does not continue the id sequence:
//!   the hash is seeded with the transaction id, so a false positive
//!   against arbitrary bytes is astronomically unlikely - real data is
//!   missing
//! - A page-info record pointing past the transaction's own high-water
//!   mark
//! - An echoed page number that does not match its page-info record
//! - Payload consumption past the declared uncompressed size
//!
//! ## Invariants
//!
//! - The cursor advances only in whole-transaction increments, never
//!   stopping inside a record
//! - Accepted transaction ids increase by exactly 1, except that the
//!   bootstrap transaction (id 1) is always accepted
//! - Replay is idempotent: a second pass over the same journal yields
//!   byte-identical data pages

mod header;
mod reader;
mod validator;

pub use header::{
    payload_hash, PageInfo, TransactionHeader, JOURNAL_HEADER_MARKER, PAGE_INFO_SIZE,
    TX_FLAG_COMMIT, TX_HEADER_SIZE,
};
pub use reader::{JournalReader, RecoveryErrorCallback, RecoveryOptions};

/// Addressing quantum of the journal: transaction records start on 4 KiB
/// boundaries.
pub const JOURNAL_BLOCK_SIZE: u64 = 4096;
