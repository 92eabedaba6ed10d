//! # Vellum Journal
//!
//! Write-ahead journal recovery engine for the Vellum storage kernel.
//!
//! This crate provides:
//! - The journal binary format: transaction headers, page-info records,
//!   and the seeded payload hash
//! - Page diff encoding and in-place application
//! - The [`JournalReader`], which replays committed transactions from a
//!   journal pager into a data pager
//!
//! Recovery tolerates torn tails and reused journal files: defects at the
//! tail end the pass cleanly and raise a header-update flag, while
//! structural corruption (a hash-valid transaction out of sequence, a
//! mismatched page echo) refuses to let the store open. See
//! [`journal`] for the full recovery policy.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod diff;
mod error;
pub mod journal;
mod types;

pub use diff::{apply_diff, encode_diff, DiffError};
pub use error::{JournalError, JournalResult};
pub use journal::{
    payload_hash, JournalReader, PageInfo, RecoveryErrorCallback, RecoveryOptions,
    TransactionHeader, JOURNAL_BLOCK_SIZE, JOURNAL_HEADER_MARKER, PAGE_INFO_SIZE, TX_FLAG_COMMIT,
    TX_HEADER_SIZE,
};
pub use types::TransactionId;
