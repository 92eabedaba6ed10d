//! # Vellum Testkit
//!
//! Test utilities for the Vellum journal engine.
//!
//! This crate provides:
//! - [`JournalBuilder`] - assembles journal images transaction by
//!   transaction, including reuse layouts where new transactions
//!   overwrite the head of an older journal
//! - Corruption helpers - byte flips and tail damage for torn-tail and
//!   corruption scenarios
//! - Pager fixtures - ready-made three-pager recovery setups over memory
//!   or file backings
//!
//! The builder is the writer side of the journal format: tests that need
//! a journal fabricate one here, hand it to the recovery engine, and
//! assert on the replayed pages.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod builder;
mod corrupt;
mod fixtures;

pub use builder::{JournalBuilder, TransactionBuilder};
pub use corrupt::{corrupt_header_hash, corrupt_payload, flip_byte, zero_from};
pub use fixtures::{
    capturing_options, file_recovery, memory_recovery, CapturedReports, TEST_PAGE_SIZE,
};
