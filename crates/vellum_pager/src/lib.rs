//! # Vellum Pager
//!
//! Pager abstraction and backing stores for the Vellum storage kernel.
//!
//! A pager presents a page-addressed byte window over a backing store.
//! Pagers are **opaque byte stores**: they know nothing about journal
//! records, transaction headers, or page diffs - the engine owns all
//! format interpretation.
//!
//! ## Design Principles
//!
//! - One object-safe capability set shared by every backing store
//! - Multi-page ranges are contiguous in memory, so callers can borrow
//!   a slice spanning several pages
//! - Write protection is a logical discipline: every backing tracks the
//!   unprotect/protect bracketing even where the toggle itself is a no-op
//! - Pagers are notified when a transaction state is disposed so they can
//!   release per-transaction mapping extensions
//!
//! ## Available Backings
//!
//! - [`MemoryPager`] - in-memory scratch, used for recovery buffers and tests
//! - [`FilePager`] - file-backed with a buffered window, no `unsafe`
//! - [`MmapPager`] - memory-mapped file
//!
//! ## Example
//!
//! ```rust
//! use vellum_pager::{MemoryPager, Pager, TxState};
//!
//! let mut pager = MemoryPager::new(4096);
//! pager.ensure_continuous(0, 2).unwrap();
//! pager.ensure_mapped(TxState::new(0), 0, 2).unwrap();
//! assert_eq!(pager.allocated_pages(), 2);
//! assert_eq!(pager.page(1).unwrap().len(), 4096);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod file;
mod memory;
#[allow(unsafe_code)]
mod mmap;
mod pager;

pub use error::{PagerError, PagerResult};
pub use file::FilePager;
pub use memory::MemoryPager;
pub use mmap::MmapPager;
pub use pager::{Pager, TxState};
