//! Error types for pager operations.

use std::io;
use thiserror::Error;

/// Result type for pager operations.
pub type PagerResult<T> = Result<T, PagerError>;

/// Errors that can occur during pager operations.
///
/// Pager errors are resource errors: the recovery engine treats every one
/// of them as fatal and propagates it to the caller.
#[derive(Debug, Error)]
pub enum PagerError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A page range lies beyond the current allocation.
    #[error(
        "page range beyond allocation: page {first_page} + {count} pages, \
         {allocated} allocated"
    )]
    BeyondAllocation {
        /// First page of the requested range.
        first_page: u64,
        /// Number of pages requested.
        count: u64,
        /// Pages currently allocated.
        allocated: u64,
    },

    /// A page range was accessed before being mapped.
    #[error("page range not mapped: page {first_page}, {len} bytes")]
    NotMapped {
        /// First page of the requested range.
        first_page: u64,
        /// Length of the requested range in bytes.
        len: usize,
    },

    /// A mutable access hit a write-protected page.
    #[error("write to protected page {page}")]
    ProtectedWrite {
        /// The protected page.
        page: u64,
    },

    /// An unprotect/protect call broke the bracketing discipline.
    #[error("unbalanced protection toggle on page {page}: {message}")]
    UnbalancedProtection {
        /// The offending page.
        page: u64,
        /// What went wrong.
        message: String,
    },

    /// The backing store length is not a whole number of pages.
    #[error("backing length {len} is not a multiple of the page size {page_size}")]
    UnalignedLength {
        /// Backing store length in bytes.
        len: u64,
        /// Configured page size.
        page_size: usize,
    },
}
