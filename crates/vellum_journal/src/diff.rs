//! Page diff encoding and application.
//!
//! A diff is a compact description of how one page image differs from its
//! predecessor. The wire format is a sequence of runs:
//!
//! ```text
//! | offset (u64) | count (i64) | count literal bytes when count > 0 |
//! ```
//!
//! A positive `count` copies that many literal bytes to `offset` in the
//! destination; a negative `count` writes `-count` zero bytes there. A
//! zero `count` is malformed. The encoder emits runs in ascending offset
//! order; the applier does not depend on ordering but rejects any run that
//! falls outside the destination.
//!
//! Encoder and applier live in one module so the two sides of the format
//! cannot drift apart.

use thiserror::Error;

/// Size of a run header: offset (8) + count (8).
const RUN_HEADER_SIZE: usize = 16;

/// Errors produced by a malformed diff.
///
/// The recovery engine reports every one of these as journal corruption.
#[derive(Debug, Error)]
pub enum DiffError {
    /// The diff ends in the middle of a run.
    #[error("truncated diff run at byte {at}")]
    TruncatedRun {
        /// Offset into the diff where the truncated run starts.
        at: usize,
    },

    /// A run has a zero count.
    #[error("empty diff run at byte {at}")]
    EmptyRun {
        /// Offset into the diff where the run starts.
        at: usize,
    },

    /// A run writes outside the destination.
    #[error(
        "diff run out of bounds: offset {offset} + {len} bytes, \
         destination is {destination} bytes"
    )]
    OutOfBounds {
        /// Destination offset of the run.
        offset: u64,
        /// Length of the run.
        len: usize,
        /// Destination length.
        destination: usize,
    },
}

/// Applies a diff to a page image in place.
///
/// `destination` must already hold the pre-image. The call is pure: no
/// I/O, no allocation, deterministic.
///
/// # Errors
///
/// Returns a [`DiffError`] if the diff is truncated, contains an empty
/// run, or writes outside the destination. Callers treat this as journal
/// corruption.
pub fn apply_diff(destination: &mut [u8], diff: &[u8]) -> Result<(), DiffError> {
    let mut pos = 0;

    while pos < diff.len() {
        if pos + RUN_HEADER_SIZE > diff.len() {
            return Err(DiffError::TruncatedRun { at: pos });
        }

        let offset = read_u64(diff, pos);
        let count = read_u64(diff, pos + 8) as i64;
        let run_start = pos;
        pos += RUN_HEADER_SIZE;

        if count == 0 {
            return Err(DiffError::EmptyRun { at: run_start });
        }

        let len = count.unsigned_abs() as usize;
        if offset > destination.len() as u64 || len as u64 > destination.len() as u64 - offset {
            return Err(DiffError::OutOfBounds {
                offset,
                len,
                destination: destination.len(),
            });
        }
        let start = offset as usize;

        if count > 0 {
            if pos + len > diff.len() {
                return Err(DiffError::TruncatedRun { at: run_start });
            }
            destination[start..start + len].copy_from_slice(&diff[pos..pos + len]);
            pos += len;
        } else {
            destination[start..start + len].fill(0);
        }
    }

    Ok(())
}

/// Encodes the difference between two page images of equal length.
///
/// This is the writer-side counterpart of [`apply_diff`]: applying the
/// returned diff to `old` yields `new` exactly. Runs of zero bytes in the
/// new image are emitted as zero runs without literal data.
///
/// # Panics
///
/// Panics if `old` and `new` differ in length; diffed images are always
/// the same page span.
#[must_use]
pub fn encode_diff(old: &[u8], new: &[u8]) -> Vec<u8> {
    assert_eq!(old.len(), new.len(), "diffed images must be the same length");

    let mut out = Vec::new();
    let mut i = 0;

    while i < new.len() {
        if old[i] == new[i] {
            i += 1;
            continue;
        }

        let start = i;
        while i < new.len() && old[i] != new[i] {
            i += 1;
        }
        let run = &new[start..i];

        out.extend_from_slice(&(start as u64).to_le_bytes());
        if run.iter().all(|b| *b == 0) {
            out.extend_from_slice(&(-(run.len() as i64)).to_le_bytes());
        } else {
            out.extend_from_slice(&(run.len() as i64).to_le_bytes());
            out.extend_from_slice(run);
        }
    }

    out
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}
