//! Ready-made three-pager recovery setups.

use std::cell::RefCell;
use std::rc::Rc;

use tempfile::TempDir;
use vellum_journal::{JournalReader, RecoveryOptions, TransactionId};
use vellum_pager::{FilePager, MemoryPager, MmapPager};

/// Page size used by all fixtures, for the data and recovery pagers as
/// well as the journal pager.
pub const TEST_PAGE_SIZE: usize = 8192;

/// Builds a reader over in-memory pagers.
///
/// The data pager enforces write protection, so every test run through
/// this fixture also proves the unprotect/write/protect bracketing.
#[must_use]
pub fn memory_recovery(image: Vec<u8>) -> JournalReader {
    JournalReader::new(
        "journal.0001",
        Box::new(MemoryPager::with_data(TEST_PAGE_SIZE, image)),
        Box::new(MemoryPager::with_protection(TEST_PAGE_SIZE)),
        Box::new(MemoryPager::new(TEST_PAGE_SIZE)),
        None,
    )
}

/// Builds a reader over file backings: a memory-mapped journal, a
/// file-backed data pager, and an in-memory recovery scratch.
///
/// Returns the temp directory so the caller keeps it alive for the
/// reader's lifetime.
#[must_use]
pub fn file_recovery(image: &[u8]) -> (JournalReader, TempDir) {
    let dir = TempDir::new().expect("failed to create temp directory");

    // The mapped journal must be a whole number of pages.
    let mut padded = image.to_vec();
    let len = padded.len().div_ceil(TEST_PAGE_SIZE) * TEST_PAGE_SIZE;
    padded.resize(len, 0);

    let journal_path = dir.path().join("journal.0001");
    std::fs::write(&journal_path, &padded).expect("failed to write journal image");
    let journal =
        MmapPager::open(&journal_path, TEST_PAGE_SIZE).expect("failed to map journal image");

    let data = FilePager::open(&dir.path().join("data.vellum"), TEST_PAGE_SIZE)
        .expect("failed to open data pager");

    let reader = JournalReader::new(
        "journal.0001",
        Box::new(journal),
        Box::new(data),
        Box::new(MemoryPager::new(TEST_PAGE_SIZE)),
        None,
    );
    (reader, dir)
}

/// Recovery-error reports captured by [`capturing_options`]: a list of
/// `(source, message)` pairs.
pub type CapturedReports = Rc<RefCell<Vec<(String, String)>>>;

/// Builds recovery options that record every callback invocation.
#[must_use]
pub fn capturing_options(last_synced_tx_id: i64) -> (RecoveryOptions, CapturedReports) {
    let reports: CapturedReports = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&reports);
    let options = RecoveryOptions::new(TransactionId::new(last_synced_tx_id)).with_callback(
        Box::new(move |source, message, _cause| {
            sink.borrow_mut().push((source.to_string(), message.to_string()));
        }),
    );
    (options, reports)
}
