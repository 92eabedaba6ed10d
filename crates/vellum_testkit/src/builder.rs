//! Journal image builder.
//!
//! Assembles journal bytes the way the store's writer would: a 64-byte
//! header, an LZ4-compressed payload hashed with the transaction id, and
//! zero padding to the next 4 KiB boundary.

use vellum_journal::{
    encode_diff, payload_hash, PageInfo, TransactionHeader, TransactionId, JOURNAL_BLOCK_SIZE,
    TX_FLAG_COMMIT, TX_HEADER_SIZE,
};

/// Builds a journal image transaction by transaction.
///
/// The image is a fixed-capacity, zero-filled buffer; transactions are
/// written at the current position, which only moves forward unless
/// [`rewind_to`] is used to model journal reuse.
///
/// # Example
///
/// ```rust
/// use vellum_testkit::JournalBuilder;
///
/// let mut journal = JournalBuilder::new(256);
/// journal
///     .transaction(1)
///     .last_page(5)
///     .verbatim(3, vec![0xAA; 8192])
///     .commit();
/// let image = journal.build();
/// assert_eq!(image.len(), 256 * 4096);
/// ```
///
/// [`rewind_to`]: JournalBuilder::rewind_to
#[derive(Debug)]
pub struct JournalBuilder {
    image: Vec<u8>,
    write_4kb: u64,
    capacity_4kb: u64,
}

impl JournalBuilder {
    /// Creates a zero-filled journal image of the given capacity in
    /// 4 KiB blocks.
    #[must_use]
    pub fn new(capacity_4kb: u64) -> Self {
        Self {
            image: vec![0u8; (capacity_4kb * JOURNAL_BLOCK_SIZE) as usize],
            write_4kb: 0,
            capacity_4kb,
        }
    }

    /// Starts a transaction with the given id. Call
    /// [`TransactionBuilder::commit`] (or
    /// [`TransactionBuilder::append_uncommitted`]) to write it.
    pub fn transaction(&mut self, tx_id: i64) -> TransactionBuilder<'_> {
        TransactionBuilder {
            journal: self,
            tx_id,
            last_page_number: None,
            committed: true,
            pages: Vec::new(),
        }
    }

    /// Moves the write position back, as journal reuse does: subsequent
    /// transactions overwrite the head while stale bytes survive beyond
    /// them.
    pub fn rewind_to(&mut self, block_4kb: u64) {
        assert!(block_4kb <= self.write_4kb, "rewind must move backwards");
        self.write_4kb = block_4kb;
    }

    /// The next write position in 4 KiB blocks.
    #[must_use]
    pub fn next_4kb(&self) -> u64 {
        self.write_4kb
    }

    /// Returns the finished image.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        self.image.clone()
    }

    fn append(&mut self, header: TransactionHeader, compressed: &[u8]) -> u64 {
        let start_4kb = self.write_4kb;
        let record_len = TX_HEADER_SIZE + compressed.len();
        let blocks = (record_len as u64).div_ceil(JOURNAL_BLOCK_SIZE);
        assert!(
            start_4kb + blocks <= self.capacity_4kb,
            "transaction does not fit in the journal capacity"
        );

        let at = (start_4kb * JOURNAL_BLOCK_SIZE) as usize;
        self.image[at..at + TX_HEADER_SIZE].copy_from_slice(&header.encode());
        self.image[at + TX_HEADER_SIZE..at + record_len].copy_from_slice(compressed);
        // Zero the padding: a rewound journal may hold stale bytes here.
        let end = ((start_4kb + blocks) * JOURNAL_BLOCK_SIZE) as usize;
        self.image[at + record_len..end].fill(0);

        self.write_4kb = start_4kb + blocks;
        start_4kb
    }
}

enum PagePayload {
    Verbatim(Vec<u8>),
    Diff { size: u64, diff: Vec<u8> },
}

/// Accumulates the pages of one transaction; see
/// [`JournalBuilder::transaction`].
pub struct TransactionBuilder<'a> {
    journal: &'a mut JournalBuilder,
    tx_id: i64,
    last_page_number: Option<i64>,
    committed: bool,
    pages: Vec<(u64, PagePayload)>,
}

impl TransactionBuilder<'_> {
    /// Sets the transaction's highest written page explicitly. Defaults
    /// to the highest page number added.
    #[must_use]
    pub fn last_page(mut self, last_page_number: i64) -> Self {
        self.last_page_number = Some(last_page_number);
        self
    }

    /// Adds a verbatim page image.
    #[must_use]
    pub fn verbatim(mut self, page_number: u64, image: Vec<u8>) -> Self {
        self.pages.push((page_number, PagePayload::Verbatim(image)));
        self
    }

    /// Adds a diff-encoded page, computed between two images of equal
    /// length.
    #[must_use]
    pub fn diff_page(mut self, page_number: u64, old: &[u8], new: &[u8]) -> Self {
        let diff = encode_diff(old, new);
        assert!(!diff.is_empty(), "diffed images must differ");
        self.pages.push((
            page_number,
            PagePayload::Diff {
                size: new.len() as u64,
                diff,
            },
        ));
        self
    }

    /// Writes the transaction with the commit bit set. Returns the block
    /// where the transaction starts.
    pub fn commit(self) -> u64 {
        self.append(true)
    }

    /// Writes the transaction without the commit bit, modelling a writer
    /// that died before committing. Returns the start block.
    pub fn append_uncommitted(self) -> u64 {
        self.append(false)
    }

    fn append(self, committed: bool) -> u64 {
        let last_page_number = self.last_page_number.unwrap_or_else(|| {
            self.pages
                .iter()
                .map(|(page, _)| *page as i64)
                .max()
                .unwrap_or(0)
        });

        let mut payload = Vec::new();
        for (page_number, content) in &self.pages {
            let (size, diff_size) = match content {
                PagePayload::Verbatim(image) => (image.len() as u64, 0),
                PagePayload::Diff { size, diff } => (*size, diff.len() as u64),
            };
            payload.extend_from_slice(
                &PageInfo {
                    page_number: *page_number,
                    size,
                    diff_size,
                }
                .encode(),
            );
        }
        for (page_number, content) in &self.pages {
            payload.extend_from_slice(&page_number.to_le_bytes());
            match content {
                PagePayload::Verbatim(image) => payload.extend_from_slice(image),
                PagePayload::Diff { diff, .. } => payload.extend_from_slice(diff),
            }
        }

        let tx_id = TransactionId::new(self.tx_id);
        let compressed = lz4_flex::block::compress(&payload);
        let header = TransactionHeader {
            tx_id,
            last_page_number,
            page_count: self.pages.len() as u32,
            flags: if committed { TX_FLAG_COMMIT } else { 0 },
            compressed_size: compressed.len() as u64,
            uncompressed_size: payload.len() as u64,
            hash: payload_hash(tx_id, &compressed),
        };

        self.journal.append(header, &compressed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_has_requested_capacity() {
        let journal = JournalBuilder::new(32);
        assert_eq!(journal.build().len(), 32 * 4096);
    }

    #[test]
    fn committed_transaction_is_decodable() {
        let mut journal = JournalBuilder::new(32);
        let start = journal
            .transaction(1)
            .verbatim(2, vec![0x11; 64])
            .commit();
        assert_eq!(start, 0);
        assert!(journal.next_4kb() > 0);

        let image = journal.build();
        let header = TransactionHeader::decode(&image[..TX_HEADER_SIZE]).unwrap();
        assert_eq!(header.tx_id, TransactionId::new(1));
        assert_eq!(header.page_count, 1);
        assert!(header.is_committed());
        assert_eq!(header.last_page_number, 2);

        let payload_at = TX_HEADER_SIZE;
        let compressed = &image[payload_at..payload_at + header.compressed_size as usize];
        assert_eq!(payload_hash(header.tx_id, compressed), header.hash);
    }

    #[test]
    fn uncommitted_transaction_clears_flag() {
        let mut journal = JournalBuilder::new(32);
        journal
            .transaction(1)
            .verbatim(1, vec![0; 16])
            .append_uncommitted();

        let image = journal.build();
        let header = TransactionHeader::decode(&image[..TX_HEADER_SIZE]).unwrap();
        assert!(!header.is_committed());
    }

    #[test]
    fn transactions_start_on_block_boundaries() {
        let mut journal = JournalBuilder::new(64);
        let first = journal
            .transaction(1)
            .verbatim(1, vec![0xAA; 6000])
            .commit();
        let second = journal
            .transaction(2)
            .verbatim(2, vec![0xBB; 100])
            .commit();
        assert_eq!(first, 0);
        assert!(second >= 1);
        assert_eq!(journal.next_4kb(), second + 1);
    }

    #[test]
    fn rewind_overwrites_the_head() {
        let mut journal = JournalBuilder::new(64);
        journal.transaction(10).verbatim(1, vec![0x10; 32]).commit();
        journal.transaction(11).verbatim(1, vec![0x11; 32]).commit();
        journal.rewind_to(0);
        journal.transaction(20).verbatim(1, vec![0x20; 32]).commit();

        let image = journal.build();
        let header = TransactionHeader::decode(&image[..TX_HEADER_SIZE]).unwrap();
        assert_eq!(header.tx_id, TransactionId::new(20));
    }
}
