//! Transaction header and page-info codec.

use xxhash_rust::xxh64::xxh64;

use crate::types::TransactionId;

/// Magic marker opening every transaction header.
pub const JOURNAL_HEADER_MARKER: u64 = u64::from_le_bytes(*b"VLMJRNL1");

/// Size of the fixed transaction header in bytes.
///
/// ```text
/// | marker (8) | tx_id (8) | last_page_number (8) | page_count (4) |
/// | flags (4) | compressed_size (8) | uncompressed_size (8) |
/// | hash (8) | reserved (8) |
/// ```
pub const TX_HEADER_SIZE: usize = 64;

/// Size of one page-info record in bytes.
pub const PAGE_INFO_SIZE: usize = 24;

/// Commit bit in the header flags. A transaction without it is not
/// durable and must not be replayed.
pub const TX_FLAG_COMMIT: u32 = 1;

/// A decoded transaction header.
///
/// Headers are decoded into an owned value before use; the raw bytes come
/// from a pager mapping whose borrow must not be held across further
/// pager calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionHeader {
    /// Transaction id; strictly positive for any real transaction.
    pub tx_id: TransactionId,
    /// Highest page number written by this transaction.
    pub last_page_number: i64,
    /// Number of page-info records in the payload.
    pub page_count: u32,
    /// Flag bits; see [`TX_FLAG_COMMIT`].
    pub flags: u32,
    /// Length in bytes of the compressed payload following the header.
    pub compressed_size: u64,
    /// Length in bytes of the payload once decompressed.
    pub uncompressed_size: u64,
    /// XXH64 of the compressed payload, seeded with the transaction id.
    pub hash: u64,
}

impl TransactionHeader {
    /// Decodes a header from raw bytes.
    ///
    /// Returns `None` if the slice is too short or does not open with the
    /// journal marker - the bytes are then not a header at all.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < TX_HEADER_SIZE {
            return None;
        }
        if read_u64(bytes, 0)? != JOURNAL_HEADER_MARKER {
            return None;
        }
        Some(Self {
            tx_id: TransactionId::new(read_u64(bytes, 8)? as i64),
            last_page_number: read_u64(bytes, 16)? as i64,
            page_count: read_u32(bytes, 24)?,
            flags: read_u32(bytes, 28)?,
            compressed_size: read_u64(bytes, 32)?,
            uncompressed_size: read_u64(bytes, 40)?,
            hash: read_u64(bytes, 48)?,
        })
    }

    /// Encodes the header into its fixed on-disk form.
    #[must_use]
    pub fn encode(&self) -> [u8; TX_HEADER_SIZE] {
        let mut buf = [0u8; TX_HEADER_SIZE];
        buf[0..8].copy_from_slice(&JOURNAL_HEADER_MARKER.to_le_bytes());
        buf[8..16].copy_from_slice(&self.tx_id.as_i64().to_le_bytes());
        buf[16..24].copy_from_slice(&self.last_page_number.to_le_bytes());
        buf[24..28].copy_from_slice(&self.page_count.to_le_bytes());
        buf[28..32].copy_from_slice(&self.flags.to_le_bytes());
        buf[32..40].copy_from_slice(&self.compressed_size.to_le_bytes());
        buf[40..48].copy_from_slice(&self.uncompressed_size.to_le_bytes());
        buf[48..56].copy_from_slice(&self.hash.to_le_bytes());
        buf
    }

    /// Whether the commit bit is set.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.flags & TX_FLAG_COMMIT != 0
    }
}

/// A decoded page-info record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    /// Destination page in the data file.
    pub page_number: u64,
    /// Uncompressed image size in bytes; may span multiple pages.
    pub size: u64,
    /// Diff length in bytes, or 0 when the image is a verbatim copy.
    pub diff_size: u64,
}

impl PageInfo {
    /// Decodes a page-info record from raw bytes.
    ///
    /// Returns `None` if the slice is too short.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        Some(Self {
            page_number: read_u64(bytes, 0)?,
            size: read_u64(bytes, 8)?,
            diff_size: read_u64(bytes, 16)?,
        })
    }

    /// Encodes the record into its fixed on-disk form.
    #[must_use]
    pub fn encode(&self) -> [u8; PAGE_INFO_SIZE] {
        let mut buf = [0u8; PAGE_INFO_SIZE];
        buf[0..8].copy_from_slice(&self.page_number.to_le_bytes());
        buf[8..16].copy_from_slice(&self.size.to_le_bytes());
        buf[16..24].copy_from_slice(&self.diff_size.to_le_bytes());
        buf
    }

    /// Whether the payload carries a verbatim image for this page.
    #[must_use]
    pub fn is_verbatim(&self) -> bool {
        self.diff_size == 0
    }

    /// Bytes this record consumes from the payload, after the echoed
    /// page number.
    #[must_use]
    pub fn payload_len(&self) -> u64 {
        if self.is_verbatim() {
            self.size
        } else {
            self.diff_size
        }
    }
}

/// XXH64 of a compressed payload, seeded with the owning transaction's id.
///
/// Seeding binds the hash to the transaction's identity: a stale payload
/// from a reused journal cannot masquerade as a different transaction.
#[must_use]
pub fn payload_hash(tx_id: TransactionId, payload: &[u8]) -> u64 {
    xxh64(payload, tx_id.hash_seed())
}

fn read_u64(bytes: &[u8], at: usize) -> Option<u64> {
    let arr: [u8; 8] = bytes.get(at..at + 8)?.try_into().ok()?;
    Some(u64::from_le_bytes(arr))
}

fn read_u32(bytes: &[u8], at: usize) -> Option<u32> {
    let arr: [u8; 4] = bytes.get(at..at + 4)?.try_into().ok()?;
    Some(u32::from_le_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> TransactionHeader {
        TransactionHeader {
            tx_id: TransactionId::new(7),
            last_page_number: 12,
            page_count: 3,
            flags: TX_FLAG_COMMIT,
            compressed_size: 1500,
            uncompressed_size: 24_576,
            hash: 0xDEAD_BEEF_CAFE_F00D,
        }
    }

    #[test]
    fn header_roundtrip() {
        let header = sample_header();
        let encoded = header.encode();
        assert_eq!(TransactionHeader::decode(&encoded), Some(header));
    }

    #[test]
    fn header_rejects_wrong_marker() {
        let mut encoded = sample_header().encode();
        encoded[0] ^= 0xFF;
        assert_eq!(TransactionHeader::decode(&encoded), None);
    }

    #[test]
    fn header_rejects_short_slice() {
        let encoded = sample_header().encode();
        assert_eq!(TransactionHeader::decode(&encoded[..TX_HEADER_SIZE - 1]), None);
    }

    #[test]
    fn header_decodes_negative_tx_id() {
        let mut header = sample_header();
        header.tx_id = TransactionId::new(-3);
        let decoded = TransactionHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded.tx_id.as_i64(), -3);
    }

    #[test]
    fn commit_flag() {
        let mut header = sample_header();
        assert!(header.is_committed());
        header.flags = 0;
        assert!(!header.is_committed());
    }

    #[test]
    fn page_info_roundtrip() {
        let info = PageInfo {
            page_number: 42,
            size: 16_384,
            diff_size: 0,
        };
        assert_eq!(PageInfo::decode(&info.encode()), Some(info));
        assert!(info.is_verbatim());
        assert_eq!(info.payload_len(), 16_384);
    }

    #[test]
    fn page_info_diff_payload_len() {
        let info = PageInfo {
            page_number: 1,
            size: 8192,
            diff_size: 32,
        };
        assert!(!info.is_verbatim());
        assert_eq!(info.payload_len(), 32);
    }

    #[test]
    fn payload_hash_is_deterministic() {
        let payload = b"compressed payload bytes";
        let h1 = payload_hash(TransactionId::new(9), payload);
        let h2 = payload_hash(TransactionId::new(9), payload);
        assert_eq!(h1, h2);
    }

    #[test]
    fn payload_hash_is_bound_to_transaction_id() {
        let payload = b"compressed payload bytes";
        let h1 = payload_hash(TransactionId::new(9), payload);
        let h2 = payload_hash(TransactionId::new(10), payload);
        assert_ne!(h1, h2);
    }

    #[test]
    fn payload_hash_detects_payload_change() {
        let h1 = payload_hash(TransactionId::new(9), b"payload a");
        let h2 = payload_hash(TransactionId::new(9), b"payload b");
        assert_ne!(h1, h2);
    }
}
