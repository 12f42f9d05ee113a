//! Directory and stream listing encoding.
//!
//! Records are packed back to back at 8-byte alignment. A record that does
//! not fit is left out entirely; the engine asks again with a marker. When
//! every record fits, a zero size field marks the end of the listing.

use smallvec::SmallVec;

use crate::abi::{FileInfo, DIR_INFO_HEADER_SIZE, DIR_INFO_NAME_MAX, STREAM_INFO_HEADER_SIZE};
use crate::filesystem::{DirEntry, StreamEntry};

const RECORD_ALIGN: usize = 8;
const END_MARKER_SIZE: usize = std::mem::size_of::<u16>();
const STREAM_NAME_MAX: usize = (u16::MAX as usize - STREAM_INFO_HEADER_SIZE) / 2;

/// Encoded record; directory records (at most 614 bytes) fit on the stack.
type RecordBuf = SmallVec<[u8; 1024]>;

/// Appends aligned records to a caller buffer.
pub struct ListingWriter<'a> {
    buffer: &'a mut [u8],
    offset: usize,
}

impl<'a> ListingWriter<'a> {
    /// Create a writer over the caller buffer.
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer, offset: 0 }
    }

    /// Append one record.
    ///
    /// # Returns
    /// False if the aligned record does not fit; nothing is written then.
    pub fn push(&mut self, record: &[u8]) -> bool {
        let aligned: usize = align_up(record.len());
        if self.offset + aligned > self.buffer.len() {
            return false;
        }

        let slot: &mut [u8] = &mut self.buffer[self.offset..self.offset + aligned];
        slot[..record.len()].copy_from_slice(record);
        slot[record.len()..].fill(0);
        self.offset += aligned;
        true
    }

    /// Append the end-of-listing marker if there is room for it.
    pub fn finish(&mut self) -> bool {
        if self.offset + END_MARKER_SIZE > self.buffer.len() {
            return false;
        }
        self.buffer[self.offset..self.offset + END_MARKER_SIZE].fill(0);
        self.offset += END_MARKER_SIZE;
        true
    }

    /// Bytes written so far.
    pub fn bytes_transferred(&self) -> u32 {
        self.offset as u32
    }
}

/// Pack directory entries into a caller buffer.
///
/// # Arguments
/// * `entries` - Entries in listing order
/// * `buffer` - Caller buffer
///
/// # Returns
/// Bytes transferred.
pub fn pack_dir_entries(entries: &[DirEntry], buffer: &mut [u8]) -> u32 {
    let mut writer: ListingWriter<'_> = ListingWriter::new(buffer);
    for entry in entries {
        if !writer.push(&encode_dir_entry(entry)) {
            return writer.bytes_transferred();
        }
    }
    writer.finish();
    writer.bytes_transferred()
}

/// Pack stream entries into a caller buffer.
///
/// # Arguments
/// * `entries` - Streams of the file
/// * `buffer` - Caller buffer
///
/// # Returns
/// Bytes transferred.
pub fn pack_stream_entries(entries: &[StreamEntry], buffer: &mut [u8]) -> u32 {
    let mut writer: ListingWriter<'_> = ListingWriter::new(buffer);
    for entry in entries {
        if !writer.push(&encode_stream_entry(entry)) {
            return writer.bytes_transferred();
        }
    }
    writer.finish();
    writer.bytes_transferred()
}

/// Encode a directory record: size, file info at offset 8, name at 104.
fn encode_dir_entry(entry: &DirEntry) -> RecordBuf {
    let mut record: RecordBuf = SmallVec::new();
    record.resize(DIR_INFO_HEADER_SIZE, 0);
    encode_file_info(&entry.info, &mut record[8..8 + 72]);
    for unit in entry.name.encode_utf16().take(DIR_INFO_NAME_MAX) {
        record.extend_from_slice(&unit.to_le_bytes());
    }

    let size: u16 = record.len() as u16;
    record[0..2].copy_from_slice(&size.to_le_bytes());
    record
}

/// Encode a stream record: size, stream size, allocation size, name.
fn encode_stream_entry(entry: &StreamEntry) -> RecordBuf {
    let mut record: RecordBuf = SmallVec::new();
    record.resize(STREAM_INFO_HEADER_SIZE, 0);
    record[8..16].copy_from_slice(&entry.size.to_le_bytes());
    record[16..24].copy_from_slice(&entry.allocation_size.to_le_bytes());
    for unit in entry.name.encode_utf16().take(STREAM_NAME_MAX) {
        record.extend_from_slice(&unit.to_le_bytes());
    }

    let size: u16 = record.len() as u16;
    record[0..2].copy_from_slice(&size.to_le_bytes());
    record
}

/// Serialize a file info record field by field.
fn encode_file_info(info: &FileInfo, out: &mut [u8]) {
    out[0..4].copy_from_slice(&info.file_attributes.to_le_bytes());
    out[4..8].copy_from_slice(&info.reparse_tag.to_le_bytes());
    out[8..16].copy_from_slice(&info.allocation_size.to_le_bytes());
    out[16..24].copy_from_slice(&info.file_size.to_le_bytes());
    out[24..32].copy_from_slice(&info.creation_time.to_le_bytes());
    out[32..40].copy_from_slice(&info.last_access_time.to_le_bytes());
    out[40..48].copy_from_slice(&info.last_write_time.to_le_bytes());
    out[48..56].copy_from_slice(&info.change_time.to_le_bytes());
    out[56..64].copy_from_slice(&info.index_number.to_le_bytes());
    out[64..68].copy_from_slice(&info.hard_links.to_le_bytes());
    out[68..72].copy_from_slice(&info.ea_size.to_le_bytes());
}

/// Decode a directory listing produced by [`pack_dir_entries`].
///
/// Stops at the end marker or at the end of the transferred bytes.
pub fn decode_dir_listing(bytes: &[u8]) -> Vec<DirEntry> {
    records(bytes, DIR_INFO_HEADER_SIZE)
        .map(|record| DirEntry {
            name: decode_name(&record[DIR_INFO_HEADER_SIZE..]),
            info: decode_file_info(&record[8..8 + 72]),
        })
        .collect()
}

/// Decode a stream listing produced by [`pack_stream_entries`].
pub fn decode_stream_listing(bytes: &[u8]) -> Vec<StreamEntry> {
    records(bytes, STREAM_INFO_HEADER_SIZE)
        .map(|record| StreamEntry {
            name: decode_name(&record[STREAM_INFO_HEADER_SIZE..]),
            size: read_u64(record, 8),
            allocation_size: read_u64(record, 16),
        })
        .collect()
}

/// Iterate well-formed records of at least `header` bytes.
fn records(bytes: &[u8], header: usize) -> impl Iterator<Item = &[u8]> {
    let mut offset: usize = 0;
    std::iter::from_fn(move || {
        if offset + END_MARKER_SIZE > bytes.len() {
            return None;
        }
        let size: usize = u16::from_le_bytes([bytes[offset], bytes[offset + 1]]) as usize;
        if size < header || offset + size > bytes.len() {
            return None;
        }
        let record: &[u8] = &bytes[offset..offset + size];
        offset += align_up(size);
        Some(record)
    })
}

fn decode_name(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    String::from_utf16_lossy(&units)
}

fn decode_file_info(bytes: &[u8]) -> FileInfo {
    FileInfo {
        file_attributes: read_u32(bytes, 0),
        reparse_tag: read_u32(bytes, 4),
        allocation_size: read_u64(bytes, 8),
        file_size: read_u64(bytes, 16),
        creation_time: read_u64(bytes, 24),
        last_access_time: read_u64(bytes, 32),
        last_write_time: read_u64(bytes, 40),
        change_time: read_u64(bytes, 48),
        index_number: read_u64(bytes, 56),
        hard_links: read_u32(bytes, 64),
        ea_size: read_u32(bytes, 68),
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut raw: [u8; 4] = [0; 4];
    raw.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(raw)
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw: [u8; 8] = [0; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

fn align_up(size: usize) -> usize {
    (size + RECORD_ALIGN - 1) & !(RECORD_ALIGN - 1)
}
