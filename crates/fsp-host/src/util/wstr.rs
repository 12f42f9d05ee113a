//! Wide string conversion utilities.

use smallvec::SmallVec;

use crate::error::HostError;

/// Convert a null-terminated UTF-16 pointer to a Rust String.
///
/// Names under 256 chars use stack allocation, longer names heap allocate.
///
/// # Arguments
/// * `s` - Wide string pointer (may be null)
///
/// # Returns
/// UTF-8 string, empty for a null pointer. `PathConversion` when the name
/// holds an unpaired surrogate.
///
/// # Safety
/// A non-null `s` must point to a readable, null-terminated UTF-16 string.
pub unsafe fn wide_ptr_to_string(s: *const u16) -> Result<String, HostError> {
    if s.is_null() {
        return Ok(String::new());
    }

    let len: usize = wide_len(s);
    if len == 0 {
        return Ok(String::new());
    }

    // Stack buffer for common path lengths (512 bytes = 256 UTF-16 chars)
    let mut buffer: SmallVec<[u8; 512]> = SmallVec::new();

    let wide_slice: &[u16] = std::slice::from_raw_parts(s, len);
    for c in char::decode_utf16(wide_slice.iter().copied()) {
        let ch: char = c.map_err(|e| {
            HostError::PathConversion(format!("unpaired surrogate 0x{:04X}", e.unpaired_surrogate()))
        })?;
        let mut buf: [u8; 4] = [0; 4];
        buffer.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
    }

    String::from_utf8(buffer.to_vec()).map_err(|e| HostError::PathConversion(e.to_string()))
}

/// Convert an optional wide pointer, mapping null to `None`.
///
/// # Safety
/// Same contract as [`wide_ptr_to_string`].
pub unsafe fn wide_ptr_to_option(s: *const u16) -> Result<Option<String>, HostError> {
    if s.is_null() {
        return Ok(None);
    }
    wide_ptr_to_string(s).map(Some)
}

/// Length in UTF-16 units of a null-terminated wide string.
///
/// # Safety
/// `s` must be non-null and null-terminated.
unsafe fn wide_len(s: *const u16) -> usize {
    let mut len: usize = 0;
    let mut ptr: *const u16 = s;
    while *ptr != 0 {
        len += 1;
        ptr = ptr.add(1);
    }
    len
}

/// Convert Rust String to wide string (null-terminated).
///
/// # Arguments
/// * `s` - UTF-8 string
///
/// # Returns
/// Null-terminated wide string.
pub fn string_to_wide(s: &str) -> Vec<u16> {
    let mut wide: Vec<u16> = s.encode_utf16().collect();
    wide.push(0); // Null terminator
    wide
}

/// Encode a string into a fixed-capacity UTF-16 buffer.
///
/// Truncates to the buffer capacity in whole UTF-16 units, never splitting a
/// surrogate pair. No terminator is written; the caller records the returned
/// length.
///
/// # Arguments
/// * `s` - UTF-8 string
/// * `dst` - Destination buffer
///
/// # Returns
/// Number of UTF-16 units written.
pub fn encode_truncated(s: &str, dst: &mut [u16]) -> usize {
    let mut written: usize = 0;
    for ch in s.chars() {
        let width: usize = ch.len_utf16();
        if written + width > dst.len() {
            break;
        }
        ch.encode_utf16(&mut dst[written..written + width]);
        written += width;
    }
    written
}
