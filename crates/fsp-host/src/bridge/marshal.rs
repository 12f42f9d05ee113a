//! Size negotiation for variable-length results.
//!
//! Every variable-length payload crosses the boundary the same way: the
//! caller passes a buffer and an in/out size holding its capacity, and the
//! host either copies the payload or reports the size it needs.

use std::ffi::c_void;
use std::ptr;

use crate::abi::{OpenFileInfo, RawDirInfo, DIR_INFO_HEADER_SIZE};
use crate::status::{NtStatus, STATUS_BUFFER_OVERFLOW, STATUS_BUFFER_TOO_SMALL, STATUS_SUCCESS};
use crate::util::wstr::encode_truncated;

/// Kind of payload being copied; decides the too-small status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    SecurityDescriptor,
    ReparseData,
}

impl PayloadKind {
    /// Status returned when the caller's buffer cannot hold the payload.
    pub fn too_small_status(self) -> NtStatus {
        match self {
            PayloadKind::SecurityDescriptor => STATUS_BUFFER_OVERFLOW,
            PayloadKind::ReparseData => STATUS_BUFFER_TOO_SMALL,
        }
    }
}

/// Copy a payload into a caller buffer with size negotiation.
///
/// - null `p_size`: nothing to negotiate, success
/// - `None` payload: size 0, success
/// - capacity below payload length: size set to the length, nothing copied,
///   too-small status
/// - otherwise: payload copied when `dest` is non-null (a null `dest` is a
///   probe), size set to the length, success
///
/// # Arguments
/// * `kind` - Payload kind
/// * `payload` - Bytes to return
/// * `dest` - Caller buffer (may be null)
/// * `p_size` - In: capacity in bytes. Out: payload length (may be null)
///
/// # Safety
/// A non-null `p_size` must be valid for reads and writes. A non-null `dest`
/// must be writable for `*p_size` bytes.
pub unsafe fn copy_sized(
    kind: PayloadKind,
    payload: Option<&[u8]>,
    dest: *mut c_void,
    p_size: *mut usize,
) -> NtStatus {
    if p_size.is_null() {
        return STATUS_SUCCESS;
    }

    let Some(payload) = payload else {
        *p_size = 0;
        return STATUS_SUCCESS;
    };

    let capacity: usize = *p_size;
    *p_size = payload.len();
    if capacity < payload.len() {
        return kind.too_small_status();
    }

    if !dest.is_null() {
        ptr::copy_nonoverlapping(payload.as_ptr(), dest.cast::<u8>(), payload.len());
    }
    STATUS_SUCCESS
}

/// Write a normalized name into an open-result record.
///
/// The record's buffer holds `normalized_name_size` bytes; the name is
/// truncated to whole UTF-16 units and the size updated to what was copied.
/// Nothing is written when the record has no buffer.
///
/// # Safety
/// A non-null `normalized_name` in `info` must be writable for
/// `normalized_name_size` bytes.
pub unsafe fn write_normalized_name(info: &mut OpenFileInfo, name: &str) {
    if info.normalized_name.is_null() {
        return;
    }

    let capacity: usize = info.normalized_name_size as usize / 2;
    let dst: &mut [u16] = std::slice::from_raw_parts_mut(info.normalized_name, capacity);
    let written: usize = encode_truncated(name, dst);
    info.normalized_name_size = (written * 2) as u16;
}

/// Fill the name of a directory record and set its size.
///
/// # Returns
/// Record size in bytes (header plus name).
pub fn write_dir_info_name(dir_info: &mut RawDirInfo, name: &str) -> usize {
    let written: usize = encode_truncated(name, &mut dir_info.file_name_buf);
    let size: usize = DIR_INFO_HEADER_SIZE + written * 2;
    dir_info.size = size as u16;
    size
}

/// Byte view of a caller buffer; null or zero length gives an empty slice.
///
/// # Safety
/// A non-null `data` must be readable for `len` bytes for `'a`.
pub unsafe fn bytes_or_empty<'a>(data: *const c_void, len: usize) -> &'a [u8] {
    if data.is_null() || len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(data.cast::<u8>(), len)
    }
}

/// Mutable byte view of a caller buffer; null or zero length gives an empty
/// slice.
///
/// # Safety
/// A non-null `data` must be writable for `len` bytes for `'a`, with no other
/// live references.
pub unsafe fn bytes_or_empty_mut<'a>(data: *mut c_void, len: usize) -> &'a mut [u8] {
    if data.is_null() || len == 0 {
        &mut []
    } else {
        std::slice::from_raw_parts_mut(data.cast::<u8>(), len)
    }
}

// ============================================================================
// Self-relative security descriptors
// ============================================================================

const SD_HEADER_SIZE: usize = 20;
const SE_DACL_PRESENT: u16 = 0x0004;
const SE_SACL_PRESENT: u16 = 0x0010;
const SE_SELF_RELATIVE: u16 = 0x8000;

/// View an incoming self-relative security descriptor as bytes.
///
/// The length is measured from the header: the furthest end of the owner
/// and group SIDs and of the SACL and DACL.
///
/// # Arguments
/// * `descriptor` - Descriptor pointer (may be null)
///
/// # Returns
/// `None` for a null pointer; the header alone for a descriptor that is not
/// self-relative.
///
/// # Safety
/// A non-null `descriptor` must point to a well-formed descriptor that stays
/// valid for `'a`.
pub unsafe fn security_descriptor_bytes<'a>(descriptor: *const c_void) -> Option<&'a [u8]> {
    if descriptor.is_null() {
        return None;
    }

    let base: *const u8 = descriptor.cast::<u8>();
    let control: u16 = read_u16(base, 2);
    if control & SE_SELF_RELATIVE == 0 {
        return Some(std::slice::from_raw_parts(base, SD_HEADER_SIZE));
    }

    let owner: usize = read_u32(base, 4) as usize;
    let group: usize = read_u32(base, 8) as usize;
    let sacl: usize = read_u32(base, 12) as usize;
    let dacl: usize = read_u32(base, 16) as usize;

    let mut end: usize = SD_HEADER_SIZE;
    for sid in [owner, group] {
        if sid != 0 {
            end = end.max(sid + sid_length(base, sid));
        }
    }
    if control & SE_SACL_PRESENT != 0 && sacl != 0 {
        end = end.max(sacl + read_u16(base, sacl + 2) as usize);
    }
    if control & SE_DACL_PRESENT != 0 && dacl != 0 {
        end = end.max(dacl + read_u16(base, dacl + 2) as usize);
    }

    Some(std::slice::from_raw_parts(base, end))
}

/// SID length: 8-byte header plus 4 bytes per sub-authority.
unsafe fn sid_length(base: *const u8, offset: usize) -> usize {
    let sub_authority_count: u8 = *base.add(offset + 1);
    8 + 4 * sub_authority_count as usize
}

unsafe fn read_u16(base: *const u8, offset: usize) -> u16 {
    u16::from_le(ptr::read_unaligned(base.add(offset).cast::<u16>()))
}

unsafe fn read_u32(base: *const u8, offset: usize) -> u32 {
    u32::from_le(ptr::read_unaligned(base.add(offset).cast::<u32>()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &[u8] = &[1, 2, 3, 4, 5, 6, 7, 8, 9, 10];

    #[test]
    fn test_exact_fit_copies() {
        let mut buf: [u8; 10] = [0; 10];
        let mut size: usize = 10;
        let status: NtStatus = unsafe {
            copy_sized(
                PayloadKind::SecurityDescriptor,
                Some(PAYLOAD),
                buf.as_mut_ptr().cast(),
                &mut size,
            )
        };
        assert_eq!(status, STATUS_SUCCESS);
        assert_eq!(size, 10);
        assert_eq!(&buf, PAYLOAD);
    }

    #[test]
    fn test_larger_buffer_reports_payload_size() {
        let mut buf: [u8; 32] = [0xAA; 32];
        let mut size: usize = 32;
        let status: NtStatus = unsafe {
            copy_sized(PayloadKind::ReparseData, Some(PAYLOAD), buf.as_mut_ptr().cast(), &mut size)
        };
        assert_eq!(status, STATUS_SUCCESS);
        assert_eq!(size, 10);
        assert_eq!(&buf[..10], PAYLOAD);
        assert_eq!(buf[10], 0xAA);
    }

    #[test]
    fn test_too_small_copies_nothing() {
        let mut buf: [u8; 4] = [0xAA; 4];
        let mut size: usize = 4;
        let status: NtStatus = unsafe {
            copy_sized(
                PayloadKind::SecurityDescriptor,
                Some(PAYLOAD),
                buf.as_mut_ptr().cast(),
                &mut size,
            )
        };
        assert_eq!(status, STATUS_BUFFER_OVERFLOW);
        assert_eq!(size, 10);
        assert_eq!(buf, [0xAA; 4]);

        let mut size: usize = 9;
        let status: NtStatus = unsafe {
            copy_sized(PayloadKind::ReparseData, Some(PAYLOAD), buf.as_mut_ptr().cast(), &mut size)
        };
        assert_eq!(status, STATUS_BUFFER_TOO_SMALL);
        assert_eq!(size, 10);
    }

    #[test]
    fn test_probe_with_null_dest() {
        let mut size: usize = 64;
        let status: NtStatus = unsafe {
            copy_sized(
                PayloadKind::SecurityDescriptor,
                Some(PAYLOAD),
                std::ptr::null_mut(),
                &mut size,
            )
        };
        assert_eq!(status, STATUS_SUCCESS);
        assert_eq!(size, 10);

        // A zero-capacity probe still reports the needed size
        let mut size: usize = 0;
        let status: NtStatus = unsafe {
            copy_sized(
                PayloadKind::SecurityDescriptor,
                Some(PAYLOAD),
                std::ptr::null_mut(),
                &mut size,
            )
        };
        assert_eq!(status, STATUS_BUFFER_OVERFLOW);
        assert_eq!(size, 10);
    }

    #[test]
    fn test_absent_size_and_payload() {
        let status: NtStatus = unsafe {
            copy_sized(
                PayloadKind::SecurityDescriptor,
                Some(PAYLOAD),
                std::ptr::null_mut(),
                std::ptr::null_mut(),
            )
        };
        assert_eq!(status, STATUS_SUCCESS);

        let mut size: usize = 16;
        let status: NtStatus = unsafe {
            copy_sized(PayloadKind::SecurityDescriptor, None, std::ptr::null_mut(), &mut size)
        };
        assert_eq!(status, STATUS_SUCCESS);
        assert_eq!(size, 0);
    }

    #[test]
    fn test_normalized_name_truncated() {
        let mut buf: [u16; 4] = [0; 4];
        let mut info: OpenFileInfo = OpenFileInfo {
            file_info: Default::default(),
            normalized_name: buf.as_mut_ptr(),
            normalized_name_size: 8,
        };
        unsafe { write_normalized_name(&mut info, "\\Foo.txt") };
        assert_eq!(info.normalized_name_size, 8);
        assert_eq!(buf, [0x5C, 0x46, 0x6F, 0x6F]);

        let mut info: OpenFileInfo = OpenFileInfo {
            file_info: Default::default(),
            normalized_name: buf.as_mut_ptr(),
            normalized_name_size: 8,
        };
        unsafe { write_normalized_name(&mut info, "\\A") };
        assert_eq!(info.normalized_name_size, 4);
    }

    #[test]
    fn test_dir_info_name() {
        let mut dir_info: RawDirInfo = RawDirInfo::default();
        let size: usize = write_dir_info_name(&mut dir_info, "file.txt");
        assert_eq!(size, DIR_INFO_HEADER_SIZE + 16);
        assert_eq!(dir_info.size as usize, size);

        let long: String = "n".repeat(300);
        let size: usize = write_dir_info_name(&mut dir_info, &long);
        assert_eq!(size, DIR_INFO_HEADER_SIZE + 255 * 2);
    }

    /// Self-relative descriptor: owner SID (1 sub-authority) at 20, group
    /// SID (2 sub-authorities) at 32, DACL of 8 bytes at 48.
    fn sample_descriptor() -> Vec<u8> {
        let mut sd: Vec<u8> = vec![0; 64];
        sd[0] = 1;
        let control: u16 = SE_SELF_RELATIVE | SE_DACL_PRESENT;
        sd[2..4].copy_from_slice(&control.to_le_bytes());
        sd[4..8].copy_from_slice(&20u32.to_le_bytes());
        sd[8..12].copy_from_slice(&32u32.to_le_bytes());
        sd[16..20].copy_from_slice(&48u32.to_le_bytes());
        sd[20] = 1;
        sd[21] = 1;
        sd[32] = 1;
        sd[33] = 2;
        sd[48] = 2;
        sd[50..52].copy_from_slice(&8u16.to_le_bytes());
        sd
    }

    #[test]
    fn test_security_descriptor_length() {
        let sd: Vec<u8> = sample_descriptor();
        let bytes: &[u8] = unsafe { security_descriptor_bytes(sd.as_ptr().cast()) }.unwrap();
        assert_eq!(bytes.len(), 56);
        assert_eq!(bytes, &sd[..56]);

        assert!(unsafe { security_descriptor_bytes(std::ptr::null()) }.is_none());
    }

    #[test]
    fn test_security_descriptor_absolute_header_only() {
        let mut sd: Vec<u8> = sample_descriptor();
        sd[2..4].copy_from_slice(&SE_DACL_PRESENT.to_le_bytes());
        let bytes: &[u8] = unsafe { security_descriptor_bytes(sd.as_ptr().cast()) }.unwrap();
        assert_eq!(bytes.len(), SD_HEADER_SIZE);
    }
}
