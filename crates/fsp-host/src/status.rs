//! Native status codes.
//!
//! The dispatch engine understands nothing but NTSTATUS values: non-negative
//! means success, negative means failure. Implementation methods report
//! expected failures as `Err(NtStatus)` and the dispatch table forwards them
//! unchanged.

use std::fmt;

/// Result type returned by [`FileSystem`](crate::FileSystem) operations.
pub type FsResult<T> = Result<T, NtStatus>;

/// An NTSTATUS value as exchanged with the native engine.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct NtStatus(pub i32);

impl NtStatus {
    /// Build a status from its conventional unsigned hex spelling.
    pub const fn from_u32(code: u32) -> Self {
        Self(code as i32)
    }

    /// True for any non-negative status, including informational ones
    /// such as [`STATUS_REPARSE`].
    pub const fn is_success(self) -> bool {
        self.0 >= 0
    }

    /// True for negative (warning or error severity) statuses.
    pub const fn is_failure(self) -> bool {
        self.0 < 0
    }

    /// Raw value handed back across the ABI.
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// Convert into a `Result`, keeping the status on the error side.
    ///
    /// # Returns
    /// `Ok(self)` for success statuses, `Err(self)` otherwise.
    pub fn into_result(self) -> FsResult<NtStatus> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(self)
        }
    }
}

impl fmt::Debug for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NtStatus(0x{:08X})", self.0 as u32)
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0 as u32)
    }
}

impl std::error::Error for NtStatus {}

impl From<NtStatus> for i32 {
    fn from(status: NtStatus) -> Self {
        status.0
    }
}

impl From<i32> for NtStatus {
    fn from(raw: i32) -> Self {
        Self(raw)
    }
}

pub const STATUS_SUCCESS: NtStatus = NtStatus(0);
/// Success sentinel: the name resolves through a reparse point.
pub const STATUS_REPARSE: NtStatus = NtStatus(0x104);
pub const STATUS_BUFFER_OVERFLOW: NtStatus = NtStatus::from_u32(0x8000_0005);
pub const STATUS_INVALID_HANDLE: NtStatus = NtStatus::from_u32(0xC000_0008);
pub const STATUS_INVALID_PARAMETER: NtStatus = NtStatus::from_u32(0xC000_000D);
pub const STATUS_NO_SUCH_DEVICE: NtStatus = NtStatus::from_u32(0xC000_000E);
pub const STATUS_INVALID_DEVICE_REQUEST: NtStatus = NtStatus::from_u32(0xC000_0010);
pub const STATUS_END_OF_FILE: NtStatus = NtStatus::from_u32(0xC000_0011);
pub const STATUS_ACCESS_DENIED: NtStatus = NtStatus::from_u32(0xC000_0022);
pub const STATUS_BUFFER_TOO_SMALL: NtStatus = NtStatus::from_u32(0xC000_0023);
pub const STATUS_OBJECT_NAME_INVALID: NtStatus = NtStatus::from_u32(0xC000_0033);
pub const STATUS_OBJECT_NAME_NOT_FOUND: NtStatus = NtStatus::from_u32(0xC000_0034);
pub const STATUS_OBJECT_NAME_COLLISION: NtStatus = NtStatus::from_u32(0xC000_0035);
pub const STATUS_OBJECT_PATH_NOT_FOUND: NtStatus = NtStatus::from_u32(0xC000_003A);
pub const STATUS_INSUFFICIENT_RESOURCES: NtStatus = NtStatus::from_u32(0xC000_009A);
pub const STATUS_NOT_IMPLEMENTED: NtStatus = NtStatus::from_u32(0xC000_0002);
pub const STATUS_DEVICE_NOT_READY: NtStatus = NtStatus::from_u32(0xC000_00A3);
pub const STATUS_FILE_IS_A_DIRECTORY: NtStatus = NtStatus::from_u32(0xC000_00BA);
pub const STATUS_NOT_A_DIRECTORY: NtStatus = NtStatus::from_u32(0xC000_0103);
pub const STATUS_DIRECTORY_NOT_EMPTY: NtStatus = NtStatus::from_u32(0xC000_0101);
/// Returned when the fault hook itself fails.
pub const STATUS_UNEXPECTED_IO_ERROR: NtStatus = NtStatus::from_u32(0xC000_00E9);
pub const STATUS_NOT_A_REPARSE_POINT: NtStatus = NtStatus::from_u32(0xC000_0275);
pub const STATUS_OBJECT_NAME_EXISTS: NtStatus = NtStatus::from_u32(0x4000_0000);
