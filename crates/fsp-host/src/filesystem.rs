//! The capability set a file system implementation provides.
//!
//! Every operation has a default that reports
//! `STATUS_INVALID_DEVICE_REQUEST`, so implementations only override what
//! they support. Expected failures are returned as `Err(NtStatus)` and reach
//! the engine unchanged; panics are caught by the dispatch layer and routed
//! through [`FileSystem::exception_handler`].

use bitflags::bitflags;

use crate::abi::FileInfo;
use crate::bridge::fault::Fault;
use crate::options::VolumeConfiguration;
use crate::status::{FsResult, NtStatus, STATUS_INVALID_DEVICE_REQUEST, STATUS_UNEXPECTED_IO_ERROR};

bitflags! {
    /// Flags passed to [`FileSystem::cleanup`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CleanupFlags: u32 {
        const DELETE = 0x01;
        const SET_ALLOCATION_SIZE = 0x02;
        const SET_ARCHIVE_BIT = 0x10;
        const SET_LAST_ACCESS_TIME = 0x20;
        const SET_LAST_WRITE_TIME = 0x40;
        const SET_CHANGE_TIME = 0x80;
    }
}

bitflags! {
    /// Security descriptor sections touched by [`FileSystem::set_security`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SecuritySections: u32 {
        const OWNER = 0x1;
        const GROUP = 0x2;
        /// Discretionary ACL.
        const ACCESS = 0x4;
        /// System ACL.
        const AUDIT = 0x8;
    }
}

/// Volume size and label.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VolumeInfo {
    pub total_size: u64,
    pub free_size: u64,
    /// Truncated to 32 UTF-16 units when encoded.
    pub label: String,
}

/// Answer to a security-by-name query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecurityByName {
    /// The name exists.
    Found {
        /// File attributes.
        attributes: u32,
        /// Self-relative security descriptor, if the file has one.
        security: Option<Vec<u8>>,
    },
    /// A path component is a reparse point.
    Reparse {
        /// Index of the reparse point in the path, if known.
        index: Option<u32>,
    },
}

/// Result of a successful Create or Open.
#[derive(Debug)]
pub struct Opened<N, D> {
    /// File node shared by all opens of the file.
    pub node: N,
    /// Per-open descriptor.
    pub desc: D,
    /// Metadata of the opened file.
    pub info: FileInfo,
    /// Name with the case stored on the volume, if it differs from the request.
    pub normalized_name: Option<String>,
}

impl<N, D> Opened<N, D> {
    /// Build an open result without a normalized name.
    pub fn new(node: N, desc: D, info: FileInfo) -> Self {
        Self {
            node,
            desc,
            info,
            normalized_name: None,
        }
    }

    /// Attach a normalized name.
    pub fn with_normalized_name(mut self, name: impl Into<String>) -> Self {
        self.normalized_name = Some(name.into());
        self
    }
}

/// Values for [`FileSystem::set_basic_info`].
///
/// An attributes value of `u32::MAX` or a zero timestamp means "leave
/// unchanged".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BasicInfo {
    pub file_attributes: u32,
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_write_time: u64,
    pub change_time: u64,
}

impl BasicInfo {
    /// Attribute value that leaves attributes untouched.
    pub const KEEP_ATTRIBUTES: u32 = u32::MAX;

    /// New attributes, if they are to change.
    pub fn attributes(&self) -> Option<u32> {
        (self.file_attributes != Self::KEEP_ATTRIBUTES).then_some(self.file_attributes)
    }
}

/// One directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub info: FileInfo,
}

/// One named stream entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    /// Stream name without the leading colon, empty for the default stream.
    pub name: String,
    pub size: u64,
    pub allocation_size: u64,
}

/// Result of reparse point resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedReparse {
    /// Value reported in the I/O status block.
    pub information: usize,
    /// Reparse data returned to the engine.
    pub data: Vec<u8>,
}

/// A file system implementation driven by the host.
///
/// `FileNode` is the per-file state shared by every open of that file and
/// `FileDesc` the per-open state. Both are owned by the host between a
/// successful Create/Open and the matching Close and are handed back by
/// reference; use interior mutability for state that changes.
#[allow(unused_variables)]
pub trait FileSystem: Send + Sync + 'static {
    type FileNode: Send + Sync + 'static;
    type FileDesc: Send + Sync + 'static;

    // ========================================================================
    // Lifecycle hooks
    // ========================================================================

    /// Adjust the volume configuration before the native volume is created.
    fn init(&self, config: &mut VolumeConfiguration) -> FsResult<()> {
        Ok(())
    }

    /// The volume is mounted; the dispatcher starts after this returns.
    fn mounted(&self, mount_point: Option<&str>) -> FsResult<()> {
        Ok(())
    }

    /// The volume is being torn down.
    fn unmounted(&self) {}

    /// Map a caught panic to a status.
    ///
    /// A success status returned here is reported as
    /// `STATUS_UNEXPECTED_IO_ERROR`.
    fn exception_handler(&self, fault: &Fault) -> NtStatus {
        STATUS_UNEXPECTED_IO_ERROR
    }

    // ========================================================================
    // Volume operations
    // ========================================================================

    fn get_volume_info(&self) -> FsResult<VolumeInfo> {
        Err(STATUS_INVALID_DEVICE_REQUEST)
    }

    fn set_volume_label(&self, label: &str) -> FsResult<VolumeInfo> {
        Err(STATUS_INVALID_DEVICE_REQUEST)
    }

    /// Look up attributes and security for a name before it is opened.
    ///
    /// # Arguments
    /// * `name` - Path relative to the volume root
    /// * `want_security` - Whether the caller asked for the descriptor
    fn get_security_by_name(&self, name: &str, want_security: bool) -> FsResult<SecurityByName> {
        Err(STATUS_INVALID_DEVICE_REQUEST)
    }

    // ========================================================================
    // Open and close
    // ========================================================================

    #[allow(clippy::too_many_arguments)]
    fn create(
        &self,
        name: &str,
        create_options: u32,
        granted_access: u32,
        file_attributes: u32,
        security_descriptor: Option<&[u8]>,
        allocation_size: u64,
    ) -> FsResult<Opened<Self::FileNode, Self::FileDesc>> {
        Err(STATUS_INVALID_DEVICE_REQUEST)
    }

    fn open(
        &self,
        name: &str,
        create_options: u32,
        granted_access: u32,
    ) -> FsResult<Opened<Self::FileNode, Self::FileDesc>> {
        Err(STATUS_INVALID_DEVICE_REQUEST)
    }

    fn overwrite(
        &self,
        node: &Self::FileNode,
        desc: &Self::FileDesc,
        file_attributes: u32,
        replace_file_attributes: bool,
        allocation_size: u64,
    ) -> FsResult<FileInfo> {
        Err(STATUS_INVALID_DEVICE_REQUEST)
    }

    /// Last handle to the open is closed. `name` is present when the file
    /// is to be deleted.
    fn cleanup(
        &self,
        node: &Self::FileNode,
        desc: &Self::FileDesc,
        name: Option<&str>,
        flags: CleanupFlags,
    ) {
    }

    /// The open is gone. The host drops the node and descriptor afterwards.
    fn close(&self, node: &Self::FileNode, desc: &Self::FileDesc) {}

    // ========================================================================
    // Data
    // ========================================================================

    /// Read into `buffer` at `offset`, returning the number of bytes read.
    fn read(
        &self,
        node: &Self::FileNode,
        desc: &Self::FileDesc,
        buffer: &mut [u8],
        offset: u64,
    ) -> FsResult<u32> {
        Err(STATUS_INVALID_DEVICE_REQUEST)
    }

    /// Write `buffer` at `offset` (or at end of file).
    ///
    /// With `constrained_io` the write must not extend the file.
    fn write(
        &self,
        node: &Self::FileNode,
        desc: &Self::FileDesc,
        buffer: &[u8],
        offset: u64,
        write_to_end_of_file: bool,
        constrained_io: bool,
    ) -> FsResult<(u32, FileInfo)> {
        Err(STATUS_INVALID_DEVICE_REQUEST)
    }

    /// Flush a file, or the whole volume when no open is given.
    fn flush(
        &self,
        node: Option<&Self::FileNode>,
        desc: Option<&Self::FileDesc>,
    ) -> FsResult<FileInfo> {
        Err(STATUS_INVALID_DEVICE_REQUEST)
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    fn get_file_info(&self, node: &Self::FileNode, desc: &Self::FileDesc) -> FsResult<FileInfo> {
        Err(STATUS_INVALID_DEVICE_REQUEST)
    }

    fn set_basic_info(
        &self,
        node: &Self::FileNode,
        desc: &Self::FileDesc,
        info: BasicInfo,
    ) -> FsResult<FileInfo> {
        Err(STATUS_INVALID_DEVICE_REQUEST)
    }

    fn set_file_size(
        &self,
        node: &Self::FileNode,
        desc: &Self::FileDesc,
        new_size: u64,
        set_allocation_size: bool,
    ) -> FsResult<FileInfo> {
        Err(STATUS_INVALID_DEVICE_REQUEST)
    }

    fn rename(
        &self,
        node: &Self::FileNode,
        desc: &Self::FileDesc,
        name: &str,
        new_name: &str,
        replace_if_exists: bool,
    ) -> FsResult<()> {
        Err(STATUS_INVALID_DEVICE_REQUEST)
    }

    fn set_delete(
        &self,
        node: &Self::FileNode,
        desc: &Self::FileDesc,
        name: &str,
        delete_file: bool,
    ) -> FsResult<()> {
        Err(STATUS_INVALID_DEVICE_REQUEST)
    }

    // ========================================================================
    // Security
    // ========================================================================

    fn get_security(&self, node: &Self::FileNode, desc: &Self::FileDesc) -> FsResult<Vec<u8>> {
        Err(STATUS_INVALID_DEVICE_REQUEST)
    }

    fn set_security(
        &self,
        node: &Self::FileNode,
        desc: &Self::FileDesc,
        sections: SecuritySections,
        modification: &[u8],
    ) -> FsResult<()> {
        Err(STATUS_INVALID_DEVICE_REQUEST)
    }

    // ========================================================================
    // Directories and streams
    // ========================================================================

    /// List a directory, starting after `marker` when one is given.
    fn read_directory(
        &self,
        node: &Self::FileNode,
        desc: &Self::FileDesc,
        pattern: Option<&str>,
        marker: Option<&str>,
    ) -> FsResult<Vec<DirEntry>> {
        Err(STATUS_INVALID_DEVICE_REQUEST)
    }

    fn get_dir_info_by_name(
        &self,
        node: &Self::FileNode,
        desc: &Self::FileDesc,
        name: &str,
    ) -> FsResult<DirEntry> {
        Err(STATUS_INVALID_DEVICE_REQUEST)
    }

    fn get_stream_info(
        &self,
        node: &Self::FileNode,
        desc: &Self::FileDesc,
    ) -> FsResult<Vec<StreamEntry>> {
        Err(STATUS_INVALID_DEVICE_REQUEST)
    }

    // ========================================================================
    // Reparse points
    // ========================================================================

    fn resolve_reparse_points(
        &self,
        name: &str,
        reparse_point_index: u32,
        resolve_last_path_component: bool,
    ) -> FsResult<ResolvedReparse> {
        Err(STATUS_INVALID_DEVICE_REQUEST)
    }

    fn get_reparse_point(
        &self,
        node: &Self::FileNode,
        desc: &Self::FileDesc,
        name: &str,
    ) -> FsResult<Vec<u8>> {
        Err(STATUS_INVALID_DEVICE_REQUEST)
    }

    fn set_reparse_point(
        &self,
        node: &Self::FileNode,
        desc: &Self::FileDesc,
        name: &str,
        data: &[u8],
    ) -> FsResult<()> {
        Err(STATUS_INVALID_DEVICE_REQUEST)
    }

    fn delete_reparse_point(
        &self,
        node: &Self::FileNode,
        desc: &Self::FileDesc,
        name: &str,
        data: &[u8],
    ) -> FsResult<()> {
        Err(STATUS_INVALID_DEVICE_REQUEST)
    }

    // ========================================================================
    // Device control
    // ========================================================================

    /// Handle a device control request, returning bytes written to `output`.
    fn control(
        &self,
        node: &Self::FileNode,
        desc: &Self::FileDesc,
        control_code: u32,
        input: &[u8],
        output: &mut [u8],
    ) -> FsResult<u32> {
        Err(STATUS_INVALID_DEVICE_REQUEST)
    }
}
