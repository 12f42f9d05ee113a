//! Native ABI records exchanged with the dispatch engine.
//!
//! Layouts follow the engine's C definitions exactly; slot order in
//! [`FileSystemInterface`] is part of the compatibility surface.

use std::ffi::c_void;
use std::mem::{offset_of, size_of};

use crate::status::NtStatus;

/// Native BOOLEAN.
pub type Boolean = u8;

/// Fixed-width per-open context value.
///
/// The engine stores it with each open handle and hands it back by pointer
/// on every operation. The host keeps a registry key in `user_context` and
/// the owning volume's tag in `user_context2`; all zero means unbound.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FullContext {
    pub user_context: u64,
    pub user_context2: u64,
}

impl FullContext {
    /// The unbound context.
    pub const NULL: FullContext = FullContext {
        user_context: 0,
        user_context2: 0,
    };

    /// True if nothing has been bound into this value.
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

/// Per-file metadata record.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileInfo {
    pub file_attributes: u32,
    pub reparse_tag: u32,
    pub allocation_size: u64,
    pub file_size: u64,
    pub creation_time: u64,
    pub last_access_time: u64,
    pub last_write_time: u64,
    pub change_time: u64,
    pub index_number: u64,
    pub hard_links: u32,
    pub ea_size: u32,
}

/// Result record of Create/Open: file info plus a caller-owned buffer that
/// receives the normalized name.
#[repr(C)]
#[derive(Debug)]
pub struct OpenFileInfo {
    pub file_info: FileInfo,
    /// Caller buffer for the normalized name (may be null).
    pub normalized_name: *mut u16,
    /// In: capacity of `normalized_name` in bytes. Out: bytes written.
    pub normalized_name_size: u16,
}

/// Maximum volume label length in UTF-16 units.
pub const VOLUME_LABEL_MAX: usize = 32;

/// Volume information record.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawVolumeInfo {
    pub total_size: u64,
    pub free_size: u64,
    /// Label length in bytes.
    pub volume_label_length: u16,
    pub volume_label: [u16; VOLUME_LABEL_MAX],
}

/// Maximum file name length in a directory record, in UTF-16 units.
pub const DIR_INFO_NAME_MAX: usize = 255;

/// Directory entry record. `size` covers the header plus the used part of
/// `file_name_buf`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawDirInfo {
    pub size: u16,
    pub file_info: FileInfo,
    pub padding: [u8; 24],
    pub file_name_buf: [u16; DIR_INFO_NAME_MAX],
}

impl Default for RawDirInfo {
    fn default() -> Self {
        Self {
            size: 0,
            file_info: FileInfo::default(),
            padding: [0; 24],
            file_name_buf: [0; DIR_INFO_NAME_MAX],
        }
    }
}

/// Bytes preceding the name in a directory record.
pub const DIR_INFO_HEADER_SIZE: usize = offset_of!(RawDirInfo, file_name_buf);

/// Stream entry header; the UTF-16 stream name follows it directly.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawStreamInfoHeader {
    pub size: u16,
    pub stream_size: u64,
    pub stream_allocation_size: u64,
}

/// Bytes preceding the name in a stream record.
pub const STREAM_INFO_HEADER_SIZE: usize = size_of::<RawStreamInfoHeader>();

/// I/O status block written by ResolveReparsePoints.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct IoStatusBlock {
    pub status: NtStatus,
    pub information: usize,
}

/// Capacity of the network prefix in UTF-16 units (including terminator).
pub const VOLUME_PREFIX_CAPACITY: usize = 192;
/// Capacity of the file system name in UTF-16 units (including terminator).
pub const FILE_SYSTEM_NAME_CAPACITY: usize = 16;

/// Volume parameters handed to the engine at volume creation.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct FspVolumeParams {
    /// Size of this structure.
    pub version: u16,
    pub sector_size: u16,
    pub sectors_per_allocation_unit: u16,
    pub max_component_length: u16,
    pub volume_creation_time: u64,
    pub volume_serial_number: u32,
    pub transact_timeout: u32,
    pub irp_timeout: u32,
    pub irp_capacity: u32,
    pub file_info_timeout: u32,
    pub flags: u32,
    pub prefix: [u16; VOLUME_PREFIX_CAPACITY],
    pub file_system_name: [u16; FILE_SYSTEM_NAME_CAPACITY],
}

impl Default for FspVolumeParams {
    fn default() -> Self {
        Self {
            version: size_of::<FspVolumeParams>() as u16,
            sector_size: 0,
            sectors_per_allocation_unit: 0,
            max_component_length: 0,
            volume_creation_time: 0,
            volume_serial_number: 0,
            transact_timeout: 0,
            irp_timeout: 0,
            irp_capacity: 0,
            file_info_timeout: 0,
            flags: 0,
            prefix: [0; VOLUME_PREFIX_CAPACITY],
            file_system_name: [0; FILE_SYSTEM_NAME_CAPACITY],
        }
    }
}

/// Leading fields of the engine's volume object.
///
/// The engine allocates and owns the object; the host only reads and writes
/// `user_context`, which carries the per-volume association.
#[repr(C)]
#[derive(Debug)]
pub struct FspFileSystem {
    pub version: u16,
    pub user_context: *mut c_void,
    pub interface: *const FileSystemInterface,
}

pub type GetVolumeInfoFn =
    unsafe extern "C" fn(fs: *mut FspFileSystem, volume_info: *mut RawVolumeInfo) -> NtStatus;
pub type SetVolumeLabelFn = unsafe extern "C" fn(
    fs: *mut FspFileSystem,
    volume_label: *const u16,
    volume_info: *mut RawVolumeInfo,
) -> NtStatus;
pub type GetSecurityByNameFn = unsafe extern "C" fn(
    fs: *mut FspFileSystem,
    file_name: *const u16,
    p_file_attributes: *mut u32,
    security_descriptor: *mut c_void,
    p_security_descriptor_size: *mut usize,
) -> NtStatus;
pub type CreateFn = unsafe extern "C" fn(
    fs: *mut FspFileSystem,
    file_name: *const u16,
    create_options: u32,
    granted_access: u32,
    file_attributes: u32,
    security_descriptor: *const c_void,
    allocation_size: u64,
    full_context: *mut FullContext,
    open_file_info: *mut OpenFileInfo,
) -> NtStatus;
pub type OpenFn = unsafe extern "C" fn(
    fs: *mut FspFileSystem,
    file_name: *const u16,
    create_options: u32,
    granted_access: u32,
    full_context: *mut FullContext,
    open_file_info: *mut OpenFileInfo,
) -> NtStatus;
pub type OverwriteFn = unsafe extern "C" fn(
    fs: *mut FspFileSystem,
    full_context: *mut FullContext,
    file_attributes: u32,
    replace_file_attributes: Boolean,
    allocation_size: u64,
    file_info: *mut FileInfo,
) -> NtStatus;
pub type CleanupFn = unsafe extern "C" fn(
    fs: *mut FspFileSystem,
    full_context: *mut FullContext,
    file_name: *const u16,
    flags: u32,
);
pub type CloseFn = unsafe extern "C" fn(fs: *mut FspFileSystem, full_context: *mut FullContext);
pub type ReadFn = unsafe extern "C" fn(
    fs: *mut FspFileSystem,
    full_context: *mut FullContext,
    buffer: *mut c_void,
    offset: u64,
    length: u32,
    p_bytes_transferred: *mut u32,
) -> NtStatus;
pub type WriteFn = unsafe extern "C" fn(
    fs: *mut FspFileSystem,
    full_context: *mut FullContext,
    buffer: *const c_void,
    offset: u64,
    length: u32,
    write_to_end_of_file: Boolean,
    constrained_io: Boolean,
    p_bytes_transferred: *mut u32,
    file_info: *mut FileInfo,
) -> NtStatus;
pub type FileInfoFn = unsafe extern "C" fn(
    fs: *mut FspFileSystem,
    full_context: *mut FullContext,
    file_info: *mut FileInfo,
) -> NtStatus;
pub type SetBasicInfoFn = unsafe extern "C" fn(
    fs: *mut FspFileSystem,
    full_context: *mut FullContext,
    file_attributes: u32,
    creation_time: u64,
    last_access_time: u64,
    last_write_time: u64,
    change_time: u64,
    file_info: *mut FileInfo,
) -> NtStatus;
pub type SetFileSizeFn = unsafe extern "C" fn(
    fs: *mut FspFileSystem,
    full_context: *mut FullContext,
    new_size: u64,
    set_allocation_size: Boolean,
    file_info: *mut FileInfo,
) -> NtStatus;
pub type CanDeleteFn = unsafe extern "C" fn(
    fs: *mut FspFileSystem,
    full_context: *mut FullContext,
    file_name: *const u16,
) -> NtStatus;
pub type RenameFn = unsafe extern "C" fn(
    fs: *mut FspFileSystem,
    full_context: *mut FullContext,
    file_name: *const u16,
    new_file_name: *const u16,
    replace_if_exists: Boolean,
) -> NtStatus;
pub type GetSecurityFn = unsafe extern "C" fn(
    fs: *mut FspFileSystem,
    full_context: *mut FullContext,
    security_descriptor: *mut c_void,
    p_security_descriptor_size: *mut usize,
) -> NtStatus;
pub type SetSecurityFn = unsafe extern "C" fn(
    fs: *mut FspFileSystem,
    full_context: *mut FullContext,
    security_information: u32,
    modification_descriptor: *const c_void,
) -> NtStatus;
pub type ReadDirectoryFn = unsafe extern "C" fn(
    fs: *mut FspFileSystem,
    full_context: *mut FullContext,
    pattern: *const u16,
    marker: *const u16,
    buffer: *mut c_void,
    length: u32,
    p_bytes_transferred: *mut u32,
) -> NtStatus;
pub type ResolveReparsePointsFn = unsafe extern "C" fn(
    fs: *mut FspFileSystem,
    file_name: *const u16,
    reparse_point_index: u32,
    resolve_last_path_component: Boolean,
    p_io_status: *mut IoStatusBlock,
    buffer: *mut c_void,
    p_size: *mut usize,
) -> NtStatus;
pub type GetReparsePointFn = unsafe extern "C" fn(
    fs: *mut FspFileSystem,
    full_context: *mut FullContext,
    file_name: *const u16,
    buffer: *mut c_void,
    p_size: *mut usize,
) -> NtStatus;
pub type SetReparsePointFn = unsafe extern "C" fn(
    fs: *mut FspFileSystem,
    full_context: *mut FullContext,
    file_name: *const u16,
    buffer: *const c_void,
    size: usize,
) -> NtStatus;
pub type GetStreamInfoFn = unsafe extern "C" fn(
    fs: *mut FspFileSystem,
    full_context: *mut FullContext,
    buffer: *mut c_void,
    length: u32,
    p_bytes_transferred: *mut u32,
) -> NtStatus;
pub type GetDirInfoByNameFn = unsafe extern "C" fn(
    fs: *mut FspFileSystem,
    full_context: *mut FullContext,
    file_name: *const u16,
    dir_info: *mut RawDirInfo,
) -> NtStatus;
pub type ControlFn = unsafe extern "C" fn(
    fs: *mut FspFileSystem,
    full_context: *mut FullContext,
    control_code: u32,
    input_buffer: *const c_void,
    input_buffer_length: u32,
    output_buffer: *mut c_void,
    output_buffer_length: u32,
    p_bytes_transferred: *mut u32,
) -> NtStatus;
pub type SetDeleteFn = unsafe extern "C" fn(
    fs: *mut FspFileSystem,
    full_context: *mut FullContext,
    file_name: *const u16,
    delete_file: Boolean,
) -> NtStatus;

/// Number of slots after `set_delete` (extended create/overwrite, EA
/// operations, dispatcher-stopped notification and reserved space).
pub const INTERFACE_TRAILING_SLOTS: usize = 37;

/// The operation dispatch table registered with the engine.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct FileSystemInterface {
    pub get_volume_info: Option<GetVolumeInfoFn>,
    pub set_volume_label: Option<SetVolumeLabelFn>,
    pub get_security_by_name: Option<GetSecurityByNameFn>,
    pub create: Option<CreateFn>,
    pub open: Option<OpenFn>,
    pub overwrite: Option<OverwriteFn>,
    pub cleanup: Option<CleanupFn>,
    pub close: Option<CloseFn>,
    pub read: Option<ReadFn>,
    pub write: Option<WriteFn>,
    pub flush: Option<FileInfoFn>,
    pub get_file_info: Option<FileInfoFn>,
    pub set_basic_info: Option<SetBasicInfoFn>,
    pub set_file_size: Option<SetFileSizeFn>,
    pub can_delete: Option<CanDeleteFn>,
    pub rename: Option<RenameFn>,
    pub get_security: Option<GetSecurityFn>,
    pub set_security: Option<SetSecurityFn>,
    pub read_directory: Option<ReadDirectoryFn>,
    pub resolve_reparse_points: Option<ResolveReparsePointsFn>,
    pub get_reparse_point: Option<GetReparsePointFn>,
    pub set_reparse_point: Option<SetReparsePointFn>,
    pub delete_reparse_point: Option<SetReparsePointFn>,
    pub get_stream_info: Option<GetStreamInfoFn>,
    pub get_dir_info_by_name: Option<GetDirInfoByNameFn>,
    pub control: Option<ControlFn>,
    pub set_delete: Option<SetDeleteFn>,
    pub trailing: [Option<unsafe extern "C" fn()>; INTERFACE_TRAILING_SLOTS],
}

impl FileSystemInterface {
    /// A table with every slot null.
    pub const fn empty() -> Self {
        Self {
            get_volume_info: None,
            set_volume_label: None,
            get_security_by_name: None,
            create: None,
            open: None,
            overwrite: None,
            cleanup: None,
            close: None,
            read: None,
            write: None,
            flush: None,
            get_file_info: None,
            set_basic_info: None,
            set_file_size: None,
            can_delete: None,
            rename: None,
            get_security: None,
            set_security: None,
            read_directory: None,
            resolve_reparse_points: None,
            get_reparse_point: None,
            set_reparse_point: None,
            delete_reparse_point: None,
            get_stream_info: None,
            get_dir_info_by_name: None,
            control: None,
            set_delete: None,
            trailing: [None; INTERFACE_TRAILING_SLOTS],
        }
    }
}

// Layout checks against the engine's C definitions.
const _: () = assert!(size_of::<FileInfo>() == 72);
const _: () = assert!(size_of::<FullContext>() == 16);
const _: () = assert!(DIR_INFO_HEADER_SIZE == 104);
const _: () = assert!(STREAM_INFO_HEADER_SIZE == 24);
const _: () = assert!(size_of::<FileSystemInterface>() == 64 * size_of::<usize>());
const _: () = assert!(offset_of!(FileSystemInterface, set_delete) == 26 * size_of::<usize>());
