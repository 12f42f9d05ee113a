//! Dispatch entry points invoked by the engine.
//!
//! Each entry recovers the volume context, enters the operation guard,
//! resolves the open handle where the operation carries one, and calls the
//! implementation under the fault boundary. Output records are always left
//! in a defined state: filled on success, defaulted on failure.

use std::ffi::c_void;

use crate::abi::{
    Boolean, FileInfo, FspFileSystem, FullContext, IoStatusBlock, OpenFileInfo, RawDirInfo,
    RawVolumeInfo,
};
use crate::bridge::listing::{pack_dir_entries, pack_stream_entries};
use crate::bridge::marshal::{
    bytes_or_empty, bytes_or_empty_mut, copy_sized, security_descriptor_bytes,
    write_dir_info_name, write_normalized_name,
};
use crate::bridge::{contain, guarded, OpenFile, PayloadKind};
use crate::error::ContextError;
use crate::filesystem::{
    BasicInfo, CleanupFlags, DirEntry, FileSystem, Opened, ResolvedReparse, SecurityByName,
    SecuritySections, StreamEntry, VolumeInfo,
};
use crate::status::{
    FsResult, NtStatus, STATUS_INVALID_DEVICE_REQUEST, STATUS_INVALID_HANDLE,
    STATUS_INVALID_PARAMETER, STATUS_REPARSE, STATUS_SUCCESS, STATUS_UNEXPECTED_IO_ERROR,
};
use crate::util::wstr::{encode_truncated, wide_ptr_to_option, wide_ptr_to_string};

use super::{volume_of, GuardTicket, VolumeContext};

type Open<F> = OpenFile<<F as FileSystem>::FileNode, <F as FileSystem>::FileDesc>;

// ============================================================================
// Entry helpers
// ============================================================================

/// Run a dispatch entry against the volume's context.
unsafe fn dispatch<F: FileSystem>(
    native: *mut FspFileSystem,
    operation: &'static str,
    body: impl FnOnce(&VolumeContext<F>) -> NtStatus,
) -> NtStatus {
    contain(operation, || {
        let volume: &VolumeContext<F> = match volume_of::<F>(native) {
            Some(volume) => volume,
            None => return STATUS_INVALID_DEVICE_REQUEST,
        };

        let _ticket: GuardTicket<'_> = volume.guard.enter();
        tracing::debug!("{}", operation);
        body(volume)
    })
}

/// Run a dispatch entry that operates on an open handle.
unsafe fn dispatch_open<F: FileSystem>(
    native: *mut FspFileSystem,
    full_context: *mut FullContext,
    operation: &'static str,
    body: impl FnOnce(&VolumeContext<F>, &Open<F>) -> NtStatus,
) -> NtStatus {
    dispatch::<F>(native, operation, |volume| {
        let context: FullContext = match full_context.as_ref() {
            Some(context) => *context,
            None => return STATUS_INVALID_HANDLE,
        };

        match volume.contexts.resolve(&context) {
            Ok(open_file) => body(volume, &open_file),
            Err(e) => {
                tracing::debug!("{}: {}", operation, e);
                e.into()
            }
        }
    })
}

unsafe fn decode_name(name: *const u16) -> Result<String, NtStatus> {
    wide_ptr_to_string(name).map_err(|e| e.nt_status())
}

unsafe fn decode_optional_name(name: *const u16) -> Result<Option<String>, NtStatus> {
    wide_ptr_to_option(name).map_err(|e| e.nt_status())
}

/// Store a value through an out pointer, if present.
unsafe fn put<T>(out: *mut T, value: T) {
    if let Some(slot) = out.as_mut() {
        *slot = value;
    }
}

fn status_of(result: FsResult<()>) -> NtStatus {
    match result {
        Ok(()) => STATUS_SUCCESS,
        Err(status) => status,
    }
}

/// Cap a reported byte count at the caller's buffer length.
fn clamp_transferred(operation: &'static str, transferred: u32, length: u32) -> u32 {
    if transferred > length {
        tracing::warn!("{}: reported {} bytes for a {} byte buffer", operation, transferred, length);
    }
    transferred.min(length)
}

unsafe fn finish_file_info(out: *mut FileInfo, result: FsResult<FileInfo>) -> NtStatus {
    match result {
        Ok(info) => {
            put(out, info);
            STATUS_SUCCESS
        }
        Err(status) => {
            put(out, FileInfo::default());
            status
        }
    }
}

unsafe fn finish_volume_info(out: *mut RawVolumeInfo, result: FsResult<VolumeInfo>) -> NtStatus {
    match result {
        Ok(info) => {
            let mut raw: RawVolumeInfo = RawVolumeInfo {
                total_size: info.total_size,
                free_size: info.free_size,
                ..Default::default()
            };
            let units: usize = encode_truncated(&info.label, &mut raw.volume_label);
            raw.volume_label_length = (units * 2) as u16;
            put(out, raw);
            STATUS_SUCCESS
        }
        Err(status) => {
            put(out, RawVolumeInfo::default());
            status
        }
    }
}

/// Check that Create/Open received an unbound context slot.
unsafe fn fresh_context<'a>(full_context: *mut FullContext) -> Result<&'a mut FullContext, NtStatus> {
    let context: &mut FullContext = match full_context.as_mut() {
        Some(context) => context,
        None => return Err(STATUS_INVALID_PARAMETER),
    };
    if !context.is_null() {
        return Err(ContextError::AlreadyBound(context.user_context).into());
    }
    Ok(context)
}

/// Bind a successful Create/Open and fill the open-result record.
unsafe fn finish_open<F: FileSystem>(
    volume: &VolumeContext<F>,
    context: &mut FullContext,
    open_file_info: *mut OpenFileInfo,
    result: FsResult<Opened<F::FileNode, F::FileDesc>>,
) -> NtStatus {
    let opened: Opened<F::FileNode, F::FileDesc> = match result {
        Ok(opened) => opened,
        Err(status) => {
            if let Some(out) = open_file_info.as_mut() {
                out.file_info = FileInfo::default();
            }
            // Nothing is bound, so the caller must see a failure
            if !status.is_failure() {
                tracing::warn!("Open failed with non-failure status {}", status);
                return STATUS_UNEXPECTED_IO_ERROR;
            }
            return status;
        }
    };

    if let Err(e) = volume.contexts.bind(context, opened.node, opened.desc) {
        tracing::warn!("Open result could not be bound: {}", e);
        return e.into();
    }

    if let Some(out) = open_file_info.as_mut() {
        out.file_info = opened.info;
        if let Some(name) = opened.normalized_name.as_deref() {
            write_normalized_name(out, name);
        }
    }
    STATUS_SUCCESS
}

// ============================================================================
// Volume
// ============================================================================

pub(super) unsafe extern "C" fn get_volume_info<F: FileSystem>(
    native: *mut FspFileSystem,
    volume_info: *mut RawVolumeInfo,
) -> NtStatus {
    dispatch::<F>(native, "GetVolumeInfo", |volume| {
        let fs: &F = &volume.fs;
        let result: FsResult<VolumeInfo> = guarded(fs, "GetVolumeInfo", || fs.get_volume_info());
        finish_volume_info(volume_info, result)
    })
}

pub(super) unsafe extern "C" fn set_volume_label<F: FileSystem>(
    native: *mut FspFileSystem,
    volume_label: *const u16,
    volume_info: *mut RawVolumeInfo,
) -> NtStatus {
    dispatch::<F>(native, "SetVolumeLabel", |volume| {
        let fs: &F = &volume.fs;
        let result: FsResult<VolumeInfo> = decode_name(volume_label)
            .and_then(|label| guarded(fs, "SetVolumeLabel", || fs.set_volume_label(&label)));
        finish_volume_info(volume_info, result)
    })
}

pub(super) unsafe extern "C" fn get_security_by_name<F: FileSystem>(
    native: *mut FspFileSystem,
    file_name: *const u16,
    p_file_attributes: *mut u32,
    security_descriptor: *mut c_void,
    p_security_descriptor_size: *mut usize,
) -> NtStatus {
    dispatch::<F>(native, "GetSecurityByName", |volume| {
        let fs: &F = &volume.fs;
        let name: String = match decode_name(file_name) {
            Ok(name) => name,
            Err(status) => return status,
        };
        let want_security: bool = !p_security_descriptor_size.is_null();

        let answer: SecurityByName = match guarded(fs, "GetSecurityByName", || {
            fs.get_security_by_name(&name, want_security)
        }) {
            Ok(answer) => answer,
            Err(status) => return status,
        };

        match answer {
            SecurityByName::Found {
                attributes,
                security,
            } => {
                put(p_file_attributes, attributes);
                copy_sized(
                    PayloadKind::SecurityDescriptor,
                    security.as_deref(),
                    security_descriptor,
                    p_security_descriptor_size,
                )
            }
            SecurityByName::Reparse { index } => {
                tracing::debug!("GetSecurityByName: {} is behind a reparse point", name);
                if let Some(index) = index {
                    put(p_file_attributes, index);
                }
                STATUS_REPARSE
            }
        }
    })
}

// ============================================================================
// Open and close
// ============================================================================

pub(super) unsafe extern "C" fn create<F: FileSystem>(
    native: *mut FspFileSystem,
    file_name: *const u16,
    create_options: u32,
    granted_access: u32,
    file_attributes: u32,
    security_descriptor: *const c_void,
    allocation_size: u64,
    full_context: *mut FullContext,
    open_file_info: *mut OpenFileInfo,
) -> NtStatus {
    dispatch::<F>(native, "Create", |volume| {
        let fs: &F = &volume.fs;
        let context: &mut FullContext = match fresh_context(full_context) {
            Ok(context) => context,
            Err(status) => return status,
        };
        let name: String = match decode_name(file_name) {
            Ok(name) => name,
            Err(status) => return status,
        };
        let descriptor: Option<&[u8]> = security_descriptor_bytes(security_descriptor);

        tracing::debug!("Create: {}", name);
        let result = guarded(fs, "Create", || {
            fs.create(
                &name,
                create_options,
                granted_access,
                file_attributes,
                descriptor,
                allocation_size,
            )
        });
        finish_open(volume, context, open_file_info, result)
    })
}

pub(super) unsafe extern "C" fn open<F: FileSystem>(
    native: *mut FspFileSystem,
    file_name: *const u16,
    create_options: u32,
    granted_access: u32,
    full_context: *mut FullContext,
    open_file_info: *mut OpenFileInfo,
) -> NtStatus {
    dispatch::<F>(native, "Open", |volume| {
        let fs: &F = &volume.fs;
        let context: &mut FullContext = match fresh_context(full_context) {
            Ok(context) => context,
            Err(status) => return status,
        };
        let name: String = match decode_name(file_name) {
            Ok(name) => name,
            Err(status) => return status,
        };

        tracing::debug!("Open: {}", name);
        let result = guarded(fs, "Open", || fs.open(&name, create_options, granted_access));
        finish_open(volume, context, open_file_info, result)
    })
}

pub(super) unsafe extern "C" fn overwrite<F: FileSystem>(
    native: *mut FspFileSystem,
    full_context: *mut FullContext,
    file_attributes: u32,
    replace_file_attributes: Boolean,
    allocation_size: u64,
    file_info: *mut FileInfo,
) -> NtStatus {
    dispatch_open::<F>(native, full_context, "Overwrite", |volume, open_file| {
        let fs: &F = &volume.fs;
        let result: FsResult<FileInfo> = guarded(fs, "Overwrite", || {
            fs.overwrite(
                &open_file.node,
                &open_file.desc,
                file_attributes,
                replace_file_attributes != 0,
                allocation_size,
            )
        });
        finish_file_info(file_info, result)
    })
}

pub(super) unsafe extern "C" fn cleanup<F: FileSystem>(
    native: *mut FspFileSystem,
    full_context: *mut FullContext,
    file_name: *const u16,
    flags: u32,
) {
    dispatch_open::<F>(native, full_context, "Cleanup", |volume, open_file| {
        let fs: &F = &volume.fs;
        let name: Option<String> = match decode_optional_name(file_name) {
            Ok(name) => name,
            Err(status) => return status,
        };
        let flags: CleanupFlags = CleanupFlags::from_bits_truncate(flags);

        status_of(guarded(fs, "Cleanup", || {
            fs.cleanup(&open_file.node, &open_file.desc, name.as_deref(), flags);
            Ok(())
        }))
    });
}

/// Close hook, then release. The binding is released even when the hook
/// faults, so each context is released exactly once.
pub(super) unsafe extern "C" fn close<F: FileSystem>(
    native: *mut FspFileSystem,
    full_context: *mut FullContext,
) {
    dispatch::<F>(native, "Close", |volume| {
        let fs: &F = &volume.fs;
        let context: &mut FullContext = match full_context.as_mut() {
            Some(context) => context,
            None => return STATUS_INVALID_HANDLE,
        };

        let open_file = match volume.contexts.resolve(context) {
            Ok(open_file) => open_file,
            Err(e) => {
                tracing::warn!("Close: {}", e);
                return e.into();
            }
        };

        let status: NtStatus = status_of(guarded(fs, "Close", || {
            fs.close(&open_file.node, &open_file.desc);
            Ok(())
        }));
        drop(open_file);

        match volume.contexts.release(context) {
            Ok(_) => status,
            Err(e) => e.into(),
        }
    });
}

// ============================================================================
// Data
// ============================================================================

pub(super) unsafe extern "C" fn read<F: FileSystem>(
    native: *mut FspFileSystem,
    full_context: *mut FullContext,
    buffer: *mut c_void,
    offset: u64,
    length: u32,
    p_bytes_transferred: *mut u32,
) -> NtStatus {
    dispatch_open::<F>(native, full_context, "Read", |volume, open_file| {
        let fs: &F = &volume.fs;
        let data: &mut [u8] = bytes_or_empty_mut(buffer, length as usize);

        match guarded(fs, "Read", || fs.read(&open_file.node, &open_file.desc, data, offset)) {
            Ok(transferred) => {
                put(p_bytes_transferred, clamp_transferred("Read", transferred, length));
                STATUS_SUCCESS
            }
            Err(status) => {
                put(p_bytes_transferred, 0);
                status
            }
        }
    })
}

#[allow(clippy::too_many_arguments)]
pub(super) unsafe extern "C" fn write<F: FileSystem>(
    native: *mut FspFileSystem,
    full_context: *mut FullContext,
    buffer: *const c_void,
    offset: u64,
    length: u32,
    write_to_end_of_file: Boolean,
    constrained_io: Boolean,
    p_bytes_transferred: *mut u32,
    file_info: *mut FileInfo,
) -> NtStatus {
    dispatch_open::<F>(native, full_context, "Write", |volume, open_file| {
        let fs: &F = &volume.fs;
        let data: &[u8] = bytes_or_empty(buffer, length as usize);

        let result: FsResult<(u32, FileInfo)> = guarded(fs, "Write", || {
            fs.write(
                &open_file.node,
                &open_file.desc,
                data,
                offset,
                write_to_end_of_file != 0,
                constrained_io != 0,
            )
        });

        match result {
            Ok((transferred, info)) => {
                put(p_bytes_transferred, clamp_transferred("Write", transferred, length));
                put(file_info, info);
                STATUS_SUCCESS
            }
            Err(status) => {
                put(p_bytes_transferred, 0);
                put(file_info, FileInfo::default());
                status
            }
        }
    })
}

/// Flush an open file, or the volume when the context is unbound.
pub(super) unsafe extern "C" fn flush<F: FileSystem>(
    native: *mut FspFileSystem,
    full_context: *mut FullContext,
    file_info: *mut FileInfo,
) -> NtStatus {
    dispatch::<F>(native, "Flush", |volume| {
        let fs: &F = &volume.fs;
        let context: FullContext = full_context.as_ref().copied().unwrap_or_default();

        if context.is_null() {
            let result: FsResult<FileInfo> = guarded(fs, "Flush", || fs.flush(None, None));
            return finish_file_info(file_info, result);
        }

        let open_file = match volume.contexts.resolve(&context) {
            Ok(open_file) => open_file,
            Err(e) => return e.into(),
        };
        let result: FsResult<FileInfo> = guarded(fs, "Flush", || {
            fs.flush(Some(&open_file.node), Some(&open_file.desc))
        });
        finish_file_info(file_info, result)
    })
}

// ============================================================================
// Metadata
// ============================================================================

pub(super) unsafe extern "C" fn get_file_info<F: FileSystem>(
    native: *mut FspFileSystem,
    full_context: *mut FullContext,
    file_info: *mut FileInfo,
) -> NtStatus {
    dispatch_open::<F>(native, full_context, "GetFileInfo", |volume, open_file| {
        let fs: &F = &volume.fs;
        let result: FsResult<FileInfo> = guarded(fs, "GetFileInfo", || {
            fs.get_file_info(&open_file.node, &open_file.desc)
        });
        finish_file_info(file_info, result)
    })
}

#[allow(clippy::too_many_arguments)]
pub(super) unsafe extern "C" fn set_basic_info<F: FileSystem>(
    native: *mut FspFileSystem,
    full_context: *mut FullContext,
    file_attributes: u32,
    creation_time: u64,
    last_access_time: u64,
    last_write_time: u64,
    change_time: u64,
    file_info: *mut FileInfo,
) -> NtStatus {
    dispatch_open::<F>(native, full_context, "SetBasicInfo", |volume, open_file| {
        let fs: &F = &volume.fs;
        let info: BasicInfo = BasicInfo {
            file_attributes,
            creation_time,
            last_access_time,
            last_write_time,
            change_time,
        };
        let result: FsResult<FileInfo> = guarded(fs, "SetBasicInfo", || {
            fs.set_basic_info(&open_file.node, &open_file.desc, info)
        });
        finish_file_info(file_info, result)
    })
}

pub(super) unsafe extern "C" fn set_file_size<F: FileSystem>(
    native: *mut FspFileSystem,
    full_context: *mut FullContext,
    new_size: u64,
    set_allocation_size: Boolean,
    file_info: *mut FileInfo,
) -> NtStatus {
    dispatch_open::<F>(native, full_context, "SetFileSize", |volume, open_file| {
        let fs: &F = &volume.fs;
        let result: FsResult<FileInfo> = guarded(fs, "SetFileSize", || {
            fs.set_file_size(
                &open_file.node,
                &open_file.desc,
                new_size,
                set_allocation_size != 0,
            )
        });
        finish_file_info(file_info, result)
    })
}

pub(super) unsafe extern "C" fn rename<F: FileSystem>(
    native: *mut FspFileSystem,
    full_context: *mut FullContext,
    file_name: *const u16,
    new_file_name: *const u16,
    replace_if_exists: Boolean,
) -> NtStatus {
    dispatch_open::<F>(native, full_context, "Rename", |volume, open_file| {
        let fs: &F = &volume.fs;
        let (name, new_name): (String, String) =
            match (decode_name(file_name), decode_name(new_file_name)) {
                (Ok(name), Ok(new_name)) => (name, new_name),
                (Err(status), _) | (_, Err(status)) => return status,
            };

        tracing::debug!("Rename: {} -> {}", name, new_name);
        status_of(guarded(fs, "Rename", || {
            fs.rename(
                &open_file.node,
                &open_file.desc,
                &name,
                &new_name,
                replace_if_exists != 0,
            )
        }))
    })
}

pub(super) unsafe extern "C" fn set_delete<F: FileSystem>(
    native: *mut FspFileSystem,
    full_context: *mut FullContext,
    file_name: *const u16,
    delete_file: Boolean,
) -> NtStatus {
    dispatch_open::<F>(native, full_context, "SetDelete", |volume, open_file| {
        let fs: &F = &volume.fs;
        let name: String = match decode_name(file_name) {
            Ok(name) => name,
            Err(status) => return status,
        };
        status_of(guarded(fs, "SetDelete", || {
            fs.set_delete(&open_file.node, &open_file.desc, &name, delete_file != 0)
        }))
    })
}

// ============================================================================
// Security
// ============================================================================

pub(super) unsafe extern "C" fn get_security<F: FileSystem>(
    native: *mut FspFileSystem,
    full_context: *mut FullContext,
    security_descriptor: *mut c_void,
    p_security_descriptor_size: *mut usize,
) -> NtStatus {
    dispatch_open::<F>(native, full_context, "GetSecurity", |volume, open_file| {
        let fs: &F = &volume.fs;
        match guarded(fs, "GetSecurity", || {
            fs.get_security(&open_file.node, &open_file.desc)
        }) {
            Ok(descriptor) => copy_sized(
                PayloadKind::SecurityDescriptor,
                Some(descriptor.as_slice()),
                security_descriptor,
                p_security_descriptor_size,
            ),
            Err(status) => status,
        }
    })
}

pub(super) unsafe extern "C" fn set_security<F: FileSystem>(
    native: *mut FspFileSystem,
    full_context: *mut FullContext,
    security_information: u32,
    modification_descriptor: *const c_void,
) -> NtStatus {
    dispatch_open::<F>(native, full_context, "SetSecurity", |volume, open_file| {
        let fs: &F = &volume.fs;
        let sections: SecuritySections = SecuritySections::from_bits_truncate(security_information);
        let modification: &[u8] = security_descriptor_bytes(modification_descriptor).unwrap_or(&[]);

        status_of(guarded(fs, "SetSecurity", || {
            fs.set_security(&open_file.node, &open_file.desc, sections, modification)
        }))
    })
}

// ============================================================================
// Directories and streams
// ============================================================================

#[allow(clippy::too_many_arguments)]
pub(super) unsafe extern "C" fn read_directory<F: FileSystem>(
    native: *mut FspFileSystem,
    full_context: *mut FullContext,
    pattern: *const u16,
    marker: *const u16,
    buffer: *mut c_void,
    length: u32,
    p_bytes_transferred: *mut u32,
) -> NtStatus {
    dispatch_open::<F>(native, full_context, "ReadDirectory", |volume, open_file| {
        let fs: &F = &volume.fs;
        let (pattern, marker): (Option<String>, Option<String>) =
            match (decode_optional_name(pattern), decode_optional_name(marker)) {
                (Ok(pattern), Ok(marker)) => (pattern, marker),
                (Err(status), _) | (_, Err(status)) => {
                    put(p_bytes_transferred, 0);
                    return status;
                }
            };

        let result: FsResult<Vec<DirEntry>> = guarded(fs, "ReadDirectory", || {
            fs.read_directory(
                &open_file.node,
                &open_file.desc,
                pattern.as_deref(),
                marker.as_deref(),
            )
        });

        match result {
            Ok(entries) => {
                let out: &mut [u8] = bytes_or_empty_mut(buffer, length as usize);
                put(p_bytes_transferred, pack_dir_entries(&entries, out));
                STATUS_SUCCESS
            }
            Err(status) => {
                put(p_bytes_transferred, 0);
                status
            }
        }
    })
}

pub(super) unsafe extern "C" fn get_dir_info_by_name<F: FileSystem>(
    native: *mut FspFileSystem,
    full_context: *mut FullContext,
    file_name: *const u16,
    dir_info: *mut RawDirInfo,
) -> NtStatus {
    dispatch_open::<F>(native, full_context, "GetDirInfoByName", |volume, open_file| {
        let fs: &F = &volume.fs;
        let result: FsResult<DirEntry> = decode_name(file_name).and_then(|name| {
            guarded(fs, "GetDirInfoByName", || {
                fs.get_dir_info_by_name(&open_file.node, &open_file.desc, &name)
            })
        });

        let Some(out) = dir_info.as_mut() else {
            return result.map_or_else(|status| status, |_| STATUS_SUCCESS);
        };
        *out = RawDirInfo::default();
        match result {
            Ok(entry) => {
                out.file_info = entry.info;
                write_dir_info_name(out, &entry.name);
                STATUS_SUCCESS
            }
            Err(status) => status,
        }
    })
}

pub(super) unsafe extern "C" fn get_stream_info<F: FileSystem>(
    native: *mut FspFileSystem,
    full_context: *mut FullContext,
    buffer: *mut c_void,
    length: u32,
    p_bytes_transferred: *mut u32,
) -> NtStatus {
    dispatch_open::<F>(native, full_context, "GetStreamInfo", |volume, open_file| {
        let fs: &F = &volume.fs;
        let result: FsResult<Vec<StreamEntry>> = guarded(fs, "GetStreamInfo", || {
            fs.get_stream_info(&open_file.node, &open_file.desc)
        });

        match result {
            Ok(entries) => {
                let out: &mut [u8] = bytes_or_empty_mut(buffer, length as usize);
                put(p_bytes_transferred, pack_stream_entries(&entries, out));
                STATUS_SUCCESS
            }
            Err(status) => {
                put(p_bytes_transferred, 0);
                status
            }
        }
    })
}

// ============================================================================
// Reparse points
// ============================================================================

pub(super) unsafe extern "C" fn resolve_reparse_points<F: FileSystem>(
    native: *mut FspFileSystem,
    file_name: *const u16,
    reparse_point_index: u32,
    resolve_last_path_component: Boolean,
    p_io_status: *mut IoStatusBlock,
    buffer: *mut c_void,
    p_size: *mut usize,
) -> NtStatus {
    dispatch::<F>(native, "ResolveReparsePoints", |volume| {
        let fs: &F = &volume.fs;
        let result: FsResult<ResolvedReparse> = decode_name(file_name).and_then(|name| {
            guarded(fs, "ResolveReparsePoints", || {
                fs.resolve_reparse_points(&name, reparse_point_index, resolve_last_path_component != 0)
            })
        });

        let resolved: ResolvedReparse = match result {
            Ok(resolved) => resolved,
            Err(status) => {
                put(p_io_status, IoStatusBlock::default());
                return status;
            }
        };

        let status: NtStatus = copy_sized(PayloadKind::ReparseData, Some(resolved.data.as_slice()), buffer, p_size);
        if status.is_failure() {
            put(p_io_status, IoStatusBlock::default());
            return status;
        }

        put(
            p_io_status,
            IoStatusBlock {
                status: STATUS_REPARSE,
                information: resolved.information,
            },
        );
        STATUS_REPARSE
    })
}

pub(super) unsafe extern "C" fn get_reparse_point<F: FileSystem>(
    native: *mut FspFileSystem,
    full_context: *mut FullContext,
    file_name: *const u16,
    buffer: *mut c_void,
    p_size: *mut usize,
) -> NtStatus {
    dispatch_open::<F>(native, full_context, "GetReparsePoint", |volume, open_file| {
        let fs: &F = &volume.fs;
        let result: FsResult<Vec<u8>> = decode_name(file_name).and_then(|name| {
            guarded(fs, "GetReparsePoint", || {
                fs.get_reparse_point(&open_file.node, &open_file.desc, &name)
            })
        });

        match result {
            Ok(data) => copy_sized(PayloadKind::ReparseData, Some(data.as_slice()), buffer, p_size),
            Err(status) => status,
        }
    })
}

pub(super) unsafe extern "C" fn set_reparse_point<F: FileSystem>(
    native: *mut FspFileSystem,
    full_context: *mut FullContext,
    file_name: *const u16,
    buffer: *const c_void,
    size: usize,
) -> NtStatus {
    dispatch_open::<F>(native, full_context, "SetReparsePoint", |volume, open_file| {
        let fs: &F = &volume.fs;
        let data: &[u8] = bytes_or_empty(buffer, size);
        status_of(decode_name(file_name).and_then(|name| {
            guarded(fs, "SetReparsePoint", || {
                fs.set_reparse_point(&open_file.node, &open_file.desc, &name, data)
            })
        }))
    })
}

pub(super) unsafe extern "C" fn delete_reparse_point<F: FileSystem>(
    native: *mut FspFileSystem,
    full_context: *mut FullContext,
    file_name: *const u16,
    buffer: *const c_void,
    size: usize,
) -> NtStatus {
    dispatch_open::<F>(native, full_context, "DeleteReparsePoint", |volume, open_file| {
        let fs: &F = &volume.fs;
        let data: &[u8] = bytes_or_empty(buffer, size);
        status_of(decode_name(file_name).and_then(|name| {
            guarded(fs, "DeleteReparsePoint", || {
                fs.delete_reparse_point(&open_file.node, &open_file.desc, &name, data)
            })
        }))
    })
}

// ============================================================================
// Device control
// ============================================================================

#[allow(clippy::too_many_arguments)]
pub(super) unsafe extern "C" fn control<F: FileSystem>(
    native: *mut FspFileSystem,
    full_context: *mut FullContext,
    control_code: u32,
    input_buffer: *const c_void,
    input_buffer_length: u32,
    output_buffer: *mut c_void,
    output_buffer_length: u32,
    p_bytes_transferred: *mut u32,
) -> NtStatus {
    dispatch_open::<F>(native, full_context, "Control", |volume, open_file| {
        let fs: &F = &volume.fs;
        let input: &[u8] = bytes_or_empty(input_buffer, input_buffer_length as usize);
        let output: &mut [u8] = bytes_or_empty_mut(output_buffer, output_buffer_length as usize);

        match guarded(fs, "Control", || {
            fs.control(&open_file.node, &open_file.desc, control_code, input, output)
        }) {
            Ok(transferred) => {
                put(p_bytes_transferred, clamp_transferred("Control", transferred, output_buffer_length));
                STATUS_SUCCESS
            }
            Err(status) => {
                put(p_bytes_transferred, 0);
                status
            }
        }
    })
}
