//! In-process engine that dispatches through the raw table.
//!
//! [`LoopbackEngine`] keeps its volumes in memory. Requests are issued with a
//! [`LoopbackClient`], which calls the volume's dispatch table the way the
//! native engine does: raw pointers, caller-owned buffers and in/out sizes.
//! Any lifecycle stage can be made to fail with a chosen status.

use std::collections::{HashMap, HashSet};
use std::ffi::c_void;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use parking_lot::{const_mutex, Mutex, RwLock, RwLockReadGuard};

use super::{drive_letter_of, next_free_drive_letter, DeviceKind, EngineVersion, NativeEngine, NativeVolume};
use crate::abi::{
    Boolean, FileInfo, FileSystemInterface, FspFileSystem, FspVolumeParams, FullContext, IoStatusBlock,
    OpenFileInfo, RawDirInfo, RawVolumeInfo, DIR_INFO_HEADER_SIZE,
};
use crate::bridge::listing::{decode_dir_listing, decode_stream_listing};
use crate::filesystem::{BasicInfo, DirEntry, StreamEntry, VolumeInfo};
use crate::status::{
    FsResult, NtStatus, STATUS_DEVICE_NOT_READY, STATUS_INVALID_DEVICE_REQUEST, STATUS_INVALID_PARAMETER,
    STATUS_NO_SUCH_DEVICE, STATUS_OBJECT_NAME_COLLISION,
};
use crate::util::wstr::string_to_wide;

/// Version reported by the loopback engine.
pub const LOOPBACK_VERSION: EngineVersion = EngineVersion { major: 2, minor: 0 };

/// Normalized name buffer handed to Create/Open, in bytes.
const NORMALIZED_NAME_CAPACITY: u16 = 522;

static DEBUG_LOG_FILE: Mutex<Option<String>> = const_mutex(None);

/// Lifecycle stage that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopbackStage {
    Preflight,
    CreateVolume,
    SetMountPoint,
    StartDispatcher,
}

/// Snapshot of one loopback volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopbackVolume {
    pub device: DeviceKind,
    pub mount_point: Option<String>,
    pub security_descriptor: Option<Vec<u8>>,
    pub debug_log: u32,
    pub thread_count: u32,
    pub dispatching: bool,
    pub sector_size: u16,
    pub sectors_per_allocation_unit: u16,
    pub max_component_length: u16,
    pub volume_creation_time: u64,
    pub volume_serial_number: u32,
    pub file_info_timeout: u32,
    pub flags: u32,
    pub prefix: String,
    pub file_system_name: String,
}

struct VolumeSlot {
    interface: &'static FileSystemInterface,
    record: LoopbackVolume,
    dispatcher: Arc<RwLock<bool>>,
}

#[derive(Default)]
struct LoopbackState {
    volumes: HashMap<NativeVolume, VolumeSlot>,
    occupied: HashSet<String>,
    failures: HashMap<LoopbackStage, NtStatus>,
    journal: Vec<&'static str>,
}

impl LoopbackState {
    /// Record a step and apply any injected failure.
    fn step(&mut self, stage: Option<LoopbackStage>, name: &'static str) -> FsResult<()> {
        self.journal.push(name);
        match stage.and_then(|stage| self.failures.get(&stage)) {
            Some(status) => Err(*status),
            None => Ok(()),
        }
    }

    fn is_taken(&self, mount_point: &str) -> bool {
        self.occupied.iter().any(|m| m.eq_ignore_ascii_case(mount_point))
            || self.volumes.values().any(|slot| {
                slot.record
                    .mount_point
                    .as_deref()
                    .is_some_and(|m| m.eq_ignore_ascii_case(mount_point))
            })
    }

    /// Pick the mount point a request would get.
    fn resolve_mount_point(&self, requested: Option<&str>) -> FsResult<String> {
        match requested {
            Some(mount_point) if self.is_taken(mount_point) => Err(STATUS_OBJECT_NAME_COLLISION),
            Some(mount_point) => Ok(match drive_letter_of(mount_point) {
                Some(letter) => format!("{}:", letter),
                None => mount_point.to_string(),
            }),
            None => next_free_drive_letter(|letter| self.is_taken(&format!("{}:", letter)))
                .ok_or(STATUS_NO_SUCH_DEVICE),
        }
    }
}

impl Drop for LoopbackState {
    fn drop(&mut self) {
        for (native, _) in self.volumes.drain() {
            // Allocated by create_volume and never deleted
            unsafe { drop(Box::from_raw(native.as_ptr())) };
        }
    }
}

/// In-process engine.
///
/// Clones share the same volumes, so a test can keep one clone while the
/// host owns another.
#[derive(Clone, Default)]
pub struct LoopbackEngine {
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackEngine {
    /// Create an engine with no volumes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a stage fail with `status` until cleared.
    pub fn fail_at(&self, stage: LoopbackStage, status: NtStatus) {
        self.state.lock().failures.insert(stage, status);
    }

    /// Remove every injected failure.
    pub fn clear_failures(&self) {
        self.state.lock().failures.clear();
    }

    /// Mark a mount point as used by something outside this engine.
    pub fn occupy(&self, mount_point: impl Into<String>) {
        self.state.lock().occupied.insert(mount_point.into());
    }

    /// Number of volumes created and not yet deleted.
    pub fn live_volumes(&self) -> usize {
        self.state.lock().volumes.len()
    }

    /// Snapshot of every live volume.
    pub fn volumes(&self) -> Vec<LoopbackVolume> {
        let state = self.state.lock();
        state.volumes.values().map(snapshot).collect()
    }

    /// Snapshot of one volume.
    pub fn volume(&self, volume: NativeVolume) -> Option<LoopbackVolume> {
        self.state.lock().volumes.get(&volume).map(snapshot)
    }

    /// Engine calls made so far, in order.
    pub fn journal(&self) -> Vec<&'static str> {
        self.state.lock().journal.clone()
    }

    /// Client for the volume mounted at `mount_point`.
    pub fn client(&self, mount_point: &str) -> Option<LoopbackClient> {
        let state = self.state.lock();
        state
            .volumes
            .iter()
            .find(|(_, slot)| {
                slot.record
                    .mount_point
                    .as_deref()
                    .is_some_and(|m| m.eq_ignore_ascii_case(mount_point))
            })
            .map(|(native, slot)| LoopbackClient::new(*native, slot))
    }

    /// Client for a volume handle.
    pub fn client_for(&self, volume: NativeVolume) -> Option<LoopbackClient> {
        let state = self.state.lock();
        state.volumes.get(&volume).map(|slot| LoopbackClient::new(volume, slot))
    }

    /// Path passed to the last successful `set_debug_log_file`.
    pub fn debug_log_file() -> Option<String> {
        DEBUG_LOG_FILE.lock().clone()
    }

    fn dispatcher_of(&self, volume: NativeVolume) -> Option<Arc<RwLock<bool>>> {
        let state = self.state.lock();
        state.volumes.get(&volume).map(|slot| Arc::clone(&slot.dispatcher))
    }
}

fn snapshot(slot: &VolumeSlot) -> LoopbackVolume {
    LoopbackVolume {
        dispatching: *slot.dispatcher.read(),
        ..slot.record.clone()
    }
}

/// Decode a fixed, null-terminated UTF-16 field.
fn fixed_wide(units: &[u16]) -> String {
    let len: usize = units.iter().position(|unit| *unit == 0).unwrap_or(units.len());
    String::from_utf16_lossy(&units[..len])
}

impl NativeEngine for LoopbackEngine {
    fn preflight(&self, device: DeviceKind, mount_point: Option<&str>) -> FsResult<()> {
        tracing::debug!("Loopback preflight on {}", device);
        let mut state = self.state.lock();
        state.step(Some(LoopbackStage::Preflight), "preflight")?;
        state.resolve_mount_point(mount_point).map(|_| ())
    }

    fn create_volume(
        &self,
        device: DeviceKind,
        params: &FspVolumeParams,
        interface: &'static FileSystemInterface,
    ) -> FsResult<NativeVolume> {
        let mut state = self.state.lock();
        state.step(Some(LoopbackStage::CreateVolume), "create_volume")?;

        let object: Box<FspFileSystem> = Box::new(FspFileSystem {
            version: params.version,
            user_context: ptr::null_mut(),
            interface,
        });
        let native: NativeVolume = unsafe { NativeVolume::new(NonNull::from(Box::leak(object))) };

        let record: LoopbackVolume = LoopbackVolume {
            device,
            mount_point: None,
            security_descriptor: None,
            debug_log: 0,
            thread_count: 0,
            dispatching: false,
            sector_size: params.sector_size,
            sectors_per_allocation_unit: params.sectors_per_allocation_unit,
            max_component_length: params.max_component_length,
            volume_creation_time: params.volume_creation_time,
            volume_serial_number: params.volume_serial_number,
            file_info_timeout: params.file_info_timeout,
            flags: params.flags,
            prefix: fixed_wide(&params.prefix),
            file_system_name: fixed_wide(&params.file_system_name),
        };
        state.volumes.insert(
            native,
            VolumeSlot {
                interface,
                record,
                dispatcher: Arc::new(RwLock::new(false)),
            },
        );
        tracing::debug!("Loopback volume created on {}", device);
        Ok(native)
    }

    fn set_debug_log(&self, volume: NativeVolume, mask: u32) {
        let mut state = self.state.lock();
        state.journal.push("set_debug_log");
        if let Some(slot) = state.volumes.get_mut(&volume) {
            slot.record.debug_log = mask;
        }
    }

    fn set_mount_point(
        &self,
        volume: NativeVolume,
        mount_point: Option<&str>,
        security_descriptor: Option<&[u8]>,
    ) -> FsResult<()> {
        let mut state = self.state.lock();
        state.step(Some(LoopbackStage::SetMountPoint), "set_mount_point")?;
        if !state.volumes.contains_key(&volume) {
            return Err(STATUS_INVALID_PARAMETER);
        }

        let resolved: String = state.resolve_mount_point(mount_point)?;
        if let Some(slot) = state.volumes.get_mut(&volume) {
            tracing::debug!("Loopback volume mounted at {}", resolved);
            slot.record.mount_point = Some(resolved);
            slot.record.security_descriptor = security_descriptor.map(<[u8]>::to_vec);
        }
        Ok(())
    }

    fn mount_point(&self, volume: NativeVolume) -> Option<String> {
        let state = self.state.lock();
        state.volumes.get(&volume).and_then(|slot| slot.record.mount_point.clone())
    }

    fn start_dispatcher(&self, volume: NativeVolume, thread_count: u32) -> FsResult<()> {
        let dispatcher: Arc<RwLock<bool>> = {
            let mut state = self.state.lock();
            state.step(Some(LoopbackStage::StartDispatcher), "start_dispatcher")?;
            let slot: &mut VolumeSlot = match state.volumes.get_mut(&volume) {
                Some(slot) => slot,
                None => return Err(STATUS_INVALID_PARAMETER),
            };
            slot.record.thread_count = thread_count;
            Arc::clone(&slot.dispatcher)
        };
        *dispatcher.write() = true;
        Ok(())
    }

    fn stop_dispatcher(&self, volume: NativeVolume) {
        self.state.lock().journal.push("stop_dispatcher");
        if let Some(dispatcher) = self.dispatcher_of(volume) {
            // Waits for requests in flight
            *dispatcher.write() = false;
        }
    }

    fn delete_volume(&self, volume: NativeVolume) {
        let slot: Option<VolumeSlot> = {
            let mut state = self.state.lock();
            state.journal.push("delete_volume");
            state.volumes.remove(&volume)
        };
        let Some(slot) = slot else {
            tracing::warn!("Loopback delete of unknown volume {:?}", volume);
            return;
        };

        *slot.dispatcher.write() = false;
        // Allocated by create_volume; no client can enter once stopped
        unsafe { drop(Box::from_raw(volume.as_ptr())) };
    }

    fn version() -> FsResult<EngineVersion> {
        Ok(LOOPBACK_VERSION)
    }

    fn set_debug_log_file(path: &str) -> FsResult<()> {
        if path.is_empty() {
            return Err(STATUS_INVALID_PARAMETER);
        }
        *DEBUG_LOG_FILE.lock() = Some(path.to_string());
        Ok(())
    }
}

// ============================================================================
// Client
// ============================================================================

/// How a sized request passes its buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeRequest {
    /// No size pointer.
    Absent,
    /// Size pointer with this capacity but no buffer.
    Probe(usize),
    /// Buffer of this capacity.
    Buffer(usize),
}

/// Result of a sized request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizedReply {
    pub status: NtStatus,
    /// Size reported back through the size pointer.
    pub size: usize,
    /// Bytes copied; empty on failure or when no buffer was passed.
    pub data: Vec<u8>,
}

/// Result of Create or Open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenReply {
    pub context: FullContext,
    pub info: FileInfo,
}

/// Issues requests against one loopback volume.
///
/// Every request fails with `STATUS_DEVICE_NOT_READY` unless the volume's
/// dispatcher is running; stopping the dispatcher waits for requests that
/// already entered.
#[derive(Clone)]
pub struct LoopbackClient {
    native: NativeVolume,
    interface: &'static FileSystemInterface,
    dispatcher: Arc<RwLock<bool>>,
}

/// Fetch a table slot, failing like the engine does for an empty one.
fn slot<T>(entry: Option<T>) -> FsResult<T> {
    entry.ok_or(STATUS_INVALID_DEVICE_REQUEST)
}

fn boolean(value: bool) -> Boolean {
    Boolean::from(value)
}

/// Run a sized call with the buffer shape described by `request`.
fn sized_call(request: SizeRequest, call: impl FnOnce(*mut c_void, *mut usize) -> NtStatus) -> SizedReply {
    let (mut buffer, mut size): (Vec<u8>, usize) = match request {
        SizeRequest::Absent => (Vec::new(), 0),
        SizeRequest::Probe(capacity) => (Vec::new(), capacity),
        SizeRequest::Buffer(capacity) => (vec![0; capacity], capacity),
    };
    let dest: *mut c_void = match request {
        SizeRequest::Buffer(_) => buffer.as_mut_ptr().cast::<c_void>(),
        _ => ptr::null_mut(),
    };
    let p_size: *mut usize = match request {
        SizeRequest::Absent => ptr::null_mut(),
        _ => &mut size,
    };

    let status: NtStatus = call(dest, p_size);
    if status.is_success() {
        buffer.truncate(size.min(buffer.len()));
    } else {
        buffer.clear();
    }
    SizedReply {
        status,
        size,
        data: buffer,
    }
}

fn volume_info_of(raw: &RawVolumeInfo) -> VolumeInfo {
    let units: usize = (raw.volume_label_length as usize / 2).min(raw.volume_label.len());
    VolumeInfo {
        total_size: raw.total_size,
        free_size: raw.free_size,
        label: String::from_utf16_lossy(&raw.volume_label[..units]),
    }
}

impl LoopbackClient {
    fn new(native: NativeVolume, slot: &VolumeSlot) -> Self {
        Self {
            native,
            interface: slot.interface,
            dispatcher: Arc::clone(&slot.dispatcher),
        }
    }

    /// Volume this client talks to.
    pub fn volume(&self) -> NativeVolume {
        self.native
    }

    /// Dispatch table the volume was created with.
    ///
    /// Calling a slot directly skips the dispatcher check the request
    /// methods make.
    pub fn interface(&self) -> &'static FileSystemInterface {
        self.interface
    }

    /// True while the volume accepts requests.
    pub fn is_dispatching(&self) -> bool {
        *self.dispatcher.read()
    }

    fn enter(&self) -> FsResult<RwLockReadGuard<'_, bool>> {
        let running: RwLockReadGuard<'_, bool> = self.dispatcher.read();
        if *running {
            Ok(running)
        } else {
            Err(STATUS_DEVICE_NOT_READY)
        }
    }

    fn fs(&self) -> *mut FspFileSystem {
        self.native.as_ptr()
    }

    pub fn get_volume_info(&self) -> FsResult<VolumeInfo> {
        let _running = self.enter()?;
        let entry = slot(self.interface.get_volume_info)?;
        let mut raw: RawVolumeInfo = RawVolumeInfo::default();
        unsafe { entry(self.fs(), &mut raw) }.into_result()?;
        Ok(volume_info_of(&raw))
    }

    pub fn set_volume_label(&self, label: &str) -> FsResult<VolumeInfo> {
        let _running = self.enter()?;
        let entry = slot(self.interface.set_volume_label)?;
        let wide: Vec<u16> = string_to_wide(label);
        let mut raw: RawVolumeInfo = RawVolumeInfo::default();
        unsafe { entry(self.fs(), wide.as_ptr(), &mut raw) }.into_result()?;
        Ok(volume_info_of(&raw))
    }

    /// Query attributes and security by name.
    ///
    /// # Returns
    /// The sized reply and the attributes value written by the host.
    pub fn get_security_by_name(&self, name: &str, request: SizeRequest) -> FsResult<(SizedReply, u32)> {
        let _running = self.enter()?;
        let entry = slot(self.interface.get_security_by_name)?;
        let wide: Vec<u16> = string_to_wide(name);
        let mut attributes: u32 = 0;
        let reply: SizedReply =
            sized_call(request, |dest, p_size| unsafe { entry(self.fs(), wide.as_ptr(), &mut attributes, dest, p_size) });
        Ok((reply, attributes))
    }

    /// Create a file.
    ///
    /// `security_descriptor` must hold a self-relative security descriptor.
    pub fn create(
        &self,
        name: &str,
        create_options: u32,
        granted_access: u32,
        file_attributes: u32,
        security_descriptor: Option<&[u8]>,
        allocation_size: u64,
    ) -> FsResult<OpenReply> {
        self.create_named(
            name,
            create_options,
            granted_access,
            file_attributes,
            security_descriptor,
            allocation_size,
        )
        .map(|(reply, _)| reply)
    }

    /// Create a file and also return the normalized name, if one was set.
    pub fn create_named(
        &self,
        name: &str,
        create_options: u32,
        granted_access: u32,
        file_attributes: u32,
        security_descriptor: Option<&[u8]>,
        allocation_size: u64,
    ) -> FsResult<(OpenReply, Option<String>)> {
        let _running = self.enter()?;
        let entry = slot(self.interface.create)?;
        let wide: Vec<u16> = string_to_wide(name);
        let sd: *const c_void = match security_descriptor {
            Some(bytes) if !bytes.is_empty() => bytes.as_ptr().cast::<c_void>(),
            _ => ptr::null(),
        };
        self.open_with(|context, out| unsafe {
            entry(
                self.fs(),
                wide.as_ptr(),
                create_options,
                granted_access,
                file_attributes,
                sd,
                allocation_size,
                context,
                out,
            )
        })
    }

    pub fn open(&self, name: &str, create_options: u32, granted_access: u32) -> FsResult<OpenReply> {
        self.open_named(name, create_options, granted_access).map(|(reply, _)| reply)
    }

    /// Open a file and also return the normalized name, if one was set.
    pub fn open_named(
        &self,
        name: &str,
        create_options: u32,
        granted_access: u32,
    ) -> FsResult<(OpenReply, Option<String>)> {
        let _running = self.enter()?;
        let entry = slot(self.interface.open)?;
        let wide: Vec<u16> = string_to_wide(name);
        self.open_with(|context, out| unsafe {
            entry(self.fs(), wide.as_ptr(), create_options, granted_access, context, out)
        })
    }

    fn open_with(
        &self,
        call: impl FnOnce(*mut FullContext, *mut OpenFileInfo) -> NtStatus,
    ) -> FsResult<(OpenReply, Option<String>)> {
        let mut name_buf: Vec<u16> = vec![0; NORMALIZED_NAME_CAPACITY as usize / 2];
        let mut out: OpenFileInfo = OpenFileInfo {
            file_info: FileInfo::default(),
            normalized_name: name_buf.as_mut_ptr(),
            normalized_name_size: NORMALIZED_NAME_CAPACITY,
        };
        let mut context: FullContext = FullContext::NULL;

        call(&mut context as *mut FullContext, &mut out as *mut OpenFileInfo).into_result()?;

        // An untouched size means no normalized name was reported
        let normalized: Option<String> = (out.normalized_name_size != NORMALIZED_NAME_CAPACITY)
            .then(|| String::from_utf16_lossy(&name_buf[..out.normalized_name_size as usize / 2]));
        Ok((
            OpenReply {
                context,
                info: out.file_info,
            },
            normalized,
        ))
    }

    pub fn overwrite(
        &self,
        context: &mut FullContext,
        file_attributes: u32,
        replace_file_attributes: bool,
        allocation_size: u64,
    ) -> FsResult<FileInfo> {
        let _running = self.enter()?;
        let entry = slot(self.interface.overwrite)?;
        let mut info: FileInfo = FileInfo::default();
        unsafe {
            entry(
                self.fs(),
                context,
                file_attributes,
                boolean(replace_file_attributes),
                allocation_size,
                &mut info,
            )
        }
        .into_result()?;
        Ok(info)
    }

    pub fn cleanup(&self, context: &mut FullContext, name: Option<&str>, flags: u32) -> FsResult<()> {
        let _running = self.enter()?;
        let entry = slot(self.interface.cleanup)?;
        let wide: Option<Vec<u16>> = name.map(string_to_wide);
        let name_ptr: *const u16 = wide.as_ref().map_or(ptr::null(), |w| w.as_ptr());
        unsafe { entry(self.fs(), context, name_ptr, flags) };
        Ok(())
    }

    pub fn close(&self, context: &mut FullContext) -> FsResult<()> {
        let _running = self.enter()?;
        let entry = slot(self.interface.close)?;
        unsafe { entry(self.fs(), context) };
        Ok(())
    }

    pub fn read(&self, context: &mut FullContext, offset: u64, length: u32) -> FsResult<Vec<u8>> {
        let _running = self.enter()?;
        let entry = slot(self.interface.read)?;
        let mut buffer: Vec<u8> = vec![0; length as usize];
        let mut transferred: u32 = 0;
        unsafe {
            entry(
                self.fs(),
                context,
                buffer.as_mut_ptr().cast::<c_void>(),
                offset,
                length,
                &mut transferred,
            )
        }
        .into_result()?;
        buffer.truncate(transferred as usize);
        Ok(buffer)
    }

    pub fn write(
        &self,
        context: &mut FullContext,
        data: &[u8],
        offset: u64,
        write_to_end_of_file: bool,
        constrained_io: bool,
    ) -> FsResult<(u32, FileInfo)> {
        let _running = self.enter()?;
        let entry = slot(self.interface.write)?;
        let mut transferred: u32 = 0;
        let mut info: FileInfo = FileInfo::default();
        unsafe {
            entry(
                self.fs(),
                context,
                data.as_ptr().cast::<c_void>(),
                offset,
                data.len() as u32,
                boolean(write_to_end_of_file),
                boolean(constrained_io),
                &mut transferred,
                &mut info,
            )
        }
        .into_result()?;
        Ok((transferred, info))
    }

    /// Flush a file, or the whole volume when `context` is `None`.
    pub fn flush(&self, context: Option<&mut FullContext>) -> FsResult<FileInfo> {
        let _running = self.enter()?;
        let entry = slot(self.interface.flush)?;
        let context_ptr: *mut FullContext = context.map_or(ptr::null_mut(), |c| c as *mut FullContext);
        let mut info: FileInfo = FileInfo::default();
        unsafe { entry(self.fs(), context_ptr, &mut info) }.into_result()?;
        Ok(info)
    }

    pub fn get_file_info(&self, context: &mut FullContext) -> FsResult<FileInfo> {
        let _running = self.enter()?;
        let entry = slot(self.interface.get_file_info)?;
        let mut info: FileInfo = FileInfo::default();
        unsafe { entry(self.fs(), context, &mut info) }.into_result()?;
        Ok(info)
    }

    pub fn set_basic_info(&self, context: &mut FullContext, basic: &BasicInfo) -> FsResult<FileInfo> {
        let _running = self.enter()?;
        let entry = slot(self.interface.set_basic_info)?;
        let mut info: FileInfo = FileInfo::default();
        unsafe {
            entry(
                self.fs(),
                context,
                basic.file_attributes,
                basic.creation_time,
                basic.last_access_time,
                basic.last_write_time,
                basic.change_time,
                &mut info,
            )
        }
        .into_result()?;
        Ok(info)
    }

    pub fn set_file_size(&self, context: &mut FullContext, new_size: u64, set_allocation_size: bool) -> FsResult<FileInfo> {
        let _running = self.enter()?;
        let entry = slot(self.interface.set_file_size)?;
        let mut info: FileInfo = FileInfo::default();
        unsafe { entry(self.fs(), context, new_size, boolean(set_allocation_size), &mut info) }.into_result()?;
        Ok(info)
    }

    pub fn rename(&self, context: &mut FullContext, name: &str, new_name: &str, replace_if_exists: bool) -> FsResult<()> {
        let _running = self.enter()?;
        let entry = slot(self.interface.rename)?;
        let wide: Vec<u16> = string_to_wide(name);
        let new_wide: Vec<u16> = string_to_wide(new_name);
        unsafe {
            entry(
                self.fs(),
                context,
                wide.as_ptr(),
                new_wide.as_ptr(),
                boolean(replace_if_exists),
            )
        }
        .into_result()?;
        Ok(())
    }

    pub fn get_security(&self, context: &mut FullContext, request: SizeRequest) -> FsResult<SizedReply> {
        let _running = self.enter()?;
        let entry = slot(self.interface.get_security)?;
        let context_ptr: *mut FullContext = context;
        Ok(sized_call(request, |dest, p_size| unsafe { entry(self.fs(), context_ptr, dest, p_size) }))
    }

    pub fn set_security(&self, context: &mut FullContext, sections: u32, descriptor: &[u8]) -> FsResult<()> {
        let _running = self.enter()?;
        let entry = slot(self.interface.set_security)?;
        let sd: *const c_void = if descriptor.is_empty() {
            ptr::null()
        } else {
            descriptor.as_ptr().cast::<c_void>()
        };
        unsafe { entry(self.fs(), context, sections, sd) }.into_result()?;
        Ok(())
    }

    /// Raw directory listing bytes for a buffer of `length` bytes.
    pub fn read_directory_bytes(
        &self,
        context: &mut FullContext,
        pattern: Option<&str>,
        marker: Option<&str>,
        length: u32,
    ) -> FsResult<Vec<u8>> {
        let _running = self.enter()?;
        let entry = slot(self.interface.read_directory)?;
        let pattern_wide: Option<Vec<u16>> = pattern.map(string_to_wide);
        let marker_wide: Option<Vec<u16>> = marker.map(string_to_wide);
        let mut buffer: Vec<u8> = vec![0; length as usize];
        let mut transferred: u32 = 0;
        unsafe {
            entry(
                self.fs(),
                context,
                pattern_wide.as_ref().map_or(ptr::null(), |w| w.as_ptr()),
                marker_wide.as_ref().map_or(ptr::null(), |w| w.as_ptr()),
                buffer.as_mut_ptr().cast::<c_void>(),
                length,
                &mut transferred,
            )
        }
        .into_result()?;
        buffer.truncate(transferred as usize);
        Ok(buffer)
    }

    /// Decoded directory listing for a buffer of `length` bytes.
    pub fn read_directory(
        &self,
        context: &mut FullContext,
        pattern: Option<&str>,
        marker: Option<&str>,
        length: u32,
    ) -> FsResult<Vec<DirEntry>> {
        self.read_directory_bytes(context, pattern, marker, length)
            .map(|bytes| decode_dir_listing(&bytes))
    }

    /// Resolve reparse points along `name`.
    ///
    /// # Returns
    /// The sized reply and the I/O status block written by the host.
    pub fn resolve_reparse_points(
        &self,
        name: &str,
        reparse_point_index: u32,
        resolve_last_path_component: bool,
        request: SizeRequest,
    ) -> FsResult<(SizedReply, IoStatusBlock)> {
        let _running = self.enter()?;
        let entry = slot(self.interface.resolve_reparse_points)?;
        let wide: Vec<u16> = string_to_wide(name);
        let mut io_status: IoStatusBlock = IoStatusBlock::default();
        let reply: SizedReply = sized_call(request, |dest, p_size| unsafe {
            entry(
                self.fs(),
                wide.as_ptr(),
                reparse_point_index,
                boolean(resolve_last_path_component),
                &mut io_status,
                dest,
                p_size,
            )
        });
        Ok((reply, io_status))
    }

    pub fn get_reparse_point(&self, context: &mut FullContext, name: &str, request: SizeRequest) -> FsResult<SizedReply> {
        let _running = self.enter()?;
        let entry = slot(self.interface.get_reparse_point)?;
        let wide: Vec<u16> = string_to_wide(name);
        let context_ptr: *mut FullContext = context;
        Ok(sized_call(request, |dest, p_size| unsafe {
            entry(self.fs(), context_ptr, wide.as_ptr(), dest, p_size)
        }))
    }

    pub fn set_reparse_point(&self, context: &mut FullContext, name: &str, data: &[u8]) -> FsResult<()> {
        let _running = self.enter()?;
        let entry = slot(self.interface.set_reparse_point)?;
        let wide: Vec<u16> = string_to_wide(name);
        unsafe { entry(self.fs(), context, wide.as_ptr(), data.as_ptr().cast::<c_void>(), data.len()) }
            .into_result()?;
        Ok(())
    }

    pub fn delete_reparse_point(&self, context: &mut FullContext, name: &str, data: &[u8]) -> FsResult<()> {
        let _running = self.enter()?;
        let entry = slot(self.interface.delete_reparse_point)?;
        let wide: Vec<u16> = string_to_wide(name);
        unsafe { entry(self.fs(), context, wide.as_ptr(), data.as_ptr().cast::<c_void>(), data.len()) }
            .into_result()?;
        Ok(())
    }

    pub fn get_stream_info(&self, context: &mut FullContext, length: u32) -> FsResult<Vec<StreamEntry>> {
        let _running = self.enter()?;
        let entry = slot(self.interface.get_stream_info)?;
        let mut buffer: Vec<u8> = vec![0; length as usize];
        let mut transferred: u32 = 0;
        unsafe {
            entry(
                self.fs(),
                context,
                buffer.as_mut_ptr().cast::<c_void>(),
                length,
                &mut transferred,
            )
        }
        .into_result()?;
        buffer.truncate(transferred as usize);
        Ok(decode_stream_listing(&buffer))
    }

    pub fn get_dir_info_by_name(&self, context: &mut FullContext, name: &str) -> FsResult<DirEntry> {
        let _running = self.enter()?;
        let entry = slot(self.interface.get_dir_info_by_name)?;
        let wide: Vec<u16> = string_to_wide(name);
        let mut raw: RawDirInfo = RawDirInfo::default();
        unsafe { entry(self.fs(), context, wide.as_ptr(), &mut raw) }.into_result()?;

        let units: usize = (raw.size as usize).saturating_sub(DIR_INFO_HEADER_SIZE) / 2;
        Ok(DirEntry {
            name: String::from_utf16_lossy(&raw.file_name_buf[..units.min(raw.file_name_buf.len())]),
            info: raw.file_info,
        })
    }

    pub fn control(
        &self,
        context: &mut FullContext,
        control_code: u32,
        input: &[u8],
        output_length: u32,
    ) -> FsResult<Vec<u8>> {
        let _running = self.enter()?;
        let entry = slot(self.interface.control)?;
        let mut output: Vec<u8> = vec![0; output_length as usize];
        let mut transferred: u32 = 0;
        unsafe {
            entry(
                self.fs(),
                context,
                control_code,
                input.as_ptr().cast::<c_void>(),
                input.len() as u32,
                output.as_mut_ptr().cast::<c_void>(),
                output_length,
                &mut transferred,
            )
        }
        .into_result()?;
        output.truncate(transferred as usize);
        Ok(output)
    }

    pub fn set_delete(&self, context: &mut FullContext, name: &str, delete_file: bool) -> FsResult<()> {
        let _running = self.enter()?;
        let entry = slot(self.interface.set_delete)?;
        let wide: Vec<u16> = string_to_wide(name);
        unsafe { entry(self.fs(), context, wide.as_ptr(), boolean(delete_file)) }.into_result()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::interface_for;
    use crate::filesystem::FileSystem;
    use crate::status::STATUS_SUCCESS;

    struct Bare;
    impl FileSystem for Bare {
        type FileNode = ();
        type FileDesc = ();
    }

    fn params() -> FspVolumeParams {
        FspVolumeParams {
            sector_size: 512,
            ..Default::default()
        }
    }

    #[test]
    fn test_volume_lifecycle() {
        let engine: LoopbackEngine = LoopbackEngine::new();
        let volume: NativeVolume = engine
            .create_volume(DeviceKind::Disk, &params(), interface_for::<Bare>())
            .unwrap();
        assert_eq!(engine.live_volumes(), 1);
        assert!(unsafe { (*volume.as_ptr()).user_context.is_null() });

        engine.set_mount_point(volume, None, None).unwrap();
        assert_eq!(engine.mount_point(volume).as_deref(), Some("Z:"));

        engine.start_dispatcher(volume, 4).unwrap();
        let snapshot: LoopbackVolume = engine.volume(volume).unwrap();
        assert!(snapshot.dispatching);
        assert_eq!(snapshot.thread_count, 4);
        assert_eq!(snapshot.sector_size, 512);

        engine.stop_dispatcher(volume);
        engine.delete_volume(volume);
        assert_eq!(engine.live_volumes(), 0);
        assert_eq!(
            engine.journal(),
            vec!["create_volume", "set_mount_point", "start_dispatcher", "stop_dispatcher", "delete_volume"]
        );
    }

    #[test]
    fn test_mount_point_collisions() {
        let engine: LoopbackEngine = LoopbackEngine::new();
        engine.occupy("Z:");
        let first: NativeVolume = engine
            .create_volume(DeviceKind::Disk, &params(), interface_for::<Bare>())
            .unwrap();
        engine.set_mount_point(first, None, None).unwrap();
        assert_eq!(engine.mount_point(first).as_deref(), Some("Y:"));

        let second: NativeVolume = engine
            .create_volume(DeviceKind::Disk, &params(), interface_for::<Bare>())
            .unwrap();
        assert_eq!(
            engine.set_mount_point(second, Some("y:"), None),
            Err(STATUS_OBJECT_NAME_COLLISION)
        );
        assert_eq!(engine.preflight(DeviceKind::Disk, Some("Y:")), Err(STATUS_OBJECT_NAME_COLLISION));
        assert_eq!(engine.preflight(DeviceKind::Disk, Some("m:")), Ok(()));

        engine.set_mount_point(second, Some("m:"), Some(&[1, 2])).unwrap();
        assert_eq!(engine.mount_point(second).as_deref(), Some("M:"));
        assert_eq!(engine.volume(second).unwrap().security_descriptor, Some(vec![1, 2]));

        engine.delete_volume(first);
        engine.delete_volume(second);
    }

    #[test]
    fn test_failure_injection() {
        let engine: LoopbackEngine = LoopbackEngine::new();
        engine.fail_at(LoopbackStage::CreateVolume, STATUS_INVALID_PARAMETER);
        assert!(engine
            .create_volume(DeviceKind::Net, &params(), interface_for::<Bare>())
            .is_err());
        assert_eq!(engine.live_volumes(), 0);

        engine.clear_failures();
        assert!(engine
            .create_volume(DeviceKind::Net, &params(), interface_for::<Bare>())
            .is_ok());
    }

    #[test]
    fn test_client_requires_dispatcher() {
        let engine: LoopbackEngine = LoopbackEngine::new();
        let volume: NativeVolume = engine
            .create_volume(DeviceKind::Disk, &params(), interface_for::<Bare>())
            .unwrap();
        engine.set_mount_point(volume, Some("Q:"), None).unwrap();

        let client: LoopbackClient = engine.client("q:").unwrap();
        assert_eq!(client.get_volume_info().err(), Some(STATUS_DEVICE_NOT_READY));

        engine.start_dispatcher(volume, 0).unwrap();
        assert!(client.is_dispatching());

        engine.stop_dispatcher(volume);
        engine.delete_volume(volume);
        assert!(!client.is_dispatching());
        assert!(engine.client("Q:").is_none());
    }

    #[test]
    fn test_sized_call_shapes() {
        let payload: [u8; 4] = [1, 2, 3, 4];
        let copy = |dest: *mut c_void, p_size: *mut usize| unsafe {
            crate::bridge::marshal::copy_sized(crate::bridge::PayloadKind::ReparseData, Some(&payload), dest, p_size)
        };

        let reply: SizedReply = sized_call(SizeRequest::Buffer(8), copy);
        assert_eq!(reply.status, STATUS_SUCCESS);
        assert_eq!(reply.data, payload.to_vec());

        let reply: SizedReply = sized_call(SizeRequest::Probe(8), copy);
        assert_eq!(reply.size, 4);
        assert!(reply.data.is_empty());

        let reply: SizedReply = sized_call(SizeRequest::Absent, copy);
        assert_eq!(reply.status, STATUS_SUCCESS);
        assert_eq!(reply.size, 0);
    }

    #[test]
    fn test_debug_log_file() {
        assert_eq!(LoopbackEngine::set_debug_log_file(""), Err(STATUS_INVALID_PARAMETER));
        LoopbackEngine::set_debug_log_file("fsp-debug.log").unwrap();
        assert_eq!(LoopbackEngine::debug_log_file().as_deref(), Some("fsp-debug.log"));
        assert_eq!(LoopbackEngine::version(), Ok(LOOPBACK_VERSION));
    }
}
