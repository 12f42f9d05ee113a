//! In-memory file system used by the integration tests.
//!
//! Paths are backslash-separated and rooted at `\`. Every operation can be
//! made to panic by name, and reads can be slowed down to observe how the
//! host serializes dispatch entries.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rusty_fsp_host::status::{
    STATUS_ACCESS_DENIED, STATUS_DIRECTORY_NOT_EMPTY, STATUS_END_OF_FILE, STATUS_NOT_A_DIRECTORY,
    STATUS_NOT_A_REPARSE_POINT, STATUS_OBJECT_NAME_COLLISION, STATUS_OBJECT_NAME_NOT_FOUND,
    STATUS_OBJECT_PATH_NOT_FOUND,
};
use rusty_fsp_host::{
    BasicInfo, CleanupFlags, DirEntry, Fault, FileInfo, FileSystem, FsResult, NtStatus, Opened, ResolvedReparse,
    SecurityByName, SecuritySections, StreamEntry, VolumeConfiguration, VolumeInfo,
};

pub const FILE_DIRECTORY_FILE: u32 = 0x0000_0001;
pub const FILE_ATTRIBUTE_DIRECTORY: u32 = 0x10;
pub const FILE_ATTRIBUTE_ARCHIVE: u32 = 0x20;
pub const ALLOCATION_UNIT: u64 = 4096;
pub const TOTAL_SIZE: u64 = 1024 * 1024;
pub const REPARSE_TAG_SYMLINK: u32 = 0xA000_000C;

/// Self-relative security descriptor with only an owner SID (S-1-5-18).
pub fn owner_only_descriptor() -> Vec<u8> {
    let mut sd: Vec<u8> = vec![1, 0];
    sd.extend_from_slice(&0x8000u16.to_le_bytes()); // SE_SELF_RELATIVE
    sd.extend_from_slice(&20u32.to_le_bytes()); // owner
    sd.extend_from_slice(&0u32.to_le_bytes()); // group
    sd.extend_from_slice(&0u32.to_le_bytes()); // sacl
    sd.extend_from_slice(&0u32.to_le_bytes()); // dacl
    sd.extend_from_slice(&[1, 1, 0, 0, 0, 0, 0, 5]);
    sd.extend_from_slice(&18u32.to_le_bytes());
    sd
}

/// Same layout, different owner (S-1-5-32-544 collapsed to one sub-authority).
pub fn admin_descriptor() -> Vec<u8> {
    let mut sd: Vec<u8> = owner_only_descriptor();
    let len: usize = sd.len();
    sd[len - 4..].copy_from_slice(&544u32.to_le_bytes());
    sd
}

#[derive(Debug, Default)]
struct NodeMeta {
    attributes: u32,
    creation_time: u64,
    last_access_time: u64,
    last_write_time: u64,
    change_time: u64,
}

/// One file or directory.
#[derive(Debug)]
pub struct MemNode {
    pub is_dir: bool,
    pub index: u64,
    meta: Mutex<NodeMeta>,
    data: RwLock<Vec<u8>>,
    security: Mutex<Vec<u8>>,
    reparse: Mutex<Option<Vec<u8>>>,
}

impl MemNode {
    fn new(is_dir: bool, index: u64, attributes: u32, security: Vec<u8>) -> Self {
        let attributes: u32 = if is_dir {
            attributes | FILE_ATTRIBUTE_DIRECTORY
        } else if attributes == 0 {
            FILE_ATTRIBUTE_ARCHIVE
        } else {
            attributes
        };
        Self {
            is_dir,
            index,
            meta: Mutex::new(NodeMeta {
                attributes,
                creation_time: 1,
                last_access_time: 1,
                last_write_time: 1,
                change_time: 1,
            }),
            data: RwLock::new(Vec::new()),
            security: Mutex::new(security),
            reparse: Mutex::new(None),
        }
    }

    pub fn info(&self) -> FileInfo {
        let meta = self.meta.lock();
        let size: u64 = self.data.read().len() as u64;
        FileInfo {
            file_attributes: meta.attributes,
            reparse_tag: if self.reparse.lock().is_some() { REPARSE_TAG_SYMLINK } else { 0 },
            allocation_size: size.div_ceil(ALLOCATION_UNIT) * ALLOCATION_UNIT,
            file_size: size,
            creation_time: meta.creation_time,
            last_access_time: meta.last_access_time,
            last_write_time: meta.last_write_time,
            change_time: meta.change_time,
            index_number: self.index,
            hard_links: 0,
            ea_size: 0,
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

/// Per-open state.
#[derive(Debug)]
pub struct MemDesc {
    pub path: Mutex<String>,
    pub delete_pending: AtomicBool,
    drops: Arc<AtomicUsize>,
}

impl Drop for MemDesc {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// In-memory file system.
pub struct MemFs {
    nodes: Mutex<BTreeMap<String, Arc<MemNode>>>,
    next_index: AtomicU64,
    label: Mutex<String>,

    /// Lifecycle hook calls, in order.
    pub events: Mutex<Vec<String>>,
    /// Faults seen by the exception handler.
    pub faults: Mutex<Vec<Fault>>,
    /// Status the exception handler answers with; `None` makes it panic.
    pub fault_status: Mutex<Option<NtStatus>>,
    /// Operation name that panics when called.
    pub panic_on: Mutex<Option<&'static str>>,
    pub fail_init: Mutex<Option<NtStatus>>,
    pub fail_mounted: Mutex<Option<NtStatus>>,
    /// Configuration changes applied by `init`.
    pub init_config: Mutex<Option<VolumeConfiguration>>,

    /// Delay applied inside every read.
    pub read_delay: Mutex<Option<Duration>>,
    pub active_reads: AtomicUsize,
    pub peak_reads: AtomicUsize,
    pub completed_reads: AtomicUsize,

    pub closes: AtomicUsize,
    pub volume_flushes: AtomicUsize,
    /// Descriptors dropped by the host.
    pub desc_drops: Arc<AtomicUsize>,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFs {
    pub fn new() -> Self {
        let mut nodes: BTreeMap<String, Arc<MemNode>> = BTreeMap::new();
        nodes.insert(
            "\\".to_string(),
            Arc::new(MemNode::new(true, 1, 0, owner_only_descriptor())),
        );
        Self {
            nodes: Mutex::new(nodes),
            next_index: AtomicU64::new(2),
            label: Mutex::new("MEMFS".to_string()),
            events: Mutex::new(Vec::new()),
            faults: Mutex::new(Vec::new()),
            fault_status: Mutex::new(Some(STATUS_ACCESS_DENIED)),
            panic_on: Mutex::new(None),
            fail_init: Mutex::new(None),
            fail_mounted: Mutex::new(None),
            init_config: Mutex::new(None),
            read_delay: Mutex::new(None),
            active_reads: AtomicUsize::new(0),
            peak_reads: AtomicUsize::new(0),
            completed_reads: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            volume_flushes: AtomicUsize::new(0),
            desc_drops: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Node at `path`, if any.
    pub fn node(&self, path: &str) -> Option<Arc<MemNode>> {
        self.nodes.lock().get(path).cloned()
    }

    pub fn exists(&self, path: &str) -> bool {
        self.nodes.lock().contains_key(path)
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }

    fn event(&self, name: &str) {
        self.events.lock().push(name.to_string());
    }

    fn check_panic(&self, operation: &'static str) {
        if *self.panic_on.lock() == Some(operation) {
            panic!("injected panic in {}", operation);
        }
    }

    fn lookup(&self, path: &str) -> FsResult<Arc<MemNode>> {
        self.node(path).ok_or(STATUS_OBJECT_NAME_NOT_FOUND)
    }

    fn open_desc(&self, path: &str) -> MemDesc {
        MemDesc {
            path: Mutex::new(path.to_string()),
            delete_pending: AtomicBool::new(false),
            drops: Arc::clone(&self.desc_drops),
        }
    }

    /// Direct children of a directory, in name order.
    fn children(&self, dir: &str) -> Vec<(String, Arc<MemNode>)> {
        let nodes = self.nodes.lock();
        nodes
            .iter()
            .filter(|(path, _)| path.as_str() != "\\" && parent_of(path) == dir)
            .map(|(path, node)| (file_name_of(path).to_string(), Arc::clone(node)))
            .collect()
    }
}

/// Parent directory of a path: `\a\b` -> `\a`, `\a` -> `\`.
pub fn parent_of(path: &str) -> &str {
    match path.rfind('\\') {
        Some(0) | None => "\\",
        Some(pos) => &path[..pos],
    }
}

/// Last component of a path.
pub fn file_name_of(path: &str) -> &str {
    match path.rfind('\\') {
        Some(pos) => &path[pos + 1..],
        None => path,
    }
}

/// Child path of a directory.
fn join(dir: &str, name: &str) -> String {
    if dir == "\\" {
        format!("\\{}", name)
    } else {
        format!("{}\\{}", dir, name)
    }
}

impl FileSystem for MemFs {
    type FileNode = Arc<MemNode>;
    type FileDesc = MemDesc;

    fn init(&self, config: &mut VolumeConfiguration) -> FsResult<()> {
        self.check_panic("Init");
        self.event("init");
        if let Some(status) = *self.fail_init.lock() {
            return Err(status);
        }
        if let Some(wanted) = self.init_config.lock().clone() {
            *config = wanted;
        }
        Ok(())
    }

    fn mounted(&self, mount_point: Option<&str>) -> FsResult<()> {
        self.event(&format!("mounted {}", mount_point.unwrap_or("-")));
        match *self.fail_mounted.lock() {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    fn unmounted(&self) {
        self.event("unmounted");
        self.check_panic("Unmounted");
    }

    fn exception_handler(&self, fault: &Fault) -> NtStatus {
        self.faults.lock().push(fault.clone());
        match *self.fault_status.lock() {
            Some(status) => status,
            None => panic!("exception handler failed"),
        }
    }

    fn get_volume_info(&self) -> FsResult<VolumeInfo> {
        self.check_panic("GetVolumeInfo");
        let used: u64 = self.nodes.lock().values().map(|node| node.info().allocation_size).sum();
        Ok(VolumeInfo {
            total_size: TOTAL_SIZE,
            free_size: TOTAL_SIZE - used,
            label: self.label.lock().clone(),
        })
    }

    fn set_volume_label(&self, label: &str) -> FsResult<VolumeInfo> {
        self.check_panic("SetVolumeLabel");
        *self.label.lock() = label.to_string();
        self.get_volume_info()
    }

    fn get_security_by_name(&self, name: &str, want_security: bool) -> FsResult<SecurityByName> {
        self.check_panic("GetSecurityByName");

        // A reparse point on any proper prefix redirects the lookup
        let mut prefix: &str = name;
        let mut depth: u32 = 0;
        while prefix != "\\" {
            prefix = parent_of(prefix);
            depth += 1;
            if let Some(node) = self.node(prefix) {
                if node.reparse.lock().is_some() {
                    return Ok(SecurityByName::Reparse { index: Some(depth) });
                }
            }
        }

        let node: Arc<MemNode> = self.lookup(name)?;
        let security: Option<Vec<u8>> = want_security.then(|| node.security.lock().clone());
        Ok(SecurityByName::Found {
            attributes: node.info().file_attributes,
            security,
        })
    }

    fn create(
        &self,
        name: &str,
        create_options: u32,
        _granted_access: u32,
        file_attributes: u32,
        security_descriptor: Option<&[u8]>,
        allocation_size: u64,
    ) -> FsResult<Opened<Arc<MemNode>, MemDesc>> {
        self.check_panic("Create");
        let mut nodes = self.nodes.lock();
        if nodes.contains_key(name) {
            return Err(STATUS_OBJECT_NAME_COLLISION);
        }
        match nodes.get(parent_of(name)) {
            Some(parent) if parent.is_dir => {}
            Some(_) => return Err(STATUS_NOT_A_DIRECTORY),
            None => return Err(STATUS_OBJECT_PATH_NOT_FOUND),
        }

        let security: Vec<u8> = security_descriptor.map_or_else(owner_only_descriptor, <[u8]>::to_vec);
        let node: Arc<MemNode> = Arc::new(MemNode::new(
            create_options & FILE_DIRECTORY_FILE != 0,
            self.next_index.fetch_add(1, Ordering::SeqCst),
            file_attributes,
            security,
        ));
        node.data.write().reserve(allocation_size as usize);
        nodes.insert(name.to_string(), Arc::clone(&node));
        drop(nodes);

        let info: FileInfo = node.info();
        Ok(Opened::new(node, self.open_desc(name), info).with_normalized_name(name))
    }

    fn open(&self, name: &str, _create_options: u32, _granted_access: u32) -> FsResult<Opened<Arc<MemNode>, MemDesc>> {
        self.check_panic("Open");
        let node: Arc<MemNode> = self.lookup(name)?;
        let info: FileInfo = node.info();
        Ok(Opened::new(node, self.open_desc(name), info))
    }

    fn overwrite(
        &self,
        node: &Arc<MemNode>,
        _desc: &MemDesc,
        file_attributes: u32,
        replace_file_attributes: bool,
        _allocation_size: u64,
    ) -> FsResult<FileInfo> {
        self.check_panic("Overwrite");
        node.data.write().clear();
        {
            let mut meta = node.meta.lock();
            if replace_file_attributes {
                meta.attributes = file_attributes | FILE_ATTRIBUTE_ARCHIVE;
            } else {
                meta.attributes |= file_attributes;
            }
        }
        Ok(node.info())
    }

    fn cleanup(&self, _node: &Arc<MemNode>, desc: &MemDesc, name: Option<&str>, flags: CleanupFlags) {
        self.check_panic("Cleanup");
        if flags.contains(CleanupFlags::DELETE) && desc.delete_pending.load(Ordering::SeqCst) {
            if let Some(name) = name {
                self.nodes.lock().remove(name);
            }
        }
    }

    fn close(&self, _node: &Arc<MemNode>, _desc: &MemDesc) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.check_panic("Close");
    }

    fn read(&self, node: &Arc<MemNode>, _desc: &MemDesc, buffer: &mut [u8], offset: u64) -> FsResult<u32> {
        self.check_panic("Read");
        let now: usize = self.active_reads.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_reads.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = *self.read_delay.lock() {
            thread::sleep(delay);
        }

        let result: FsResult<u32> = {
            let data = node.data.read();
            if offset >= data.len() as u64 {
                Err(STATUS_END_OF_FILE)
            } else {
                let start: usize = offset as usize;
                let count: usize = buffer.len().min(data.len() - start);
                buffer[..count].copy_from_slice(&data[start..start + count]);
                Ok(count as u32)
            }
        };

        self.active_reads.fetch_sub(1, Ordering::SeqCst);
        self.completed_reads.fetch_add(1, Ordering::SeqCst);
        result
    }

    fn write(
        &self,
        node: &Arc<MemNode>,
        _desc: &MemDesc,
        buffer: &[u8],
        offset: u64,
        write_to_end_of_file: bool,
        constrained_io: bool,
    ) -> FsResult<(u32, FileInfo)> {
        self.check_panic("Write");
        let written: usize = {
            let mut data = node.data.write();
            let start: usize = if write_to_end_of_file { data.len() } else { offset as usize };
            let end: usize = if constrained_io {
                (start + buffer.len()).min(data.len())
            } else {
                start + buffer.len()
            };
            if end <= start {
                0
            } else {
                if data.len() < end {
                    data.resize(end, 0);
                }
                data[start..end].copy_from_slice(&buffer[..end - start]);
                end - start
            }
        };
        node.meta.lock().last_write_time += 1;
        Ok((written as u32, node.info()))
    }

    fn flush(&self, node: Option<&Arc<MemNode>>, _desc: Option<&MemDesc>) -> FsResult<FileInfo> {
        self.check_panic("Flush");
        match node {
            Some(node) => Ok(node.info()),
            None => {
                self.volume_flushes.fetch_add(1, Ordering::SeqCst);
                Ok(FileInfo::default())
            }
        }
    }

    fn get_file_info(&self, node: &Arc<MemNode>, _desc: &MemDesc) -> FsResult<FileInfo> {
        self.check_panic("GetFileInfo");
        Ok(node.info())
    }

    fn set_basic_info(&self, node: &Arc<MemNode>, _desc: &MemDesc, info: BasicInfo) -> FsResult<FileInfo> {
        self.check_panic("SetBasicInfo");
        {
            let mut meta = node.meta.lock();
            if let Some(attributes) = info.attributes() {
                meta.attributes = attributes;
            }
            let meta = &mut *meta;
            for (field, value) in [
                (&mut meta.creation_time, info.creation_time),
                (&mut meta.last_access_time, info.last_access_time),
                (&mut meta.last_write_time, info.last_write_time),
                (&mut meta.change_time, info.change_time),
            ] {
                if value != 0 {
                    *field = value;
                }
            }
        }
        Ok(node.info())
    }

    fn set_file_size(
        &self,
        node: &Arc<MemNode>,
        _desc: &MemDesc,
        new_size: u64,
        set_allocation_size: bool,
    ) -> FsResult<FileInfo> {
        self.check_panic("SetFileSize");
        let mut data = node.data.write();
        if set_allocation_size {
            if (new_size as usize) < data.len() {
                data.truncate(new_size as usize);
            }
        } else {
            data.resize(new_size as usize, 0);
        }
        drop(data);
        Ok(node.info())
    }

    fn rename(
        &self,
        _node: &Arc<MemNode>,
        desc: &MemDesc,
        name: &str,
        new_name: &str,
        replace_if_exists: bool,
    ) -> FsResult<()> {
        self.check_panic("Rename");
        let mut nodes = self.nodes.lock();
        if nodes.contains_key(new_name) && !replace_if_exists {
            return Err(STATUS_OBJECT_NAME_COLLISION);
        }

        let prefix: String = format!("{}\\", name);
        let moved: Vec<String> = nodes
            .keys()
            .filter(|path| path.as_str() == name || path.starts_with(&prefix))
            .cloned()
            .collect();
        if moved.is_empty() {
            return Err(STATUS_OBJECT_NAME_NOT_FOUND);
        }
        for old in moved {
            if let Some(node) = nodes.remove(&old) {
                let renamed: String = format!("{}{}", new_name, &old[name.len()..]);
                nodes.insert(renamed, node);
            }
        }
        *desc.path.lock() = new_name.to_string();
        Ok(())
    }

    fn set_delete(&self, node: &Arc<MemNode>, desc: &MemDesc, name: &str, delete_file: bool) -> FsResult<()> {
        self.check_panic("SetDelete");
        if delete_file && node.is_dir && !self.children(name).is_empty() {
            return Err(STATUS_DIRECTORY_NOT_EMPTY);
        }
        desc.delete_pending.store(delete_file, Ordering::SeqCst);
        Ok(())
    }

    fn get_security(&self, node: &Arc<MemNode>, _desc: &MemDesc) -> FsResult<Vec<u8>> {
        self.check_panic("GetSecurity");
        Ok(node.security.lock().clone())
    }

    fn set_security(
        &self,
        node: &Arc<MemNode>,
        _desc: &MemDesc,
        sections: SecuritySections,
        modification: &[u8],
    ) -> FsResult<()> {
        self.check_panic("SetSecurity");
        if !sections.contains(SecuritySections::OWNER) {
            return Err(STATUS_ACCESS_DENIED);
        }
        *node.security.lock() = modification.to_vec();
        Ok(())
    }

    fn read_directory(
        &self,
        node: &Arc<MemNode>,
        desc: &MemDesc,
        _pattern: Option<&str>,
        marker: Option<&str>,
    ) -> FsResult<Vec<DirEntry>> {
        self.check_panic("ReadDirectory");
        if !node.is_dir {
            return Err(STATUS_NOT_A_DIRECTORY);
        }
        let dir: String = desc.path.lock().clone();
        Ok(self
            .children(&dir)
            .into_iter()
            .filter(|(name, _)| marker.map_or(true, |marker| name.as_str() > marker))
            .map(|(name, node)| DirEntry { name, info: node.info() })
            .collect())
    }

    fn get_dir_info_by_name(&self, node: &Arc<MemNode>, desc: &MemDesc, name: &str) -> FsResult<DirEntry> {
        self.check_panic("GetDirInfoByName");
        if !node.is_dir {
            return Err(STATUS_NOT_A_DIRECTORY);
        }
        let path: String = join(&desc.path.lock(), name);
        let child: Arc<MemNode> = self.lookup(&path)?;
        Ok(DirEntry {
            name: name.to_string(),
            info: child.info(),
        })
    }

    fn get_stream_info(&self, node: &Arc<MemNode>, _desc: &MemDesc) -> FsResult<Vec<StreamEntry>> {
        self.check_panic("GetStreamInfo");
        let info: FileInfo = node.info();
        Ok(vec![StreamEntry {
            name: String::new(),
            size: info.file_size,
            allocation_size: info.allocation_size,
        }])
    }

    fn resolve_reparse_points(
        &self,
        name: &str,
        reparse_point_index: u32,
        _resolve_last_path_component: bool,
    ) -> FsResult<ResolvedReparse> {
        self.check_panic("ResolveReparsePoints");
        let node: Arc<MemNode> = self.lookup(name)?;
        let data: Vec<u8> = node.reparse.lock().clone().ok_or(STATUS_NOT_A_REPARSE_POINT)?;
        Ok(ResolvedReparse {
            information: REPARSE_TAG_SYMLINK as usize + reparse_point_index as usize,
            data,
        })
    }

    fn get_reparse_point(&self, node: &Arc<MemNode>, _desc: &MemDesc, _name: &str) -> FsResult<Vec<u8>> {
        self.check_panic("GetReparsePoint");
        node.reparse.lock().clone().ok_or(STATUS_NOT_A_REPARSE_POINT)
    }

    fn set_reparse_point(&self, node: &Arc<MemNode>, _desc: &MemDesc, _name: &str, data: &[u8]) -> FsResult<()> {
        self.check_panic("SetReparsePoint");
        *node.reparse.lock() = Some(data.to_vec());
        Ok(())
    }

    fn delete_reparse_point(&self, node: &Arc<MemNode>, _desc: &MemDesc, _name: &str, _data: &[u8]) -> FsResult<()> {
        self.check_panic("DeleteReparsePoint");
        match node.reparse.lock().take() {
            Some(_) => Ok(()),
            None => Err(STATUS_NOT_A_REPARSE_POINT),
        }
    }

    /// Echoes the input reversed.
    fn control(
        &self,
        _node: &Arc<MemNode>,
        _desc: &MemDesc,
        _control_code: u32,
        input: &[u8],
        output: &mut [u8],
    ) -> FsResult<u32> {
        self.check_panic("Control");
        let count: usize = input.len().min(output.len());
        for (slot, byte) in output.iter_mut().zip(input.iter().rev()) {
            *slot = *byte;
        }
        Ok(count as u32)
    }
}
