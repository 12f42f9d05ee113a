//! Volume configuration and mount options.

use std::time::SystemTime;

use bitflags::bitflags;

use crate::abi::{FspVolumeParams, FILE_SYSTEM_NAME_CAPACITY, VOLUME_PREFIX_CAPACITY};
use crate::util::systemtime_to_filetime;
use crate::util::wstr::encode_truncated;

bitflags! {
    /// Volume capability flags understood by the engine.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VolumeFlags: u32 {
        const CASE_SENSITIVE_SEARCH = 0x0000_0001;
        const CASE_PRESERVED_NAMES = 0x0000_0002;
        const UNICODE_ON_DISK = 0x0000_0004;
        const PERSISTENT_ACLS = 0x0000_0008;
        const REPARSE_POINTS = 0x0000_0010;
        const REPARSE_POINTS_ACCESS_CHECK = 0x0000_0020;
        const NAMED_STREAMS = 0x0000_0040;
        const READ_ONLY_VOLUME = 0x0000_0200;
        const POST_CLEANUP_WHEN_MODIFIED_ONLY = 0x0000_0400;
        const PASS_QUERY_DIRECTORY_PATTERN = 0x0000_0800;
        const ALWAYS_USE_DOUBLE_BUFFERING = 0x0000_1000;
        const PASS_QUERY_DIRECTORY_FILE_NAME = 0x0000_2000;
        const FLUSH_AND_PURGE_ON_CLEANUP = 0x0000_4000;
        const DEVICE_CONTROL = 0x0000_8000;
        const UM_FILE_CONTEXT_IS_USER_CONTEXT2 = 0x0001_0000;
        const UM_FILE_CONTEXT_IS_FULL_CONTEXT = 0x0002_0000;
    }
}

/// Parameters of the volume presented to the engine.
///
/// Mutable until the native volume is created, then frozen by the host.
#[derive(Debug, Clone)]
pub struct VolumeConfiguration {
    /// Sector size in bytes.
    pub sector_size: u16,

    /// Sectors per allocation unit.
    pub sectors_per_allocation_unit: u16,

    /// Maximum length of a path component in UTF-16 units.
    pub max_component_length: u16,

    /// Volume creation time (FILETIME).
    pub volume_creation_time: u64,

    /// Volume serial number.
    pub volume_serial_number: u32,

    /// Kernel-side metadata caching timeout in milliseconds.
    pub file_info_timeout: u32,

    /// Capability flags.
    pub flags: VolumeFlags,

    /// Network prefix (`\server\share`), empty for a disk volume.
    pub prefix: String,

    /// File system display name.
    pub file_system_name: String,
}

impl Default for VolumeConfiguration {
    fn default() -> Self {
        Self {
            sector_size: 0,
            sectors_per_allocation_unit: 0,
            max_component_length: 0,
            volume_creation_time: 0,
            volume_serial_number: 0,
            file_info_timeout: 0,
            flags: VolumeFlags::UM_FILE_CONTEXT_IS_FULL_CONTEXT,
            prefix: String::new(),
            file_system_name: String::new(),
        }
    }
}

impl VolumeConfiguration {
    /// Create a configuration with engine defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set sector geometry.
    ///
    /// # Arguments
    /// * `sector_size` - Sector size in bytes
    /// * `sectors_per_allocation_unit` - Sectors per allocation unit
    pub fn with_sectors(mut self, sector_size: u16, sectors_per_allocation_unit: u16) -> Self {
        self.sector_size = sector_size;
        self.sectors_per_allocation_unit = sectors_per_allocation_unit;
        self
    }

    /// Set maximum component length.
    ///
    /// # Arguments
    /// * `length` - Maximum path component length in UTF-16 units
    pub fn with_max_component_length(mut self, length: u16) -> Self {
        self.max_component_length = length;
        self
    }

    /// Set volume creation time.
    ///
    /// # Arguments
    /// * `time` - Creation time
    pub fn with_creation_time(mut self, time: SystemTime) -> Self {
        self.volume_creation_time = systemtime_to_filetime(time);
        self
    }

    /// Set volume serial number.
    ///
    /// # Arguments
    /// * `serial` - Serial number
    pub fn with_serial_number(mut self, serial: u32) -> Self {
        self.volume_serial_number = serial;
        self
    }

    /// Set file info timeout.
    ///
    /// # Arguments
    /// * `millis` - Timeout in milliseconds
    pub fn with_file_info_timeout(mut self, millis: u32) -> Self {
        self.file_info_timeout = millis;
        self
    }

    /// Enable or disable capability flags.
    ///
    /// # Arguments
    /// * `flags` - Flags to change
    /// * `enabled` - Whether to set or clear them
    pub fn with_flags(mut self, flags: VolumeFlags, enabled: bool) -> Self {
        self.set_flags(flags, enabled);
        self
    }

    /// Set network prefix.
    ///
    /// # Arguments
    /// * `prefix` - `\server\share` prefix, empty for a disk volume
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set file system display name.
    ///
    /// # Arguments
    /// * `name` - Display name
    pub fn with_file_system_name(mut self, name: impl Into<String>) -> Self {
        self.file_system_name = name.into();
        self
    }

    /// Enable or disable capability flags in place.
    ///
    /// The full-context file mode is owned by the host and cannot be cleared.
    pub fn set_flags(&mut self, flags: VolumeFlags, enabled: bool) {
        self.flags.set(flags, enabled);
        self.flags |= VolumeFlags::UM_FILE_CONTEXT_IS_FULL_CONTEXT;
    }

    /// Check whether every given flag is set.
    pub fn has_flags(&self, flags: VolumeFlags) -> bool {
        self.flags.contains(flags)
    }

    /// True when the volume is exposed through a network prefix.
    pub fn is_network(&self) -> bool {
        !self.prefix.is_empty()
    }

    /// Build the native volume parameter record.
    ///
    /// Prefix and file system name are truncated to their fixed capacities,
    /// leaving room for a terminator.
    ///
    /// # Returns
    /// The record passed to volume creation.
    pub fn to_native_params(&self) -> FspVolumeParams {
        let mut params: FspVolumeParams = FspVolumeParams {
            sector_size: self.sector_size,
            sectors_per_allocation_unit: self.sectors_per_allocation_unit,
            max_component_length: self.max_component_length,
            volume_creation_time: self.volume_creation_time,
            volume_serial_number: self.volume_serial_number,
            file_info_timeout: self.file_info_timeout,
            flags: (self.flags | VolumeFlags::UM_FILE_CONTEXT_IS_FULL_CONTEXT).bits(),
            ..FspVolumeParams::default()
        };

        encode_truncated(&self.prefix, &mut params.prefix[..VOLUME_PREFIX_CAPACITY - 1]);
        encode_truncated(
            &self.file_system_name,
            &mut params.file_system_name[..FILE_SYSTEM_NAME_CAPACITY - 1],
        );
        params
    }
}

/// Engine debug log mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebugLog(pub u32);

impl DebugLog {
    /// Logging disabled.
    pub const OFF: DebugLog = DebugLog(0);
    /// Every request class logged.
    pub const ALL: DebugLog = DebugLog(u32::MAX);
}

/// How dispatch entries are serialized against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardStrategy {
    /// One call at a time per volume.
    Coarse,
    /// Calls overlap; the implementation synchronizes itself.
    Fine,
}

impl GuardStrategy {
    /// Strategy for the `synchronized` mount option.
    pub fn from_synchronized(synchronized: bool) -> Self {
        if synchronized {
            GuardStrategy::Coarse
        } else {
            GuardStrategy::Fine
        }
    }
}

/// Options for a single mount.
#[derive(Debug, Clone, Default)]
pub struct MountOptions {
    /// Drive letter or directory. `None` or empty picks a free drive letter.
    pub mount_point: Option<String>,

    /// Self-relative security descriptor for the mount point directory.
    pub security_descriptor: Option<Vec<u8>>,

    /// Serialize every dispatch entry.
    pub synchronized: bool,

    /// Engine debug log mask.
    pub debug_log: DebugLog,

    /// Dispatcher thread count (0 = let the engine decide).
    pub thread_count: u32,
}

impl MountOptions {
    /// Create options that mount at the given point.
    ///
    /// # Arguments
    /// * `mount_point` - Drive letter (`X:`) or directory path
    pub fn at(mount_point: impl Into<String>) -> Self {
        Self {
            mount_point: Some(mount_point.into()),
            ..Default::default()
        }
    }

    /// Set the mount point security descriptor.
    pub fn with_security_descriptor(mut self, descriptor: Vec<u8>) -> Self {
        self.security_descriptor = Some(descriptor);
        self
    }

    /// Serialize dispatch entries.
    pub fn with_synchronized(mut self, synchronized: bool) -> Self {
        self.synchronized = synchronized;
        self
    }

    /// Set the engine debug log mask.
    pub fn with_debug_log(mut self, debug_log: DebugLog) -> Self {
        self.debug_log = debug_log;
        self
    }

    /// Set the dispatcher thread count.
    pub fn with_thread_count(mut self, count: u32) -> Self {
        self.thread_count = count;
        self
    }

    /// Mount point, with empty treated as unspecified.
    pub fn requested_mount_point(&self) -> Option<&str> {
        self.mount_point.as_deref().filter(|point| !point.is_empty())
    }

    /// Guard strategy selected by these options.
    pub fn guard_strategy(&self) -> GuardStrategy {
        GuardStrategy::from_synchronized(self.synchronized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_context_always_set() {
        let mut config: VolumeConfiguration = VolumeConfiguration::new();
        assert!(config.has_flags(VolumeFlags::UM_FILE_CONTEXT_IS_FULL_CONTEXT));

        config.set_flags(VolumeFlags::all(), false);
        assert_eq!(config.flags, VolumeFlags::UM_FILE_CONTEXT_IS_FULL_CONTEXT);
    }

    #[test]
    fn test_flags_clear() {
        let config: VolumeConfiguration = VolumeConfiguration::new()
            .with_flags(VolumeFlags::CASE_PRESERVED_NAMES | VolumeFlags::NAMED_STREAMS, true)
            .with_flags(VolumeFlags::NAMED_STREAMS, false);

        assert!(config.has_flags(VolumeFlags::CASE_PRESERVED_NAMES));
        assert!(!config.has_flags(VolumeFlags::NAMED_STREAMS));
    }

    #[test]
    fn test_native_params() {
        let config: VolumeConfiguration = VolumeConfiguration::new()
            .with_sectors(512, 1)
            .with_max_component_length(255)
            .with_serial_number(0xDEAD_BEEF)
            .with_file_info_timeout(1000)
            .with_flags(VolumeFlags::CASE_PRESERVED_NAMES, true)
            .with_prefix("\\memfs\\share")
            .with_file_system_name("MEMFS");

        let params: FspVolumeParams = config.to_native_params();
        assert_eq!(params.sector_size, 512);
        assert_eq!(params.sectors_per_allocation_unit, 1);
        assert_eq!(params.max_component_length, 255);
        assert_eq!(params.volume_serial_number, 0xDEAD_BEEF);
        assert_eq!(params.file_info_timeout, 1000);
        assert_eq!(params.flags, 0x2 | 0x20000);

        let prefix_len: usize = params.prefix.iter().position(|&c| c == 0).unwrap();
        assert_eq!(String::from_utf16(&params.prefix[..prefix_len]).unwrap(), "\\memfs\\share");
        let name_len: usize = params.file_system_name.iter().position(|&c| c == 0).unwrap();
        assert_eq!(String::from_utf16(&params.file_system_name[..name_len]).unwrap(), "MEMFS");
        assert!(config.is_network());
    }

    #[test]
    fn test_native_params_truncate_names() {
        let config: VolumeConfiguration = VolumeConfiguration::new()
            .with_file_system_name("A-VERY-LONG-FILE-SYSTEM-NAME")
            .with_prefix("x".repeat(400));

        let params: FspVolumeParams = config.to_native_params();
        assert_eq!(params.file_system_name[FILE_SYSTEM_NAME_CAPACITY - 1], 0);
        assert_eq!(params.file_system_name[14], u16::from(b'L'));
        assert_eq!(params.prefix[VOLUME_PREFIX_CAPACITY - 1], 0);
        assert_eq!(params.prefix[VOLUME_PREFIX_CAPACITY - 2], u16::from(b'x'));
    }

    #[test]
    fn test_mount_options() {
        let options: MountOptions = MountOptions::default();
        assert_eq!(options.requested_mount_point(), None);
        assert_eq!(options.guard_strategy(), GuardStrategy::Fine);

        let options: MountOptions = MountOptions::at("").with_synchronized(true);
        assert_eq!(options.requested_mount_point(), None);
        assert_eq!(options.guard_strategy(), GuardStrategy::Coarse);

        let options: MountOptions = MountOptions::at("M:").with_debug_log(DebugLog::ALL);
        assert_eq!(options.requested_mount_point(), Some("M:"));
        assert_eq!(options.debug_log.0, u32::MAX);
    }
}
