//! The native dispatch engine as seen by the host.
//!
//! The engine owns request queueing, the worker pool and the volume object.
//! The host consumes it through [`NativeEngine`]; [`LoopbackEngine`] is an
//! in-process implementation that drives the dispatch table directly.

mod loopback;
mod sendable;

pub use loopback::{
    LoopbackClient, LoopbackEngine, LoopbackStage, LoopbackVolume, OpenReply, SizeRequest, SizedReply,
    LOOPBACK_VERSION,
};
pub use sendable::NativeVolume;

use std::fmt;

use crate::abi::{FileSystemInterface, FspVolumeParams};
use crate::status::FsResult;

/// Control device a volume is created on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceKind {
    /// Local disk volume.
    Disk,
    /// Network volume reached through a `\server\share` prefix.
    Net,
}

impl DeviceKind {
    /// Pick the device for a volume prefix: disk when empty, network otherwise.
    pub fn for_prefix(prefix: &str) -> Self {
        if prefix.is_empty() {
            DeviceKind::Disk
        } else {
            DeviceKind::Net
        }
    }

    /// Name of the engine's control device.
    pub fn device_name(self) -> &'static str {
        match self {
            DeviceKind::Disk => "WinFsp.Disk",
            DeviceKind::Net => "WinFsp.Net",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.device_name())
    }
}

/// Engine version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EngineVersion {
    pub major: u16,
    pub minor: u16,
}

impl EngineVersion {
    /// Decode the packed `major << 16 | minor` form.
    pub fn from_packed(packed: u32) -> Self {
        Self {
            major: (packed >> 16) as u16,
            minor: (packed & 0xFFFF) as u16,
        }
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Native engine operations consumed by the host.
///
/// Failures are reported as native statuses; the host wraps them with the
/// step that failed.
pub trait NativeEngine: Send + Sync {
    /// Check that a volume could be mounted, without creating one.
    fn preflight(&self, device: DeviceKind, mount_point: Option<&str>) -> FsResult<()>;

    /// Create a volume that dispatches through `interface`.
    ///
    /// The volume's user context starts out null.
    fn create_volume(
        &self,
        device: DeviceKind,
        params: &FspVolumeParams,
        interface: &'static FileSystemInterface,
    ) -> FsResult<NativeVolume>;

    /// Set the engine debug log mask for a volume.
    fn set_debug_log(&self, volume: NativeVolume, mask: u32);

    /// Assign the mount point. `None` picks the next free drive letter.
    fn set_mount_point(
        &self,
        volume: NativeVolume,
        mount_point: Option<&str>,
        security_descriptor: Option<&[u8]>,
    ) -> FsResult<()>;

    /// Mount point currently assigned to a volume.
    fn mount_point(&self, volume: NativeVolume) -> Option<String>;

    /// Start dispatching requests. 0 threads lets the engine decide.
    fn start_dispatcher(&self, volume: NativeVolume, thread_count: u32) -> FsResult<()>;

    /// Stop dispatching; returns once no dispatch entry is running.
    fn stop_dispatcher(&self, volume: NativeVolume);

    /// Delete a volume, removing its mount point.
    fn delete_volume(&self, volume: NativeVolume);

    /// Version of the installed engine.
    fn version() -> FsResult<EngineVersion>
    where
        Self: Sized;

    /// Direct engine debug output to a file.
    fn set_debug_log_file(path: &str) -> FsResult<()>
    where
        Self: Sized;
}

/// Find the highest free drive letter, searching down from `Z:` to `D:`.
///
/// # Arguments
/// * `is_taken` - Whether a letter is in use
///
/// # Returns
/// Mount point such as `"Z:"`, or `None` if every letter is taken.
pub fn next_free_drive_letter(is_taken: impl Fn(char) -> bool) -> Option<String> {
    ('D'..='Z')
        .rev()
        .find(|letter| !is_taken(*letter))
        .map(|letter| format!("{}:", letter))
}

/// Drive letter of a mount point like `"X:"`, if it is one.
pub fn drive_letter_of(mount_point: &str) -> Option<char> {
    let mut chars = mount_point.chars();
    match (chars.next(), chars.next(), chars.next()) {
        (Some(letter), Some(':'), None) if letter.is_ascii_alphabetic() => {
            Some(letter.to_ascii_uppercase())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_for_prefix() {
        assert_eq!(DeviceKind::for_prefix(""), DeviceKind::Disk);
        assert_eq!(DeviceKind::for_prefix("\\memfs\\share"), DeviceKind::Net);
        assert_eq!(DeviceKind::Disk.device_name(), "WinFsp.Disk");
        assert_eq!(DeviceKind::Net.to_string(), "WinFsp.Net");
    }

    #[test]
    fn test_next_free_drive_letter() {
        assert_eq!(next_free_drive_letter(|_| false).as_deref(), Some("Z:"));
        assert_eq!(
            next_free_drive_letter(|l| l == 'Z' || l == 'Y').as_deref(),
            Some("X:")
        );
        assert_eq!(next_free_drive_letter(|_| true), None);
        // A, B and C are never handed out
        assert_eq!(next_free_drive_letter(|l| l >= 'D'), None);
    }

    #[test]
    fn test_drive_letter_of() {
        assert_eq!(drive_letter_of("m:"), Some('M'));
        assert_eq!(drive_letter_of("Z:"), Some('Z'));
        assert_eq!(drive_letter_of("C:\\mnt"), None);
        assert_eq!(drive_letter_of("1:"), None);
    }

    #[test]
    fn test_engine_version() {
        let version: EngineVersion = EngineVersion::from_packed(0x0002_0001);
        assert_eq!(version, EngineVersion { major: 2, minor: 1 });
        assert_eq!(version.to_string(), "2.1");
    }
}
