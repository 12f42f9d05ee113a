//! Sendable wrapper for the native volume handle.
//!
//! The engine allows volume operations from any thread, so the host keeps
//! the handle in a Send + Sync wrapper.

use std::ptr::NonNull;

use crate::abi::FspFileSystem;

/// Native volume handle that is Send + Sync.
///
/// # Safety
///
/// The engine owns the volume object and serializes its own access to it;
/// the host only touches the user context field while no dispatch entry can
/// run (before the dispatcher starts and after it stops).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NativeVolume(NonNull<FspFileSystem>);

unsafe impl Send for NativeVolume {}

unsafe impl Sync for NativeVolume {}

impl NativeVolume {
    /// Wrap a volume object returned by the engine.
    ///
    /// # Arguments
    /// * `volume` - Engine-owned volume object
    ///
    /// # Safety
    /// Caller must ensure the object stays valid until the engine deletes it.
    pub unsafe fn new(volume: NonNull<FspFileSystem>) -> Self {
        Self(volume)
    }

    /// Get the inner pointer.
    pub fn as_ptr(&self) -> *mut FspFileSystem {
        self.0.as_ptr()
    }

    /// Get the inner non-null pointer.
    pub fn as_non_null(&self) -> NonNull<FspFileSystem> {
        self.0
    }
}
