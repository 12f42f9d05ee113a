//! Operation dispatch table.
//!
//! The engine calls into the host through a table of `extern "C"` entry
//! points. One table is built per implementation type, leaked once, and
//! shared by every volume of that type. The per-volume state reaches the
//! entry points through the native volume's user context field.

mod callbacks;

use std::any::TypeId;
use std::collections::HashMap;
use std::ffi::c_void;
use std::ptr::NonNull;
use std::sync::{Arc, LazyLock};

use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::abi::{FileSystemInterface, FspFileSystem};
use crate::bridge::ContextTable;
use crate::filesystem::FileSystem;
use crate::options::GuardStrategy;

/// Process-wide registry of dispatch tables, keyed by implementation type.
static INTERFACES: LazyLock<Mutex<HashMap<TypeId, &'static FileSystemInterface>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Get the dispatch table for an implementation type.
///
/// Built on first use and never freed; later calls return the same table.
pub fn interface_for<F: FileSystem>() -> &'static FileSystemInterface {
    let mut interfaces = INTERFACES.lock();
    *interfaces
        .entry(TypeId::of::<F>())
        .or_insert_with(|| &*Box::leak(Box::new(build_interface::<F>())))
}

/// Fill every implemented slot with the adapter for `F`.
fn build_interface<F: FileSystem>() -> FileSystemInterface {
    FileSystemInterface {
        get_volume_info: Some(callbacks::get_volume_info::<F>),
        set_volume_label: Some(callbacks::set_volume_label::<F>),
        get_security_by_name: Some(callbacks::get_security_by_name::<F>),
        create: Some(callbacks::create::<F>),
        open: Some(callbacks::open::<F>),
        overwrite: Some(callbacks::overwrite::<F>),
        cleanup: Some(callbacks::cleanup::<F>),
        close: Some(callbacks::close::<F>),
        read: Some(callbacks::read::<F>),
        write: Some(callbacks::write::<F>),
        flush: Some(callbacks::flush::<F>),
        get_file_info: Some(callbacks::get_file_info::<F>),
        set_basic_info: Some(callbacks::set_basic_info::<F>),
        set_file_size: Some(callbacks::set_file_size::<F>),
        can_delete: None,
        rename: Some(callbacks::rename::<F>),
        get_security: Some(callbacks::get_security::<F>),
        set_security: Some(callbacks::set_security::<F>),
        read_directory: Some(callbacks::read_directory::<F>),
        resolve_reparse_points: Some(callbacks::resolve_reparse_points::<F>),
        get_reparse_point: Some(callbacks::get_reparse_point::<F>),
        set_reparse_point: Some(callbacks::set_reparse_point::<F>),
        delete_reparse_point: Some(callbacks::delete_reparse_point::<F>),
        get_stream_info: Some(callbacks::get_stream_info::<F>),
        get_dir_info_by_name: Some(callbacks::get_dir_info_by_name::<F>),
        control: Some(callbacks::control::<F>),
        set_delete: Some(callbacks::set_delete::<F>),
        ..FileSystemInterface::empty()
    }
}

// ============================================================================
// Operation guard
// ============================================================================

/// Serializes dispatch entries according to the volume's guard strategy.
///
/// Coarse entries take the exclusive side of the gate, fine entries the
/// shared side. Teardown takes the exclusive side to wait out every entry
/// still in flight.
pub struct OperationGuard {
    strategy: GuardStrategy,
    gate: RwLock<()>,
}

/// Held for the duration of one dispatch entry.
pub struct GuardTicket<'a> {
    _exclusive: Option<RwLockWriteGuard<'a, ()>>,
    _shared: Option<RwLockReadGuard<'a, ()>>,
}

impl OperationGuard {
    /// Create a guard with the given strategy.
    pub fn new(strategy: GuardStrategy) -> Self {
        Self {
            strategy,
            gate: RwLock::new(()),
        }
    }

    /// Strategy this guard enforces.
    pub fn strategy(&self) -> GuardStrategy {
        self.strategy
    }

    /// Enter a dispatch entry.
    pub fn enter(&self) -> GuardTicket<'_> {
        match self.strategy {
            GuardStrategy::Coarse => GuardTicket {
                _exclusive: Some(self.gate.write()),
                _shared: None,
            },
            GuardStrategy::Fine => GuardTicket {
                _exclusive: None,
                _shared: Some(self.gate.read()),
            },
        }
    }

    /// Wait until no dispatch entry is running and keep others out.
    pub fn drain(&self) -> RwLockWriteGuard<'_, ()> {
        self.gate.write()
    }
}

// ============================================================================
// Per-volume context
// ============================================================================

/// State reachable from every dispatch entry of one volume.
pub struct VolumeContext<F: FileSystem> {
    /// The implementation.
    pub fs: Arc<F>,
    /// Live open handles.
    pub contexts: ContextTable<F::FileNode, F::FileDesc>,
    /// Entry serialization.
    pub guard: OperationGuard,
}

impl<F: FileSystem> VolumeContext<F> {
    /// Create the context for a new volume.
    ///
    /// # Arguments
    /// * `fs` - Implementation shared with the host
    /// * `strategy` - Guard strategy selected at mount
    pub fn new(fs: Arc<F>, strategy: GuardStrategy) -> Self {
        Self {
            fs,
            contexts: ContextTable::new(),
            guard: OperationGuard::new(strategy),
        }
    }
}

/// Install a volume context as the native volume's user context.
///
/// The native volume holds one strong reference until [`detach`].
///
/// # Safety
/// `native` must point to a live volume object whose dispatch table is
/// [`interface_for::<F>()`](interface_for).
pub unsafe fn attach<F: FileSystem>(native: NonNull<FspFileSystem>, context: &Arc<VolumeContext<F>>) {
    let raw: *const VolumeContext<F> = Arc::into_raw(Arc::clone(context));
    (*native.as_ptr()).user_context = raw.cast_mut().cast::<c_void>();
}

/// Remove and release the user context installed by [`attach`].
///
/// Does nothing if no context is installed.
///
/// # Safety
/// `native` must point to a live volume object whose user context is null or
/// was set by `attach::<F>`. No dispatch entry may be running.
pub unsafe fn detach<F: FileSystem>(native: NonNull<FspFileSystem>) {
    let raw: *mut c_void = std::mem::replace(&mut (*native.as_ptr()).user_context, std::ptr::null_mut());
    if !raw.is_null() {
        drop(Arc::from_raw(raw.cast::<VolumeContext<F>>().cast_const()));
    }
}

/// Borrow the volume context of a native volume.
///
/// # Safety
/// Same contract as [`attach`]; the returned reference must not outlive the
/// attachment.
unsafe fn volume_of<'a, F: FileSystem>(native: *mut FspFileSystem) -> Option<&'a VolumeContext<F>> {
    if native.is_null() {
        return None;
    }
    (*native).user_context.cast::<VolumeContext<F>>().cast_const().as_ref()
}
