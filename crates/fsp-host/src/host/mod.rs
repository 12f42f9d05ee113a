//! Volume lifecycle.
//!
//! [`FileSystemHost`] owns one implementation and at most one native volume
//! at a time. Mount and unmount are serialized on a lifecycle mutex. The
//! state mutex is only held for short reads and writes, never across an
//! implementation hook, so accessors stay callable from `init`, `mounted`
//! and `unmounted`. The current phase is readable without taking either.

mod rollback;

use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::bridge::guarded;
use crate::dispatcher::{attach, interface_for, VolumeContext};
use crate::engine::{DeviceKind, EngineVersion, NativeEngine, NativeVolume};
use crate::error::HostError;
use crate::filesystem::FileSystem;
use crate::options::{MountOptions, VolumeConfiguration};
use crate::status::FsResult;

use rollback::{release_volume, MountRollback};

/// Phase of a host's volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    Unmounted,
    Mounting,
    Mounted,
    Unmounting,
}

impl fmt::Display for MountState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name: &str = match self {
            MountState::Unmounted => "unmounted",
            MountState::Mounting => "mounting",
            MountState::Mounted => "mounted",
            MountState::Unmounting => "unmounting",
        };
        f.write_str(name)
    }
}

/// A live native volume and the state its dispatch entries reach.
struct MountedVolume<F: FileSystem> {
    volume: NativeVolume,
    context: Arc<VolumeContext<F>>,
}

struct HostState<F: FileSystem> {
    config: VolumeConfiguration,
    mounted: Option<MountedVolume<F>>,
}

/// Hosts a [`FileSystem`] implementation on a native dispatch engine.
///
/// The implementation is shared (`Arc<F>`) with every dispatch entry for as
/// long as a volume is mounted.
pub struct FileSystemHost<F: FileSystem, E: NativeEngine> {
    fs: Arc<F>,
    engine: E,
    lifecycle: Mutex<()>,
    state: Mutex<HostState<F>>,
    phase: RwLock<MountState>,
}

impl<F: FileSystem, E: NativeEngine> FileSystemHost<F, E> {
    /// Create an unmounted host with a default volume configuration.
    ///
    /// # Arguments
    /// * `fs` - Implementation (or an `Arc` already shared elsewhere)
    /// * `engine` - Native engine to mount on
    pub fn new(fs: impl Into<Arc<F>>, engine: E) -> Self {
        Self {
            fs: fs.into(),
            engine,
            lifecycle: Mutex::new(()),
            state: Mutex::new(HostState {
                config: VolumeConfiguration::default(),
                mounted: None,
            }),
            phase: RwLock::new(MountState::Unmounted),
        }
    }

    /// Create a host with an initial volume configuration.
    pub fn with_config(fs: impl Into<Arc<F>>, engine: E, config: VolumeConfiguration) -> Self {
        let host: Self = Self::new(fs, engine);
        host.state.lock().config = config;
        host
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    /// Change the volume configuration.
    ///
    /// # Returns
    /// The closure's result, or `ConfigurationFrozen` while a volume exists
    /// or a mount is in progress.
    pub fn configure<R>(&self, change: impl FnOnce(&mut VolumeConfiguration) -> R) -> Result<R, HostError> {
        let mut state: MutexGuard<'_, HostState<F>> = self.state.lock();
        if state.mounted.is_some() || *self.phase.read() != MountState::Unmounted {
            return Err(HostError::ConfigurationFrozen);
        }
        Ok(change(&mut state.config))
    }

    /// Copy of the current volume configuration.
    pub fn config(&self) -> VolumeConfiguration {
        self.state.lock().config.clone()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Check with the engine that a mount could succeed.
    ///
    /// # Arguments
    /// * `mount_point` - Requested mount point; `None` or empty for automatic
    pub fn preflight(&self, mount_point: Option<&str>) -> Result<(), HostError> {
        let device: DeviceKind = DeviceKind::for_prefix(&self.state.lock().config.prefix);
        let mount_point: Option<&str> = mount_point.filter(|point| !point.is_empty());
        self.engine
            .preflight(device, mount_point)
            .map_err(|status| HostError::status("preflight", status))
    }

    /// Mount the volume and start dispatching.
    ///
    /// # Arguments
    /// * `options` - Mount point, guard strategy and dispatcher settings
    ///
    /// # Returns
    /// Ok once the dispatcher runs. On error nothing native is left alive and
    /// the host is unmounted again.
    pub fn mount(&self, options: MountOptions) -> Result<(), HostError> {
        let _lifecycle: MutexGuard<'_, ()> = self.lifecycle.lock();
        let mut config: VolumeConfiguration = {
            let state: MutexGuard<'_, HostState<F>> = self.state.lock();
            if state.mounted.is_some() {
                return Err(HostError::AlreadyMounted);
            }
            state.config.clone()
        };
        let _phase: PhaseReset<'_> = PhaseReset::enter(&self.phase, MountState::Mounting);

        // Step 1: Let the implementation adjust the configuration
        let fs: &F = &self.fs;
        let init: FsResult<()> = guarded(fs, "Init", || fs.init(&mut config));
        self.state.lock().config = config.clone();
        init.map_err(|status| HostError::status("init", status))?;

        // Step 2: Create the native volume
        let device: DeviceKind = DeviceKind::for_prefix(&config.prefix);
        let volume: NativeVolume = self
            .engine
            .create_volume(device, &config.to_native_params(), interface_for::<F>())
            .map_err(|status| HostError::status("create_volume", status))?;

        // Step 3: Install the per-volume context; rolled back from here on
        let context: Arc<VolumeContext<F>> =
            Arc::new(VolumeContext::new(Arc::clone(&self.fs), options.guard_strategy()));
        let rollback: MountRollback<'_, F, E> = MountRollback::new(&self.engine, volume, Arc::clone(&context));
        unsafe { attach(volume.as_non_null(), &context) };
        tracing::debug!("Volume context installed with {:?} guard", context.guard.strategy());

        // Step 4: Debug log and mount point
        self.engine.set_debug_log(volume, options.debug_log.0);
        self.engine
            .set_mount_point(
                volume,
                options.requested_mount_point(),
                options.security_descriptor.as_deref(),
            )
            .map_err(|status| HostError::status("set_mount_point", status))?;
        let mount_point: Option<String> = self.engine.mount_point(volume);

        // Step 5: Notify the implementation
        guarded(fs, "Mounted", || fs.mounted(mount_point.as_deref()))
            .map_err(|status| HostError::status("mounted", status))?;

        // Step 6: Start dispatching
        if let Err(status) = self.engine.start_dispatcher(volume, options.thread_count) {
            let _ = guarded(fs, "Unmounted", || {
                fs.unmounted();
                Ok(())
            });
            return Err(HostError::status("start_dispatcher", status));
        }

        let context: Arc<VolumeContext<F>> = rollback.disarm();
        {
            let mut state: MutexGuard<'_, HostState<F>> = self.state.lock();
            state.mounted = Some(MountedVolume { volume, context });
            *self.phase.write() = MountState::Mounted;
        }

        tracing::info!(
            "File system mounted at {} on {}",
            mount_point.as_deref().unwrap_or("<none>"),
            device
        );
        Ok(())
    }

    /// Stop dispatching and release the volume.
    ///
    /// Waits for dispatch entries in flight. Does nothing when unmounted.
    pub fn unmount(&self) {
        let _lifecycle: MutexGuard<'_, ()> = self.lifecycle.lock();
        let mounted: MountedVolume<F> = {
            let mut state: MutexGuard<'_, HostState<F>> = self.state.lock();
            let Some(mounted) = state.mounted.take() else {
                return;
            };
            *self.phase.write() = MountState::Unmounting;
            mounted
        };

        self.engine.stop_dispatcher(mounted.volume);
        {
            let _drained = mounted.context.guard.drain();
            let fs: &F = &self.fs;
            let _ = guarded(fs, "Unmounted", || {
                fs.unmounted();
                Ok(())
            });
        }
        release_volume(&self.engine, mounted.volume, &mounted.context);

        *self.phase.write() = MountState::Unmounted;
        tracing::info!("File system unmounted");
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    /// Mount point assigned by the engine, while mounted.
    pub fn mount_point(&self) -> Option<String> {
        let state: MutexGuard<'_, HostState<F>> = self.state.lock();
        state
            .mounted
            .as_ref()
            .and_then(|mounted| self.engine.mount_point(mounted.volume))
    }

    /// True while a volume is mounted.
    pub fn is_mounted(&self) -> bool {
        *self.phase.read() == MountState::Mounted
    }

    /// Current lifecycle phase.
    pub fn state(&self) -> MountState {
        *self.phase.read()
    }

    /// The hosted implementation.
    pub fn file_system(&self) -> &Arc<F> {
        &self.fs
    }

    /// The native engine.
    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Native volume handle, while mounted.
    pub fn native_volume(&self) -> Option<NativeVolume> {
        self.state.lock().mounted.as_ref().map(|mounted| mounted.volume)
    }

    /// Number of open handles on the mounted volume.
    pub fn open_handles(&self) -> usize {
        self.state
            .lock()
            .mounted
            .as_ref()
            .map_or(0, |mounted| mounted.context.contexts.live_count())
    }

    /// Installed engine version.
    pub fn version() -> Result<EngineVersion, HostError> {
        E::version().map_err(|status| HostError::status("version", status))
    }

    /// Direct engine debug output to a file.
    pub fn set_debug_log_file(path: &str) -> Result<(), HostError> {
        E::set_debug_log_file(path).map_err(|status| HostError::status("set_debug_log_file", status))
    }
}

impl<F: FileSystem, E: NativeEngine> Drop for FileSystemHost<F, E> {
    fn drop(&mut self) {
        let Some(mounted) = self.state.get_mut().mounted.take() else {
            return;
        };
        tracing::warn!("File system host dropped while mounted, tearing down");

        self.engine.stop_dispatcher(mounted.volume);
        drop(mounted.context.guard.drain());
        release_volume(&self.engine, mounted.volume, &mounted.context);
        *self.phase.get_mut() = MountState::Unmounted;
    }
}

/// Sets a phase and restores `Unmounted` on drop unless the phase moved on.
struct PhaseReset<'a> {
    phase: &'a RwLock<MountState>,
    during: MountState,
}

impl<'a> PhaseReset<'a> {
    fn enter(phase: &'a RwLock<MountState>, during: MountState) -> Self {
        *phase.write() = during;
        Self { phase, during }
    }
}

impl Drop for PhaseReset<'_> {
    fn drop(&mut self) {
        let mut phase = self.phase.write();
        if *phase == self.during {
            *phase = MountState::Unmounted;
        }
    }
}
