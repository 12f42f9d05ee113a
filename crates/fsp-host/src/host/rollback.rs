//! Scoped undo of a partially completed mount.

use std::sync::Arc;

use crate::dispatcher::{detach, VolumeContext};
use crate::engine::{NativeEngine, NativeVolume};
use crate::filesystem::FileSystem;

/// Release everything a mounted volume holds.
///
/// Clears the open handles, frees the user context and deletes the native
/// volume. The dispatcher must already be stopped (or never started).
pub(crate) fn release_volume<F, E>(engine: &E, volume: NativeVolume, context: &VolumeContext<F>)
where
    F: FileSystem,
    E: NativeEngine,
{
    let dropped: usize = context.contexts.clear();
    if dropped > 0 {
        tracing::debug!("Dropped {} open handles at teardown", dropped);
    }

    // Dispatcher is down, so no entry can observe the user context
    unsafe { detach::<F>(volume.as_non_null()) };
    engine.delete_volume(volume);
}

/// Undoes a mount unless disarmed.
///
/// Armed as soon as the native volume exists; every early return from the
/// mount path after that point releases the volume.
pub(crate) struct MountRollback<'a, F: FileSystem, E: NativeEngine> {
    engine: &'a E,
    volume: NativeVolume,
    context: Arc<VolumeContext<F>>,
    armed: bool,
}

impl<'a, F: FileSystem, E: NativeEngine> MountRollback<'a, F, E> {
    pub(crate) fn new(engine: &'a E, volume: NativeVolume, context: Arc<VolumeContext<F>>) -> Self {
        Self {
            engine,
            volume,
            context,
            armed: true,
        }
    }

    /// Keep the volume; hand back its context.
    pub(crate) fn disarm(mut self) -> Arc<VolumeContext<F>> {
        self.armed = false;
        Arc::clone(&self.context)
    }
}

impl<F: FileSystem, E: NativeEngine> Drop for MountRollback<'_, F, E> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::warn!("Mount failed, releasing native volume {:?}", self.volume);
        release_volume(self.engine, self.volume, &self.context);
    }
}
