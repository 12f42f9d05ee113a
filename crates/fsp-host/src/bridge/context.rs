//! Per-open context registry.
//!
//! Maps the fixed-width [`FullContext`] stored by the engine with each open
//! handle to the implementation's (node, descriptor) pair. Uses DashMap so
//! resolves on distinct handles never contend on a table-wide lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::abi::FullContext;
use crate::error::ContextError;

/// Source of per-volume tags. Shared across every registry in the process
/// so a context minted by one volume is never accepted by another.
static NEXT_VOLUME_TAG: AtomicU64 = AtomicU64::new(1);

/// The state bound to one open handle.
#[derive(Debug)]
pub struct OpenFile<N, D> {
    pub node: N,
    pub desc: D,
}

/// Registry of live open handles for one volume.
pub struct ContextTable<N, D> {
    /// Key → bound state.
    entries: DashMap<u64, Arc<OpenFile<N, D>>>,
    /// Next key to hand out. Keys are never reused.
    next_key: AtomicU64,
    /// Tag written into every context this table mints.
    volume_tag: u64,
}

impl<N, D> ContextTable<N, D> {
    /// Create an empty registry with a fresh volume tag.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_key: AtomicU64::new(1), // 0 means unbound
            volume_tag: NEXT_VOLUME_TAG.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Tag identifying contexts minted by this registry.
    pub fn volume_tag(&self) -> u64 {
        self.volume_tag
    }

    /// Bind a (node, descriptor) pair into a native context.
    ///
    /// # Arguments
    /// * `context` - Native context, must be unbound
    /// * `node` - File node
    /// * `desc` - Open descriptor
    ///
    /// # Returns
    /// `AlreadyBound` if the context already carries a binding; the pair is
    /// dropped in that case.
    pub fn bind(&self, context: &mut FullContext, node: N, desc: D) -> Result<(), ContextError> {
        if !context.is_null() {
            return Err(ContextError::AlreadyBound(context.user_context));
        }

        let key: u64 = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(key, Arc::new(OpenFile { node, desc }));

        context.user_context = key;
        context.user_context2 = self.volume_tag;
        Ok(())
    }

    /// Look up the state behind a native context.
    ///
    /// # Arguments
    /// * `context` - Native context handed back by the engine
    ///
    /// # Returns
    /// The bound state, shared with the registry.
    pub fn resolve(&self, context: &FullContext) -> Result<Arc<OpenFile<N, D>>, ContextError> {
        let key: u64 = self.check(context)?;
        self.entries
            .get(&key)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(ContextError::Stale(key))
    }

    /// Remove the binding and zero the native context.
    ///
    /// # Arguments
    /// * `context` - Native context to release
    ///
    /// # Returns
    /// The released state. Callers holding a resolved `Arc` keep it alive
    /// until they drop it.
    pub fn release(&self, context: &mut FullContext) -> Result<Arc<OpenFile<N, D>>, ContextError> {
        let key: u64 = self.check(context)?;
        let (_, open_file) = self.entries.remove(&key).ok_or(ContextError::Stale(key))?;
        *context = FullContext::NULL;
        Ok(open_file)
    }

    /// Drop every live binding.
    ///
    /// # Returns
    /// Number of bindings dropped.
    pub fn clear(&self) -> usize {
        let count: usize = self.entries.len();
        self.entries.clear();
        count
    }

    /// Number of live bindings.
    pub fn live_count(&self) -> usize {
        self.entries.len()
    }

    /// Validate the volume tag and extract the key.
    fn check(&self, context: &FullContext) -> Result<u64, ContextError> {
        if context.is_null() {
            return Err(ContextError::Unbound);
        }
        if context.user_context2 != self.volume_tag {
            return Err(ContextError::ForeignVolume {
                expected: self.volume_tag,
                found: context.user_context2,
            });
        }
        Ok(context.user_context)
    }
}

impl<N, D> Default for ContextTable<N, D> {
    fn default() -> Self {
        Self::new()
    }
}
