//! Thread identity to context registry.
//!
//! The map is the only state more than one thread mutates. Its write lock
//! guards every structural edit together with the counter program/cleanup
//! calls that ride on the 0 -> 1 and 1 -> 0 transitions. Per-event lookups only
//! take the read lock, and per-context statistics are never touched under it.

use crate::context::{Context, ContextSpec};
use crate::counters::CounterService;
use crate::errors::Result;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::thread::ThreadId;

/// Shared handle to one thread's context. Only its owning thread locks it, so
/// the lock is uncontended.
pub type ContextHandle = Arc<Mutex<Context>>;

pub struct Registry {
    contexts: RwLock<HashMap<ThreadId, ContextHandle>>,
    counters: Arc<CounterService>,
    library_origin: String,
}

impl Registry {
    pub fn new(counters: Arc<CounterService>, library_origin: impl Into<String>) -> Self {
        Self {
            contexts: RwLock::new(HashMap::new()),
            counters,
            library_origin: library_origin.into(),
        }
    }

    pub fn counters(&self) -> &Arc<CounterService> {
        &self.counters
    }

    /// Whether `origin` is the library source that is never instrumented.
    pub fn is_library_origin(&self, origin: &str) -> bool {
        !self.library_origin.is_empty()
            && (origin == self.library_origin
                || std::path::Path::new(origin)
                    .file_name()
                    .map_or(false, |name| name == self.library_origin.as_str()))
    }

    /// Context of `thread`, created from `spec` if it has none yet.
    ///
    /// Returns `Ok(None)` for the library origin. Creating the first context
    /// programs the counter subsystem; a programming failure is returned as a
    /// fatal error and no context is created.
    pub fn acquire(&self, thread: ThreadId, spec: ContextSpec) -> Result<Option<ContextHandle>> {
        if self.is_library_origin(&spec.program) {
            return Ok(None);
        }

        if let Some(handle) = self.get(thread) {
            return Ok(Some(handle));
        }

        let mut contexts = self.contexts.write();
        if let Some(handle) = contexts.get(&thread) {
            return Ok(Some(Arc::clone(handle)));
        }

        // Programs the subsystem when this is the first context
        self.counters.retain()?;

        log::debug!(
            "Creating profile context for {:?}: {}:{} ({} lanes, flags {:#x})",
            thread,
            spec.program,
            spec.line,
            spec.lane_width,
            spec.flags.bits()
        );
        let handle = Arc::new(Mutex::new(Context::new(thread, spec)));
        contexts.insert(thread, Arc::clone(&handle));
        Ok(Some(handle))
    }

    /// Context of `thread` without creating one.
    pub fn get(&self, thread: ThreadId) -> Option<ContextHandle> {
        self.contexts.read().get(&thread).cloned()
    }

    /// Remove and return the context of `thread`.
    ///
    /// `None` when the thread has no context, so duplicate completion calls are
    /// harmless. Removing the last context tears the counter subsystem down.
    pub fn finalize(&self, thread: ThreadId) -> Option<Context> {
        let handle = {
            let mut contexts = self.contexts.write();
            let handle = contexts.remove(&thread)?;
            self.counters.release();
            handle
        };

        let context = match Arc::try_unwrap(handle) {
            Ok(mutex) => mutex.into_inner(),
            Err(shared) => shared.lock().detach(),
        };
        Some(context)
    }

    pub fn active_count(&self) -> usize {
        self.contexts.read().len()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("active", &self.active_count())
            .field("library_origin", &self.library_origin)
            .finish()
    }
}
