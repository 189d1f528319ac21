//! Engine handle → script instance association.
//!
//! The manager only holds weak references: it never keeps a script alive.
//! Natives entered from Lua resolve their owning instance through the handle
//! stored in the calling state, and fail with `InvalidInstance` once the
//! instance has started unloading.

use crate::engine::handle_of;
use crate::error::{BridgeError, Result};
use crate::instance::ScriptInstance;
use crate::sync::{DEFAULT_LOCK_TIMEOUT, TimedMutex};
use crate::types::EngineHandle;
use mlua::Lua;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

pub struct InstanceManager<T = ScriptInstance> {
    scripts: TimedMutex<HashMap<EngineHandle, Weak<T>>>,
}

impl<T> Default for InstanceManager<T> {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_LOCK_TIMEOUT)
    }
}

impl<T> InstanceManager<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager whose map lock gives up after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            scripts: TimedMutex::new(HashMap::new(), timeout, "instance manager"),
        }
    }

    /// Weak reference for `handle`; empty when the handle is unknown or the
    /// map is busy.
    pub fn get_script(&self, handle: EngineHandle) -> Weak<T> {
        self.scripts
            .lock()
            .ok()
            .and_then(|scripts| scripts.get(&handle).cloned())
            .unwrap_or_default()
    }

    /// Associate `handle` with `instance`.
    ///
    /// Re-registering the same instance is a no-op; a handle still owned by
    /// another live instance is rejected.
    pub fn set_script(&self, handle: EngineHandle, instance: Weak<T>) -> Result<()> {
        let mut scripts = self.scripts.lock()?;
        if let Some(existing) = scripts.get(&handle) {
            if !existing.ptr_eq(&instance) && existing.strong_count() > 0 {
                return Err(BridgeError::HandleConflict(handle.as_u64()));
            }
        }
        scripts.insert(handle, instance);
        Ok(())
    }

    /// Drop every handle that points at `instance`, plus dead entries.
    ///
    /// Returns how many entries pointed at `instance`. A busy map is left
    /// alone; its dead entries no longer resolve and are swept later.
    pub fn remove_script(&self, instance: &T) -> usize {
        let Ok(mut scripts) = self.scripts.lock() else {
            return 0;
        };
        let target: *const T = instance;
        let mut removed = 0;
        scripts.retain(|_, weak| {
            if std::ptr::eq(weak.as_ptr(), target) {
                removed += 1;
                return false;
            }
            weak.strong_count() > 0
        });
        removed
    }

    /// Resolve `handle` to a live instance.
    pub fn resolve(&self, handle: EngineHandle) -> Result<Arc<T>> {
        self.get_script(handle)
            .upgrade()
            .ok_or(BridgeError::InvalidInstance)
    }

    /// Resolve the instance owning the state a native was entered from.
    pub fn resolve_lua(&self, lua: &Lua) -> Result<Arc<T>> {
        let handle = handle_of(lua).ok_or(BridgeError::InvalidInstance)?;
        self.resolve(handle)
    }

    /// Number of registered handles.
    pub fn len(&self) -> usize {
        self.scripts.lock().map_or(0, |scripts| scripts.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
