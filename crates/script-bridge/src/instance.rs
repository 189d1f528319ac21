//! Script instance lifecycle.
//!
//! A `ScriptInstance` owns one engine for one script file and moves through
//! `unloaded → loading → loaded → unloaded`. Reload is an unload followed by
//! a load; between the two the instance is fully unloaded and concurrent
//! dispatch observes `NotFound`.
//!
//! All access to the engine is serialized through a per-instance reentrant
//! lock acquired with a bounded wait. Reentrancy lets a script that calls
//! into the host be called back on the same thread; unloading while the
//! engine is executing on the current thread fails instead of tearing the
//! state down underneath the running script.

use crate::bridge::BridgeContext;
use crate::engine::Engine;
use crate::error::{BridgeError, LoadStage, Result};
use crate::natives;
use crate::types::{EngineHandle, PluginId};
use mlua::{Lua, MultiValue};
use parking_lot::{Mutex, ReentrantMutex, ReentrantMutexGuard};
use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

/// Lifecycle state of a script instance.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InstanceState {
    /// No engine; initial and terminal state.
    Unloaded,
    /// Engine created, top-level code running.
    Loading,
    /// Top-level code finished; registrations are live.
    Loaded,
}

impl InstanceState {
    pub fn label(self) -> &'static str {
        match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
        }
    }
}

type EngineSlot = ReentrantMutex<RefCell<Option<Engine>>>;
type EngineGuard<'a> = ReentrantMutexGuard<'a, RefCell<Option<Engine>>>;

pub struct ScriptInstance {
    plugin_id: PluginId,
    alias: String,
    base_path: PathBuf,
    script: PathBuf,
    ctx: Arc<BridgeContext>,
    self_ref: Weak<ScriptInstance>,
    state: Mutex<InstanceState>,
    last_error: Mutex<Option<String>>,
    engine: EngineSlot,
}

impl std::fmt::Debug for ScriptInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptInstance")
            .field("plugin_id", &self.plugin_id)
            .field("alias", &self.alias)
            .field("script", &self.script)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ScriptInstance {
    /// Create an unloaded instance for `script`.
    pub fn create(
        ctx: Arc<BridgeContext>,
        plugin_id: PluginId,
        alias: impl Into<String>,
        base_path: impl Into<PathBuf>,
        script: impl Into<PathBuf>,
    ) -> Arc<Self> {
        let alias = alias.into();
        let base_path = base_path.into();
        let script = script.into();
        Arc::new_cyclic(|self_ref| Self {
            plugin_id,
            alias,
            base_path,
            script,
            ctx,
            self_ref: self_ref.clone(),
            state: Mutex::new(InstanceState::Unloaded),
            last_error: Mutex::new(None),
            engine: ReentrantMutex::new(RefCell::new(None)),
        })
    }

    pub fn plugin_id(&self) -> PluginId {
        self.plugin_id
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn script(&self) -> &Path {
        &self.script
    }

    pub(crate) fn context(&self) -> &Arc<BridgeContext> {
        &self.ctx
    }

    pub(crate) fn weak(&self) -> Weak<ScriptInstance> {
        self.self_ref.clone()
    }

    pub fn state(&self) -> InstanceState {
        *self.state.lock()
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == InstanceState::Loaded
    }

    /// Message of the most recent failed load, cleared by a successful one.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// Handle of the current engine, if one exists.
    pub fn handle(&self) -> Option<EngineHandle> {
        let guard = self.engine.try_lock_for(self.ctx.config.lock_timeout())?;
        let slot = guard.try_borrow().ok()?;
        slot.as_ref().map(Engine::handle)
    }

    /// Heap size of the engine in bytes; `None` when unloaded or busy.
    pub fn used_memory(&self) -> Option<usize> {
        let guard = self.engine.try_lock_for(self.ctx.config.lock_timeout())?;
        let slot = guard.try_borrow().ok()?;
        slot.as_ref().map(Engine::used_memory)
    }

    /// `package.path` entries contributed by this instance.
    pub fn search_paths(&self) -> Vec<PathBuf> {
        self.ctx
            .config
            .search_paths
            .iter()
            .map(|pattern| self.base_path.join(pattern))
            .collect()
    }

    fn set_state(&self, next: InstanceState) {
        *self.state.lock() = next;
    }

    fn set_last_error(&self, message: Option<String>) {
        *self.last_error.lock() = message;
    }

    fn lock_engine(&self) -> Result<EngineGuard<'_>> {
        self.engine
            .try_lock_for(self.ctx.config.lock_timeout())
            .ok_or_else(|| BridgeError::Busy(format!("script '{}'", self.alias)))
    }

    /// Create a fresh engine, install the natives and run the script's top
    /// level.
    ///
    /// On failure the engine is released along with its manager entry and
    /// any registrations the top level made before failing.
    pub fn load(&self) -> Result<()> {
        let guard = self.lock_engine()?;
        let occupied = guard
            .try_borrow()
            .map(|slot| slot.is_some())
            .unwrap_or(true);
        if occupied {
            return Err(BridgeError::InvalidState(format!(
                "script '{}' is already loaded",
                self.alias
            )));
        }

        self.set_state(InstanceState::Loading);
        let engine = Engine::new(EngineHandle::next());
        let handle = engine.handle();
        tracing::debug!(alias = %self.alias, plugin_id = self.plugin_id, %handle, script = %self.script.display(), "loading script");

        if let Err(err) = self.prepare(&engine) {
            drop(engine);
            self.abort_load(handle, &err);
            return Err(err);
        }

        match guard.try_borrow_mut() {
            Ok(mut slot) => *slot = Some(engine),
            Err(_) => {
                let err = BridgeError::InvalidState(format!("script '{}' is executing", self.alias));
                drop(engine);
                self.abort_load(handle, &err);
                return Err(err);
            }
        }

        let executed = match guard.try_borrow() {
            Ok(slot) => match slot.as_ref() {
                Some(engine) => self.execute(engine),
                None => Err(BridgeError::InvalidInstance),
            },
            Err(_) => Err(BridgeError::InvalidState(format!(
                "script '{}' is executing",
                self.alias
            ))),
        };

        match executed {
            Ok(()) => {
                self.set_state(InstanceState::Loaded);
                self.set_last_error(None);
                tracing::debug!(alias = %self.alias, %handle, "script loaded");
                Ok(())
            }
            Err(err) => {
                let engine = guard.try_borrow_mut().ok().and_then(|mut slot| slot.take());
                self.abort_load(handle, &err);
                drop(engine);
                Err(err)
            }
        }
    }

    fn prepare(&self, engine: &Engine) -> Result<()> {
        self.ctx.manager.set_script(engine.handle(), self.weak())?;
        natives::install(engine.lua(), &self.ctx)?;
        engine.append_search_path(&self.search_paths())
    }

    fn execute(&self, engine: &Engine) -> Result<()> {
        let chunk = engine.load_file(&self.script)?;
        engine
            .call(&chunk, MultiValue::new())
            .map(|_| ())
            .map_err(|err| BridgeError::ScriptLoad {
                stage: LoadStage::Execute,
                path: self.script.clone(),
                message: err.to_string(),
            })
    }

    fn abort_load(&self, handle: EngineHandle, err: &BridgeError) {
        self.ctx.manager.remove_script(self);
        let dropped = self.ctx.registry.remove_owner(handle);
        self.set_state(InstanceState::Unloaded);
        self.set_last_error(Some(err.to_string()));
        tracing::error!(alias = %self.alias, %handle, dropped, error = %err, "script failed to load");
    }

    /// Collect garbage, drop the manager entry and every registration, then
    /// release the engine. Safe to call on an instance that never loaded.
    pub fn unload(&self) -> Result<()> {
        let guard = self.lock_engine()?;
        let engine = guard
            .try_borrow_mut()
            .map_err(|_| {
                BridgeError::InvalidState(format!(
                    "cannot unload script '{}' while it is executing",
                    self.alias
                ))
            })?
            .take();

        if let Some(engine) = &engine {
            if let Err(err) = engine.collect_garbage() {
                tracing::warn!(alias = %self.alias, error = %err, "garbage collection failed during unload");
            }
        }
        let unmapped = self.ctx.manager.remove_script(self);
        let dropped = engine
            .as_ref()
            .map_or(0, |engine| self.ctx.registry.remove_owner(engine.handle()));
        self.set_state(InstanceState::Unloaded);
        drop(engine);
        drop(guard);

        tracing::debug!(alias = %self.alias, unmapped, dropped, "script unloaded");
        Ok(())
    }

    /// `unload()` followed by `load()`; nothing survives.
    pub fn reload(&self) -> Result<()> {
        self.unload()?;
        self.load()
    }

    /// Run `f` against the engine identified by `handle`.
    ///
    /// Fails with `InvalidInstance` when the instance is unloaded or has
    /// been reloaded onto a different engine since `handle` was issued.
    pub fn invoke<R>(&self, handle: EngineHandle, f: impl FnOnce(&Lua) -> Result<R>) -> Result<R> {
        let guard = self.lock_engine()?;
        let slot = guard.try_borrow().map_err(|_| {
            BridgeError::InvalidState(format!("script '{}' is being torn down", self.alias))
        })?;
        match slot.as_ref() {
            Some(engine) if engine.handle() == handle => f(engine.lua()),
            _ => Err(BridgeError::InvalidInstance),
        }
    }
}

impl Drop for ScriptInstance {
    fn drop(&mut self) {
        if let Some(engine) = self.engine.get_mut().get_mut().take() {
            self.ctx.registry.remove_owner(engine.handle());
        }
        self.ctx.manager.remove_script(self);
    }
}

/// Locate `name` on disk.
///
/// Tries the name as given, then relative to `base`, then under each of
/// `dirs` (relative to `base`) with and without a `.lua` extension.
pub fn resolve_script_path(base: &Path, name: &str, dirs: &[String]) -> Result<PathBuf> {
    let given = Path::new(name);
    let mut candidates = vec![given.to_path_buf(), base.join(given)];
    for dir in dirs {
        let dir = base.join(dir);
        candidates.push(dir.join(given));
        if given.extension().is_none() {
            candidates.push(dir.join(format!("{name}.lua")));
        }
    }
    candidates
        .into_iter()
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| BridgeError::ScriptLoad {
            stage: LoadStage::Resolve,
            path: given.to_path_buf(),
            message: "script not found".to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BridgeConfig;
    use crate::testing::TestHost;
    use std::fs;

    fn context() -> Arc<BridgeContext> {
        BridgeContext::new(Arc::new(TestHost::default()), BridgeConfig::default())
    }

    fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    // ── lifecycle ────────────────────────────────────────────

    #[test]
    fn load_then_unload_walks_state_machine() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "ok.lua", "loaded_flag = true");
        let ctx = context();
        let instance = ScriptInstance::create(ctx.clone(), 7, "ok", dir.path(), script);

        assert_eq!(instance.state(), InstanceState::Unloaded);
        instance.load().unwrap();
        assert_eq!(instance.state(), InstanceState::Loaded);
        let handle = instance.handle().unwrap();
        assert!(Arc::ptr_eq(&ctx.manager.resolve(handle).unwrap(), &instance));

        instance.unload().unwrap();
        assert_eq!(instance.state(), InstanceState::Unloaded);
        assert!(instance.handle().is_none());
        assert!(ctx.manager.resolve(handle).is_err());
    }

    #[test]
    fn unload_without_load_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let instance = ScriptInstance::create(context(), 1, "never", dir.path(), "never.lua");
        instance.unload().unwrap();
        instance.unload().unwrap();
        assert_eq!(instance.state(), InstanceState::Unloaded);
    }

    #[test]
    fn double_load_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "twice.lua", "");
        let instance = ScriptInstance::create(context(), 1, "twice", dir.path(), script);
        instance.load().unwrap();
        assert!(matches!(instance.load(), Err(BridgeError::InvalidState(_))));
        assert!(instance.is_loaded());
    }

    #[test]
    fn syntax_error_fails_at_load_stage() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "broken.lua", "this is not lua");
        let ctx = context();
        let instance = ScriptInstance::create(ctx.clone(), 1, "broken", dir.path(), script);

        let err = instance.load().unwrap_err();
        assert!(matches!(err, BridgeError::ScriptLoad { stage: LoadStage::Load, .. }));
        assert!(err.to_string().starts_with("Failed to load script: "));
        assert!(err.to_string().contains("broken.lua"));
        assert_eq!(instance.state(), InstanceState::Unloaded);
        assert!(ctx.manager.is_empty());
        assert!(instance.last_error().is_some());
    }

    #[test]
    fn runtime_error_releases_engine_and_registrations() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(
            dir.path(),
            "raises.lua",
            "registry.simple_query('half_done', function() return 0 end)\nerror('boom')",
        );
        let ctx = context();
        let instance = ScriptInstance::create(ctx.clone(), 1, "raises", dir.path(), script);

        let err = instance.load().unwrap_err();
        assert!(matches!(err, BridgeError::ScriptLoad { stage: LoadStage::Execute, .. }));
        assert!(err.to_string().contains("boom"));
        assert!(instance.handle().is_none());
        assert!(ctx.manager.is_empty());
        assert!(ctx.registry.commands().is_empty());
    }

    #[test]
    fn failed_load_can_be_retried() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "flaky.lua", "error('first')");
        let instance = ScriptInstance::create(context(), 1, "flaky", dir.path(), script.clone());
        assert!(instance.load().is_err());

        fs::write(&script, "-- fixed").unwrap();
        instance.load().unwrap();
        assert!(instance.is_loaded());
        assert!(instance.last_error().is_none());
    }

    #[test]
    fn reload_issues_a_new_handle() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "again.lua", "");
        let ctx = context();
        let instance = ScriptInstance::create(ctx.clone(), 1, "again", dir.path(), script);
        instance.load().unwrap();
        let before = instance.handle().unwrap();
        instance.reload().unwrap();
        let after = instance.handle().unwrap();
        assert_ne!(before, after);
        assert!(ctx.manager.resolve(before).is_err());
        assert!(ctx.manager.resolve(after).is_ok());
    }

    #[test]
    fn invoke_rejects_stale_handle() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "stale.lua", "answer = 42");
        let instance = ScriptInstance::create(context(), 1, "stale", dir.path(), script);
        instance.load().unwrap();
        let handle = instance.handle().unwrap();

        let answer = instance
            .invoke(handle, |lua| Ok(lua.globals().get::<_, i64>("answer")?))
            .unwrap();
        assert_eq!(answer, 42);

        instance.reload().unwrap();
        let err = instance.invoke(handle, |_| Ok(())).unwrap_err();
        assert!(matches!(err, BridgeError::InvalidInstance));
    }

    #[test]
    fn unload_from_inside_a_call_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "busy.lua", "");
        let ctx = context();
        let instance = ScriptInstance::create(ctx.clone(), 1, "busy", dir.path(), script);
        instance.load().unwrap();
        let handle = instance.handle().unwrap();

        let err = instance.invoke(handle, |_| instance.unload()).unwrap_err();
        assert!(matches!(&err, BridgeError::InvalidState(m) if m.contains("while it is executing")));
        assert!(err.is_recoverable());

        assert!(instance.is_loaded());
        assert_eq!(instance.handle(), Some(handle));
        assert!(ctx.manager.resolve(handle).is_ok());
        instance.unload().unwrap();
    }

    #[test]
    fn search_path_includes_base_path() {
        let dir = tempfile::tempdir().unwrap();
        let lib = dir.path().join("scripts/lua/lib");
        fs::create_dir_all(&lib).unwrap();
        fs::write(lib.join("helper.lua"), "return { value = 5 }").unwrap();
        let script = write_script(
            dir.path(),
            "uses_lib.lua",
            "helper_value = require('helper').value",
        );
        let instance = ScriptInstance::create(context(), 1, "lib", dir.path(), script);
        instance.load().unwrap();
        let handle = instance.handle().unwrap();
        let value = instance
            .invoke(handle, |lua| Ok(lua.globals().get::<_, i64>("helper_value")?))
            .unwrap();
        assert_eq!(value, 5);
    }

    #[test]
    fn dropping_instance_clears_manager() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "dropped.lua", "");
        let ctx = context();
        let instance = ScriptInstance::create(ctx.clone(), 1, "dropped", dir.path(), script);
        instance.load().unwrap();
        assert_eq!(ctx.manager.len(), 1);
        drop(instance);
        assert!(ctx.manager.is_empty());
    }

    // ── path resolution ──────────────────────────────────────

    #[test]
    fn resolves_bare_name_under_script_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let scripts = dir.path().join("scripts/lua");
        fs::create_dir_all(&scripts).unwrap();
        fs::write(scripts.join("check_cpu.lua"), "").unwrap();

        let dirs = BridgeConfig::default().script_dirs;
        let resolved = resolve_script_path(dir.path(), "check_cpu", &dirs).unwrap();
        assert_eq!(resolved, scripts.join("check_cpu.lua"));
        let resolved = resolve_script_path(dir.path(), "check_cpu.lua", &dirs).unwrap();
        assert_eq!(resolved, scripts.join("check_cpu.lua"));
    }

    #[test]
    fn resolves_relative_to_base() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("top.lua"), "").unwrap();
        let resolved = resolve_script_path(dir.path(), "top.lua", &[]).unwrap();
        assert_eq!(resolved, dir.path().join("top.lua"));
    }

    #[test]
    fn missing_script_fails_at_resolve_stage() {
        let dir = tempfile::tempdir().unwrap();
        let err = resolve_script_path(dir.path(), "nope", &["scripts".to_string()]).unwrap_err();
        assert!(matches!(err, BridgeError::ScriptLoad { stage: LoadStage::Resolve, .. }));
    }
}
