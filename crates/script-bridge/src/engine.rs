//! Ownership of one Lua state.
//!
//! `Engine` is the engine-level half of the handle wrapper: it creates the
//! state, tags it with its `EngineHandle`, loads and runs source files and
//! releases script-created values on request. Argument handling for native
//! calls lives in [`crate::frame`].

use crate::error::{BridgeError, LoadStage, Result};
use crate::types::EngineHandle;
use mlua::{Function, Lua, MultiValue, Table};
use std::fs;
use std::path::{Path, PathBuf};

pub struct Engine {
    lua: Lua,
    handle: EngineHandle,
}

impl Engine {
    /// Create a state with the standard libraries and tag it with `handle`.
    pub fn new(handle: EngineHandle) -> Self {
        let lua = Lua::new();
        lua.set_app_data(handle);
        Self { lua, handle }
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle
    }

    pub fn lua(&self) -> &Lua {
        &self.lua
    }

    /// Append `entries` to `package.path`.
    pub fn append_search_path(&self, entries: &[PathBuf]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let package: Table = self.lua.globals().get("package")?;
        let current: String = package.get("path")?;
        let mut path = current;
        for entry in entries {
            if !path.is_empty() && !path.ends_with(';') {
                path.push(';');
            }
            path.push_str(&entry.to_string_lossy());
        }
        package.set("path", path)?;
        Ok(())
    }

    /// Compile `path` into a callable chunk without running it.
    pub fn load_file(&self, path: &Path) -> Result<Function<'_>> {
        let source = fs::read(path).map_err(|err| BridgeError::ScriptLoad {
            stage: LoadStage::Load,
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        let source = source.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(&source);
        self.lua
            .load(source)
            .set_name(format!("@{}", path.display()))
            .into_function()
            .map_err(|err| BridgeError::ScriptLoad {
                stage: LoadStage::Load,
                path: path.to_path_buf(),
                message: err.to_string(),
            })
    }

    /// Run a function in protected mode and collect every returned value.
    pub fn call<'lua>(
        &'lua self,
        function: &Function<'lua>,
        args: MultiValue<'lua>,
    ) -> mlua::Result<MultiValue<'lua>> {
        function.call::<_, MultiValue>(args)
    }

    /// Run a full collection cycle.
    pub fn collect_garbage(&self) -> Result<()> {
        self.lua.gc_collect()?;
        Ok(())
    }

    /// Approximate heap size of the state, in bytes.
    pub fn used_memory(&self) -> usize {
        self.lua.used_memory()
    }
}

/// Resolve the handle of the state a native function was entered from.
pub fn handle_of(lua: &Lua) -> Option<EngineHandle> {
    lua.app_data_ref::<EngineHandle>().map(|handle| *handle)
}
