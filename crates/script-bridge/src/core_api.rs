//! Per-call accessor to the host core.
//!
//! A `CoreApi` is built for each native call by resolving the calling
//! engine to its script instance. Every operation takes and returns plain
//! Rust values; the natives table does the engine-side marshalling.

use crate::error::{BridgeError, Result};
use crate::host::{HostCore, SettingKeySpec};
use crate::instance::ScriptInstance;
use crate::manager::InstanceManager;
use crate::types::{
    CommandShape, EngineHandle, ExecResult, LogLevel, QueryResult, ReturnCode, SettingKeyType,
    SubmitResult,
};
use mlua::{Lua, RegistryKey};
use std::sync::Arc;

pub struct CoreApi {
    instance: Arc<ScriptInstance>,
    handle: EngineHandle,
}

impl CoreApi {
    /// Resolve the instance owning `lua`; `InvalidInstance` once it has
    /// begun unloading.
    pub fn resolve(manager: &InstanceManager, lua: &Lua) -> Result<Self> {
        let handle = crate::engine::handle_of(lua).ok_or(BridgeError::InvalidInstance)?;
        let instance = manager.resolve(handle)?;
        Ok(Self { instance, handle })
    }

    pub fn instance(&self) -> &ScriptInstance {
        &self.instance
    }

    pub fn alias(&self) -> &str {
        self.instance.alias()
    }

    fn core(&self) -> &dyn HostCore {
        self.instance.context().core.as_ref()
    }

    // ── queries and commands ─────────────────────────────────

    pub fn simple_query(&self, command: &str, args: &[String]) -> QueryResult {
        self.core().simple_query(command, args)
    }

    pub fn raw_query(&self, command: &str, request: &[u8]) -> (ReturnCode, Vec<u8>) {
        self.core().query(command, request)
    }

    pub fn simple_exec(&self, target: &str, command: &str, args: &[String]) -> ExecResult {
        self.core().exec_simple_command(target, command, args)
    }

    pub fn simple_submit(
        &self,
        channel: &str,
        command: &str,
        code: ReturnCode,
        message: &str,
        perf: &str,
    ) -> SubmitResult {
        self.core()
            .submit_simple_message(channel, command, code, message, perf)
    }

    pub fn exec(&self) -> Result<()> {
        self.unsupported("exec")
    }

    pub fn submit(&self) -> Result<()> {
        self.unsupported("submit")
    }

    pub(crate) fn unsupported(&self, api: &'static str) -> Result<()> {
        tracing::error!(alias = self.alias(), api, "Unsupported API called");
        Err(BridgeError::UnsupportedApi(api))
    }

    /// Reload `module`, or this script's own alias when none is given.
    pub fn reload(&self, module: Option<&str>) {
        let module = module.unwrap_or_else(|| self.alias());
        self.core().reload(module);
    }

    /// Forward a script log line, attributed to this script's path.
    pub fn log(&self, level: LogLevel, line: Option<u32>, message: &str) {
        let file = self.instance.script().display().to_string();
        self.core().log(level, &file, line.unwrap_or(0), message);
    }

    // ── settings ─────────────────────────────────────────────

    pub fn get_setting_string(&self, section: &str, key: &str, default_value: &str) -> String {
        self.core().get_settings_string(section, key, default_value)
    }

    pub fn get_setting_int(&self, section: &str, key: &str, default_value: i64) -> i64 {
        self.core().get_settings_int(section, key, default_value)
    }

    /// Booleans live in the integer settings store as 1/0.
    pub fn get_setting_bool(&self, section: &str, key: &str, default_value: bool) -> bool {
        self.core()
            .get_settings_int(section, key, i64::from(default_value))
            == 1
    }

    pub fn set_setting_string(&self, section: &str, key: &str, value: &str) {
        self.core().set_settings_string(section, key, value);
    }

    pub fn set_setting_int(&self, section: &str, key: &str, value: i64) {
        self.core().set_settings_int(section, key, value);
    }

    pub fn set_setting_bool(&self, section: &str, key: &str, value: bool) {
        self.core().set_settings_int(section, key, i64::from(value));
    }

    pub fn get_settings_section(&self, path: &str) -> Vec<String> {
        self.core().get_settings_section(path)
    }

    pub fn register_settings_path(&self, path: &str, title: &str, description: &str) {
        self.core().settings_register_path(
            self.instance.plugin_id(),
            path,
            title,
            description,
            false,
        );
    }

    /// Register a settings key. An unrecognized `key_type` is logged and
    /// registered as a string key.
    pub fn register_settings_key(
        &self,
        path: &str,
        key: &str,
        key_type: &str,
        title: &str,
        description: &str,
        default_value: &str,
    ) {
        let key_type = SettingKeyType::parse(key_type).unwrap_or_else(|| {
            tracing::error!(alias = self.alias(), key_type, "Invalid settings type");
            SettingKeyType::String
        });
        let spec = SettingKeySpec {
            path: path.to_string(),
            key: key.to_string(),
            key_type,
            title: title.to_string(),
            description: description.to_string(),
            default_value: default_value.to_string(),
            advanced: false,
        };
        self.core()
            .settings_register_key(self.instance.plugin_id(), &spec);
    }

    pub fn save_settings(&self) {
        self.core().settings_save();
    }

    // ── registration ─────────────────────────────────────────

    /// Register `name` with the registry and announce it to the host.
    pub fn register_command(
        &self,
        name: &str,
        receiver: Option<RegistryKey>,
        callback: RegistryKey,
        description: Option<&str>,
        shape: CommandShape,
    ) -> Result<()> {
        let description = match description {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => format!("Lua script: {name}"),
        };
        self.core()
            .register_command(self.instance.plugin_id(), name, &description);
        self.instance.context().registry.register_command(
            name,
            &self.instance,
            self.handle,
            receiver,
            callback,
            shape,
        )
    }

    pub fn register_cli(&self, name: &str, callback: RegistryKey) -> Result<()> {
        self.instance
            .context()
            .registry
            .register_cli(name, &self.instance, self.handle, callback)
    }

    /// Subscribe to `channel` and announce the listener to the host.
    pub fn register_subscription(&self, channel: &str, callback: RegistryKey) -> Result<()> {
        self.core()
            .register_submission_listener(self.instance.plugin_id(), channel);
        self.instance.context().registry.register_subscription(
            channel,
            &self.instance,
            self.handle,
            callback,
        )
    }
}
