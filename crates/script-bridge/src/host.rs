//! Interface of the host core consumed by the bridge.
//!
//! The bridge never interprets what a query or an exec does; it marshals
//! script arguments into these calls and hands the status and payload back.

use crate::types::{
    ExecResult, LogLevel, PluginId, QueryResult, ReturnCode, SettingKeyType, SubmitResult,
};

/// Path/key registration metadata forwarded to the settings subsystem.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SettingKeySpec {
    pub path: String,
    pub key: String,
    pub key_type: SettingKeyType,
    pub title: String,
    pub description: String,
    pub default_value: String,
    pub advanced: bool,
}

/// Host core services available to scripts.
///
/// Implementations must be callable from any thread; a call may arrive while
/// another script is executing on a different thread.
pub trait HostCore: Send + Sync + 'static {
    /// Run a named check with string arguments.
    fn simple_query(&self, command: &str, args: &[String]) -> QueryResult;

    /// Forward an opaque request payload and return the opaque response.
    fn query(&self, command: &str, request: &[u8]) -> (ReturnCode, Vec<u8>);

    /// Execute a command on `target` (a module name or `*`).
    fn exec_simple_command(&self, target: &str, command: &str, args: &[String]) -> ExecResult;

    /// Submit a check result to a channel.
    fn submit_simple_message(
        &self,
        channel: &str,
        command: &str,
        code: ReturnCode,
        message: &str,
        perf: &str,
    ) -> SubmitResult;

    fn get_settings_string(&self, section: &str, key: &str, default_value: &str) -> String;

    fn get_settings_int(&self, section: &str, key: &str, default_value: i64) -> i64;

    fn set_settings_string(&self, section: &str, key: &str, value: &str);

    fn set_settings_int(&self, section: &str, key: &str, value: i64);

    /// List the keys of a settings section.
    fn get_settings_section(&self, path: &str) -> Vec<String>;

    fn settings_register_path(
        &self,
        plugin_id: PluginId,
        path: &str,
        title: &str,
        description: &str,
        advanced: bool,
    );

    fn settings_register_key(&self, plugin_id: PluginId, spec: &SettingKeySpec);

    fn settings_save(&self);

    /// Announce a command name owned by `plugin_id`.
    fn register_command(&self, plugin_id: PluginId, name: &str, description: &str);

    /// Announce that `plugin_id` listens on `channel`.
    fn register_submission_listener(&self, plugin_id: PluginId, channel: &str);

    fn log(&self, level: LogLevel, file: &str, line: u32, message: &str);

    /// Reload a module by name.
    fn reload(&self, module: &str);
}
