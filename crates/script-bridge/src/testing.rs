//! In-memory host core for unit tests.

use crate::host::{HostCore, SettingKeySpec};
use crate::types::{ExecResult, LogLevel, PluginId, QueryResult, ReturnCode, SubmitResult};
use std::collections::BTreeMap;
use std::sync::Mutex;

pub(crate) type LogLine = (LogLevel, String, u32, String);

/// Echoing host: queries answer `command:arg1,arg2`, settings live in a map
/// and every side-effecting call is recorded. `simple_query("panic")` panics.
#[derive(Default)]
pub(crate) struct TestHost {
    calls: Mutex<Vec<String>>,
    settings: Mutex<BTreeMap<(String, String), String>>,
    logs: Mutex<Vec<LogLine>>,
}

impl TestHost {
    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn logs(&self) -> Vec<LogLine> {
        self.logs.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn setting(&self, section: &str, key: &str) -> Option<String> {
        self.settings
            .lock()
            .unwrap()
            .get(&(section.to_string(), key.to_string()))
            .cloned()
    }

    fn store(&self, section: &str, key: &str, value: String) {
        self.settings
            .lock()
            .unwrap()
            .insert((section.to_string(), key.to_string()), value);
    }
}

impl HostCore for TestHost {
    fn simple_query(&self, command: &str, args: &[String]) -> QueryResult {
        if command == "panic" {
            panic!("host fault in simple_query");
        }
        QueryResult::new(ReturnCode::Ok, format!("{command}:{}", args.join(",")), "")
    }

    fn query(&self, _command: &str, request: &[u8]) -> (ReturnCode, Vec<u8>) {
        (ReturnCode::Ok, request.to_vec())
    }

    fn exec_simple_command(&self, _target: &str, _command: &str, args: &[String]) -> ExecResult {
        ExecResult {
            code: ReturnCode::Ok,
            lines: args.to_vec(),
        }
    }

    fn submit_simple_message(
        &self,
        channel: &str,
        command: &str,
        code: ReturnCode,
        message: &str,
        perf: &str,
    ) -> SubmitResult {
        self.record(format!(
            "submit:{channel}:{command}:{}:{message}:{perf}",
            code.as_i64()
        ));
        SubmitResult {
            code: ReturnCode::Ok,
            message: format!("{channel}/{command}"),
        }
    }

    fn get_settings_string(&self, section: &str, key: &str, default_value: &str) -> String {
        self.setting(section, key)
            .unwrap_or_else(|| default_value.to_string())
    }

    fn get_settings_int(&self, section: &str, key: &str, default_value: i64) -> i64 {
        self.setting(section, key)
            .and_then(|value| value.parse().ok())
            .unwrap_or(default_value)
    }

    fn set_settings_string(&self, section: &str, key: &str, value: &str) {
        self.store(section, key, value.to_string());
    }

    fn set_settings_int(&self, section: &str, key: &str, value: i64) {
        self.store(section, key, value.to_string());
    }

    fn get_settings_section(&self, path: &str) -> Vec<String> {
        self.settings
            .lock()
            .unwrap()
            .keys()
            .filter(|(section, _)| section == path)
            .map(|(_, key)| key.clone())
            .collect()
    }

    fn settings_register_path(
        &self,
        plugin_id: PluginId,
        path: &str,
        title: &str,
        _description: &str,
        _advanced: bool,
    ) {
        self.record(format!("register_path:{plugin_id}:{path}:{title}"));
    }

    fn settings_register_key(&self, plugin_id: PluginId, spec: &SettingKeySpec) {
        self.record(format!(
            "register_key:{plugin_id}:{}:{}:{:?}:{}",
            spec.path, spec.key, spec.key_type, spec.default_value
        ));
    }

    fn settings_save(&self) {
        self.record("save".to_string());
    }

    fn register_command(&self, plugin_id: PluginId, name: &str, description: &str) {
        self.record(format!("register_command:{plugin_id}:{name}:{description}"));
    }

    fn register_submission_listener(&self, plugin_id: PluginId, channel: &str) {
        self.record(format!("listener:{plugin_id}:{channel}"));
    }

    fn log(&self, level: LogLevel, file: &str, line: u32, message: &str) {
        self.logs
            .lock()
            .unwrap()
            .push((level, file.to_string(), line, message.to_string()));
    }

    fn reload(&self, module: &str) {
        self.record(format!("reload:{module}"));
    }
}
