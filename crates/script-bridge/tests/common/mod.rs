//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use script_bridge::{
    BridgeConfig, ExecResult, HostCore, LogLevel, PluginId, QueryResult, ReturnCode, ScriptBridge,
    SettingKeySpec, SubmitResult,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

pub const PLUGIN_ID: PluginId = 17;

/// Host core double that records what scripts ask of it.
///
/// `simple_query("explode")` panics, standing in for a native fault.
/// `simple_query("block")` is recorded, then parks the calling script until
/// `open_gate` is called.
#[derive(Default)]
pub struct RecordingHost {
    queries: Mutex<Vec<(String, Vec<String>)>>,
    commands: Mutex<Vec<(String, String)>>,
    listeners: Mutex<Vec<String>>,
    logs: Mutex<Vec<(LogLevel, String)>>,
    settings: Mutex<HashMap<(String, String), String>>,
    gate: (Mutex<bool>, Condvar),
}

const GATE_LIMIT: Duration = Duration::from_secs(10);

impl RecordingHost {
    pub fn open_gate(&self) {
        let (open, signal) = &self.gate;
        *open.lock().unwrap() = true;
        signal.notify_all();
    }

    /// Wait until some script is parked in `simple_query("block")`.
    pub fn wait_until_blocked(&self) {
        let deadline = Instant::now() + GATE_LIMIT;
        while !self.queries().iter().any(|(command, _)| command == "block") {
            assert!(Instant::now() < deadline, "no script reached the gate");
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn wait_for_gate(&self) {
        let (open, signal) = &self.gate;
        let guard = open.lock().unwrap();
        let (_open, timeout) = signal
            .wait_timeout_while(guard, GATE_LIMIT, |open| !*open)
            .unwrap();
        assert!(!timeout.timed_out(), "gate was never opened");
    }

    pub fn queries(&self) -> Vec<(String, Vec<String>)> {
        self.queries.lock().unwrap().clone()
    }

    pub fn announced_commands(&self) -> Vec<(String, String)> {
        self.commands.lock().unwrap().clone()
    }

    pub fn listeners(&self) -> Vec<String> {
        self.listeners.lock().unwrap().clone()
    }

    pub fn log_messages(&self) -> Vec<String> {
        self.logs
            .lock()
            .unwrap()
            .iter()
            .map(|(_, message)| message.clone())
            .collect()
    }
}

impl HostCore for RecordingHost {
    fn simple_query(&self, command: &str, args: &[String]) -> QueryResult {
        if command == "explode" {
            panic!("host core fault");
        }
        self.queries
            .lock()
            .unwrap()
            .push((command.to_string(), args.to_vec()));
        if command == "block" {
            self.wait_for_gate();
        }
        QueryResult::new(ReturnCode::Ok, format!("ran {command}"), "")
    }

    fn query(&self, _command: &str, request: &[u8]) -> (ReturnCode, Vec<u8>) {
        (ReturnCode::Ok, request.to_vec())
    }

    fn exec_simple_command(&self, _target: &str, command: &str, _args: &[String]) -> ExecResult {
        ExecResult {
            code: ReturnCode::Ok,
            lines: vec![format!("executed {command}")],
        }
    }

    fn submit_simple_message(
        &self,
        _channel: &str,
        _command: &str,
        code: ReturnCode,
        _message: &str,
        _perf: &str,
    ) -> SubmitResult {
        SubmitResult {
            code,
            message: "accepted".to_string(),
        }
    }

    fn get_settings_string(&self, section: &str, key: &str, default_value: &str) -> String {
        self.settings
            .lock()
            .unwrap()
            .get(&(section.to_string(), key.to_string()))
            .cloned()
            .unwrap_or_else(|| default_value.to_string())
    }

    fn get_settings_int(&self, section: &str, key: &str, default_value: i64) -> i64 {
        self.get_settings_string(section, key, "")
            .parse()
            .unwrap_or(default_value)
    }

    fn set_settings_string(&self, section: &str, key: &str, value: &str) {
        self.settings
            .lock()
            .unwrap()
            .insert((section.to_string(), key.to_string()), value.to_string());
    }

    fn set_settings_int(&self, section: &str, key: &str, value: i64) {
        self.set_settings_string(section, key, &value.to_string());
    }

    fn get_settings_section(&self, path: &str) -> Vec<String> {
        let mut keys: Vec<_> = self
            .settings
            .lock()
            .unwrap()
            .keys()
            .filter(|(section, _)| section == path)
            .map(|(_, key)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    fn settings_register_path(&self, _: PluginId, _: &str, _: &str, _: &str, _: bool) {}

    fn settings_register_key(&self, _: PluginId, _: &SettingKeySpec) {}

    fn settings_save(&self) {}

    fn register_command(&self, _plugin_id: PluginId, name: &str, description: &str) {
        self.commands
            .lock()
            .unwrap()
            .push((name.to_string(), description.to_string()));
    }

    fn register_submission_listener(&self, _plugin_id: PluginId, channel: &str) {
        self.listeners.lock().unwrap().push(channel.to_string());
    }

    fn log(&self, level: LogLevel, _file: &str, _line: u32, message: &str) {
        self.logs
            .lock()
            .unwrap()
            .push((level, message.to_string()));
    }

    fn reload(&self, _module: &str) {}
}

/// A bridge over a scratch directory of scripts.
pub struct Fixture {
    pub dir: tempfile::TempDir,
    pub host: Arc<RecordingHost>,
    pub bridge: ScriptBridge,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(BridgeConfig::default())
    }

    pub fn with_config(config: BridgeConfig) -> Self {
        let host = Arc::new(RecordingHost::default());
        let bridge = ScriptBridge::new(host.clone(), config);
        Self {
            dir: tempfile::tempdir().unwrap(),
            host,
            bridge,
        }
    }

    pub fn base(&self) -> &Path {
        self.dir.path()
    }

    /// Write `body` to `scripts/lua/<name>.lua`.
    pub fn script(&self, name: &str, body: &str) -> PathBuf {
        let dir = self.dir.path().join("scripts").join("lua");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{name}.lua"));
        std::fs::write(&path, body).unwrap();
        path
    }

    /// Write and load a script under `alias`.
    pub fn load(&self, alias: &str, body: &str) {
        self.script(alias, body);
        self.bridge
            .load_instance(PLUGIN_ID, alias, self.base(), alias)
            .unwrap();
    }
}

pub fn args(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
