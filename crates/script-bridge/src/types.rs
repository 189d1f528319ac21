use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier assigned by the host to the plugin that owns a script.
pub type PluginId = u32;

/// Opaque identity of one running Lua state.
///
/// A fresh handle is minted for every `load()`, so a reloaded script never
/// reuses the handle of its previous engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EngineHandle(u64);

static NEXT_ENGINE_HANDLE: AtomicU64 = AtomicU64::new(1);

impl EngineHandle {
    /// Mint a process-unique handle.
    pub fn next() -> Self {
        Self(NEXT_ENGINE_HANDLE.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EngineHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The three independent registration namespaces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Namespace {
    Command,
    Cli,
    Subscription,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Command => "command",
            Self::Cli => "cli hook",
            Self::Subscription => "subscription",
        })
    }
}

/// Check result status shared by the host and scripts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum ReturnCode {
    #[default]
    Ok = 0,
    Warning = 1,
    Critical = 2,
    Unknown = 3,
}

impl ReturnCode {
    /// Map a numeric status; anything outside 0..=3 is `Unknown`.
    pub fn from_i64(code: i64) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::Warning,
            2 => Self::Critical,
            _ => Self::Unknown,
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "ok" | "0" => Some(Self::Ok),
            "warning" | "warn" | "1" => Some(Self::Warning),
            "critical" | "crit" | "2" => Some(Self::Critical),
            "unknown" | "3" => Some(Self::Unknown),
            _ => None,
        }
    }

    pub fn as_i64(self) -> i64 {
        self as i64
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Warning => "warning",
            Self::Critical => "critical",
            Self::Unknown => "unknown",
        }
    }
}

/// Log level used by script log calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Critical,
}

impl LogLevel {
    /// Parse a script-supplied level name, falling back to `Info`.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "trace" => Self::Trace,
            "debug" => Self::Debug,
            "warning" | "warn" => Self::Warn,
            "error" => Self::Error,
            "critical" | "fatal" => Self::Critical,
            _ => Self::Info,
        }
    }
}

/// Value type of a settings key registered by a script.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingKeyType {
    String,
    Integer,
    Bool,
}

impl SettingKeyType {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "string" | "str" | "s" => Some(Self::String),
            "integer" | "int" | "i" => Some(Self::Integer),
            "bool" | "b" => Some(Self::Bool),
            _ => None,
        }
    }
}

/// Call shape of a registered command, fixed at registration time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandShape {
    /// `fn(command, {args})` returning `(code, message, perf)`.
    Simple,
    /// `fn(command, args...)` with script-produced results.
    Full,
}

/// Outcome of a query-style command.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct QueryResult {
    pub code: ReturnCode,
    pub message: String,
    pub perf: String,
}

impl QueryResult {
    pub fn new(code: ReturnCode, message: impl Into<String>, perf: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            perf: perf.into(),
        }
    }
}

/// Outcome of an exec-style command.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct ExecResult {
    pub code: ReturnCode,
    pub lines: Vec<String>,
}

/// Outcome of a submission to a channel.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct SubmitResult {
    pub code: ReturnCode,
    pub message: String,
}

/// Outcome of a CLI hook invocation.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct CliResult {
    pub code: ReturnCode,
    pub output: String,
}
