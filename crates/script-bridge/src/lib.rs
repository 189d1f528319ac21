//! Lua scripting bridge for a host monitoring agent.
//!
//! Scripts loaded through a [`ScriptBridge`] register commands, CLI hooks
//! and channel subscriptions, and call back into the host through the
//! `core`, `registry` and `settings` objects installed into their engine.
//! The host drives scripts with [`ScriptBridge::dispatch_command`],
//! [`ScriptBridge::dispatch_cli`] and [`ScriptBridge::dispatch_subscription`].
//!
//! Each script instance owns one Lua state. Natives find their instance
//! through the [`InstanceManager`], which only holds weak references, so a
//! script that is unloading can never be reached from a callback.

pub mod audit;
pub mod bridge;
pub mod config;
pub mod core_api;
pub mod engine;
pub mod error;
pub mod frame;
pub mod host;
pub mod instance;
pub mod manager;
mod natives;
pub mod registry;
mod sync;
pub mod types;
pub mod value;

#[cfg(test)]
pub(crate) mod testing;

pub use audit::{AuditEntry, AuditOutcome, AuditTrail};
pub use bridge::{BridgeContext, LoadReport, ScriptBridge};
pub use config::BridgeConfig;
pub use core_api::CoreApi;
pub use engine::Engine;
pub use error::{BridgeError, LoadStage, Result};
pub use frame::LuaFrame;
pub use host::{HostCore, SettingKeySpec};
pub use instance::{InstanceState, ScriptInstance, resolve_script_path};
pub use manager::InstanceManager;
pub use registry::{Registry, SubscriberFailure, SubscriptionReport};
pub use sync::DEFAULT_LOCK_TIMEOUT;
pub use types::{
    CliResult, CommandShape, EngineHandle, ExecResult, LogLevel, Namespace, PluginId,
    QueryResult, ReturnCode, SettingKeyType, SubmitResult,
};
pub use value::ScriptValue;
