//! Command, CLI hook and subscription registry.
//!
//! Maps external names to a stored Lua callable owned by one script
//! instance and performs the host → script call. The maps are only locked
//! for lookup and mutation; the lock is released before any script runs.
//! Registrations die with their engine: `remove_owner` drops them when the
//! instance unloads, and a registration that outlives its engine fails the
//! individual dispatch with `NotFound`.
//!
//! Callback results are read positionally. A result of the wrong type fails
//! the dispatch as a script runtime error naming the callback.

use crate::error::{BridgeError, Result};
use crate::instance::ScriptInstance;
use crate::sync::{DEFAULT_LOCK_TIMEOUT, TimedMutex};
use crate::types::{CliResult, CommandShape, EngineHandle, Namespace, QueryResult, ReturnCode};
use crate::value::{code_from_value, coerce_string, list_to_table};
use mlua::{Function, Lua, MultiValue, RegistryKey, Value};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Stored callable plus the instance and engine generation that own it.
#[derive(Clone)]
struct Registration {
    owner: Weak<ScriptInstance>,
    handle: EngineHandle,
    callback: Arc<RegistryKey>,
    receiver: Option<Arc<RegistryKey>>,
}

impl Registration {
    fn new(
        owner: &ScriptInstance,
        handle: EngineHandle,
        receiver: Option<RegistryKey>,
        callback: RegistryKey,
    ) -> Self {
        Self {
            owner: owner.weak(),
            handle,
            callback: Arc::new(callback),
            receiver: receiver.map(Arc::new),
        }
    }

    fn owner(&self, namespace: Namespace, name: &str) -> Result<Arc<ScriptInstance>> {
        self.owner
            .upgrade()
            .ok_or_else(|| BridgeError::not_found(namespace, name))
    }

    /// Call the stored function with `[receiver,] args...` and return every
    /// value it produced.
    fn call<'lua>(
        &self,
        lua: &'lua Lua,
        name: &str,
        args: Vec<Value<'lua>>,
    ) -> Result<Vec<Value<'lua>>> {
        let callback: Function = lua.registry_value(&self.callback)?;
        let mut call_args = Vec::with_capacity(args.len() + 1);
        if let Some(receiver) = &self.receiver {
            call_args.push(lua.registry_value::<Value>(receiver)?);
        }
        call_args.extend(args);
        callback
            .call::<_, MultiValue>(MultiValue::from_vec(call_args))
            .map(MultiValue::into_vec)
            .map_err(|err| BridgeError::ScriptRuntime {
                name: name.to_string(),
                message: err.to_string(),
            })
    }
}

struct CommandEntry {
    target: Registration,
    shape: CommandShape,
}

/// Failure of one subscriber during a fan-out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscriberFailure {
    pub script: String,
    pub message: String,
}

/// Result of delivering one event to every subscriber of a channel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SubscriptionReport {
    /// `(script alias, returned code)` for every subscriber that ran.
    pub delivered: Vec<(String, ReturnCode)>,
    pub failures: Vec<SubscriberFailure>,
}

impl SubscriptionReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Registry {
    commands: TimedMutex<HashMap<String, CommandEntry>>,
    cli: TimedMutex<HashMap<String, Registration>>,
    subscriptions: TimedMutex<HashMap<String, Vec<Registration>>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_LOCK_TIMEOUT)
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose namespace locks give up after `timeout`.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            commands: TimedMutex::new(HashMap::new(), timeout, "command registry"),
            cli: TimedMutex::new(HashMap::new(), timeout, "cli registry"),
            subscriptions: TimedMutex::new(HashMap::new(), timeout, "subscription registry"),
        }
    }

    /// Insert or replace the command `name`.
    pub fn register_command(
        &self,
        name: &str,
        owner: &ScriptInstance,
        handle: EngineHandle,
        receiver: Option<RegistryKey>,
        callback: RegistryKey,
        shape: CommandShape,
    ) -> Result<()> {
        let entry = CommandEntry {
            target: Registration::new(owner, handle, receiver, callback),
            shape,
        };
        self.commands.lock()?.insert(name.to_string(), entry);
        tracing::debug!(command = name, alias = owner.alias(), ?shape, "registered command");
        Ok(())
    }

    /// Insert or replace the CLI hook `name`.
    pub fn register_cli(
        &self,
        name: &str,
        owner: &ScriptInstance,
        handle: EngineHandle,
        callback: RegistryKey,
    ) -> Result<()> {
        let entry = Registration::new(owner, handle, None, callback);
        self.cli.lock()?.insert(name.to_string(), entry);
        tracing::debug!(command = name, alias = owner.alias(), "registered cli hook");
        Ok(())
    }

    /// Add a subscriber to `channel`; channels accept many subscribers.
    pub fn register_subscription(
        &self,
        channel: &str,
        owner: &ScriptInstance,
        handle: EngineHandle,
        callback: RegistryKey,
    ) -> Result<()> {
        let entry = Registration::new(owner, handle, None, callback);
        self.subscriptions.lock()?
            .entry(channel.to_string())
            .or_default()
            .push(entry);
        tracing::debug!(channel, alias = owner.alias(), "registered subscription");
        Ok(())
    }

    /// Drop every registration made from the engine `handle`.
    ///
    /// A namespace whose lock cannot be taken keeps its entries; they fail
    /// dispatch with `NotFound` once the engine is gone.
    pub fn remove_owner(&self, handle: EngineHandle) -> usize {
        let mut removed = 0;
        if let Ok(mut commands) = self.commands.lock() {
            let before = commands.len();
            commands.retain(|_, entry| entry.target.handle != handle);
            removed += before - commands.len();
        }
        if let Ok(mut cli) = self.cli.lock() {
            let before = cli.len();
            cli.retain(|_, entry| entry.handle != handle);
            removed += before - cli.len();
        }
        if let Ok(mut subscriptions) = self.subscriptions.lock() {
            for subscribers in subscriptions.values_mut() {
                let before = subscribers.len();
                subscribers.retain(|entry| entry.handle != handle);
                removed += before - subscribers.len();
            }
            subscriptions.retain(|_, subscribers| !subscribers.is_empty());
        }
        removed
    }

    /// Run the command `name` with `args`.
    pub fn dispatch_command(&self, name: &str, args: &[String]) -> Result<QueryResult> {
        let (target, shape) = {
            let commands = self.commands.lock()?;
            let entry = commands
                .get(name)
                .ok_or_else(|| BridgeError::not_found(Namespace::Command, name))?;
            (entry.target.clone(), entry.shape)
        };
        let owner = target.owner(Namespace::Command, name)?;

        let result = owner
            .invoke(target.handle, |lua| {
                let mut call_args = vec![Value::String(lua.create_string(name)?)];
                match shape {
                    CommandShape::Simple => {
                        call_args.push(Value::Table(list_to_table(lua, args)?));
                    }
                    CommandShape::Full => {
                        for arg in args {
                            call_args.push(Value::String(lua.create_string(arg)?));
                        }
                    }
                }
                let values = target.call(lua, name, call_args)?;
                read_query_result(name, &values)
            })
            .map_err(|err| stale_as_not_found(err, Namespace::Command, name));

        if let Err(err) = &result {
            tracing::warn!(command = name, alias = owner.alias(), error = %err, "command dispatch failed");
        }
        result
    }

    /// Run the CLI hook `name` with `args`.
    pub fn dispatch_cli(&self, name: &str, args: &[String]) -> Result<CliResult> {
        let target = self.cli.lock()?
            .get(name)
            .cloned()
            .ok_or_else(|| BridgeError::not_found(Namespace::Cli, name))?;
        let owner = target.owner(Namespace::Cli, name)?;

        let result = owner
            .invoke(target.handle, |lua| {
                let call_args = vec![
                    Value::String(lua.create_string(name)?),
                    Value::Table(list_to_table(lua, args)?),
                ];
                let values = target.call(lua, name, call_args)?;
                let code = result_code(name, &values, 1)?.unwrap_or(ReturnCode::Ok);
                let output = result_string(name, &values, 2)?;
                Ok(CliResult { code, output })
            })
            .map_err(|err| stale_as_not_found(err, Namespace::Cli, name));

        if let Err(err) = &result {
            tracing::warn!(command = name, alias = owner.alias(), error = %err, "cli dispatch failed");
        }
        result
    }

    /// Deliver `args` to every subscriber of `channel`.
    ///
    /// A failing subscriber is recorded in the report and does not stop the
    /// remaining subscribers.
    pub fn dispatch_subscription(&self, channel: &str, args: &[String]) -> Result<SubscriptionReport> {
        let subscribers: Vec<Registration> = self.subscriptions.lock()?
            .get(channel)
            .cloned()
            .unwrap_or_default();
        if subscribers.is_empty() {
            return Err(BridgeError::not_found(Namespace::Subscription, channel));
        }

        let mut report = SubscriptionReport::default();
        for target in subscribers {
            let owner = match target.owner(Namespace::Subscription, channel) {
                Ok(owner) => owner,
                Err(err) => {
                    report.failures.push(SubscriberFailure {
                        script: "?".to_string(),
                        message: err.to_string(),
                    });
                    continue;
                }
            };
            let outcome = owner.invoke(target.handle, |lua| {
                let call_args = vec![
                    Value::String(lua.create_string(channel)?),
                    Value::Table(list_to_table(lua, args)?),
                ];
                let values = target.call(lua, channel, call_args)?;
                Ok(result_code(channel, &values, 1)?.unwrap_or(ReturnCode::Ok))
            });
            match outcome {
                Ok(code) => report.delivered.push((owner.alias().to_string(), code)),
                Err(err) => {
                    tracing::warn!(channel, alias = owner.alias(), error = %err, "subscriber failed");
                    report.failures.push(SubscriberFailure {
                        script: owner.alias().to_string(),
                        message: err.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    /// Registered command names, sorted.
    pub fn commands(&self) -> Vec<String> {
        sorted_keys(&self.commands)
    }

    /// Registered CLI hook names, sorted.
    pub fn cli_hooks(&self) -> Vec<String> {
        sorted_keys(&self.cli)
    }

    /// Number of subscribers on `channel`.
    pub fn subscribers(&self, channel: &str) -> usize {
        self.subscriptions
            .lock()
            .map_or(0, |subs| subs.get(channel).map_or(0, Vec::len))
    }

    pub fn has_command(&self, name: &str) -> bool {
        self.commands
            .lock()
            .is_ok_and(|commands| commands.contains_key(name))
    }
}

fn sorted_keys<V>(map: &TimedMutex<HashMap<String, V>>) -> Vec<String> {
    map.lock()
        .map(|entries| {
            let mut keys: Vec<_> = entries.keys().cloned().collect();
            keys.sort();
            keys
        })
        .unwrap_or_default()
}

/// A registration whose engine is gone reports as an unknown name.
fn stale_as_not_found(err: BridgeError, namespace: Namespace, name: &str) -> BridgeError {
    if matches!(err, BridgeError::InvalidInstance) {
        BridgeError::not_found(namespace, name)
    } else {
        err
    }
}

fn result_error(name: &str, position: usize, detail: impl Display) -> BridgeError {
    BridgeError::ScriptRuntime {
        name: name.to_string(),
        message: format!("invalid result #{position}: {detail}"),
    }
}

/// Status at 1-based `position`; `None` when missing or `nil`.
fn result_code(name: &str, values: &[Value<'_>], position: usize) -> Result<Option<ReturnCode>> {
    match values.get(position - 1) {
        None | Some(Value::Nil) => Ok(None),
        Some(value) => code_from_value(value)
            .map(Some)
            .map_err(|detail| result_error(name, position, detail)),
    }
}

/// Text at 1-based `position`; missing or `nil` reads as empty.
fn result_string(name: &str, values: &[Value<'_>], position: usize) -> Result<String> {
    match values.get(position - 1) {
        None | Some(Value::Nil) => Ok(String::new()),
        Some(value) => coerce_string(value).ok_or_else(|| {
            result_error(
                name,
                position,
                format!("expected string, got {}", value.type_name()),
            )
        }),
    }
}

/// Read `(code, message, perf)` from a command's results.
fn read_query_result(name: &str, values: &[Value<'_>]) -> Result<QueryResult> {
    let code = result_code(name, values, 1)?.ok_or_else(|| BridgeError::ScriptRuntime {
        name: name.to_string(),
        message: "command returned no status".to_string(),
    })?;
    let message = result_string(name, values, 2)?;
    let perf = result_string(name, values, 3)?;
    Ok(QueryResult::new(code, message, perf))
}
