//! Natives installed into every script engine.
//!
//! The script-visible surface is a closed set of operations. `NATIVES` maps
//! each `(object, name)` pair to a `NativeOp`; `install` turns the table into
//! Lua functions on the `core`, `registry` and `settings` objects and on the
//! convenience table. Every function resolves its script instance from the
//! calling engine, runs behind a panic boundary and is recorded in the audit
//! trail.

use crate::audit::AuditOutcome;
use crate::bridge::BridgeContext;
use crate::core_api::CoreApi;
use crate::error::{BridgeError, Result};
use crate::frame::{LuaFrame, OBJECT_TAG};
use crate::types::{CommandShape, LogLevel};
use mlua::{Function, Lua, MultiValue, RegistryKey, Table};
use std::ops::RangeInclusive;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// Script-visible object a native is attached to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NativeObject {
    Core,
    Registry,
    Settings,
    /// Global table of shorthand functions; its name comes from the config.
    Convenience,
}

impl NativeObject {
    const ALL: [Self; 4] = [Self::Core, Self::Registry, Self::Settings, Self::Convenience];

    fn tag(self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Registry => "registry",
            Self::Settings => "settings",
            Self::Convenience => "convenience",
        }
    }

    /// Legacy constructor returning the object, e.g. `Core()`.
    fn constructor(self) -> Option<&'static str> {
        match self {
            Self::Core => Some("Core"),
            Self::Registry => Some("Registry"),
            Self::Settings => Some("Settings"),
            Self::Convenience => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum NativeOp {
    SimpleQuery,
    RawQuery,
    SimpleExec,
    Exec,
    SimpleSubmit,
    Submit,
    Reload,
    Log,
    RegisterQuery(CommandShape),
    RegisterCmdline,
    RegisterSimpleCmdline,
    RegisterSubscription,
    RegisterSimpleSubscription,
    GetSection,
    GetString,
    SetString,
    GetBool,
    SetBool,
    GetInt,
    SetInt,
    SaveSettings,
    RegisterPath,
    RegisterKey,
    LogAt(LogLevel),
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct NativeEntry {
    pub object: NativeObject,
    pub name: &'static str,
    pub op: NativeOp,
}

const fn native(object: NativeObject, name: &'static str, op: NativeOp) -> NativeEntry {
    NativeEntry { object, name, op }
}

use NativeObject::{Convenience, Core, Registry, Settings};

pub(crate) const NATIVES: &[NativeEntry] = &[
    native(Core, "simple_query", NativeOp::SimpleQuery),
    native(Core, "query", NativeOp::RawQuery),
    native(Core, "simple_exec", NativeOp::SimpleExec),
    native(Core, "exec", NativeOp::Exec),
    native(Core, "simple_submit", NativeOp::SimpleSubmit),
    native(Core, "submit", NativeOp::Submit),
    native(Core, "reload", NativeOp::Reload),
    native(Core, "log", NativeOp::Log),
    native(Registry, "query", NativeOp::RegisterQuery(CommandShape::Full)),
    native(Registry, "simple_query", NativeOp::RegisterQuery(CommandShape::Simple)),
    native(Registry, "cmdline", NativeOp::RegisterCmdline),
    native(Registry, "simple_cmdline", NativeOp::RegisterSimpleCmdline),
    native(Registry, "subscription", NativeOp::RegisterSubscription),
    native(Registry, "simple_subscription", NativeOp::RegisterSimpleSubscription),
    native(Settings, "get_section", NativeOp::GetSection),
    native(Settings, "get_string", NativeOp::GetString),
    native(Settings, "set_string", NativeOp::SetString),
    native(Settings, "get_bool", NativeOp::GetBool),
    native(Settings, "set_bool", NativeOp::SetBool),
    native(Settings, "get_int", NativeOp::GetInt),
    native(Settings, "set_int", NativeOp::SetInt),
    native(Settings, "save", NativeOp::SaveSettings),
    native(Settings, "register_path", NativeOp::RegisterPath),
    native(Settings, "register_key", NativeOp::RegisterKey),
    native(Convenience, "execute", NativeOp::SimpleQuery),
    native(Convenience, "register", NativeOp::RegisterQuery(CommandShape::Simple)),
    native(Convenience, "info", NativeOp::LogAt(LogLevel::Info)),
    native(Convenience, "print", NativeOp::LogAt(LogLevel::Info)),
    native(Convenience, "error", NativeOp::LogAt(LogLevel::Error)),
    native(Convenience, "getSetting", NativeOp::GetString),
    native(Convenience, "getSection", NativeOp::GetSection),
];

fn global_name(object: NativeObject, ctx: &BridgeContext) -> &str {
    match object {
        Convenience => ctx.config.convenience_table.as_str(),
        other => other.tag(),
    }
}

/// Install the script-visible objects into the globals of `lua`.
pub(crate) fn install(lua: &Lua, ctx: &Arc<BridgeContext>) -> Result<()> {
    let globals = lua.globals();
    for object in NativeObject::ALL {
        let prefix = global_name(object, ctx);
        let table = lua.create_table()?;
        table.raw_set(OBJECT_TAG, object.tag())?;
        for entry in NATIVES.iter().filter(|entry| entry.object == object) {
            let qualified = format!("{prefix}.{}", entry.name);
            table.raw_set(entry.name, native_function(lua, ctx, *entry, qualified)?)?;
        }
        if let Some(constructor) = object.constructor() {
            let slot = format!("script_bridge.{}", object.tag());
            lua.set_named_registry_value(&slot, table.clone())?;
            let make = lua.create_function(move |lua, _: MultiValue| {
                lua.named_registry_value::<Table>(&slot)
            })?;
            globals.raw_set(constructor, make)?;
        }
        globals.raw_set(prefix, table)?;
    }
    Ok(())
}

fn native_function<'lua>(
    lua: &'lua Lua,
    ctx: &Arc<BridgeContext>,
    entry: NativeEntry,
    qualified: String,
) -> Result<Function<'lua>> {
    let ctx = Arc::clone(ctx);
    let function = lua.create_function(move |lua, args: MultiValue| {
        call_native(&ctx, entry, &qualified, lua, args)
    })?;
    Ok(function)
}

/// Run one native call behind the fault boundary.
fn call_native<'lua>(
    ctx: &BridgeContext,
    entry: NativeEntry,
    qualified: &str,
    lua: &'lua Lua,
    args: MultiValue<'lua>,
) -> mlua::Result<MultiValue<'lua>> {
    let mut script = String::from("?");
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        let api = CoreApi::resolve(&ctx.manager, lua)?;
        script = api.alias().to_string();
        let mut frame = LuaFrame::for_method(lua, args, entry.object.tag());
        run(entry.op, &api, &mut frame)?;
        Ok::<_, BridgeError>(frame.into_results())
    }));

    match outcome {
        Ok(Ok(results)) => {
            ctx.audit.record(&script, qualified, AuditOutcome::Ok);
            Ok(results)
        }
        Ok(Err(err)) => {
            ctx.audit
                .record(&script, qualified, AuditOutcome::Error(err.to_string()));
            Err(script_visible(err, &script, qualified))
        }
        Err(_) => {
            ctx.audit.record(&script, qualified, AuditOutcome::Fault);
            tracing::error!(alias = %script, native = qualified, "native call panicked");
            Err(unknown_exception(qualified))
        }
    }
}

fn unknown_exception(qualified: &str) -> mlua::Error {
    mlua::Error::RuntimeError(format!("Unknown exception in: {qualified}"))
}

/// Contract violations keep their message; anything else is reported as an
/// unknown exception attributed to the native.
fn script_visible(err: BridgeError, script: &str, qualified: &str) -> mlua::Error {
    match err {
        BridgeError::Argument(_) | BridgeError::UnsupportedApi(_) | BridgeError::InvalidInstance => {
            err.into()
        }
        other => {
            tracing::warn!(alias = %script, native = qualified, error = %other, "native call failed");
            unknown_exception(qualified)
        }
    }
}

fn run(op: NativeOp, api: &CoreApi, frame: &mut LuaFrame<'_>) -> Result<()> {
    match op {
        NativeOp::SimpleQuery => simple_query(api, frame),
        NativeOp::RawQuery => raw_query(api, frame),
        NativeOp::SimpleExec => simple_exec(api, frame),
        NativeOp::Exec => api.exec(),
        NativeOp::SimpleSubmit => simple_submit(api, frame),
        NativeOp::Submit => api.submit(),
        NativeOp::Reload => reload(api, frame),
        NativeOp::Log => log(api, frame),
        NativeOp::RegisterQuery(shape) => register_query(api, frame, shape),
        NativeOp::RegisterCmdline => api.unsupported("cmdline"),
        NativeOp::RegisterSimpleCmdline => {
            let (name, callback) = read_named_callback(frame, "simple_cmdline(name, function)")?;
            api.register_cli(&name, callback)
        }
        NativeOp::RegisterSubscription => api.unsupported("subscription"),
        NativeOp::RegisterSimpleSubscription => {
            let (channel, callback) =
                read_named_callback(frame, "simple_subscription(channel, function)")?;
            api.register_subscription(&channel, callback)
        }
        NativeOp::GetSection => get_section(api, frame),
        NativeOp::GetString => get_string(api, frame),
        NativeOp::SetString => {
            expect_args(frame, 3..=3, "set_string(section, key, value)")?;
            let value = frame.pop_string()?;
            let (section, key) = pop_section_key(frame)?;
            api.set_setting_string(&section, &key, &value);
            Ok(())
        }
        NativeOp::GetBool => {
            expect_args(frame, 2..=3, "get_bool(section, key, [value])")?;
            let default_value = if frame.argument_count() == 3 {
                frame.pop_bool()?
            } else {
                false
            };
            let (section, key) = pop_section_key(frame)?;
            frame.push_bool(api.get_setting_bool(&section, &key, default_value));
            Ok(())
        }
        NativeOp::SetBool => {
            expect_args(frame, 3..=3, "set_bool(section, key, value)")?;
            let value = frame.pop_bool()?;
            let (section, key) = pop_section_key(frame)?;
            api.set_setting_bool(&section, &key, value);
            Ok(())
        }
        NativeOp::GetInt => {
            expect_args(frame, 2..=3, "get_int(section, key, [value])")?;
            let default_value = if frame.argument_count() == 3 {
                frame.pop_int()?
            } else {
                0
            };
            let (section, key) = pop_section_key(frame)?;
            frame.push_int(api.get_setting_int(&section, &key, default_value));
            Ok(())
        }
        NativeOp::SetInt => {
            expect_args(frame, 3..=3, "set_int(section, key, value)")?;
            let value = frame.pop_int()?;
            let (section, key) = pop_section_key(frame)?;
            api.set_setting_int(&section, &key, value);
            Ok(())
        }
        NativeOp::SaveSettings => {
            api.save_settings();
            Ok(())
        }
        NativeOp::RegisterPath => {
            expect_args(frame, 3..=3, "register_path(path, title, description)")?;
            let description = frame.pop_string()?;
            let title = frame.pop_string()?;
            let path = frame.pop_string()?;
            api.register_settings_path(&path, &title, &description);
            Ok(())
        }
        NativeOp::RegisterKey => register_key(api, frame),
        NativeOp::LogAt(level) => {
            let line = frame.current_line();
            let message = frame.drain_display().concat();
            api.log(level, line, &message);
            Ok(())
        }
    }
}

fn expect_args(frame: &LuaFrame<'_>, allowed: RangeInclusive<usize>, usage: &str) -> Result<()> {
    if allowed.contains(&frame.argument_count()) {
        Ok(())
    } else {
        Err(frame.error(format!("Incorrect syntax: {usage}")))
    }
}

fn pop_section_key(frame: &mut LuaFrame<'_>) -> Result<(String, String)> {
    let key = frame.pop_string()?;
    let section = frame.pop_string()?;
    Ok((section, key))
}

// ── core ─────────────────────────────────────────────────────

/// `simple_query(command, ...)`: each argument after the command is a string
/// or a list of strings; lists are flattened in place.
fn simple_query(api: &CoreApi, frame: &mut LuaFrame<'_>) -> Result<()> {
    if frame.argument_count() == 0 {
        return Err(frame.error("simple_query requires at least 1 argument"));
    }
    let mut chunks = Vec::with_capacity(frame.argument_count() - 1);
    while frame.argument_count() > 1 {
        if frame.is_table() {
            chunks.push(frame.pop_array()?);
        } else {
            chunks.push(vec![frame.pop_string()?]);
        }
    }
    let command = frame.pop_string()?;
    let args: Vec<String> = chunks.into_iter().rev().flatten().collect();

    let result = api.simple_query(&command, &args);
    frame.push_code(result.code);
    frame.push_string(&result.message)?;
    frame.push_string(&result.perf)
}

fn raw_query(api: &CoreApi, frame: &mut LuaFrame<'_>) -> Result<()> {
    expect_args(frame, 2..=2, "query(command, request)")?;
    let request = frame.pop_bytes()?;
    let command = frame.pop_string()?;
    let (code, response) = api.raw_query(&command, &request);
    frame.push_code(code);
    frame.push_raw_string(&response)
}

fn simple_exec(api: &CoreApi, frame: &mut LuaFrame<'_>) -> Result<()> {
    expect_args(frame, 3..=3, "simple_exec(target, command, arguments)")?;
    let args = frame.pop_array()?;
    let command = frame.pop_string()?;
    let target = frame.pop_string()?;
    let result = api.simple_exec(&target, &command, &args);
    frame.push_code(result.code);
    frame.push_array(&result.lines)
}

fn simple_submit(api: &CoreApi, frame: &mut LuaFrame<'_>) -> Result<()> {
    expect_args(frame, 5..=5, "simple_submit(channel, command, code, message, perf)")?;
    let perf = frame.pop_string()?;
    let message = frame.pop_string()?;
    let code = frame.pop_code()?;
    let command = frame.pop_string()?;
    let channel = frame.pop_string()?;
    let result = api.simple_submit(&channel, &command, code, &message, &perf);
    frame.push_code(result.code);
    frame.push_string(&result.message)
}

fn reload(api: &CoreApi, frame: &mut LuaFrame<'_>) -> Result<()> {
    expect_args(frame, 0..=1, "reload([module])")?;
    let module = if frame.argument_count() == 1 {
        frame.pop_opt_string()?
    } else {
        None
    };
    api.reload(module.as_deref());
    Ok(())
}

/// `log([level], message)`
fn log(api: &CoreApi, frame: &mut LuaFrame<'_>) -> Result<()> {
    expect_args(frame, 1..=2, "log([level], message)")?;
    let line = frame.current_line();
    let message = frame.pop_string()?;
    let level = if frame.argument_count() > 0 {
        LogLevel::parse(&frame.pop_string()?)
    } else {
        LogLevel::Info
    };
    api.log(level, line, &message);
    Ok(())
}

// ── registry ─────────────────────────────────────────────────

/// `(name, fn)`, `(name, fn, description)` or
/// `(name, receiver, fn, description)`.
fn register_query(api: &CoreApi, frame: &mut LuaFrame<'_>, shape: CommandShape) -> Result<()> {
    let count = frame.argument_count();
    if !(2..=4).contains(&count) {
        return Err(frame.error(format!(
            "Invalid number of arguments: {count} expected 2-4 arguments"
        )));
    }
    let description = if count > 2 {
        Some(
            frame
                .pop_string()
                .map_err(|_| BridgeError::argument("Invalid description"))?,
        )
    } else {
        None
    };
    let callback = frame.pop_function_ref()?;
    let receiver = if count > 3 {
        Some(
            frame
                .pop_instance_ref()
                .map_err(|_| BridgeError::argument("Invalid object"))?,
        )
    } else {
        None
    };
    let name = frame
        .pop_string()
        .map_err(|_| BridgeError::argument("Invalid command"))?;
    api.register_command(&name, receiver, callback, description.as_deref(), shape)
}

fn read_named_callback(frame: &mut LuaFrame<'_>, usage: &str) -> Result<(String, RegistryKey)> {
    expect_args(frame, 2..=2, usage)?;
    let callback = frame.pop_function_ref()?;
    let name = frame.pop_string()?;
    Ok((name, callback))
}

// ── settings ─────────────────────────────────────────────────

fn get_section(api: &CoreApi, frame: &mut LuaFrame<'_>) -> Result<()> {
    expect_args(frame, 0..=1, "get_section([path])")?;
    let path = if frame.argument_count() == 1 {
        frame.pop_opt_string()?.unwrap_or_default()
    } else {
        String::new()
    };
    let keys = api.get_settings_section(&path);
    frame.push_array(&keys)
}

fn get_string(api: &CoreApi, frame: &mut LuaFrame<'_>) -> Result<()> {
    expect_args(frame, 2..=3, "get_string(section, key, [value])")?;
    let default_value = if frame.argument_count() == 3 {
        frame.pop_opt_string()?.unwrap_or_default()
    } else {
        String::new()
    };
    let (section, key) = pop_section_key(frame)?;
    let value = api.get_setting_string(&section, &key, &default_value);
    frame.push_string(&value)
}

fn register_key(api: &CoreApi, frame: &mut LuaFrame<'_>) -> Result<()> {
    expect_args(
        frame,
        6..=6,
        "register_key(path, key, type, title, description, default)",
    )?;
    let default_value = frame.pop_string()?;
    let description = frame.pop_string()?;
    let title = frame.pop_string()?;
    let key_type = frame.pop_string()?;
    let key = frame.pop_string()?;
    let path = frame.pop_string()?;
    api.register_settings_key(&path, &key, &key_type, &title, &description, &default_value);
    Ok(())
}
