//! Call frame of a native function entered from Lua.
//!
//! `LuaFrame` presents the arguments of one native call as a stack: values
//! are popped from the top (the last argument first) and results are pushed
//! in call order. Callers check `argument_count()` before popping; popping an
//! empty frame is an argument error rather than a fault.

use crate::error::{BridgeError, Result};
use crate::types::ReturnCode;
use crate::value::{
    ScriptValue, code_from_value, coerce_string, is_integral, list_to_table, strings_from_table,
};
use mlua::{Lua, MultiValue, RegistryKey, Value};

/// Field stamped on the script-visible objects so that `obj:method()` calls
/// can be told apart from `obj.method()` calls.
pub(crate) const OBJECT_TAG: &str = "__bridge_object";

pub struct LuaFrame<'lua> {
    lua: &'lua Lua,
    args: Vec<Value<'lua>>,
    results: Vec<Value<'lua>>,
}

impl<'lua> LuaFrame<'lua> {
    pub fn new(lua: &'lua Lua, args: MultiValue<'lua>) -> Self {
        Self {
            lua,
            args: args.into_vec(),
            results: Vec::new(),
        }
    }

    /// Frame for a method of the script-visible object `object`; a leading
    /// receiver argument (`core:simple_query(...)`) is dropped.
    pub fn for_method(lua: &'lua Lua, args: MultiValue<'lua>, object: &str) -> Self {
        let mut frame = Self::new(lua, args);
        let is_receiver = match frame.args.first() {
            Some(Value::Table(t)) => t
                .raw_get::<_, Option<String>>(OBJECT_TAG)
                .ok()
                .flatten()
                .is_some_and(|tag| tag == object),
            _ => false,
        };
        if is_receiver {
            frame.args.remove(0);
        }
        frame
    }

    pub fn lua(&self) -> &'lua Lua {
        self.lua
    }

    /// Number of arguments still on the frame.
    pub fn argument_count(&self) -> usize {
        self.args.len()
    }

    /// Number of results pushed so far.
    pub fn result_count(&self) -> usize {
        self.results.len()
    }

    pub fn is_string(&self) -> bool {
        matches!(self.args.last(), Some(Value::String(_)))
    }

    pub fn is_table(&self) -> bool {
        matches!(self.args.last(), Some(Value::Table(_)))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self.args.last(), Some(Value::Nil))
    }

    pub fn is_function(&self) -> bool {
        matches!(self.args.last(), Some(Value::Function(_)))
    }

    /// Build a script-visible error carrying `message`.
    pub fn error(&self, message: impl Into<String>) -> BridgeError {
        BridgeError::argument(message)
    }

    fn pop_raw(&mut self, expected: &str) -> Result<(usize, Value<'lua>)> {
        let position = self.args.len();
        let value = self.args.pop().ok_or_else(|| {
            BridgeError::argument(format!("missing argument: expected {expected}"))
        })?;
        Ok((position, value))
    }

    fn type_error(position: usize, expected: &str, got: &Value<'_>) -> BridgeError {
        BridgeError::argument(format!(
            "bad argument #{position}: expected {expected}, got {}",
            got.type_name()
        ))
    }

    pub fn pop_string(&mut self) -> Result<String> {
        let (position, value) = self.pop_raw("string")?;
        coerce_string(&value).ok_or_else(|| Self::type_error(position, "string", &value))
    }

    /// Pop a string without UTF-8 interpretation.
    pub fn pop_bytes(&mut self) -> Result<Vec<u8>> {
        let (position, value) = self.pop_raw("string")?;
        match &value {
            Value::String(s) => Ok(s.as_bytes().to_vec()),
            other => coerce_string(other)
                .map(String::into_bytes)
                .ok_or_else(|| Self::type_error(position, "string", &value)),
        }
    }

    pub fn pop_int(&mut self) -> Result<i64> {
        let (position, value) = self.pop_raw("integer")?;
        match value {
            Value::Integer(i) => Ok(i),
            Value::Number(n) if is_integral(n) => Ok(n as i64),
            other => Err(Self::type_error(position, "integer", &other)),
        }
    }

    pub fn pop_bool(&mut self) -> Result<bool> {
        let (position, value) = self.pop_raw("boolean")?;
        match value {
            Value::Boolean(b) => Ok(b),
            other => Err(Self::type_error(position, "boolean", &other)),
        }
    }

    /// Pop a status given either as a number or as a name (`"warning"`).
    pub fn pop_code(&mut self) -> Result<ReturnCode> {
        let (position, value) = self.pop_raw("return code")?;
        code_from_value(&value)
            .map_err(|detail| BridgeError::argument(format!("bad argument #{position}: {detail}")))
    }

    pub fn pop_array(&mut self) -> Result<Vec<String>> {
        let (position, value) = self.pop_raw("table")?;
        match &value {
            Value::Table(t) => strings_from_table(t),
            other => Err(Self::type_error(position, "table", other)),
        }
    }

    /// Pop a callable and anchor it in the engine registry.
    ///
    /// A string names a global function.
    pub fn pop_function_ref(&mut self) -> Result<RegistryKey> {
        let (position, value) = self.pop_raw("function")?;
        let function = match value {
            Value::Function(f) => f,
            Value::String(name) => {
                let name = name.to_string_lossy().into_owned();
                match self.lua.globals().raw_get::<_, Value>(name.as_str())? {
                    Value::Function(f) => f,
                    _ => {
                        return Err(BridgeError::argument(format!(
                            "Invalid argument not a function: {name}"
                        )));
                    }
                }
            }
            other => return Err(Self::type_error(position, "function", &other)),
        };
        Ok(self.lua.create_registry_value(function)?)
    }

    /// Pop a receiver object (table or userdata) and anchor it.
    pub fn pop_instance_ref(&mut self) -> Result<RegistryKey> {
        let (position, value) = self.pop_raw("object")?;
        match value {
            Value::Table(_) | Value::UserData(_) => Ok(self.lua.create_registry_value(value)?),
            other => Err(Self::type_error(position, "object", &other)),
        }
    }

    /// Pop a string, treating `nil` as absent.
    pub fn pop_opt_string(&mut self) -> Result<Option<String>> {
        if matches!(self.args.last(), Some(Value::Nil)) {
            self.args.pop();
            return Ok(None);
        }
        self.pop_string().map(Some)
    }

    /// Consume every remaining argument as display text, in call order.
    pub fn drain_display(&mut self) -> Vec<String> {
        self.args
            .drain(..)
            .map(|value| match &value {
                Value::Nil => "nil".to_string(),
                Value::Boolean(b) => b.to_string(),
                other => coerce_string(other).unwrap_or_else(|| other.type_name().to_string()),
            })
            .collect()
    }

    /// Pop any value of the closed boundary set.
    pub fn pop_value(&mut self) -> Result<ScriptValue> {
        let (position, value) = self.pop_raw("value")?;
        ScriptValue::from_lua(&value).map_err(|err| {
            BridgeError::argument(format!("bad argument #{position}: {err}"))
        })
    }

    pub fn push_string(&mut self, value: &str) -> Result<()> {
        self.push_raw_string(value.as_bytes())
    }

    pub fn push_raw_string(&mut self, value: &[u8]) -> Result<()> {
        let s = self.lua.create_string(value)?;
        self.results.push(Value::String(s));
        Ok(())
    }

    pub fn push_int(&mut self, value: i64) {
        self.results.push(Value::Integer(value));
    }

    pub fn push_bool(&mut self, value: bool) {
        self.results.push(Value::Boolean(value));
    }

    pub fn push_code(&mut self, code: ReturnCode) {
        self.push_int(code.as_i64());
    }

    pub fn push_array(&mut self, items: &[String]) -> Result<()> {
        let table = list_to_table(self.lua, items)?;
        self.results.push(Value::Table(table));
        Ok(())
    }

    pub fn push_value(&mut self, value: ScriptValue) -> Result<()> {
        let value = value.into_lua(self.lua)?;
        self.results.push(value);
        Ok(())
    }

    /// Line currently executing in the Lua caller, when known.
    pub fn current_line(&self) -> Option<u32> {
        self.lua
            .inspect_stack(1)
            .and_then(|debug| u32::try_from(debug.curr_line()).ok())
    }

    /// Hand the accumulated results back to the engine.
    pub fn into_results(self) -> MultiValue<'lua> {
        MultiValue::from_vec(self.results)
    }
}
