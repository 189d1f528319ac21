//! Values that cross the engine boundary.
//!
//! Only strings, integers, booleans and string lists travel between the host
//! and a script. Anything else is rejected with an argument error, except
//! that numbers are accepted where a string is expected (metric values are
//! routinely produced as numbers by scripts).

use crate::error::{BridgeError, Result};
use crate::types::ReturnCode;
use mlua::{Lua, Table, Value};

/// One argument or result value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScriptValue {
    Str(String),
    Int(i64),
    Bool(bool),
    List(Vec<String>),
}

impl ScriptValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::Int(_) => "integer",
            Self::Bool(_) => "boolean",
            Self::List(_) => "list",
        }
    }

    /// Convert into an engine value owned by `lua`.
    pub fn into_lua(self, lua: &Lua) -> mlua::Result<Value<'_>> {
        Ok(match self {
            Self::Str(s) => Value::String(lua.create_string(&s)?),
            Self::Int(i) => Value::Integer(i),
            Self::Bool(b) => Value::Boolean(b),
            Self::List(items) => Value::Table(list_to_table(lua, &items)?),
        })
    }

    /// Convert an engine value, rejecting shapes outside the closed set.
    pub fn from_lua(value: &Value<'_>) -> Result<Self> {
        match value {
            Value::String(s) => Ok(Self::Str(s.to_string_lossy().into_owned())),
            Value::Integer(i) => Ok(Self::Int(*i)),
            Value::Number(n) if is_integral(*n) => Ok(Self::Int(*n as i64)),
            Value::Boolean(b) => Ok(Self::Bool(*b)),
            Value::Table(t) => Ok(Self::List(strings_from_table(t)?)),
            other => Err(BridgeError::argument(format!(
                "unsupported value type: {}",
                other.type_name()
            ))),
        }
    }
}

impl From<&str> for ScriptValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for ScriptValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for ScriptValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for ScriptValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<Vec<String>> for ScriptValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

/// Whole number that fits an `i64` without saturating. `i64::MAX as f64`
/// rounds up to 2^63, so the upper bound is exclusive.
pub(crate) fn is_integral(n: f64) -> bool {
    n.is_finite() && n.fract() == 0.0 && n >= i64::MIN as f64 && n < i64::MAX as f64
}

/// Status given either as a number or as a name (`"warning"`).
///
/// The error is a bare detail; callers prefix it with the position.
pub(crate) fn code_from_value(value: &Value<'_>) -> std::result::Result<ReturnCode, String> {
    match value {
        Value::Integer(i) => Ok(ReturnCode::from_i64(*i)),
        Value::Number(n) if is_integral(*n) => Ok(ReturnCode::from_i64(*n as i64)),
        Value::String(s) => {
            let name = s.to_string_lossy();
            ReturnCode::parse(&name).ok_or_else(|| format!("invalid return code '{name}'"))
        }
        other => Err(format!("expected return code, got {}", other.type_name())),
    }
}

/// Best-effort string view of a value; numbers are formatted the way Lua
/// prints them.
pub(crate) fn coerce_string(value: &Value<'_>) -> Option<String> {
    match value {
        Value::String(s) => Some(s.to_string_lossy().into_owned()),
        Value::Integer(i) => Some(i.to_string()),
        Value::Number(n) if is_integral(*n) => Some(format!("{n:.1}")),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Read a Lua sequence of strings (numbers are coerced).
pub(crate) fn strings_from_table(table: &Table<'_>) -> Result<Vec<String>> {
    let len = table.raw_len();
    let mut items = Vec::with_capacity(len);
    for index in 1..=len {
        let item: Value = table.raw_get(index)?;
        let text = coerce_string(&item).ok_or_else(|| {
            BridgeError::argument(format!(
                "list element {index} must be a string, got {}",
                item.type_name()
            ))
        })?;
        items.push(text);
    }
    Ok(items)
}

pub(crate) fn list_to_table<'lua>(lua: &'lua Lua, items: &[String]) -> mlua::Result<Table<'lua>> {
    lua.create_sequence_from(items.iter().map(String::as_str))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lua() -> Lua {
        Lua::new()
    }

    #[test]
    fn integral_float_becomes_int() {
        assert_eq!(
            ScriptValue::from_lua(&Value::Number(4.0)).unwrap(),
            ScriptValue::Int(4)
        );
    }

    #[test]
    fn fractional_float_is_rejected() {
        let err = ScriptValue::from_lua(&Value::Number(1.5)).unwrap_err();
        assert!(err.to_string().contains("number"));
    }

    #[test]
    fn floats_beyond_i64_are_not_integers() {
        for n in [1e30, 2f64.powi(63), -1e19, f64::INFINITY] {
            assert!(!is_integral(n), "{n} accepted");
            assert!(ScriptValue::from_lua(&Value::Number(n)).is_err());
        }
        assert!(is_integral(-(2f64.powi(63))));
        assert!(is_integral(2f64.powi(62)));
    }

    #[test]
    fn code_from_value_rejects_saturating_floats() {
        assert_eq!(code_from_value(&Value::Number(2.0)), Ok(ReturnCode::Critical));
        assert_eq!(code_from_value(&Value::Integer(9)), Ok(ReturnCode::Unknown));
        let err = code_from_value(&Value::Number(1e30)).unwrap_err();
        assert_eq!(err, "expected return code, got number");
        assert!(code_from_value(&Value::Boolean(true)).is_err());
    }

    #[test]
    fn nil_and_functions_are_rejected() {
        let l = lua();
        assert!(ScriptValue::from_lua(&Value::Nil).is_err());
        let f = l.create_function(|_, ()| Ok(())).unwrap();
        let err = ScriptValue::from_lua(&Value::Function(f)).unwrap_err();
        assert!(err.to_string().contains("function"));
    }

    #[test]
    fn table_with_numbers_coerces_to_strings() {
        let l = lua();
        let t = l.create_table().unwrap();
        t.set(1, "a").unwrap();
        t.set(2, 7).unwrap();
        t.set(3, 2.5).unwrap();
        assert_eq!(
            ScriptValue::from_lua(&Value::Table(t)).unwrap(),
            ScriptValue::List(vec!["a".into(), "7".into(), "2.5".into()])
        );
    }

    #[test]
    fn table_with_nested_table_is_rejected() {
        let l = lua();
        let t = l.create_table().unwrap();
        t.set(1, l.create_table().unwrap()).unwrap();
        let err = strings_from_table(&t).unwrap_err();
        assert!(err.to_string().contains("list element 1"));
    }

    #[test]
    fn coerce_string_formats_like_lua() {
        assert_eq!(coerce_string(&Value::Integer(3)).as_deref(), Some("3"));
        assert_eq!(coerce_string(&Value::Number(3.0)).as_deref(), Some("3.0"));
        assert_eq!(coerce_string(&Value::Boolean(true)), None);
    }

    #[test]
    fn list_into_lua_is_a_sequence() {
        let l = lua();
        let value = ScriptValue::List(vec!["x".into(), "y".into()])
            .into_lua(&l)
            .unwrap();
        match value {
            Value::Table(t) => {
                assert_eq!(t.raw_len(), 2);
                assert_eq!(t.get::<_, String>(2).unwrap(), "y");
            }
            other => panic!("expected table, got {other:?}"),
        }
    }
}
