use crate::Value;
use serde_json::{Map, Number, Value as JsonValue};
use std::{
    borrow::Cow,
    ffi::{CStr, c_char},
    ptr,
};

/// Convert a `Value` into JSON, `None` when the value has no JSON representation (blobs).
pub fn value_to_json(v: &Value) -> Option<JsonValue> {
    Some(match v {
        _ if v.is_null() => JsonValue::Null,
        Value::Boolean(Some(v)) => JsonValue::Bool(*v),
        Value::Int64(Some(v)) => JsonValue::Number((*v).into()),
        Value::Float64(Some(v)) => JsonValue::Number(Number::from_f64(*v)?),
        Value::Varchar(Some(v)) => JsonValue::String(v.clone()),
        Value::List(Some(v)) => {
            JsonValue::Array(v.iter().map(value_to_json).collect::<Option<_>>()?)
        }
        Value::Map(Some(v)) => {
            let mut map = Map::new();
            for (k, v) in v.iter() {
                map.insert(k.clone(), value_to_json(v)?);
            }
            JsonValue::Object(map)
        }
        _ => {
            return None;
        }
    })
}

/// Convert a JSON document into the tagged `Value` representation.
pub fn json_to_value(v: JsonValue) -> Value {
    match v {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(v) => Value::Boolean(Some(v)),
        JsonValue::Number(v) => match v.as_i64() {
            Some(v) => Value::Int64(Some(v)),
            None => Value::Float64(v.as_f64()),
        },
        JsonValue::String(v) => Value::Varchar(Some(v)),
        JsonValue::Array(v) => Value::List(Some(v.into_iter().map(json_to_value).collect())),
        JsonValue::Object(v) => Value::Map(Some(
            v.into_iter().map(|(k, v)| (k, json_to_value(v))).collect(),
        )),
    }
}

/// Longest prefix of `value` that is at most `len` bytes and ends on a char boundary.
pub fn truncate_str(value: &str, len: usize) -> &str {
    if value.len() <= len {
        return value;
    }
    let mut end = len;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

pub fn error_message_from_ptr<'a>(ptr: &'a *const c_char) -> Cow<'a, str> {
    unsafe {
        if *ptr != ptr::null() {
            CStr::from_ptr(*ptr).to_string_lossy()
        } else {
            Cow::Borrowed("Unknown error: could not extract the error message")
        }
    }
}

#[macro_export]
/// Truncate long strings for logging and error messages purpose.
///
/// Returns a `format_args!` that yields at most 497 bytes from the start
/// of the input followed by `...` when truncation occurred.
///
/// # Examples
/// ```
/// use ledger_core::truncate_long;
/// let short = "SELECT 1";
/// assert_eq!(format!("{}", truncate_long!(short)), "SELECT 1");
/// let long = format!("SELECT {}", "X".repeat(600));
/// let logged = format!("{}", truncate_long!(long));
/// assert!(logged.starts_with("SELECT XXXXXX"));
/// assert!(logged.ends_with("...\n"));
/// ```
macro_rules! truncate_long {
    ($query:expr) => {
        format_args!(
            "{}{}",
            $crate::truncate_str(&$query, 497).trim(),
            if $query.len() > 497 { "...\n" } else { "" },
        )
    };
}

/// Sends the value through the channel and logs in case of error.
///
/// *Example*:
/// ```ignore
/// send_value!(tx, Ok(QueryResult::Row(row)));
/// ```
#[macro_export]
macro_rules! send_value {
    ($tx:ident, $value:expr) => {{
        if let Err(e) = $tx.send($value) {
            log::error!("{e:#}");
        }
    }};
}

#[macro_export]
/// Implement `Executor` for a transaction type by forwarding to the connection it borrows.
///
/// ```ignore
/// pub struct YourDBTransaction<'c> {
///     connection: &'c mut YourDBConnection,
/// }
///
/// impl_executor_transaction!(YourDBDriver, YourDBTransaction<'c>, connection);
/// ```
macro_rules! impl_executor_transaction {
    ($driver:ty, $transaction:ident $(< $lt:lifetime >)?, $connection:ident) => {
        impl $(<$lt>)? ::ledger_core::Executor for $transaction $(<$lt>)? {
            type Driver = $driver;

            fn run<'s>(
                &'s mut self,
                statement: ::ledger_core::Statement,
            ) -> impl ::ledger_core::stream::Stream<
                Item = ::ledger_core::Result<::ledger_core::QueryResult>,
            > + Send {
                self.$connection.run(statement)
            }
        }
    };
}
