use ledger_core::{
    BackendError, Cause, Error, Result, Value, error_message_from_ptr, json_to_value,
    value_to_json,
};
use libsqlite3_sys::*;
use std::{
    ffi::{CStr, c_char, c_int, c_void},
    slice,
};

/// Classify a SQLite result code.
pub(crate) fn cause(rc: c_int) -> Cause {
    match rc & 0xff {
        SQLITE_CONSTRAINT => Cause::Constraint,
        SQLITE_ERROR => Cause::Syntax,
        SQLITE_MISMATCH | SQLITE_RANGE | SQLITE_TOOBIG => Cause::Type,
        SQLITE_BUSY | SQLITE_LOCKED => Cause::Conflict,
        SQLITE_CANTOPEN | SQLITE_IOERR | SQLITE_CORRUPT | SQLITE_NOTADB | SQLITE_FULL
        | SQLITE_READONLY | SQLITE_PERM => Cause::Connection,
        _ => Cause::Other,
    }
}

/// Error of the last failed call on `connection`.
pub(crate) fn last_error(connection: *mut sqlite3, rc: c_int) -> Error {
    let message = unsafe { error_message_from_ptr(&sqlite3_errmsg(connection)).to_string() };
    Error::new(BackendError::new(
        cause(rc),
        format!("Error ({rc}): {message}"),
    ))
}

pub(crate) fn extract_name(statement: *mut sqlite3_stmt, index: c_int) -> Result<String> {
    unsafe {
        let name = sqlite3_column_name(statement, index);
        if name.is_null() {
            return Err(Error::msg(format!("Could not read the name of column {index}")));
        }
        Ok(CStr::from_ptr(name).to_str()?.to_string())
    }
}

fn declared_type(statement: *mut sqlite3_stmt, index: c_int) -> Option<String> {
    unsafe {
        let decltype = sqlite3_column_decltype(statement, index);
        (!decltype.is_null()).then(|| CStr::from_ptr(decltype).to_string_lossy().to_uppercase())
    }
}

pub(crate) fn extract_value(statement: *mut sqlite3_stmt, index: c_int) -> Result<Value> {
    unsafe {
        let declared = declared_type(statement, index);
        Ok(match sqlite3_column_type(statement, index) {
            SQLITE_NULL => Value::Null,
            SQLITE_INTEGER => {
                let value = sqlite3_column_int64(statement, index);
                match declared.as_deref() {
                    Some("BOOLEAN" | "BOOL") => Value::Boolean(Some(value != 0)),
                    _ => Value::Int64(Some(value)),
                }
            }
            SQLITE_FLOAT => Value::Float64(Some(sqlite3_column_double(statement, index))),
            SQLITE_TEXT => {
                let text = sqlite3_column_text(statement, index);
                let len = sqlite3_column_bytes(statement, index) as usize;
                let text = if text.is_null() {
                    String::new()
                } else {
                    String::from_utf8(slice::from_raw_parts(text, len).to_vec())?
                };
                match declared.as_deref() {
                    Some("JSON") => serde_json::from_str(&text)
                        .map(json_to_value)
                        .unwrap_or(Value::Varchar(Some(text))),
                    _ => Value::Varchar(Some(text)),
                }
            }
            SQLITE_BLOB => {
                let blob = sqlite3_column_blob(statement, index) as *const u8;
                let len = sqlite3_column_bytes(statement, index) as usize;
                let bytes: Box<[u8]> = if blob.is_null() {
                    Box::default()
                } else {
                    slice::from_raw_parts(blob, len).into()
                };
                Value::Blob(Some(bytes))
            }
            other => {
                return Err(Error::msg(format!(
                    "Unexpected SQLite column type {other} for column {index}"
                )));
            }
        })
    }
}

/// Bind `values` to the parameters of `statement`, in order.
pub(crate) fn bind_values(statement: *mut sqlite3_stmt, values: &[Value]) -> Result<()> {
    for (i, value) in values.iter().enumerate() {
        let index = i as c_int + 1;
        let rc = unsafe {
            match value {
                _ if value.is_null() => sqlite3_bind_null(statement, index),
                Value::Boolean(Some(v)) => sqlite3_bind_int64(statement, index, *v as i64),
                Value::Int64(Some(v)) => sqlite3_bind_int64(statement, index, *v),
                Value::Float64(Some(v)) => sqlite3_bind_double(statement, index, *v),
                Value::Varchar(Some(v)) => bind_text(statement, index, v),
                Value::Blob(Some(v)) => sqlite3_bind_blob(
                    statement,
                    index,
                    v.as_ptr() as *const c_void,
                    v.len() as c_int,
                    SQLITE_TRANSIENT(),
                ),
                Value::List(..) | Value::Map(..) => {
                    let Some(json) = value_to_json(value) else {
                        return Err(Error::new(BackendError::new(
                            Cause::Type,
                            format!("Cannot store {} parameter {index} as a JSON document", value.type_name()),
                        )));
                    };
                    bind_text(statement, index, &json.to_string())
                }
                _ => sqlite3_bind_null(statement, index),
            }
        };
        if rc != SQLITE_OK {
            return Err(last_error(unsafe { sqlite3_db_handle(statement) }, rc)
                .context(format!("While binding parameter {index}")));
        }
    }
    Ok(())
}

unsafe fn bind_text(statement: *mut sqlite3_stmt, index: c_int, text: &str) -> c_int {
    unsafe {
        sqlite3_bind_text(
            statement,
            index,
            text.as_ptr() as *const c_char,
            text.len() as c_int,
            SQLITE_TRANSIENT(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn causes() {
        assert_eq!(cause(SQLITE_CONSTRAINT_UNIQUE), Cause::Constraint);
        assert_eq!(cause(SQLITE_CONSTRAINT_FOREIGNKEY), Cause::Constraint);
        assert_eq!(cause(SQLITE_BUSY_SNAPSHOT), Cause::Conflict);
        assert_eq!(cause(SQLITE_ERROR), Cause::Syntax);
        assert_eq!(cause(SQLITE_IOERR_WRITE), Cause::Connection);
        assert_eq!(cause(SQLITE_INTERRUPT), Cause::Other);
    }
}
