use crate::{Error, Result, Value, json_to_value, value_to_json};
use std::{any, borrow::Cow, collections::BTreeMap};

/// Convert both ways between Rust types and `Value`.
pub trait AsValue {
    /// Return a NULL equivalent variant for this type.
    fn as_empty_value() -> Value;
    /// Convert into owned `Value`.
    fn as_value(self) -> Value;
    /// Try to convert a dynamic `Value` into `Self`.
    fn try_from_value(value: Value) -> Result<Self>
    where
        Self: Sized;
}

fn mismatch<T>(value: &Value) -> Error {
    Error::msg(format!(
        "Cannot convert {value:?} to {}",
        any::type_name::<T>()
    ))
}

impl AsValue for Value {
    fn as_empty_value() -> Value {
        Value::Null
    }
    fn as_value(self) -> Value {
        self
    }
    fn try_from_value(value: Value) -> Result<Self> {
        Ok(value)
    }
}

impl AsValue for bool {
    fn as_empty_value() -> Value {
        Value::Boolean(None)
    }
    fn as_value(self) -> Value {
        Value::Boolean(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Boolean(Some(v)) => Ok(v),
            // Backends without a boolean type store 0 and 1
            Value::Int64(Some(v)) => Ok(v != 0),
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

macro_rules! impl_as_value_integer {
    ($($source:ty),+ $(,)?) => {$(
        impl AsValue for $source {
            fn as_empty_value() -> Value {
                Value::Int64(None)
            }
            fn as_value(self) -> Value {
                Value::Int64(Some(self as _))
            }
            fn try_from_value(value: Value) -> Result<Self> {
                let Some(integer) = value.as_i64() else {
                    return Err(mismatch::<Self>(&value));
                };
                <$source>::try_from(integer).map_err(|_| {
                    Error::msg(format!(
                        "Value {integer} is out of range for {}",
                        any::type_name::<Self>(),
                    ))
                })
            }
        }
    )+};
}
impl_as_value_integer!(i8, i16, i32, i64, u8, u16, u32);

macro_rules! impl_as_value_float {
    ($($source:ty),+ $(,)?) => {$(
        impl AsValue for $source {
            fn as_empty_value() -> Value {
                Value::Float64(None)
            }
            fn as_value(self) -> Value {
                Value::Float64(Some(self as _))
            }
            fn try_from_value(value: Value) -> Result<Self> {
                match value {
                    Value::Float64(Some(v)) => Ok(v as _),
                    Value::Int64(Some(v)) => Ok(v as _),
                    _ => Err(mismatch::<Self>(&value)),
                }
            }
        }
    )+};
}
impl_as_value_float!(f32, f64);

impl AsValue for String {
    fn as_empty_value() -> Value {
        Value::Varchar(None)
    }
    fn as_value(self) -> Value {
        Value::Varchar(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Varchar(Some(v)) => Ok(v),
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

impl AsValue for &'static str {
    fn as_empty_value() -> Value {
        Value::Varchar(None)
    }
    fn as_value(self) -> Value {
        Value::Varchar(Some(self.into()))
    }
    fn try_from_value(_value: Value) -> Result<Self> {
        Err(Error::msg(
            "Cannot get a string reference from a owned value",
        ))
    }
}

impl AsValue for Cow<'static, str> {
    fn as_empty_value() -> Value {
        Value::Varchar(None)
    }
    fn as_value(self) -> Value {
        Value::Varchar(Some(self.into_owned()))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        String::try_from_value(value).map(Into::into)
    }
}

impl AsValue for Box<[u8]> {
    fn as_empty_value() -> Value {
        Value::Blob(None)
    }
    fn as_value(self) -> Value {
        Value::Blob(Some(self))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Blob(Some(v)) => Ok(v),
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

impl<T: AsValue> AsValue for Vec<T> {
    fn as_empty_value() -> Value {
        Value::List(None)
    }
    fn as_value(self) -> Value {
        Value::List(Some(self.into_iter().map(AsValue::as_value).collect()))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::List(Some(v)) => v.into_iter().map(T::try_from_value).collect(),
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

impl<V: AsValue> AsValue for BTreeMap<String, V> {
    fn as_empty_value() -> Value {
        Value::Map(None)
    }
    fn as_value(self) -> Value {
        Value::Map(Some(
            self.into_iter().map(|(k, v)| (k, v.as_value())).collect(),
        ))
    }
    fn try_from_value(value: Value) -> Result<Self> {
        match value {
            Value::Map(Some(v)) => v
                .into_iter()
                .map(|(k, v)| Ok((k, V::try_from_value(v)?)))
                .collect(),
            _ => Err(mismatch::<Self>(&value)),
        }
    }
}

impl<T: AsValue> AsValue for Option<T> {
    fn as_empty_value() -> Value {
        T::as_empty_value()
    }
    fn as_value(self) -> Value {
        match self {
            Some(v) => v.as_value(),
            None => T::as_empty_value(),
        }
    }
    fn try_from_value(value: Value) -> Result<Self> {
        Ok(if value.is_null() {
            None
        } else {
            Some(T::try_from_value(value)?)
        })
    }
}

impl AsValue for serde_json::Value {
    fn as_empty_value() -> Value {
        Value::Null
    }
    fn as_value(self) -> Value {
        json_to_value(self)
    }
    fn try_from_value(value: Value) -> Result<Self> {
        value_to_json(&value).ok_or_else(|| mismatch::<Self>(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_check_range() {
        assert_eq!(u8::try_from_value(Value::Int64(Some(200))).unwrap(), 200);
        assert!(u8::try_from_value(Value::Int64(Some(300))).is_err());
        assert_eq!(i32::try_from_value(Value::Float64(Some(7.0))).unwrap(), 7);
        assert!(i32::try_from_value(Value::Float64(Some(7.5))).is_err());
    }

    #[test]
    fn booleans_from_integers() {
        assert!(bool::try_from_value(Value::Int64(Some(1))).unwrap());
        assert!(!bool::try_from_value(Value::Int64(Some(0))).unwrap());
        assert!(bool::try_from_value(Value::Varchar(Some("true".into()))).is_err());
    }

    #[test]
    fn option_maps_null() {
        assert_eq!(
            Option::<String>::try_from_value(Value::Varchar(None)).unwrap(),
            None
        );
        assert_eq!(Option::<i64>::None.as_value(), Value::Int64(None));
        assert_eq!(
            Option::<i64>::try_from_value(Value::Int64(Some(3))).unwrap(),
            Some(3)
        );
    }
}
