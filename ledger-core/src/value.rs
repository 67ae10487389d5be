use std::{
    cmp::Ordering,
    collections::BTreeMap,
    fmt::{self, Display, Write},
};

/// Dynamically typed value exchanged with a backend.
///
/// Typed variants carry an `Option` so a NULL keeps the type it was declared
/// with. Records and arrays are explicit variants instead of opaque blobs.
#[derive(Default, Debug, Clone, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Boolean(Option<bool>),
    Int64(Option<i64>),
    Float64(Option<f64>),
    Varchar(Option<String>),
    Blob(Option<Box<[u8]>>),
    List(Option<Vec<Value>>),
    Map(Option<BTreeMap<String, Value>>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(
            self,
            Value::Null
                | Value::Boolean(None)
                | Value::Int64(None)
                | Value::Float64(None)
                | Value::Varchar(None)
                | Value::Blob(None)
                | Value::List(None)
                | Value::Map(None)
        )
    }

    /// SQL flavoured name of the variant.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "NULL",
            Value::Boolean(..) => "BOOLEAN",
            Value::Int64(..) => "INTEGER",
            Value::Float64(..) => "REAL",
            Value::Varchar(..) => "TEXT",
            Value::Blob(..) => "BLOB",
            Value::List(..) => "LIST",
            Value::Map(..) => "MAP",
        }
    }

    /// Numeric view of the value, booleans count as 0 and 1.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Boolean(Some(v)) => Some(*v as i64 as f64),
            Value::Int64(Some(v)) => Some(*v as f64),
            Value::Float64(Some(v)) => Some(*v),
            _ => None,
        }
    }

    /// Integer view of the value, floats only when they have no fractional part.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Boolean(Some(v)) => Some(*v as i64),
            Value::Int64(Some(v)) => Some(*v),
            Value::Float64(Some(v)) if v.is_finite() && v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Varchar(Some(v)) => Some(v),
            _ => None,
        }
    }

    /// SQL comparison: `None` when either side is NULL or the types are not comparable.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        if self.is_null() || other.is_null() {
            return None;
        }
        match (self, other) {
            (Value::Int64(Some(a)), Value::Int64(Some(b))) => Some(a.cmp(b)),
            (Value::Varchar(Some(a)), Value::Varchar(Some(b))) => Some(a.cmp(b)),
            (Value::Blob(Some(a)), Value::Blob(Some(b))) => Some(a.cmp(b)),
            _ => match (self.as_f64(), other.as_f64()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => (self == other).then_some(Ordering::Equal),
            },
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str("NULL");
        }
        match self {
            Value::Boolean(Some(v)) => write!(f, "{v}"),
            Value::Int64(Some(v)) => write!(f, "{v}"),
            Value::Float64(Some(v)) => write!(f, "{v:?}"),
            Value::Varchar(Some(v)) => {
                f.write_char('\'')?;
                for c in v.chars() {
                    if c == '\'' {
                        f.write_char('\'')?;
                    }
                    f.write_char(c)?;
                }
                f.write_char('\'')
            }
            Value::Blob(Some(v)) => {
                f.write_str("X'")?;
                for b in v.iter() {
                    write!(f, "{b:02X}")?;
                }
                f.write_char('\'')
            }
            Value::List(Some(v)) => {
                f.write_char('[')?;
                for (i, item) in v.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.fmt(f)?;
                }
                f.write_char(']')
            }
            Value::Map(Some(v)) => {
                f.write_char('{')?;
                for (i, (key, item)) in v.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {item}")?;
                }
                f.write_char('}')
            }
            _ => f.write_str("NULL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_mixed_numbers() {
        assert_eq!(
            Value::Int64(Some(2)).compare(&Value::Float64(Some(2.5))),
            Some(Ordering::Less)
        );
        assert_eq!(
            Value::Boolean(Some(true)).compare(&Value::Int64(Some(1))),
            Some(Ordering::Equal)
        );
        assert_eq!(Value::Int64(None).compare(&Value::Int64(Some(1))), None);
        assert_eq!(
            Value::Varchar(Some("a".into())).compare(&Value::Int64(Some(1))),
            None
        );
    }

    #[test]
    fn display_escapes_quotes() {
        assert_eq!(
            Value::Varchar(Some("it's".into())).to_string(),
            "'it''s'"
        );
        assert_eq!(Value::Blob(Some([1u8, 255].into())).to_string(), "X'01FF'");
        assert_eq!(Value::Varchar(None).to_string(), "NULL");
    }
}
