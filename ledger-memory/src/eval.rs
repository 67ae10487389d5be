use crate::{
    parser::{Aggregate, BinaryOp, Expr, UnaryOp},
    store::{ColumnDef, StoredRow, error},
};
use ledger_core::{Cause, Result, Value};
use std::cmp::Ordering;

/// What the columns of an expression refer to.
#[derive(Clone, Copy)]
pub(crate) enum Input<'a> {
    /// One row, aggregates are not allowed.
    Row(&'a [Value]),
    /// A group of rows, only aggregates may read columns.
    Group(&'a [&'a StoredRow]),
}

#[derive(Clone, Copy)]
pub(crate) struct Scope<'a> {
    pub(crate) columns: &'a [ColumnDef],
    pub(crate) params: &'a [Value],
    pub(crate) input: Input<'a>,
}

impl<'a> Scope<'a> {
    pub(crate) fn new(columns: &'a [ColumnDef], params: &'a [Value], input: Input<'a>) -> Self {
        Self {
            columns,
            params,
            input,
        }
    }

    fn with_input(&self, input: Input<'a>) -> Self {
        Self { input, ..*self }
    }

    pub(crate) fn eval(&self, expr: &Expr) -> Result<Value> {
        Ok(match expr {
            Expr::Literal(v) => v.clone(),
            Expr::Parameter(i) => self.params.get(*i).cloned().ok_or_else(|| {
                error(Cause::Syntax, format!("Missing value for parameter {}", i + 1))
            })?,
            Expr::Column(name) => {
                let Some(i) = self
                    .columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(name))
                else {
                    return Err(error(Cause::Syntax, format!("no such column: {name}")));
                };
                match self.input {
                    Input::Row(row) => row[i].clone(),
                    Input::Group(..) => {
                        return Err(error(
                            Cause::Syntax,
                            format!("Column `{name}` must be used inside an aggregate function"),
                        ));
                    }
                }
            }
            Expr::Unary(UnaryOp::Not, v) => {
                Value::Boolean(truth(&self.eval(v)?)?.map(|v| !v))
            }
            Expr::Unary(UnaryOp::Neg, v) => match self.eval(v)? {
                v if v.is_null() => Value::Null,
                Value::Int64(Some(v)) => Value::Int64(Some(v.checked_neg().ok_or_else(
                    || error(Cause::Type, "integer overflow"),
                )?)),
                Value::Float64(Some(v)) => Value::Float64(Some(-v)),
                v => {
                    return Err(error(
                        Cause::Type,
                        format!("Cannot negate a {} value", v.type_name()),
                    ));
                }
            },
            Expr::Binary(op, l, r) => binary(*op, self.eval(l)?, self.eval(r)?)?,
            Expr::IsNull { expr, negated } => {
                Value::Boolean(Some(self.eval(expr)?.is_null() != *negated))
            }
            Expr::Like {
                expr,
                pattern,
                negated,
            } => {
                let (value, pattern) = (self.eval(expr)?, self.eval(pattern)?);
                if value.is_null() || pattern.is_null() {
                    Value::Boolean(None)
                } else {
                    Value::Boolean(Some(like(&text(&value)?, &text(&pattern)?) != *negated))
                }
            }
            Expr::Aggregate(function, argument) => {
                let Input::Group(rows) = self.input else {
                    return Err(error(
                        Cause::Syntax,
                        format!("misuse of aggregate function {function}()"),
                    ));
                };
                self.aggregate(*function, argument.as_deref(), rows)?
            }
        })
    }

    fn aggregate(
        &self,
        function: Aggregate,
        argument: Option<&Expr>,
        rows: &[&StoredRow],
    ) -> Result<Value> {
        let Some(argument) = argument else {
            return Ok(Value::Int64(Some(rows.len() as i64)));
        };
        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            let value = self.with_input(Input::Row(row)).eval(argument)?;
            if !value.is_null() {
                values.push(value);
            }
        }
        Ok(match function {
            Aggregate::Count => Value::Int64(Some(values.len() as i64)),
            Aggregate::Min | Aggregate::Max => {
                let wanted = if function == Aggregate::Min {
                    Ordering::Less
                } else {
                    Ordering::Greater
                };
                let mut result: Option<Value> = None;
                for value in values {
                    let replace = match &result {
                        None => true,
                        Some(current) => value.compare(current) == Some(wanted),
                    };
                    if replace {
                        result = Some(value);
                    }
                }
                result.unwrap_or_default()
            }
            Aggregate::Sum | Aggregate::Avg => {
                if values.is_empty() {
                    return Ok(Value::Null);
                }
                let count = values.len();
                let mut sum = Value::Int64(Some(0));
                for value in values {
                    if value.as_f64().is_none() {
                        return Err(error(
                            Cause::Type,
                            format!("Cannot {function} a {} value", value.type_name()),
                        ));
                    }
                    sum = binary(BinaryOp::Add, sum, value)?;
                }
                if function == Aggregate::Avg {
                    Value::Float64(sum.as_f64().map(|v| v / count as f64))
                } else {
                    sum
                }
            }
        })
    }
}

/// SQL truth value of a condition, `None` when unknown.
pub(crate) fn truth(value: &Value) -> Result<Option<bool>> {
    Ok(match value {
        v if v.is_null() => None,
        Value::Boolean(v) => *v,
        Value::Int64(Some(v)) => Some(*v != 0),
        Value::Float64(Some(v)) => Some(*v != 0.0),
        v => {
            return Err(error(
                Cause::Type,
                format!("Expected a condition, found a {} value", v.type_name()),
            ));
        }
    })
}

fn text(value: &Value) -> Result<String> {
    Ok(match value {
        Value::Varchar(Some(v)) => v.clone(),
        Value::Boolean(Some(v)) => (*v as i64).to_string(),
        Value::Int64(Some(v)) => v.to_string(),
        Value::Float64(Some(v)) => v.to_string(),
        v => {
            return Err(error(
                Cause::Type,
                format!("Expected a text value, found a {} value", v.type_name()),
            ));
        }
    })
}

fn binary(op: BinaryOp, l: Value, r: Value) -> Result<Value> {
    match op {
        BinaryOp::And => {
            return Ok(Value::Boolean(match (truth(&l)?, truth(&r)?) {
                (Some(false), _) | (_, Some(false)) => Some(false),
                (Some(true), Some(true)) => Some(true),
                _ => None,
            }));
        }
        BinaryOp::Or => {
            return Ok(Value::Boolean(match (truth(&l)?, truth(&r)?) {
                (Some(true), _) | (_, Some(true)) => Some(true),
                (Some(false), Some(false)) => Some(false),
                _ => None,
            }));
        }
        _ => {}
    }
    if l.is_null() || r.is_null() {
        return Ok(match op {
            BinaryOp::Eq
            | BinaryOp::NotEq
            | BinaryOp::Less
            | BinaryOp::LessEq
            | BinaryOp::Greater
            | BinaryOp::GreaterEq => Value::Boolean(None),
            _ => Value::Null,
        });
    }
    let comparison = |accept: fn(Ordering) -> bool| -> Result<Value> {
        match l.compare(&r) {
            Some(ordering) => Ok(Value::Boolean(Some(accept(ordering)))),
            None => Err(error(
                Cause::Type,
                format!("Cannot compare {} with {}", l.type_name(), r.type_name()),
            )),
        }
    };
    Ok(match op {
        BinaryOp::Eq => Value::Boolean(Some(l.compare(&r) == Some(Ordering::Equal))),
        BinaryOp::NotEq => Value::Boolean(Some(l.compare(&r) != Some(Ordering::Equal))),
        BinaryOp::Less => comparison(Ordering::is_lt)?,
        BinaryOp::LessEq => comparison(Ordering::is_le)?,
        BinaryOp::Greater => comparison(Ordering::is_gt)?,
        BinaryOp::GreaterEq => comparison(Ordering::is_ge)?,
        BinaryOp::Concat => Value::Varchar(Some(text(&l)? + &text(&r)?)),
        _ => arithmetic(op, &l, &r)?,
    })
}

fn arithmetic(op: BinaryOp, l: &Value, r: &Value) -> Result<Value> {
    let overflow = || error(Cause::Type, "integer overflow");
    if let (Value::Int64(Some(a)), Value::Int64(Some(b))) = (l, r) {
        return Ok(Value::Int64(match op {
            BinaryOp::Add => Some(a.checked_add(*b).ok_or_else(overflow)?),
            BinaryOp::Sub => Some(a.checked_sub(*b).ok_or_else(overflow)?),
            BinaryOp::Mul => Some(a.checked_mul(*b).ok_or_else(overflow)?),
            // Division by zero is NULL
            BinaryOp::Div => a.checked_div(*b),
            BinaryOp::Rem => a.checked_rem(*b),
            _ => None,
        }));
    }
    let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) else {
        return Err(error(
            Cause::Type,
            format!(
                "Cannot apply {op} to {} and {}",
                l.type_name(),
                r.type_name()
            ),
        ));
    };
    Ok(match op {
        BinaryOp::Add => Value::Float64(Some(a + b)),
        BinaryOp::Sub => Value::Float64(Some(a - b)),
        BinaryOp::Mul => Value::Float64(Some(a * b)),
        BinaryOp::Div if b != 0.0 => Value::Float64(Some(a / b)),
        BinaryOp::Rem if b != 0.0 => Value::Float64(Some(a % b)),
        _ => Value::Null,
    })
}

/// `LIKE` matching: `%` is any sequence, `_` any character, ASCII letters ignore case.
pub(crate) fn like(text: &str, pattern: &str) -> bool {
    let text: Vec<char> = text.chars().map(|c| c.to_ascii_lowercase()).collect();
    let pattern: Vec<char> = pattern.chars().map(|c| c.to_ascii_lowercase()).collect();
    let (mut t, mut p) = (0, 0);
    // Last `%` seen and the text position it is currently matched up to
    let mut backtrack: Option<(usize, usize)> = None;
    while t < text.len() {
        match pattern.get(p) {
            Some('%') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(c) if *c == '_' || *c == text[t] => {
                t += 1;
                p += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    backtrack = Some((star, matched + 1));
                    p = star + 1;
                    t = matched + 1;
                }
                None => return false,
            },
        }
    }
    pattern[p..].iter().all(|c| *c == '%')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{parser::Parser, store::ColumnType};

    fn eval(expression: &str, params: &[Value]) -> Result<Value> {
        let columns = [
            ColumnDef::new("name".into(), ColumnType::Text),
            ColumnDef::new("score".into(), ColumnType::Integer),
        ];
        let row = [Value::Varchar(Some("Smartphone X".into())), Value::Int64(None)];
        let (commands, _) = Parser::parse(&format!("SELECT {expression}"))?;
        let crate::parser::Command::Select(select) = &commands[0] else {
            unreachable!()
        };
        let crate::parser::SelectItem::Expr { expr, .. } = &select.items[0] else {
            unreachable!()
        };
        Scope::new(&columns, params, Input::Row(&row)).eval(expr)
    }

    #[test]
    fn like_patterns() {
        assert!(like("Smartphone X", "%phone%"));
        assert!(like("Smartphone X", "SMART%"));
        assert!(like("abc", "a_c"));
        assert!(like("", "%"));
        assert!(!like("abc", "a_"));
        assert!(!like("Keyboard", "%Phone%"));
        assert!(like("aXbXc", "%X%X%"));
    }

    #[test]
    fn three_valued_logic() {
        assert_eq!(eval("score > 1", &[]).unwrap(), Value::Boolean(None));
        assert_eq!(
            eval("score > 1 OR name LIKE '%phone%'", &[]).unwrap(),
            Value::Boolean(Some(true))
        );
        assert_eq!(
            eval("score > 1 AND name = 'x'", &[]).unwrap(),
            Value::Boolean(Some(false))
        );
        assert_eq!(
            eval("NOT score = 1", &[]).unwrap(),
            Value::Boolean(None)
        );
        assert_eq!(
            eval("score IS NULL AND name IS NOT NULL", &[]).unwrap(),
            Value::Boolean(Some(true))
        );
    }

    #[test]
    fn arithmetic_and_parameters() {
        assert_eq!(
            eval("? * 2 + 1", &[Value::Int64(Some(20))]).unwrap(),
            Value::Int64(Some(41))
        );
        assert_eq!(eval("7 / 2.0", &[]).unwrap(), Value::Float64(Some(3.5)));
        assert_eq!(eval("1 / 0", &[]).unwrap(), Value::Int64(None));
        assert_eq!(
            eval("name || '!'", &[]).unwrap(),
            Value::Varchar(Some("Smartphone X!".into()))
        );
        let error = eval("name + 1", &[]).unwrap_err();
        assert_eq!(ledger_core::BackendError::cause_of(&error), Cause::Type);
        let error = eval("missing = 1", &[]).unwrap_err();
        assert_eq!(error.to_string(), "no such column: missing");
    }

    #[test]
    fn aggregates_need_a_group() {
        let error = eval("COUNT(*)", &[]).unwrap_err();
        assert_eq!(error.to_string(), "misuse of aggregate function COUNT()");
    }
}
