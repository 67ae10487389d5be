use crate::{AsValue, RowLabeled, RowsAffected, Value, truncate_long};
use std::fmt::{self, Display};

/// Statement text plus positional parameters bound to its `?` placeholders.
#[derive(Default, Clone, Debug, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Default::default(),
        }
    }
    /// Append a bound value.
    pub fn bind(mut self, value: impl AsValue) -> Self {
        self.params.push(value.as_value());
        self
    }
    /// Append many bound values.
    pub fn bind_all(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.params.extend(values);
        self
    }
    pub fn sql(&self) -> &str {
        &self.sql
    }
    pub fn params(&self) -> &[Value] {
        &self.params
    }
    /// Returns `true` when the statement reads rows (it starts with `SELECT`).
    pub fn is_query(&self) -> bool {
        self.sql
            .trim_start()
            .get(..6)
            .is_some_and(|v| v.eq_ignore_ascii_case("select"))
    }
}

impl Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", truncate_long!(self.sql))?;
        if !self.params.is_empty() {
            let params = self
                .params
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, "\n-- params: [{}]", truncate_long!(params))?;
        }
        Ok(())
    }
}

impl From<&str> for Statement {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Statement {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// Items from `Executor::run`: rows or effects.
#[derive(Debug)]
pub enum QueryResult {
    /// A labeled row
    Row(RowLabeled),
    /// A modify effect aggregation
    Affected(RowsAffected),
}

/// Outcome of one statement of a batch, in submission order.
#[derive(Debug, Clone, PartialEq)]
pub enum StatementResult {
    Affected(RowsAffected),
    Rows(Vec<RowLabeled>),
}

impl StatementResult {
    pub fn rows_affected(&self) -> Option<&RowsAffected> {
        match self {
            StatementResult::Affected(v) => Some(v),
            StatementResult::Rows(..) => None,
        }
    }
    pub fn rows(&self) -> Option<&[RowLabeled]> {
        match self {
            StatementResult::Rows(v) => Some(v),
            StatementResult::Affected(..) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_queries() {
        assert!(Statement::new("  select * from users").is_query());
        assert!(Statement::new("SELECT COUNT(*) FROM posts").is_query());
        assert!(!Statement::new("INSERT INTO users (email) VALUES (?)").is_query());
        assert!(!Statement::new("sel").is_query());
        assert!(!Statement::new("").is_query());
    }

    #[test]
    fn display_lists_params() {
        let statement = Statement::new("UPDATE users SET name = ? WHERE id = ?")
            .bind("John D. Updated")
            .bind(1);
        assert_eq!(
            statement.to_string(),
            "UPDATE users SET name = ? WHERE id = ?\n-- params: ['John D. Updated', 1]"
        );
    }
}
