use crate::{parser::Expr, session::Session};
use ledger_core::{BackendError, Cause, Error, Result, Value, json_to_value};
use parking_lot::{Mutex, RwLock};
use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap, HashSet},
    fmt::{self, Display},
    sync::{Arc, LazyLock, Weak},
};

pub(crate) fn error(cause: Cause, message: impl Into<String>) -> Error {
    Error::new(BackendError::new(cause, message))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ColumnType {
    Integer,
    Real,
    Text,
    Boolean,
    Blob,
    Json,
}

impl ColumnType {
    pub(crate) fn from_name(name: &str) -> Option<Self> {
        Some(match name.to_ascii_uppercase().as_str() {
            "INTEGER" | "INT" | "BIGINT" | "SMALLINT" | "TINYINT" => ColumnType::Integer,
            "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" | "DECIMAL" => ColumnType::Real,
            "TEXT" | "VARCHAR" | "CHAR" | "STRING" => ColumnType::Text,
            "BOOLEAN" | "BOOL" => ColumnType::Boolean,
            "BLOB" | "BYTES" => ColumnType::Blob,
            "JSON" | "JSONB" => ColumnType::Json,
            _ => return None,
        })
    }

    pub(crate) fn null(&self) -> Value {
        match self {
            ColumnType::Integer => Value::Int64(None),
            ColumnType::Real => Value::Float64(None),
            ColumnType::Text => Value::Varchar(None),
            ColumnType::Boolean => Value::Boolean(None),
            ColumnType::Blob => Value::Blob(None),
            ColumnType::Json => Value::Null,
        }
    }

    /// Convert `value` to the representation stored in a column of this type.
    pub(crate) fn coerce(&self, value: Value) -> Option<Value> {
        if value.is_null() {
            return Some(self.null());
        }
        Some(match (self, value) {
            (ColumnType::Integer, v @ Value::Int64(..)) => v,
            (ColumnType::Integer, v @ (Value::Float64(..) | Value::Boolean(..))) => {
                Value::Int64(Some(v.as_i64()?))
            }
            (ColumnType::Real, v @ Value::Float64(..)) => v,
            (ColumnType::Real, v @ (Value::Int64(..) | Value::Boolean(..))) => {
                Value::Float64(v.as_f64())
            }
            (ColumnType::Text, v @ Value::Varchar(..)) => v,
            (ColumnType::Boolean, v @ Value::Boolean(..)) => v,
            (ColumnType::Boolean, Value::Int64(Some(v @ (0 | 1)))) => Value::Boolean(Some(v == 1)),
            (ColumnType::Blob, v @ Value::Blob(..)) => v,
            // Text holding a JSON document is stored as the document
            (ColumnType::Json, Value::Varchar(Some(v))) => match serde_json::from_str(&v) {
                Ok(document) => json_to_value(document),
                Err(..) => Value::Varchar(Some(v)),
            },
            (ColumnType::Json, Value::Blob(..)) => return None,
            (ColumnType::Json, v) => v,
            _ => return None,
        })
    }
}

impl Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ColumnType::Integer => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text => "TEXT",
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Blob => "BLOB",
            ColumnType::Json => "JSON",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ColumnDef {
    pub(crate) name: String,
    pub(crate) column_type: ColumnType,
    pub(crate) primary_key: bool,
    pub(crate) unique: bool,
    pub(crate) not_null: bool,
    /// Referenced table and column, the primary key when no column is named.
    pub(crate) references: Option<(String, Option<String>)>,
    pub(crate) default: Option<Expr>,
}

impl ColumnDef {
    pub(crate) fn new(name: String, column_type: ColumnType) -> Self {
        Self {
            name,
            column_type,
            primary_key: false,
            unique: false,
            not_null: false,
            references: None,
            default: None,
        }
    }
}

pub(crate) type StoredRow = Box<[Value]>;

#[derive(Debug, Clone)]
pub(crate) struct Table {
    pub(crate) name: String,
    pub(crate) columns: Vec<ColumnDef>,
    /// Position of the `INTEGER PRIMARY KEY` column, its value is the row id.
    pub(crate) primary_key: Option<usize>,
    /// Foreign keys: column position and referenced table key.
    pub(crate) references: Vec<(usize, String)>,
    pub(crate) rows: BTreeMap<i64, StoredRow>,
}

impl Table {
    pub(crate) fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Id of a row in this table having `value` in `column`, other than `except`.
    pub(crate) fn find(&self, column: usize, value: &Value, except: Option<i64>) -> Option<i64> {
        if Some(column) == self.primary_key {
            return value
                .as_i64()
                .filter(|id| Some(*id) != except && self.rows.contains_key(id));
        }
        self.rows
            .iter()
            .find(|(id, row)| {
                Some(**id) != except && row[column].compare(value) == Some(Ordering::Equal)
            })
            .map(|(id, _)| *id)
    }
}

/// Set of tables keyed by lowercase name.
#[derive(Debug, Clone, Default)]
pub(crate) struct Database {
    pub(crate) tables: BTreeMap<String, Arc<Table>>,
}

impl Database {
    pub(crate) fn table(&self, name: &str) -> Result<&Arc<Table>> {
        self.tables
            .get(&name.to_ascii_lowercase())
            .ok_or_else(|| error(Cause::Syntax, format!("no such table: {name}")))
    }

    /// Check the constraints of the row `id` of `table` against the rest of the database.
    pub(crate) fn validate_row(&self, table: &Table, id: i64) -> Result<()> {
        let Some(row) = table.rows.get(&id) else {
            return self.validate_unreferenced(table, id);
        };
        for (i, column) in table.columns.iter().enumerate() {
            let value = &row[i];
            if value.is_null() {
                if column.not_null {
                    return Err(error(
                        Cause::Constraint,
                        format!("NOT NULL constraint failed: {}.{}", table.name, column.name),
                    ));
                }
                continue;
            }
            if column.unique && table.find(i, value, Some(id)).is_some() {
                return Err(error(
                    Cause::Constraint,
                    format!("UNIQUE constraint failed: {}.{}", table.name, column.name),
                ));
            }
        }
        for (i, target) in table.references.iter() {
            let value = &row[*i];
            if value.is_null() {
                continue;
            }
            let found = match self.tables.get(target) {
                Some(target) => value
                    .as_i64()
                    .is_some_and(|id| target.rows.contains_key(&id)),
                None => false,
            };
            if !found {
                return Err(error(
                    Cause::Constraint,
                    format!(
                        "FOREIGN KEY constraint failed: {}.{} = {value}",
                        table.name, table.columns[*i].name
                    ),
                ));
            }
        }
        Ok(())
    }

    /// Check that no row references the (deleted) row `id` of `table`.
    pub(crate) fn validate_unreferenced(&self, table: &Table, id: i64) -> Result<()> {
        let key = table.name.to_ascii_lowercase();
        for other in self.tables.values() {
            for (i, target) in other.references.iter() {
                if *target != key {
                    continue;
                }
                if other.find(*i, &Value::Int64(Some(id)), None).is_some() {
                    return Err(error(
                        Cause::Constraint,
                        format!(
                            "FOREIGN KEY constraint failed: {}.{} still references {}",
                            other.name, other.columns[*i].name, table.name
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub(crate) struct Committed {
    pub(crate) database: Database,
    pub(crate) version: u64,
    /// Version of the last commit that wrote each row.
    row_versions: HashMap<(String, i64), u64>,
    /// Version of the last commit that created or dropped each table.
    table_versions: HashMap<String, u64>,
}

/// Shared state of every connection to the same store.
#[derive(Debug, Default)]
pub(crate) struct Store {
    name: Option<String>,
    committed: RwLock<Committed>,
    /// Last id handed out per table, ids are never reused even when a transaction rolls back.
    sequences: Mutex<HashMap<String, i64>>,
}

static STORES: LazyLock<Mutex<HashMap<String, Weak<Store>>>> = LazyLock::new(Default::default);

impl Store {
    /// Store registered under `name`, a private one when `None`.
    pub(crate) fn open(name: Option<&str>) -> Arc<Store> {
        let Some(name) = name else {
            return Arc::new(Store::default());
        };
        let mut stores = STORES.lock();
        stores.retain(|_, v| v.strong_count() > 0);
        if let Some(store) = stores.get(name).and_then(Weak::upgrade) {
            return store;
        }
        log::debug!("Creating the in-memory store `{name}`");
        let store = Arc::new(Store {
            name: Some(name.to_string()),
            ..Default::default()
        });
        stores.insert(name.to_string(), Arc::downgrade(&store));
        store
    }

    pub(crate) fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(":memory:")
    }

    /// Committed state and its version.
    pub(crate) fn snapshot(&self) -> (Database, u64) {
        let committed = self.committed.read();
        (committed.database.clone(), committed.version)
    }

    /// Next id of `table`.
    pub(crate) fn next_id(&self, table: &str) -> i64 {
        let mut sequences = self.sequences.lock();
        let value = sequences.entry(table.to_string()).or_default();
        *value += 1;
        *value
    }

    /// Make sure `id` is never handed out by [`Store::next_id`].
    pub(crate) fn reserve_id(&self, table: &str, id: i64) {
        let mut sequences = self.sequences.lock();
        let value = sequences.entry(table.to_string()).or_default();
        *value = (*value).max(id);
    }

    /// Apply the writes of `session` on top of the latest committed state.
    ///
    /// Fails with a conflict if a row or table written by the session was
    /// written by another commit after the session snapshot, and with a
    /// constraint violation if the merged state is not valid. Nothing is applied
    /// on failure.
    pub(crate) fn commit(&self, session: Session) -> Result<()> {
        let (database, snapshot, rows, tables) = session.into_parts();
        if rows.is_empty() && tables.is_empty() {
            return Ok(());
        }
        let mut committed = self.committed.write();
        for table in tables.iter() {
            if committed.table_versions.get(table).is_some_and(|v| *v > snapshot) {
                return Err(error(
                    Cause::Conflict,
                    format!("Table `{table}` was changed by a concurrent transaction"),
                ));
            }
        }
        for key in rows.iter() {
            let (table, id) = key;
            if committed.row_versions.get(key).is_some_and(|v| *v > snapshot)
                || committed.table_versions.get(table).is_some_and(|v| *v > snapshot)
            {
                return Err(error(
                    Cause::Conflict,
                    format!("Row {id} of `{table}` was changed by a concurrent transaction"),
                ));
            }
        }
        let mut merged = committed.database.clone();
        for table in tables.iter() {
            match database.tables.get(table) {
                Some(v) => merged.tables.insert(table.clone(), v.clone()),
                None => merged.tables.remove(table),
            };
        }
        for (table, id) in rows.iter().filter(|(t, _)| !tables.contains(t)) {
            let (Some(source), Some(target)) =
                (database.tables.get(table), merged.tables.get_mut(table))
            else {
                continue;
            };
            let target = Arc::make_mut(target);
            match source.rows.get(id) {
                Some(row) => target.rows.insert(*id, row.clone()),
                None => target.rows.remove(id),
            };
        }
        for (table, id) in rows.iter() {
            if let Some(table) = merged.tables.get(table) {
                merged.validate_row(table, *id)?;
            }
        }
        committed.version += 1;
        let version = committed.version;
        committed.database = merged;
        for key in rows {
            committed.row_versions.insert(key, version);
        }
        for table in tables {
            committed.table_versions.insert(table, version);
        }
        log::trace!("Store `{}` at version {version}", self.name());
        Ok(())
    }
}

pub(crate) type TouchedRows = HashSet<(String, i64)>;
pub(crate) type TouchedTables = HashSet<String>;
