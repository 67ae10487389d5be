use crate::{
    eval::{Input, Scope, truth},
    parser::{Command, Expr, Order, Parser, Select, SelectItem},
    store::{
        ColumnDef, ColumnType, Database, Store, StoredRow, Table, TouchedRows, TouchedTables,
        error,
    },
};
use ledger_core::{
    Cause, QueryResult, Result, RowLabeled, RowNames, RowsAffected, Statement, Value,
};
use std::{cmp::Ordering, sync::Arc};

/// Private working copy of a store.
///
/// Starts from the committed state at the time it is created, every statement
/// applies to this copy only. [`Store::commit`] merges it back.
#[derive(Debug)]
pub(crate) struct Session {
    store: Arc<Store>,
    snapshot: u64,
    database: Database,
    touched_rows: TouchedRows,
    touched_tables: TouchedTables,
}

impl Session {
    pub(crate) fn begin(store: Arc<Store>) -> Self {
        let (database, snapshot) = store.snapshot();
        Self {
            store,
            snapshot,
            database,
            touched_rows: Default::default(),
            touched_tables: Default::default(),
        }
    }

    pub(crate) fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub(crate) fn into_parts(self) -> (Database, u64, TouchedRows, TouchedTables) {
        (
            self.database,
            self.snapshot,
            self.touched_rows,
            self.touched_tables,
        )
    }

    /// Run every statement of the text in order.
    ///
    /// A failing statement leaves no effect, the ones before it are kept.
    pub(crate) fn run(&mut self, statement: &Statement) -> Result<Vec<QueryResult>> {
        let (commands, parameters) = Parser::parse(statement.sql())?;
        let params = statement.params();
        if parameters != params.len() {
            return Err(error(
                Cause::Syntax,
                format!(
                    "The statement has {parameters} parameters but {} values were bound",
                    params.len()
                ),
            ));
        }
        let mut results = Vec::new();
        for command in commands {
            let saved = (
                self.database.clone(),
                self.touched_rows.clone(),
                self.touched_tables.clone(),
            );
            if let Err(e) = self.apply(command, params, &mut results) {
                (self.database, self.touched_rows, self.touched_tables) = saved;
                return Err(e);
            }
        }
        Ok(results)
    }

    fn apply(
        &mut self,
        command: Command,
        params: &[Value],
        results: &mut Vec<QueryResult>,
    ) -> Result<()> {
        let affected = match command {
            Command::CreateTable {
                name,
                if_not_exists,
                columns,
            } => self.create_table(name, if_not_exists, columns)?,
            Command::DropTable { name, if_exists } => self.drop_table(&name, if_exists)?,
            Command::Insert {
                table,
                columns,
                rows,
            } => self.insert(&table, columns, rows, params)?,
            Command::Update {
                table,
                assignments,
                filter,
            } => self.update(&table, assignments, filter.as_ref(), params)?,
            Command::Delete { table, filter } => self.delete(&table, filter.as_ref(), params)?,
            Command::Select(select) => {
                results.extend(self.select(&select, params)?.map(QueryResult::Row));
                return Ok(());
            }
        };
        results.push(QueryResult::Affected(affected));
        Ok(())
    }

    fn table_mut(&mut self, key: &str) -> Result<&mut Table> {
        self.database
            .tables
            .get_mut(key)
            .map(Arc::make_mut)
            .ok_or_else(|| error(Cause::Syntax, format!("no such table: {key}")))
    }

    fn create_table(
        &mut self,
        name: String,
        if_not_exists: bool,
        columns: Vec<ColumnDef>,
    ) -> Result<RowsAffected> {
        let key = name.to_ascii_lowercase();
        if self.database.tables.contains_key(&key) {
            if if_not_exists {
                return Ok(RowsAffected::default());
            }
            return Err(error(
                Cause::Syntax,
                format!("table {name} already exists"),
            ));
        }
        for (i, column) in columns.iter().enumerate() {
            if columns[..i]
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(&column.name))
            {
                return Err(error(
                    Cause::Syntax,
                    format!("duplicate column name: {}", column.name),
                ));
            }
        }
        let mut primary_keys = columns.iter().enumerate().filter(|(_, c)| c.primary_key);
        let primary_key = primary_keys.next().map(|(i, _)| i);
        if primary_keys.next().is_some() {
            return Err(error(
                Cause::Syntax,
                format!("table {name} has more than one primary key"),
            ));
        }
        if let Some(i) = primary_key
            && columns[i].column_type != ColumnType::Integer
        {
            return Err(error(
                Cause::Syntax,
                format!("the primary key of {name} must be an INTEGER column"),
            ));
        }
        let mut references = Vec::new();
        for (i, column) in columns.iter().enumerate() {
            let Some((target, target_column)) = &column.references else {
                continue;
            };
            let target_key = target.to_ascii_lowercase();
            let (target_columns, target_primary_key) = if target_key == key {
                (&columns[..], primary_key)
            } else {
                let table = self.database.table(target)?;
                (&table.columns[..], table.primary_key)
            };
            let Some(target_primary_key) = target_primary_key else {
                return Err(error(
                    Cause::Syntax,
                    format!("foreign key of {name}.{} needs {target} to have a primary key", column.name),
                ));
            };
            if let Some(target_column) = target_column
                && !target_columns[target_primary_key]
                    .name
                    .eq_ignore_ascii_case(target_column)
            {
                return Err(error(
                    Cause::Syntax,
                    format!(
                        "foreign key of {name}.{} must reference the primary key of {target}",
                        column.name
                    ),
                ));
            }
            references.push((i, target_key));
        }
        log::debug!("Creating table `{name}`");
        self.database.tables.insert(
            key.clone(),
            Arc::new(Table {
                name,
                columns,
                primary_key,
                references,
                rows: Default::default(),
            }),
        );
        self.touched_tables.insert(key);
        Ok(RowsAffected::default())
    }

    fn drop_table(&mut self, name: &str, if_exists: bool) -> Result<RowsAffected> {
        let key = name.to_ascii_lowercase();
        if !self.database.tables.contains_key(&key) {
            if if_exists {
                return Ok(RowsAffected::default());
            }
            return Err(error(Cause::Syntax, format!("no such table: {name}")));
        }
        if let Some(other) = self.database.tables.iter().find_map(|(k, t)| {
            (*k != key && t.references.iter().any(|(_, target)| *target == key)).then_some(t)
        }) {
            return Err(error(
                Cause::Constraint,
                format!("FOREIGN KEY constraint failed: {} references {name}", other.name),
            ));
        }
        log::debug!("Dropping table `{name}`");
        self.database.tables.remove(&key);
        self.touched_rows.retain(|(table, _)| *table != key);
        self.touched_tables.insert(key);
        Ok(RowsAffected::default())
    }

    fn insert(
        &mut self,
        name: &str,
        columns: Option<Vec<String>>,
        rows: Vec<Vec<Expr>>,
        params: &[Value],
    ) -> Result<RowsAffected> {
        let key = name.to_ascii_lowercase();
        let table = self.database.table(name)?.clone();
        let targets = match columns {
            Some(columns) => columns
                .iter()
                .map(|c| {
                    table.column_index(c).ok_or_else(|| {
                        error(
                            Cause::Syntax,
                            format!("table {} has no column named {c}", table.name),
                        )
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            None => (0..table.columns.len()).collect(),
        };
        let constant = Scope::new(&[], params, Input::Row(&[]));
        let mut prepared = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() != targets.len() {
                return Err(error(
                    Cause::Syntax,
                    format!(
                        "{} values for {} columns",
                        row.len(),
                        targets.len()
                    ),
                ));
            }
            let mut values = table
                .columns
                .iter()
                .map(|c| match &c.default {
                    Some(default) => constant.eval(default),
                    None => Ok(c.column_type.null()),
                })
                .collect::<Result<Vec<_>>>()?;
            for (i, expr) in targets.iter().zip(row) {
                values[*i] = constant.eval(&expr)?;
            }
            for (value, column) in values.iter_mut().zip(table.columns.iter()) {
                *value = coerce(&table, column, std::mem::take(value))?;
            }
            let id = match table.primary_key {
                Some(i) => match values[i].as_i64() {
                    Some(id) => {
                        self.store.reserve_id(&key, id);
                        id
                    }
                    None => {
                        let id = self.store.next_id(&key);
                        values[i] = Value::Int64(Some(id));
                        id
                    }
                },
                None => self.store.next_id(&key),
            };
            prepared.push((id, values.into_boxed_slice()));
        }
        drop(table);
        let count = prepared.len() as u64;
        let mut last_affected_id = None;
        for (id, row) in prepared {
            let table = self.table_mut(&key)?;
            if table.rows.contains_key(&id) {
                let column = table.primary_key.map(|i| table.columns[i].name.as_str());
                return Err(error(
                    Cause::Constraint,
                    format!(
                        "UNIQUE constraint failed: {}.{}",
                        table.name,
                        column.unwrap_or("rowid")
                    ),
                ));
            }
            table.rows.insert(id, row);
            self.touched_rows.insert((key.clone(), id));
            self.database.validate_row(self.database.table(&key)?, id)?;
            last_affected_id = Some(id);
        }
        Ok(RowsAffected {
            rows_affected: Some(count),
            last_affected_id,
        })
    }

    fn update(
        &mut self,
        name: &str,
        assignments: Vec<(String, Expr)>,
        filter: Option<&Expr>,
        params: &[Value],
    ) -> Result<RowsAffected> {
        let key = name.to_ascii_lowercase();
        let table = self.database.table(name)?.clone();
        let assignments = assignments
            .into_iter()
            .map(|(column, expr)| {
                table
                    .column_index(&column)
                    .map(|i| (i, expr))
                    .ok_or_else(|| error(Cause::Syntax, format!("no such column: {column}")))
            })
            .collect::<Result<Vec<_>>>()?;
        let mut updates = Vec::new();
        for (id, row) in table.rows.iter() {
            let scope = Scope::new(&table.columns, params, Input::Row(row));
            if !matches(&scope, filter)? {
                continue;
            }
            let mut updated = row.clone();
            for (i, expr) in assignments.iter() {
                updated[*i] = coerce(&table, &table.columns[*i], scope.eval(expr)?)?;
            }
            if let Some(i) = table.primary_key
                && updated[i].as_i64() != Some(*id)
            {
                return Err(error(
                    Cause::Constraint,
                    format!(
                        "cannot change the primary key {}.{}",
                        table.name, table.columns[i].name
                    ),
                ));
            }
            updates.push((*id, updated));
        }
        drop(table);
        let count = updates.len() as u64;
        let ids = updates.iter().map(|(id, _)| *id).collect::<Vec<_>>();
        let table = self.table_mut(&key)?;
        for (id, row) in updates {
            table.rows.insert(id, row);
        }
        for id in ids {
            self.touched_rows.insert((key.clone(), id));
            self.database.validate_row(self.database.table(&key)?, id)?;
        }
        Ok(RowsAffected {
            rows_affected: Some(count),
            last_affected_id: None,
        })
    }

    fn delete(&mut self, name: &str, filter: Option<&Expr>, params: &[Value]) -> Result<RowsAffected> {
        let key = name.to_ascii_lowercase();
        let table = self.database.table(name)?.clone();
        let mut ids = Vec::new();
        for (id, row) in table.rows.iter() {
            if matches(&Scope::new(&table.columns, params, Input::Row(row)), filter)? {
                ids.push(*id);
            }
        }
        drop(table);
        let table = self.table_mut(&key)?;
        for id in ids.iter() {
            table.rows.remove(id);
        }
        for id in ids.iter() {
            self.touched_rows.insert((key.clone(), *id));
            self.database
                .validate_unreferenced(self.database.table(&key)?, *id)?;
        }
        Ok(RowsAffected {
            rows_affected: Some(ids.len() as u64),
            last_affected_id: None,
        })
    }

    fn select(
        &self,
        select: &Select,
        params: &[Value],
    ) -> Result<impl Iterator<Item = RowLabeled> + use<>> {
        let empty: StoredRow = Box::new([]);
        let table = select
            .table
            .as_deref()
            .map(|name| self.database.table(name))
            .transpose()?;
        let columns = table.map(|t| &t.columns[..]).unwrap_or_default();
        let mut labels = Vec::new();
        for item in select.items.iter() {
            match item {
                SelectItem::Wildcard if table.is_none() => {
                    return Err(error(Cause::Syntax, "no tables specified"));
                }
                SelectItem::Wildcard => labels.extend(columns.iter().map(|c| c.name.clone())),
                SelectItem::Expr { expr, alias } => {
                    labels.push(alias.clone().unwrap_or_else(|| expr.to_string()))
                }
            }
        }
        let labels: RowNames = labels.into();
        let mut rows = Vec::new();
        match table {
            Some(table) => {
                for row in table.rows.values() {
                    if matches(&Scope::new(columns, params, Input::Row(row)), select.filter.as_ref())? {
                        rows.push(row);
                    }
                }
            }
            None => rows.push(&empty),
        }
        let project = |scope: Scope| -> Result<Box<[Value]>> {
            let mut values = Vec::with_capacity(labels.len());
            for item in select.items.iter() {
                match item {
                    SelectItem::Wildcard => match scope.input {
                        Input::Row(row) => values.extend(row.iter().cloned()),
                        Input::Group(..) => {
                            return Err(error(
                                Cause::Syntax,
                                "`*` cannot be selected together with aggregate functions",
                            ));
                        }
                    },
                    SelectItem::Expr { expr, .. } => values.push(scope.eval(expr)?),
                }
            }
            Ok(values.into_boxed_slice())
        };
        let aggregated = select.items.iter().any(|item| match item {
            SelectItem::Expr { expr, .. } => expr.has_aggregate(),
            SelectItem::Wildcard => false,
        });
        let mut output = Vec::new();
        if aggregated {
            output.push(project(Scope::new(columns, params, Input::Group(&rows)))?);
        } else {
            let mut keyed = Vec::with_capacity(rows.len());
            for row in rows {
                let scope = Scope::new(columns, params, Input::Row(row));
                let keys = select
                    .order_by
                    .iter()
                    .map(|(expr, _)| scope.eval(order_key(expr, select, columns)))
                    .collect::<Result<Vec<_>>>()?;
                keyed.push((keys, project(scope)?));
            }
            // Stable, ties keep the primary key order
            keyed.sort_by(|(a, _), (b, _)| {
                a.iter()
                    .zip(b.iter())
                    .zip(select.order_by.iter())
                    .map(|((a, b), (_, order))| {
                        let ordering = compare_nulls_first(a, b);
                        if *order == Order::Desc {
                            ordering.reverse()
                        } else {
                            ordering
                        }
                    })
                    .find(|v| v.is_ne())
                    .unwrap_or(Ordering::Equal)
            });
            output.extend(keyed.into_iter().map(|(_, row)| row));
        }
        let constant = Scope::new(&[], params, Input::Row(&[]));
        let offset = match &select.offset {
            Some(expr) => limit_value(constant.eval(expr)?, "OFFSET")?.unwrap_or(0),
            None => 0,
        };
        let limit = match &select.limit {
            Some(expr) => limit_value(constant.eval(expr)?, "LIMIT")?,
            None => None,
        };
        Ok(output
            .into_iter()
            .skip(offset)
            .take(limit.unwrap_or(usize::MAX))
            .map(move |values| RowLabeled::new(labels.clone(), values)))
    }
}

/// Whether `filter` holds, rows where it is unknown are excluded.
fn matches(scope: &Scope, filter: Option<&Expr>) -> Result<bool> {
    match filter {
        Some(filter) => Ok(truth(&scope.eval(filter)?)? == Some(true)),
        None => Ok(true),
    }
}

fn coerce(table: &Table, column: &ColumnDef, value: Value) -> Result<Value> {
    let type_name = value.type_name();
    column.column_type.coerce(value).ok_or_else(|| {
        error(
            Cause::Type,
            format!(
                "cannot store {type_name} value in {} column {}.{}",
                column.column_type, table.name, column.name
            ),
        )
    })
}

/// `ORDER BY` may name an output alias.
fn order_key<'a>(expr: &'a Expr, select: &'a Select, columns: &[ColumnDef]) -> &'a Expr {
    if let Expr::Column(name) = expr
        && !columns.iter().any(|c| c.name.eq_ignore_ascii_case(name))
    {
        for item in select.items.iter() {
            if let SelectItem::Expr {
                expr,
                alias: Some(alias),
            } = item
                && alias.eq_ignore_ascii_case(name)
            {
                return expr;
            }
        }
    }
    expr
}

fn compare_nulls_first(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => a.compare(b).unwrap_or(Ordering::Equal),
    }
}

/// Negative limits mean no limit.
fn limit_value(value: Value, clause: &str) -> Result<Option<usize>> {
    match value.as_i64() {
        Some(v) => Ok(usize::try_from(v).ok()),
        None if value.is_null() => Ok(None),
        None => Err(error(
            Cause::Type,
            format!("{clause} expects an integer, found a {} value", value.type_name()),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_core::BackendError;

    fn run(session: &mut Session, statement: impl Into<Statement>) -> Result<Vec<QueryResult>> {
        session.run(&statement.into())
    }

    fn rows(session: &mut Session, statement: impl Into<Statement>) -> Vec<RowLabeled> {
        run(session, statement)
            .unwrap()
            .into_iter()
            .filter_map(|v| match v {
                QueryResult::Row(row) => Some(row),
                QueryResult::Affected(..) => None,
            })
            .collect()
    }

    fn schema() -> Session {
        let mut session = Session::begin(Store::open(None));
        run(
            &mut session,
            "CREATE TABLE authors (id INTEGER PRIMARY KEY, email TEXT NOT NULL UNIQUE, name TEXT);
             CREATE TABLE posts (id INTEGER PRIMARY KEY, author_id INTEGER REFERENCES authors(id), score REAL DEFAULT 0);",
        )
        .unwrap();
        session
    }

    #[test]
    fn insert_and_select() {
        let mut session = schema();
        let result = run(
            &mut session,
            Statement::new("INSERT INTO authors (email, name) VALUES (?, ?), ('b@example.com', NULL)")
                .bind("a@example.com")
                .bind("Ada"),
        )
        .unwrap();
        let QueryResult::Affected(affected) = &result[0] else {
            panic!("Expected affected rows, got {result:?}");
        };
        assert_eq!(affected.rows_affected, Some(2));
        assert_eq!(affected.last_affected_id, Some(2));

        let found = rows(&mut session, "SELECT id, name FROM authors ORDER BY name");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].get_column("name"), Some(&Value::Varchar(None)));
        assert_eq!(found[1].get::<String>("name").unwrap(), "Ada");

        let found = rows(&mut session, "SELECT email AS e FROM authors ORDER BY e DESC LIMIT 1");
        assert_eq!(found[0].names(), ["e"]);
        assert_eq!(found[0].get::<String>("e").unwrap(), "b@example.com");
    }

    #[test]
    fn constraints() {
        let mut session = schema();
        run(&mut session, "INSERT INTO authors (email) VALUES ('a@example.com')").unwrap();
        let error = run(&mut session, "INSERT INTO authors (email) VALUES ('a@example.com')").unwrap_err();
        assert_eq!(BackendError::cause_of(&error), Cause::Constraint);
        assert_eq!(error.to_string(), "UNIQUE constraint failed: authors.email");

        let error = run(&mut session, "INSERT INTO authors (name) VALUES ('x')").unwrap_err();
        assert_eq!(error.to_string(), "NOT NULL constraint failed: authors.email");

        let error = run(&mut session, "INSERT INTO posts (author_id) VALUES (42)").unwrap_err();
        assert_eq!(BackendError::cause_of(&error), Cause::Constraint);

        run(&mut session, "INSERT INTO posts (author_id) VALUES (1)").unwrap();
        let error = run(&mut session, "DELETE FROM authors").unwrap_err();
        assert_eq!(BackendError::cause_of(&error), Cause::Constraint);
        assert_eq!(rows(&mut session, "SELECT * FROM authors").len(), 1);

        let error = run(&mut session, "INSERT INTO posts (score) VALUES ('high')").unwrap_err();
        assert_eq!(BackendError::cause_of(&error), Cause::Type);
    }

    #[test]
    fn failed_statement_has_no_effect() {
        let mut session = schema();
        let error = run(
            &mut session,
            "INSERT INTO authors (email) VALUES ('a@example.com'), ('a@example.com')",
        )
        .unwrap_err();
        assert_eq!(BackendError::cause_of(&error), Cause::Constraint);
        assert!(rows(&mut session, "SELECT * FROM authors").is_empty());

        // Statements before the failing one are kept
        let error = run(
            &mut session,
            "INSERT INTO authors (email) VALUES ('a@example.com'); UPDATE authors SET id = 7",
        )
        .unwrap_err();
        assert_eq!(error.to_string(), "cannot change the primary key authors.id");
        assert_eq!(rows(&mut session, "SELECT * FROM authors").len(), 1);
    }

    #[test]
    fn parameter_count_must_match() {
        let mut session = schema();
        let error = run(&mut session, "SELECT ? + ?").unwrap_err();
        assert_eq!(BackendError::cause_of(&error), Cause::Syntax);
        assert_eq!(
            error.to_string(),
            "The statement has 2 parameters but 0 values were bound"
        );
    }

    #[test]
    fn aggregates_and_updates() {
        let mut session = schema();
        run(&mut session, "INSERT INTO authors (email) VALUES ('a'), ('b'), ('c')").unwrap();
        run(
            &mut session,
            "INSERT INTO posts (author_id, score) VALUES (1, 1.5), (1, 2.5), (2, NULL)",
        )
        .unwrap();
        let found = rows(
            &mut session,
            "SELECT COUNT(*), COUNT(score), SUM(score), MAX(author_id) AS last FROM posts",
        );
        assert_eq!(found[0].get::<i64>("COUNT(*)").unwrap(), 3);
        assert_eq!(found[0].get::<i64>("COUNT(score)").unwrap(), 2);
        assert_eq!(found[0].get::<f64>("SUM(score)").unwrap(), 4.0);
        assert_eq!(found[0].get::<i64>("last").unwrap(), 2);

        let result = run(&mut session, "UPDATE posts SET score = score * 2 WHERE author_id = 1").unwrap();
        let QueryResult::Affected(affected) = &result[0] else {
            panic!("Expected affected rows, got {result:?}");
        };
        assert_eq!(affected.rows_affected, Some(2));
        let found = rows(&mut session, "SELECT AVG(score) FROM posts WHERE score IS NOT NULL");
        assert_eq!(found[0].get::<f64>("AVG(score)").unwrap(), 4.0);

        let error = run(&mut session, "SELECT email, COUNT(*) FROM authors").unwrap_err();
        assert_eq!(BackendError::cause_of(&error), Cause::Syntax);
    }

    #[test]
    fn drop_referenced_table() {
        let mut session = schema();
        let error = run(&mut session, "DROP TABLE authors").unwrap_err();
        assert_eq!(BackendError::cause_of(&error), Cause::Constraint);
        run(&mut session, "DROP TABLE posts; DROP TABLE authors; DROP TABLE IF EXISTS authors").unwrap();
        let error = run(&mut session, "SELECT * FROM authors").unwrap_err();
        assert_eq!(error.to_string(), "no such table: authors");
    }
}
