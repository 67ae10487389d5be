use crate::{
    lexer::{Lexer, Token},
    store::{ColumnDef, ColumnType, error},
};
use ledger_core::{Cause, Result, Value};
use std::fmt::{self, Display};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Command {
    CreateTable {
        name: String,
        if_not_exists: bool,
        columns: Vec<ColumnDef>,
    },
    DropTable {
        name: String,
        if_exists: bool,
    },
    Insert {
        table: String,
        columns: Option<Vec<String>>,
        rows: Vec<Vec<Expr>>,
    },
    Select(Select),
    Update {
        table: String,
        assignments: Vec<(String, Expr)>,
        filter: Option<Expr>,
    },
    Delete {
        table: String,
        filter: Option<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Select {
    pub(crate) items: Vec<SelectItem>,
    pub(crate) table: Option<String>,
    pub(crate) filter: Option<Expr>,
    pub(crate) order_by: Vec<(Expr, Order)>,
    pub(crate) limit: Option<Expr>,
    pub(crate) offset: Option<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SelectItem {
    Wildcard,
    Expr { expr: Expr, alias: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Order {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    Less,
    LessEq,
    Greater,
    GreaterEq,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Concat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Aggregate {
    Count,
    Min,
    Max,
    Sum,
    Avg,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Expr {
    Literal(Value),
    /// Index into the statement parameters.
    Parameter(usize),
    Column(String),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    IsNull {
        expr: Box<Expr>,
        negated: bool,
    },
    Like {
        expr: Box<Expr>,
        pattern: Box<Expr>,
        negated: bool,
    },
    /// `None` argument is `COUNT(*)`.
    Aggregate(Aggregate, Option<Box<Expr>>),
}

impl Expr {
    pub(crate) fn has_aggregate(&self) -> bool {
        match self {
            Expr::Aggregate(..) => true,
            Expr::Unary(_, v) => v.has_aggregate(),
            Expr::Binary(_, l, r) => l.has_aggregate() || r.has_aggregate(),
            Expr::IsNull { expr, .. } => expr.has_aggregate(),
            Expr::Like { expr, pattern, .. } => expr.has_aggregate() || pattern.has_aggregate(),
            _ => false,
        }
    }
}

impl Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BinaryOp::Or => "OR",
            BinaryOp::And => "AND",
            BinaryOp::Eq => "=",
            BinaryOp::NotEq => "<>",
            BinaryOp::Less => "<",
            BinaryOp::LessEq => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEq => ">=",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Concat => "||",
        })
    }
}

impl Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Aggregate::Count => "COUNT",
            Aggregate::Min => "MIN",
            Aggregate::Max => "MAX",
            Aggregate::Sum => "SUM",
            Aggregate::Avg => "AVG",
        })
    }
}

/// Column label of an unaliased expression.
impl Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(v) => v.fmt(f),
            Expr::Parameter(..) => f.write_str("?"),
            Expr::Column(v) => f.write_str(v),
            Expr::Unary(UnaryOp::Not, v) => write!(f, "NOT {v}"),
            Expr::Unary(UnaryOp::Neg, v) => write!(f, "-{v}"),
            Expr::Binary(op, l, r) => write!(f, "{l} {op} {r}"),
            Expr::IsNull { expr, negated } => {
                write!(f, "{expr} IS {}NULL", if *negated { "NOT " } else { "" })
            }
            Expr::Like {
                expr,
                pattern,
                negated,
            } => write!(
                f,
                "{expr} {}LIKE {pattern}",
                if *negated { "NOT " } else { "" }
            ),
            Expr::Aggregate(function, None) => write!(f, "{function}(*)"),
            Expr::Aggregate(function, Some(v)) => write!(f, "{function}({v})"),
        }
    }
}

/// Recursive descent parser over the whole statement text.
///
/// Placeholders are numbered in order of appearance across every statement of the text.
pub(crate) struct Parser {
    tokens: Vec<Token>,
    position: usize,
    parameters: usize,
}

impl Parser {
    /// Parse every `;` separated statement, returning them with the number of placeholders.
    pub(crate) fn parse(sql: &str) -> Result<(Vec<Command>, usize)> {
        let mut parser = Self {
            tokens: Lexer::new(sql).collect::<Result<_>>()?,
            position: 0,
            parameters: 0,
        };
        let mut commands = Vec::new();
        loop {
            while parser.consume_symbol(";") {}
            if parser.peek().is_none() {
                break;
            }
            commands.push(parser.parse_command()?);
            if parser.peek().is_some() && !parser.consume_symbol(";") {
                return Err(parser.unexpected("`;` or end of statement"));
            }
        }
        Ok((commands, parser.parameters))
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn unexpected(&self, expected: &str) -> ledger_core::Error {
        let found = match self.peek() {
            Some(Token::Word(v) | Token::Quoted(v)) => format!("`{v}`"),
            Some(Token::String(v)) => format!("'{v}'"),
            Some(Token::Integer(v)) => v.to_string(),
            Some(Token::Float(v)) => v.to_string(),
            Some(Token::Parameter) => "`?`".into(),
            Some(Token::Symbol(v)) => format!("`{v}`"),
            None => "end of statement".into(),
        };
        error(
            Cause::Syntax,
            format!("Expected {expected}, found {found}"),
        )
    }

    fn consume_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_keyword(keyword)) {
            self.position += 1;
            return true;
        }
        false
    }

    fn consume_keywords(&mut self, keywords: &[&str]) -> bool {
        let matches = keywords.iter().enumerate().all(|(i, k)| {
            self.tokens
                .get(self.position + i)
                .is_some_and(|t| t.is_keyword(k))
        });
        if matches {
            self.position += keywords.len();
        }
        matches
    }

    fn expect_keyword(&mut self, keyword: &str) -> Result<()> {
        if self.consume_keyword(keyword) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("`{keyword}`")))
        }
    }

    fn consume_symbol(&mut self, symbol: &str) -> bool {
        if matches!(self.peek(), Some(Token::Symbol(v)) if *v == symbol) {
            self.position += 1;
            return true;
        }
        false
    }

    fn expect_symbol(&mut self, symbol: &str) -> Result<()> {
        if self.consume_symbol(symbol) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("`{symbol}`")))
        }
    }

    fn parse_identifier(&mut self) -> Result<String> {
        match self.peek() {
            Some(Token::Word(v) | Token::Quoted(v)) => {
                let v = v.clone();
                self.position += 1;
                Ok(v)
            }
            _ => Err(self.unexpected("an identifier")),
        }
    }

    fn parse_comma_separated<T>(
        &mut self,
        mut parse: impl FnMut(&mut Self) -> Result<T>,
    ) -> Result<Vec<T>> {
        let mut result = vec![parse(self)?];
        while self.consume_symbol(",") {
            result.push(parse(self)?);
        }
        Ok(result)
    }

    fn parse_command(&mut self) -> Result<Command> {
        if self.consume_keyword("CREATE") {
            self.expect_keyword("TABLE")?;
            self.parse_create_table()
        } else if self.consume_keyword("DROP") {
            self.expect_keyword("TABLE")?;
            let if_exists = self.consume_keywords(&["IF", "EXISTS"]);
            Ok(Command::DropTable {
                name: self.parse_identifier()?,
                if_exists,
            })
        } else if self.consume_keyword("INSERT") {
            self.expect_keyword("INTO")?;
            self.parse_insert()
        } else if self.consume_keyword("SELECT") {
            Ok(Command::Select(self.parse_select()?))
        } else if self.consume_keyword("UPDATE") {
            self.parse_update()
        } else if self.consume_keyword("DELETE") {
            self.expect_keyword("FROM")?;
            let table = self.parse_identifier()?;
            let filter = self.parse_where()?;
            Ok(Command::Delete { table, filter })
        } else {
            Err(self.unexpected("a statement"))
        }
    }

    fn parse_create_table(&mut self) -> Result<Command> {
        let if_not_exists = self.consume_keywords(&["IF", "NOT", "EXISTS"]);
        let name = self.parse_identifier()?;
        self.expect_symbol("(")?;
        let columns = self.parse_comma_separated(Self::parse_column_def)?;
        self.expect_symbol(")")?;
        Ok(Command::CreateTable {
            name,
            if_not_exists,
            columns,
        })
    }

    fn parse_column_def(&mut self) -> Result<ColumnDef> {
        let name = self.parse_identifier()?;
        let type_name = self.parse_identifier()?;
        let column_type = ColumnType::from_name(&type_name).ok_or_else(|| {
            error(
                Cause::Syntax,
                format!("Unsupported column type `{type_name}`"),
            )
        })?;
        // Length or precision arguments are ignored: `VARCHAR(255)`
        if self.consume_symbol("(") {
            self.parse_comma_separated(Self::parse_expr)?;
            self.expect_symbol(")")?;
        }
        let mut column = ColumnDef::new(name, column_type);
        loop {
            if self.consume_keywords(&["PRIMARY", "KEY"]) {
                column.primary_key = true;
                self.consume_keyword("AUTOINCREMENT");
            } else if self.consume_keywords(&["NOT", "NULL"]) {
                column.not_null = true;
            } else if self.consume_keyword("NULL") {
                column.not_null = false;
            } else if self.consume_keyword("UNIQUE") {
                column.unique = true;
            } else if self.consume_keyword("DEFAULT") {
                column.default = Some(self.parse_primary()?);
            } else if self.consume_keyword("REFERENCES") {
                let table = self.parse_identifier()?;
                let mut target = None;
                if self.consume_symbol("(") {
                    target = Some(self.parse_identifier()?);
                    self.expect_symbol(")")?;
                }
                column.references = Some((table, target));
            } else {
                break;
            }
        }
        Ok(column)
    }

    fn parse_insert(&mut self) -> Result<Command> {
        let table = self.parse_identifier()?;
        let mut columns = None;
        if self.consume_symbol("(") {
            columns = Some(self.parse_comma_separated(Self::parse_identifier)?);
            self.expect_symbol(")")?;
        }
        self.expect_keyword("VALUES")?;
        let rows = self.parse_comma_separated(|parser| {
            parser.expect_symbol("(")?;
            let row = parser.parse_comma_separated(Self::parse_expr)?;
            parser.expect_symbol(")")?;
            Ok(row)
        })?;
        Ok(Command::Insert {
            table,
            columns,
            rows,
        })
    }

    fn parse_select(&mut self) -> Result<Select> {
        let items = self.parse_comma_separated(|parser| {
            if parser.consume_symbol("*") {
                return Ok(SelectItem::Wildcard);
            }
            let expr = parser.parse_expr()?;
            let alias = if parser.consume_keyword("AS") {
                Some(parser.parse_identifier()?)
            } else {
                None
            };
            Ok(SelectItem::Expr { expr, alias })
        })?;
        let table = if self.consume_keyword("FROM") {
            Some(self.parse_identifier()?)
        } else {
            None
        };
        let filter = self.parse_where()?;
        let mut order_by = Vec::new();
        if self.consume_keywords(&["ORDER", "BY"]) {
            order_by = self.parse_comma_separated(|parser| {
                let expr = parser.parse_expr()?;
                let order = if parser.consume_keyword("DESC") {
                    Order::Desc
                } else {
                    parser.consume_keyword("ASC");
                    Order::Asc
                };
                Ok((expr, order))
            })?;
        }
        let (mut limit, mut offset) = (None, None);
        if self.consume_keyword("LIMIT") {
            limit = Some(self.parse_expr()?);
            if self.consume_keyword("OFFSET") {
                offset = Some(self.parse_expr()?);
            }
        }
        Ok(Select {
            items,
            table,
            filter,
            order_by,
            limit,
            offset,
        })
    }

    fn parse_update(&mut self) -> Result<Command> {
        let table = self.parse_identifier()?;
        self.expect_keyword("SET")?;
        let assignments = self.parse_comma_separated(|parser| {
            let column = parser.parse_identifier()?;
            parser.expect_symbol("=")?;
            Ok((column, parser.parse_expr()?))
        })?;
        let filter = self.parse_where()?;
        Ok(Command::Update {
            table,
            assignments,
            filter,
        })
    }

    fn parse_where(&mut self) -> Result<Option<Expr>> {
        if self.consume_keyword("WHERE") {
            Ok(Some(self.parse_expr()?))
        } else {
            Ok(None)
        }
    }

    pub(crate) fn parse_expr(&mut self) -> Result<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Expr> {
        let mut expr = self.parse_and()?;
        while self.consume_keyword("OR") {
            expr = Expr::Binary(BinaryOp::Or, expr.into(), self.parse_and()?.into());
        }
        Ok(expr)
    }

    fn parse_and(&mut self) -> Result<Expr> {
        let mut expr = self.parse_not()?;
        while self.consume_keyword("AND") {
            expr = Expr::Binary(BinaryOp::And, expr.into(), self.parse_not()?.into());
        }
        Ok(expr)
    }

    fn parse_not(&mut self) -> Result<Expr> {
        if self.consume_keyword("NOT") {
            return Ok(Expr::Unary(UnaryOp::Not, self.parse_not()?.into()));
        }
        self.parse_comparison()
    }

    fn parse_comparison(&mut self) -> Result<Expr> {
        let expr = self.parse_additive()?;
        if self.consume_keyword("IS") {
            let negated = self.consume_keyword("NOT");
            self.expect_keyword("NULL")?;
            return Ok(Expr::IsNull {
                expr: expr.into(),
                negated,
            });
        }
        let negated = self.consume_keywords(&["NOT", "LIKE"]);
        if negated || self.consume_keyword("LIKE") {
            return Ok(Expr::Like {
                expr: expr.into(),
                pattern: self.parse_additive()?.into(),
                negated,
            });
        }
        let op = match self.peek() {
            Some(Token::Symbol("=" | "==")) => BinaryOp::Eq,
            Some(Token::Symbol("!=" | "<>")) => BinaryOp::NotEq,
            Some(Token::Symbol("<")) => BinaryOp::Less,
            Some(Token::Symbol("<=")) => BinaryOp::LessEq,
            Some(Token::Symbol(">")) => BinaryOp::Greater,
            Some(Token::Symbol(">=")) => BinaryOp::GreaterEq,
            _ => return Ok(expr),
        };
        self.position += 1;
        Ok(Expr::Binary(op, expr.into(), self.parse_additive()?.into()))
    }

    fn parse_additive(&mut self) -> Result<Expr> {
        let mut expr = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Symbol("+")) => BinaryOp::Add,
                Some(Token::Symbol("-")) => BinaryOp::Sub,
                Some(Token::Symbol("||")) => BinaryOp::Concat,
                _ => return Ok(expr),
            };
            self.position += 1;
            expr = Expr::Binary(op, expr.into(), self.parse_multiplicative()?.into());
        }
    }

    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let mut expr = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Symbol("*")) => BinaryOp::Mul,
                Some(Token::Symbol("/")) => BinaryOp::Div,
                Some(Token::Symbol("%")) => BinaryOp::Rem,
                _ => return Ok(expr),
            };
            self.position += 1;
            expr = Expr::Binary(op, expr.into(), self.parse_unary()?.into());
        }
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        if self.consume_symbol("-") {
            return Ok(match self.parse_unary()? {
                Expr::Literal(Value::Int64(Some(v))) => Expr::Literal(Value::Int64(Some(-v))),
                Expr::Literal(Value::Float64(Some(v))) => Expr::Literal(Value::Float64(Some(-v))),
                expr => Expr::Unary(UnaryOp::Neg, expr.into()),
            });
        }
        if self.consume_symbol("+") {
            return self.parse_unary();
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        let Some(token) = self.next() else {
            return Err(self.unexpected("an expression"));
        };
        Ok(match token {
            Token::Integer(v) => Expr::Literal(Value::Int64(Some(v))),
            Token::Float(v) => Expr::Literal(Value::Float64(Some(v))),
            Token::String(v) => Expr::Literal(Value::Varchar(Some(v))),
            Token::Parameter => {
                self.parameters += 1;
                Expr::Parameter(self.parameters - 1)
            }
            Token::Symbol("(") => {
                let expr = self.parse_expr()?;
                self.expect_symbol(")")?;
                expr
            }
            Token::Symbol("-") => {
                self.position -= 1;
                self.parse_unary()?
            }
            Token::Word(v) if v.eq_ignore_ascii_case("NULL") => Expr::Literal(Value::Null),
            Token::Word(v) if v.eq_ignore_ascii_case("TRUE") => {
                Expr::Literal(Value::Boolean(Some(true)))
            }
            Token::Word(v) if v.eq_ignore_ascii_case("FALSE") => {
                Expr::Literal(Value::Boolean(Some(false)))
            }
            Token::Word(v) | Token::Quoted(v) => {
                if let Some(function) = aggregate(&v)
                    && self.consume_symbol("(")
                {
                    let argument = if function == Aggregate::Count && self.consume_symbol("*") {
                        None
                    } else {
                        Some(self.parse_expr()?.into())
                    };
                    self.expect_symbol(")")?;
                    Expr::Aggregate(function, argument)
                } else if self.consume_symbol(".") {
                    // Qualified column, only one table is ever in scope
                    Expr::Column(self.parse_identifier()?)
                } else {
                    Expr::Column(v)
                }
            }
            _ => {
                self.position -= 1;
                return Err(self.unexpected("an expression"));
            }
        })
    }
}

fn aggregate(name: &str) -> Option<Aggregate> {
    Some(match name.to_ascii_uppercase().as_str() {
        "COUNT" => Aggregate::Count,
        "MIN" => Aggregate::Min,
        "MAX" => Aggregate::Max,
        "SUM" => Aggregate::Sum,
        "AVG" => Aggregate::Avg,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn column(name: &str) -> Box<Expr> {
        Expr::Column(name.into()).into()
    }

    #[test]
    fn parse_ddl() {
        let (commands, parameters) = Parser::parse(
            "CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY,
                title VARCHAR(255) NOT NULL,
                published BOOLEAN NOT NULL DEFAULT FALSE,
                author_id INTEGER NOT NULL REFERENCES users (id)
            );
            DROP TABLE IF EXISTS posts;",
        )
        .unwrap();
        assert_eq!(parameters, 0);
        let Command::CreateTable {
            name,
            if_not_exists,
            columns,
        } = &commands[0]
        else {
            panic!("Expected CREATE TABLE, got {:?}", commands[0]);
        };
        assert_eq!(name, "posts");
        assert!(if_not_exists);
        assert_eq!(columns.len(), 4);
        assert!(columns[0].primary_key);
        assert_eq!(columns[1].column_type, ColumnType::Text);
        assert!(columns[1].not_null);
        assert_eq!(
            columns[2].default,
            Some(Expr::Literal(Value::Boolean(Some(false))))
        );
        assert_eq!(
            columns[3].references,
            Some(("users".into(), Some("id".into())))
        );
        assert_eq!(
            commands[1],
            Command::DropTable {
                name: "posts".into(),
                if_exists: true
            }
        );
    }

    #[test]
    fn parse_expression_precedence() {
        let (commands, parameters) =
            Parser::parse("SELECT * FROM users WHERE NOT a = ? OR b LIKE '%x' AND c IS NOT NULL")
                .unwrap();
        assert_eq!(parameters, 1);
        let Command::Select(select) = &commands[0] else {
            panic!("Expected a SELECT");
        };
        assert_eq!(
            select.filter,
            Some(Expr::Binary(
                BinaryOp::Or,
                Expr::Unary(
                    UnaryOp::Not,
                    Expr::Binary(BinaryOp::Eq, column("a"), Expr::Parameter(0).into()).into()
                )
                .into(),
                Expr::Binary(
                    BinaryOp::And,
                    Expr::Like {
                        expr: column("b"),
                        pattern: Expr::Literal(Value::Varchar(Some("%x".into()))).into(),
                        negated: false,
                    }
                    .into(),
                    Expr::IsNull {
                        expr: column("c"),
                        negated: true,
                    }
                    .into(),
                )
                .into(),
            ))
        );
    }

    #[test]
    fn parse_select_clauses() {
        let (commands, _) = Parser::parse(
            "SELECT COUNT(*) AS total, MAX(id) FROM posts WHERE published = TRUE ORDER BY id DESC LIMIT 1 OFFSET 2",
        )
        .unwrap();
        let Command::Select(select) = &commands[0] else {
            panic!("Expected a SELECT");
        };
        assert_eq!(
            select.items,
            [
                SelectItem::Expr {
                    expr: Expr::Aggregate(Aggregate::Count, None),
                    alias: Some("total".into()),
                },
                SelectItem::Expr {
                    expr: Expr::Aggregate(Aggregate::Max, Some(column("id"))),
                    alias: None,
                },
            ]
        );
        assert_eq!(select.order_by, [(Expr::Column("id".into()), Order::Desc)]);
        assert_eq!(select.limit, Some(Expr::Literal(Value::Int64(Some(1)))));
        assert_eq!(select.offset, Some(Expr::Literal(Value::Int64(Some(2)))));
        assert_eq!(
            Expr::Aggregate(Aggregate::Max, Some(column("id"))).to_string(),
            "MAX(id)"
        );
    }

    #[test]
    fn parameters_across_statements() {
        let (commands, parameters) = Parser::parse(
            "INSERT INTO users (email, name) VALUES (?, ?), (?, NULL); UPDATE users SET name = ? WHERE id = ?",
        )
        .unwrap();
        assert_eq!(commands.len(), 2);
        assert_eq!(parameters, 5);
        assert_eq!(
            commands[1],
            Command::Update {
                table: "users".into(),
                assignments: vec![("name".into(), Expr::Parameter(3))],
                filter: Some(Expr::Binary(
                    BinaryOp::Eq,
                    column("id"),
                    Expr::Parameter(4).into()
                )),
            }
        );
    }

    #[test]
    fn syntax_errors() {
        let error = Parser::parse("SELEC * FROM users").unwrap_err();
        assert_eq!(error.to_string(), "Expected a statement, found `SELEC`");
        let error = Parser::parse("SELECT * FROM users WHERE").unwrap_err();
        assert_eq!(
            error.to_string(),
            "Expected an expression, found end of statement"
        );
        let error = Parser::parse("DELETE FROM users users").unwrap_err();
        assert_eq!(
            error.to_string(),
            "Expected `;` or end of statement, found `users`"
        );
    }
}
