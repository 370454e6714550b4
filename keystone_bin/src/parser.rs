//! The SQL dialect understood by the REPL, parsed with chumsky into a
//! statement enum. Keywords are matched case-insensitively; identifiers may
//! not shadow them. Supported statements:
//!
//!   CREATE TABLE name (col TYPE, ...)
//!   CREATE INDEX name ON table (column)
//!   INSERT INTO table VALUES (lit, ...)
//!   SELECT * | col, ... FROM table [WHERE col op lit]
//!       [ORDER BY col [ASC|DESC]] [LIMIT n]
//!   UPDATE table SET col = lit, ... [WHERE col op lit]
//!   DELETE FROM table [WHERE col op lit]
//!   BEGIN | COMMIT | ROLLBACK

use chumsky::prelude::*;
use plinth::DataType;

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateTable(CreateTableStatement),
    CreateIndex(CreateIndexStatement),
    Insert(InsertStatement),
    Select(SelectStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
    Begin,
    Commit,
    Rollback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateTableStatement {
    pub table_name: String,
    pub columns: Vec<ColumnDef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateIndexStatement {
    pub index_name: String,
    pub table_name: String,
    pub column_name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table_name: String,
    pub values: Vec<Literal>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub table_name: String,
    /// Empty means `*`.
    pub columns: Vec<String>,
    pub where_clause: Option<Condition>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub table_name: String,
    pub assignments: Vec<(String, Literal)>,
    pub where_clause: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub table_name: String,
    pub where_clause: Option<Condition>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub column: String,
    pub desc: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub column: String,
    pub op: CompareOp,
    pub value: Literal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    String(String),
    Bool(bool),
    Null,
}

const KEYWORDS: &[&str] = &[
    "SELECT", "FROM", "WHERE", "CREATE", "TABLE", "INDEX", "ON", "INSERT", "INTO", "VALUES",
    "UPDATE", "SET", "DELETE", "ORDER", "BY", "ASC", "DESC", "LIMIT", "BEGIN", "COMMIT",
    "ROLLBACK", "TRUE", "FALSE", "NULL", "INT", "INTEGER", "FLOAT", "DOUBLE", "REAL", "STRING",
    "TEXT", "VARCHAR", "BOOL", "BOOLEAN",
];

fn keyword(kw: &'static str) -> impl Parser<char, (), Error = Simple<char>> + Clone {
    text::ident()
        .try_map(move |s: String, span| {
            if s.eq_ignore_ascii_case(kw) {
                Ok(())
            } else {
                Err(Simple::custom(span, format!("expected keyword {kw}")))
            }
        })
        .padded()
}

pub fn parse_sql(src: &str) -> Result<Vec<Statement>, Vec<Simple<char>>> {
    let ident = text::ident()
        .padded()
        .try_map(|s: String, span| {
            let upper = s.to_ascii_uppercase();
            if KEYWORDS.contains(&upper.as_str()) {
                Err(Simple::custom(
                    span,
                    format!("keyword `{s}` cannot be used as an identifier"),
                ))
            } else {
                Ok(s)
            }
        });

    let number = just('-')
        .or_not()
        .chain::<char, _, _>(text::int(10))
        .chain::<char, _, _>(just('.').chain(text::digits(10)).or_not().flatten())
        .collect::<String>()
        .try_map(|s: String, span| {
            if s.contains('.') {
                s.parse::<f64>()
                    .map(Literal::Float)
                    .map_err(|_| Simple::custom(span, format!("invalid number: {s}")))
            } else {
                s.parse::<i64>()
                    .map(Literal::Int)
                    .map_err(|_| Simple::custom(span, format!("invalid number: {s}")))
            }
        });

    let string = just('\'')
        .ignore_then(filter(|c| *c != '\'').repeated())
        .then_ignore(just('\''))
        .collect::<String>()
        .map(Literal::String);

    let literal = number
        .or(string)
        .or(keyword("TRUE").to(Literal::Bool(true)))
        .or(keyword("FALSE").to(Literal::Bool(false)))
        .or(keyword("NULL").to(Literal::Null))
        .padded();

    let compare_op = just("<=")
        .to(CompareOp::LtEq)
        .or(just(">=").to(CompareOp::GtEq))
        .or(just("!=").to(CompareOp::NotEq))
        .or(just("<>").to(CompareOp::NotEq))
        .or(just("<").to(CompareOp::Lt))
        .or(just(">").to(CompareOp::Gt))
        .or(just("=").to(CompareOp::Eq))
        .padded();

    let condition = ident
        .clone()
        .then(compare_op)
        .then(literal.clone())
        .map(|((column, op), value)| Condition { column, op, value });

    let where_clause = keyword("WHERE").ignore_then(condition).or_not();

    let data_type = text::ident()
        .padded()
        .try_map(|s: String, span| match s.to_ascii_uppercase().as_str() {
            "INT" | "INTEGER" => Ok(DataType::Int),
            "FLOAT" | "DOUBLE" | "REAL" => Ok(DataType::Float),
            "STRING" | "TEXT" | "VARCHAR" => Ok(DataType::String),
            "BOOL" | "BOOLEAN" => Ok(DataType::Bool),
            other => Err(Simple::custom(span, format!("unknown column type: {other}"))),
        });

    let column_def = ident
        .clone()
        .then(data_type)
        .map(|(name, data_type)| ColumnDef { name, data_type });

    let create_table = keyword("CREATE")
        .ignore_then(keyword("TABLE"))
        .ignore_then(ident.clone())
        .then(
            column_def
                .separated_by(just(',').padded())
                .allow_trailing()
                .delimited_by(just('(').padded(), just(')').padded()),
        )
        .map(|(table_name, columns)| {
            Statement::CreateTable(CreateTableStatement {
                table_name,
                columns,
            })
        });

    let create_index = keyword("CREATE")
        .ignore_then(keyword("INDEX"))
        .ignore_then(ident.clone())
        .then_ignore(keyword("ON"))
        .then(ident.clone())
        .then(
            ident
                .clone()
                .delimited_by(just('(').padded(), just(')').padded()),
        )
        .map(|((index_name, table_name), column_name)| {
            Statement::CreateIndex(CreateIndexStatement {
                index_name,
                table_name,
                column_name,
            })
        });

    let insert = keyword("INSERT")
        .ignore_then(keyword("INTO"))
        .ignore_then(ident.clone())
        .then_ignore(keyword("VALUES"))
        .then(
            literal
                .clone()
                .separated_by(just(',').padded())
                .allow_trailing()
                .delimited_by(just('(').padded(), just(')').padded()),
        )
        .map(|(table_name, values)| Statement::Insert(InsertStatement { table_name, values }));

    let select_cols = just('*')
        .padded()
        .to(Vec::new())
        .or(ident.clone().separated_by(just(',').padded()).at_least(1));

    let order_by = keyword("ORDER")
        .ignore_then(keyword("BY"))
        .ignore_then(ident.clone())
        .then(keyword("ASC").to(false).or(keyword("DESC").to(true)).or_not())
        .map(|(column, desc)| OrderBy {
            column,
            desc: desc.unwrap_or(false),
        })
        .or_not();

    let limit = keyword("LIMIT")
        .ignore_then(text::int(10).padded().try_map(|s: String, span| {
            s.parse::<usize>()
                .map_err(|_| Simple::custom(span, format!("invalid LIMIT value: {s}")))
        }))
        .or_not();

    let select = keyword("SELECT")
        .ignore_then(select_cols)
        .then_ignore(keyword("FROM"))
        .then(ident.clone())
        .then(where_clause.clone())
        .then(order_by)
        .then(limit)
        .map(
            |((((columns, table_name), where_clause), order_by), limit)| {
                Statement::Select(SelectStatement {
                    table_name,
                    columns,
                    where_clause,
                    order_by,
                    limit,
                })
            },
        );

    let assignment = ident
        .clone()
        .then_ignore(just('=').padded())
        .then(literal.clone());

    let update = keyword("UPDATE")
        .ignore_then(ident.clone())
        .then_ignore(keyword("SET"))
        .then(assignment.separated_by(just(',').padded()).at_least(1))
        .then(where_clause.clone())
        .map(|((table_name, assignments), where_clause)| {
            Statement::Update(UpdateStatement {
                table_name,
                assignments,
                where_clause,
            })
        });

    let delete = keyword("DELETE")
        .ignore_then(keyword("FROM"))
        .ignore_then(ident.clone())
        .then(where_clause)
        .map(|(table_name, where_clause)| {
            Statement::Delete(DeleteStatement {
                table_name,
                where_clause,
            })
        });

    let begin = keyword("BEGIN").to(Statement::Begin);
    let commit = keyword("COMMIT").to(Statement::Commit);
    let rollback = keyword("ROLLBACK").to(Statement::Rollback);

    let statement = create_table
        .or(create_index)
        .or(select)
        .or(insert)
        .or(update)
        .or(delete)
        .or(begin)
        .or(commit)
        .or(rollback);

    statement
        .separated_by(just(';').padded().repeated().at_least(1))
        .allow_trailing()
        .padded()
        .then_ignore(end())
        .parse(src)
}
