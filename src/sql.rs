use jiff::civil::Date;
use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::model::Stay;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertSpot {
        id: Ulid,
        name: Option<String>,
    },
    DeleteSpot {
        id: Ulid,
    },
    /// `id` is generated server-side when the statement leaves it out.
    InsertBooking {
        id: Option<Ulid>,
        spot_id: Ulid,
        stay: Stay,
        returning: bool,
    },
    UpdateBooking {
        id: Ulid,
        stay: Stay,
        returning: bool,
    },
    DeleteBooking {
        id: Ulid,
    },
    SelectSpots,
    SelectSpotBookings {
        spot_id: Ulid,
    },
    /// Bookings made by the session user.
    SelectOwnBookings,
}

/// Which result set a statement returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowShape {
    Spots,
    Bookings,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            returning,
            ..
        } => parse_update(&table.relation, assignments, selection, returning.is_some()),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Result set of `sql` without evaluating any values, so statements with
/// `$n` placeholders can be described before they are bound.
pub fn describe_sql(sql: &str) -> Result<Option<RowShape>, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Ok(None);
    };

    let bookings_if = |returning: bool| returning.then_some(RowShape::Bookings);
    match stmt {
        Statement::Insert(insert) => {
            let table = insert_table_name(insert)?;
            match table.as_str() {
                "spots" => Ok(None),
                "bookings" => Ok(bookings_if(insert.returning.is_some())),
                _ => Err(SqlError::UnknownTable(table)),
            }
        }
        Statement::Update {
            table, returning, ..
        } => {
            let name = table_factor_name(&table.relation)?;
            if name != "bookings" {
                return Err(SqlError::UnknownTable(name));
            }
            Ok(bookings_if(returning.is_some()))
        }
        Statement::Delete(delete) => {
            let table = delete_table_name(delete)?;
            match table.as_str() {
                "spots" | "bookings" => Ok(None),
                _ => Err(SqlError::UnknownTable(table)),
            }
        }
        Statement::Query(query) => Ok(Some(match select_target(query)? {
            SelectTarget::Spots => RowShape::Spots,
            SelectTarget::OwnBookings | SelectTarget::SpotBookings(_) => RowShape::Bookings,
        })),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let columns: Vec<String> = insert
        .columns
        .iter()
        .map(|c| c.value.to_lowercase())
        .collect();

    match table.as_str() {
        "spots" => {
            let row = Row::new(&columns, &values, &["id", "name"])?;
            Ok(Command::InsertSpot {
                id: parse_ulid(row.require("id")?)?,
                name: row.get("name").map(parse_text_or_null).transpose()?.flatten(),
            })
        }
        "bookings" => {
            // Without a column list, three values mean the id was left out.
            let positional: &[&'static str] = if columns.is_empty() && values.len() == 3 {
                &["spot_id", "start_date", "end_date"]
            } else {
                &["id", "spot_id", "start_date", "end_date"]
            };
            let row = Row::new(&columns, &values, positional)?;
            let id = match row.get("id") {
                Some(expr) if !is_null(expr) => Some(parse_ulid(expr)?),
                _ => None,
            };
            Ok(Command::InsertBooking {
                id,
                spot_id: parse_ulid(row.require("spot_id")?)?,
                stay: Stay::new(
                    parse_date(row.require("start_date")?, "start_date")?,
                    parse_date(row.require("end_date")?, "end_date")?,
                ),
                returning: insert.returning.is_some(),
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &TableFactor,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
    returning: bool,
) -> Result<Command, SqlError> {
    let table = table_factor_name(table)?;
    if table != "bookings" {
        return Err(SqlError::UnknownTable(table));
    }

    let (mut start, mut end) = (None, None);
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        };
        match column.as_deref() {
            Some("start_date") => start = Some(parse_date(&assignment.value, "start_date")?),
            Some("end_date") => end = Some(parse_date(&assignment.value, "end_date")?),
            Some(other) => return Err(SqlError::Unsupported(format!("cannot update {other}"))),
            None => return Err(SqlError::Unsupported("tuple assignment".into())),
        }
    }

    Ok(Command::UpdateBooking {
        id: extract_where_eq(selection, "id")?,
        stay: Stay::new(
            start.ok_or(SqlError::MissingColumn("start_date"))?,
            end.ok_or(SqlError::MissingColumn("end_date"))?,
        ),
        returning,
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_eq(&delete.selection, "id")?;

    match table.as_str() {
        "spots" => Ok(Command::DeleteSpot { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    match select_target(query)? {
        SelectTarget::Spots => Ok(Command::SelectSpots),
        SelectTarget::OwnBookings => Ok(Command::SelectOwnBookings),
        SelectTarget::SpotBookings(spot_id) => Ok(Command::SelectSpotBookings {
            spot_id: parse_ulid(spot_id)?,
        }),
    }
}

enum SelectTarget<'a> {
    Spots,
    OwnBookings,
    /// `WHERE spot_id = <expr>`
    SpotBookings(&'a Expr),
}

fn select_target(query: &ast::Query) -> Result<SelectTarget<'_>, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    match (table.as_str(), &select.selection) {
        ("spots", None) => Ok(SelectTarget::Spots),
        ("spots", Some(filter)) => Err(SqlError::Unsupported(format!(
            "filter on spots: {filter}"
        ))),
        ("bookings", None) => Ok(SelectTarget::OwnBookings),
        ("bookings", selection) => Ok(SelectTarget::SpotBookings(where_eq_value(
            selection, "spot_id",
        )?)),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── Helpers ───────────────────────────────────────────────────

/// INSERT values keyed by column name.
struct Row<'a> {
    fields: Vec<(&'a str, &'a Expr)>,
}

impl<'a> Row<'a> {
    /// Pair `values` with `columns`, or with `positional` when the statement
    /// names no columns.
    fn new(
        columns: &'a [String],
        values: &'a [Expr],
        positional: &'a [&'static str],
    ) -> Result<Self, SqlError> {
        let names: Vec<&str> = if columns.is_empty() {
            positional.iter().copied().collect()
        } else {
            columns.iter().map(String::as_str).collect()
        };
        if names.len() != values.len() && !(columns.is_empty() && values.len() < names.len()) {
            return Err(SqlError::WrongArity(names.len(), values.len()));
        }
        for name in &names {
            if !positional.iter().any(|p| p == name) {
                return Err(SqlError::UnknownColumn(name.to_string()));
            }
        }
        Ok(Self {
            fields: names.into_iter().zip(values.iter()).collect(),
        })
    }

    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.fields
            .iter()
            .find(|(name, _)| *name == column)
            .map(|(_, expr)| *expr)
    }

    fn require(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(column))
    }
}

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

/// `WHERE <column> = <value>`, parsed as a ULID.
fn extract_where_eq(selection: &Option<Expr>, column: &'static str) -> Result<Ulid, SqlError> {
    parse_ulid(where_eq_value(selection, column)?)
}

fn where_eq_value<'a>(
    selection: &'a Option<Expr>,
    column: &'static str,
) -> Result<&'a Expr, SqlError> {
    match selection {
        Some(Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        }) if expr_column_name(left).as_deref() == Some(column) => Ok(right),
        _ => Err(SqlError::MissingFilter(column)),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

/// Literal behind an expression, looking through `::type` casts.
fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        Expr::Cast { expr, .. } | Expr::Nested(expr) => extract_value(expr),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

fn parse_text(expr: &Expr) -> Result<&str, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(s),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_text(expr).map(|s| Some(s.to_string()))
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_text(expr)?;
    Ulid::from_string(s).map_err(|e| SqlError::BadUlid(format!("{s}: {e}")))
}

fn parse_date(expr: &Expr, field: &'static str) -> Result<Date, SqlError> {
    let s = parse_text(expr)?;
    s.parse::<Date>()
        .map_err(|e| SqlError::BadDate(field, format!("{s}: {e}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("unknown column: {0}")]
    UnknownColumn(String),
    #[error("expected {0} values, got {1}")]
    WrongArity(usize, usize),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("bad ULID: {0}")]
    BadUlid(String),
    #[error("bad {0}: {1}")]
    BadDate(&'static str, String),
}

impl SqlError {
    pub fn sqlstate(&self) -> &'static str {
        match self {
            SqlError::UnknownTable(_) => "42P01",
            SqlError::UnknownColumn(_) => "42703",
            SqlError::BadUlid(_) => "22P02",
            SqlError::BadDate(..) => "22007",
            _ => "42601",
        }
    }
}
