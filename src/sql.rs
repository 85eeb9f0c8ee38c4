use sqlparser::ast::{
    self, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor,
    TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::model::*;

pub const TABLE: &str = "bookings";

/// Column order for positional `INSERT ... VALUES` without a column list.
const INSERT_COLUMNS: [&str; 4] = ["resource_id", "renter_id", "period_start", "period_end"];

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertBooking {
        resource_id: ResourceId,
        renter_id: UserId,
        start: Ms,
        end: Ms,
    },
    UpdateBooking {
        id: BookingId,
        resource_id: ResourceId,
        renter_id: UserId,
        start: Ms,
        end: Ms,
    },
    DeleteBooking {
        id: BookingId,
    },
    SelectBooking {
        id: BookingId,
    },
    SelectBookings,
    SelectResourceBookings {
        resource_id: ResourceId,
    },
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
            ..
        } => parse_update(table, assignments, selection),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// The four writable fields, collected from an INSERT row or UPDATE SET list.
#[derive(Default)]
struct Fields {
    resource_id: Option<i64>,
    renter_id: Option<i64>,
    start: Option<Ms>,
    end: Option<Ms>,
}

impl Fields {
    fn set(&mut self, column: &str, expr: &Expr) -> Result<(), SqlError> {
        let slot = match column {
            "resource_id" => &mut self.resource_id,
            "renter_id" => &mut self.renter_id,
            "period_start" => &mut self.start,
            "period_end" => &mut self.end,
            "id" => return Err(SqlError::Invalid("id is assigned by the server".into())),
            other => return Err(SqlError::Invalid(format!("unknown column: {other}"))),
        };
        *slot = parse_i64_or_null(expr)?;
        Ok(())
    }

    fn require(self) -> Result<(i64, i64, Ms, Ms), SqlError> {
        Ok((
            self.resource_id.ok_or(SqlError::MissingColumn("resource_id"))?,
            self.renter_id.ok_or(SqlError::MissingColumn("renter_id"))?,
            self.start.ok_or(SqlError::MissingColumn("period_start"))?,
            self.end.ok_or(SqlError::MissingColumn("period_end"))?,
        ))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    expect_bookings(insert_table_name(insert)?)?;
    let rows = extract_insert_rows(insert)?;
    let [values] = rows else {
        return Err(SqlError::Unsupported("multi-row INSERT".into()));
    };

    let columns: Vec<String> = if insert.columns.is_empty() {
        INSERT_COLUMNS.iter().map(|c| c.to_string()).collect()
    } else {
        insert
            .columns
            .iter()
            .map(|c| c.to_string().trim_matches('"').to_lowercase())
            .collect()
    };
    if values.len() != columns.len() {
        return Err(SqlError::Parse(format!(
            "{} columns but {} values",
            columns.len(),
            values.len()
        )));
    }

    let mut fields = Fields::default();
    for (column, value) in columns.iter().zip(values) {
        fields.set(column, value)?;
    }
    let (resource_id, renter_id, start, end) = fields.require()?;
    Ok(Command::InsertBooking {
        resource_id,
        renter_id,
        start,
        end,
    })
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    expect_bookings(table_factor_name(&table.relation)?)?;
    let id = extract_where_id(selection)?;

    let mut fields = Fields::default();
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        fields.set(&column, &assignment.value)?;
    }
    // No merge semantics: an update names every field.
    let (resource_id, renter_id, start, end) = fields.require()?;
    Ok(Command::UpdateBooking {
        id,
        resource_id,
        renter_id,
        start,
        end,
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    expect_bookings(delete_table_name(delete)?)?;
    let id = extract_where_id(&delete.selection)?;
    Ok(Command::DeleteBooking { id })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    expect_bookings(table_factor_name(&from.relation)?)?;

    let Some(selection) = &select.selection else {
        return Ok(Command::SelectBookings);
    };
    match eq_filter(selection)? {
        ("id", id) => Ok(Command::SelectBooking { id }),
        ("resource_id", resource_id) => Ok(Command::SelectResourceBookings { resource_id }),
        (col, _) => Err(SqlError::Unsupported(format!("filter on {col}"))),
    }
}

/// A single `column = integer` predicate.
fn eq_filter(expr: &Expr) -> Result<(&'static str, i64), SqlError> {
    let Expr::BinaryOp { left, op: ast::BinaryOperator::Eq, right } = expr else {
        return Err(SqlError::Unsupported("only `column = value` filters".into()));
    };
    let col = match expr_column_name(left).as_deref() {
        Some("id") => "id",
        Some("resource_id") => "resource_id",
        Some("renter_id") => "renter_id",
        Some("period_start") => "period_start",
        Some("period_end") => "period_end",
        _ => return Err(SqlError::Unsupported(format!("filter {expr}"))),
    };
    Ok((col, parse_i64_expr(right)?))
}

// ── Helpers ───────────────────────────────────────────────────

fn expect_bookings(table: String) -> Result<(), SqlError> {
    if table == TABLE {
        Ok(())
    } else {
        Err(SqlError::UnknownTable(table))
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
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
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

fn extract_insert_rows(insert: &ast::Insert) -> Result<&[Vec<Expr>], SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) if values.rows.is_empty() => {
            Err(SqlError::Parse("empty VALUES".into()))
        }
        SetExpr::Values(values) => Ok(&values.rows),
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<BookingId, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match eq_filter(sel) {
        Ok(("id", id)) => Ok(id),
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s:?}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected integer, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        parse_i64_expr(expr)?
            .checked_neg()
            .ok_or_else(|| SqlError::Parse("integer out of range".into()))
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

/// NULL reads as "not supplied".
fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_i64_expr(expr).map(Some),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    /// A required booking field was absent or NULL.
    MissingColumn(&'static str),
    /// Well-formed SQL asking for something the table does not allow.
    Invalid(String),
    MissingFilter(&'static str),
}

impl SqlError {
    /// Whether this is bad booking input rather than bad SQL.
    pub fn is_validation(&self) -> bool {
        matches!(self, SqlError::MissingColumn(_) | SqlError::Invalid(_))
    }
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::MissingColumn(col) => write!(f, "missing value for {col}"),
            SqlError::Invalid(s) => write!(f, "invalid: {s}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_insert_named_columns() {
        let sql = "INSERT INTO bookings (resource_id, renter_id, period_start, period_end) VALUES (5, 1, 1000, 2000)";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertBooking {
                resource_id: 5,
                renter_id: 1,
                start: 1000,
                end: 2000,
            }
        );
    }

    #[test]
    fn parse_insert_reordered_columns() {
        let sql = "INSERT INTO bookings (period_end, period_start, renter_id, resource_id) VALUES (2000, 1000, 1, 5)";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertBooking {
                resource_id: 5,
                renter_id: 1,
                start: 1000,
                end: 2000,
            }
        );
    }

    #[test]
    fn parse_insert_positional() {
        let sql = "INSERT INTO bookings VALUES (5, 1, '1000', 2000)";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertBooking {
                resource_id: 5,
                renter_id: 1,
                start: 1000,
                end: 2000,
            }
        );
    }

    #[test]
    fn parse_insert_negative_value_is_kept() {
        // Range checks belong to the service, not the parser.
        let sql = "INSERT INTO bookings VALUES (-5, 1, 1000, 2000)";
        assert!(matches!(
            parse_sql(sql).unwrap(),
            Command::InsertBooking { resource_id: -5, .. }
        ));
    }

    #[test]
    fn parse_insert_rejects_id() {
        let sql = "INSERT INTO bookings (id, resource_id, renter_id, period_start, period_end) VALUES (9, 5, 1, 1000, 2000)";
        let err = parse_sql(sql).unwrap_err();
        assert!(matches!(err, SqlError::Invalid(_)));
        assert!(err.is_validation());
    }

    #[test]
    fn parse_insert_missing_column() {
        let sql = "INSERT INTO bookings (resource_id, renter_id, period_start) VALUES (5, 1, 1000)";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingColumn("period_end"))));

        let sql = "INSERT INTO bookings VALUES (5, NULL, 1000, 2000)";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingColumn("renter_id"))));
    }

    #[test]
    fn parse_insert_multi_row_unsupported() {
        let sql = "INSERT INTO bookings VALUES (5, 1, 1000, 2000), (5, 1, 3000, 4000)";
        assert!(matches!(parse_sql(sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_update_full() {
        let sql = "UPDATE bookings SET resource_id = 5, renter_id = 2, period_start = 100, period_end = 200 WHERE id = 2";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::UpdateBooking {
                id: 2,
                resource_id: 5,
                renter_id: 2,
                start: 100,
                end: 200,
            }
        );
    }

    #[test]
    fn parse_update_partial_rejected() {
        let sql = "UPDATE bookings SET period_start = 100, period_end = 200 WHERE id = 2";
        let err = parse_sql(sql).unwrap_err();
        assert!(matches!(err, SqlError::MissingColumn("resource_id")));
        assert!(err.is_validation());
    }

    #[test]
    fn parse_update_requires_id_filter() {
        let sql = "UPDATE bookings SET resource_id = 5, renter_id = 2, period_start = 100, period_end = 200";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
        let sql = "UPDATE bookings SET resource_id = 5, renter_id = 2, period_start = 100, period_end = 200 WHERE resource_id = 5";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_delete_booking() {
        let sql = "DELETE FROM bookings WHERE id = 7";
        assert_eq!(parse_sql(sql).unwrap(), Command::DeleteBooking { id: 7 });
    }

    #[test]
    fn parse_delete_non_positive_id_kept() {
        let sql = "DELETE FROM bookings WHERE id = 0";
        assert_eq!(parse_sql(sql).unwrap(), Command::DeleteBooking { id: 0 });
    }

    #[test]
    fn parse_selects() {
        assert_eq!(parse_sql("SELECT * FROM bookings").unwrap(), Command::SelectBookings);
        assert_eq!(
            parse_sql("SELECT * FROM bookings WHERE id = 3").unwrap(),
            Command::SelectBooking { id: 3 }
        );
        assert_eq!(
            parse_sql("SELECT id, period_start FROM bookings WHERE resource_id = '5'").unwrap(),
            Command::SelectResourceBookings { resource_id: 5 }
        );
    }

    #[test]
    fn parse_select_unsupported_filter() {
        assert!(matches!(
            parse_sql("SELECT * FROM bookings WHERE renter_id = 1"),
            Err(SqlError::Unsupported(_))
        ));
        assert!(matches!(
            parse_sql("SELECT * FROM bookings WHERE id > 1"),
            Err(SqlError::Unsupported(_))
        ));
    }

    #[test]
    fn parse_unknown_table_errors() {
        assert!(matches!(
            parse_sql("SELECT * FROM machines"),
            Err(SqlError::UnknownTable(t)) if t == "machines"
        ));
        assert!(matches!(
            parse_sql("DELETE FROM users WHERE id = 1"),
            Err(SqlError::UnknownTable(_))
        ));
    }

    #[test]
    fn parse_bad_integer() {
        let sql = "INSERT INTO bookings VALUES (5, 1, 'tomorrow', 2000)";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }

    #[test]
    fn parse_other_statement_unsupported() {
        assert!(matches!(parse_sql("CREATE TABLE t (a INT)"), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_negation_overflow_is_rejected() {
        let sql = "SELECT * FROM bookings WHERE id = -'-9223372036854775808'";
        assert!(matches!(parse_sql(sql), Err(SqlError::Parse(_))));

        let sql = "SELECT * FROM bookings WHERE id = -'-9223372036854775807'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectBooking { id: i64::MAX }
        );
    }
}
