use sqlparser::ast::{
    self, Assignment, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
///
/// INSERT values are positional:
///   campsites (id, name, nightly_price, daily_capacity)
///   equipment (id, name, price, stock)
///   bookings  (id, campsite_id, start_date, end_date, people[, equipment])
/// where `equipment` is a JSON array of
/// `{"equipment_id": ..., "quantity": ..., "nights": ...}`.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertCampsite {
        id: Ulid,
        name: String,
        nightly_price: Money,
        daily_capacity: u32,
    },
    UpdateCampsite {
        id: Ulid,
        name: Option<String>,
        nightly_price: Option<Money>,
        daily_capacity: Option<u32>,
    },
    DeactivateCampsite {
        id: Ulid,
    },
    InsertEquipment {
        id: Ulid,
        name: String,
        price: Money,
        stock: u32,
    },
    UpdateEquipment {
        id: Ulid,
        name: Option<String>,
        price: Option<Money>,
        stock: Option<u32>,
    },
    DeactivateEquipment {
        id: Ulid,
    },
    InsertBooking {
        id: Ulid,
        campsite_id: Ulid,
        range: DateRange,
        people: u32,
        equipment: Vec<EquipmentRequest>,
    },
    ReplaceEquipment {
        booking_id: Ulid,
        equipment: Vec<EquipmentRequest>,
    },
    SetStatus {
        booking_id: Ulid,
        status: BookingStatus,
    },
    AttachPaymentProof {
        booking_id: Ulid,
        reference: String,
    },
    SelectAvailability {
        campsite_id: Ulid,
        range: DateRange,
    },
    SelectEquipmentAvailability {
        range: DateRange,
    },
    SelectCampsites,
    SelectEquipment,
    SelectBookings {
        booking_id: Option<Ulid>,
        campsite_id: Option<Ulid>,
    },
    Listen {
        channel: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update { table, assignments, selection, .. } => {
            parse_update(table, assignments, selection)
        }
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "campsites" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("campsites", 4, values.len()));
            }
            Ok(Command::InsertCampsite {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                nightly_price: parse_i64(&values[2])?,
                daily_capacity: parse_u32(&values[3])?,
            })
        }
        "equipment" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("equipment", 4, values.len()));
            }
            Ok(Command::InsertEquipment {
                id: parse_ulid(&values[0])?,
                name: parse_string(&values[1])?,
                price: parse_i64(&values[2])?,
                stock: parse_u32(&values[3])?,
            })
        }
        "bookings" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("bookings", 5, values.len()));
            }
            let equipment = if values.len() >= 6 {
                parse_equipment_json(&values[5])?
            } else {
                Vec::new()
            };
            Ok(Command::InsertBooking {
                id: parse_ulid(&values[0])?,
                campsite_id: parse_ulid(&values[1])?,
                range: DateRange::new(parse_date(&values[2])?, parse_date(&values[3])?),
                people: parse_u32(&values[4])?,
                equipment,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    let id = extract_where_id(selection)?;

    match table.as_str() {
        "campsites" => {
            let (mut name, mut nightly_price, mut daily_capacity) = (None, None, None);
            for assignment in assignments {
                match assignment_column(assignment)?.as_str() {
                    "name" => name = Some(parse_string(&assignment.value)?),
                    "nightly_price" => nightly_price = Some(parse_i64(&assignment.value)?),
                    "daily_capacity" => daily_capacity = Some(parse_u32(&assignment.value)?),
                    other => return Err(SqlError::Parse(format!("unknown column: {other}"))),
                }
            }
            Ok(Command::UpdateCampsite { id, name, nightly_price, daily_capacity })
        }
        "equipment" => {
            let (mut name, mut price, mut stock) = (None, None, None);
            for assignment in assignments {
                match assignment_column(assignment)?.as_str() {
                    "name" => name = Some(parse_string(&assignment.value)?),
                    "price" => price = Some(parse_i64(&assignment.value)?),
                    "stock" => stock = Some(parse_u32(&assignment.value)?),
                    other => return Err(SqlError::Parse(format!("unknown column: {other}"))),
                }
            }
            Ok(Command::UpdateEquipment { id, name, price, stock })
        }
        "bookings" => {
            // One mutation per statement: equipment replacement, status
            // change and proof attachment are distinct operations.
            if assignments.len() != 1 {
                return Err(SqlError::Unsupported(
                    "UPDATE bookings takes exactly one assignment".into(),
                ));
            }
            let assignment = &assignments[0];
            match assignment_column(assignment)?.as_str() {
                "equipment" => Ok(Command::ReplaceEquipment {
                    booking_id: id,
                    equipment: parse_equipment_json(&assignment.value)?,
                }),
                "status" => {
                    let literal = parse_string(&assignment.value)?;
                    let status = BookingStatus::parse(&literal)
                        .ok_or_else(|| SqlError::Parse(format!("bad status: {literal}")))?;
                    Ok(Command::SetStatus { booking_id: id, status })
                }
                "payment_proof" => Ok(Command::AttachPaymentProof {
                    booking_id: id,
                    reference: parse_string(&assignment.value)?,
                }),
                other => Err(SqlError::Parse(format!("unknown column: {other}"))),
            }
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "campsites" => Ok(Command::DeactivateCampsite { id }),
        "equipment" => Ok(Command::DeactivateEquipment { id }),
        "bookings" => Err(SqlError::Unsupported(
            "DELETE FROM bookings; cancel via UPDATE bookings SET status = 'CANCELLED'".into(),
        )),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    match table.as_str() {
        "campsites" => Ok(Command::SelectCampsites),
        "equipment" => Ok(Command::SelectEquipment),
        "bookings" => {
            let (mut booking_id, mut campsite_id) = (None, None);
            if let Some(selection) = &select.selection {
                extract_booking_filters(selection, &mut booking_id, &mut campsite_id)?;
            }
            Ok(Command::SelectBookings { booking_id, campsite_id })
        }
        "availability" => {
            let (mut campsite_id, mut start, mut end) = (None, None, None);
            if let Some(selection) = &select.selection {
                extract_day_filters(selection, &mut campsite_id, &mut start, &mut end)?;
            }
            Ok(Command::SelectAvailability {
                campsite_id: campsite_id.ok_or(SqlError::MissingFilter("campsite_id"))?,
                range: DateRange::new(
                    start.ok_or(SqlError::MissingFilter("day >="))?,
                    end.ok_or(SqlError::MissingFilter("day <"))?,
                ),
            })
        }
        "equipment_availability" => {
            let (mut campsite_id, mut start, mut end) = (None, None, None);
            if let Some(selection) = &select.selection {
                extract_day_filters(selection, &mut campsite_id, &mut start, &mut end)?;
            }
            Ok(Command::SelectEquipmentAvailability {
                range: DateRange::new(
                    start.ok_or(SqlError::MissingFilter("day >="))?,
                    end.ok_or(SqlError::MissingFilter("day <"))?,
                ),
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// WHERE walker for availability queries: `campsite_id = '...'` plus the
/// half-open day window `day >= '...' AND day < '...'`.
fn extract_day_filters(
    expr: &Expr,
    campsite_id: &mut Option<Ulid>,
    start: &mut Option<Day>,
    end: &mut Option<Day>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_day_filters(left, campsite_id, start, end)?;
                extract_day_filters(right, campsite_id, start, end)?;
            }
            ast::BinaryOperator::Eq => {
                if expr_column_name(left).as_deref() == Some("campsite_id") {
                    *campsite_id = Some(parse_ulid(right)?);
                }
            }
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("day") {
                    *start = Some(parse_date(right)?);
                }
            }
            ast::BinaryOperator::Lt => {
                if expr_column_name(left).as_deref() == Some("day") {
                    *end = Some(parse_date(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn extract_booking_filters(
    expr: &Expr,
    booking_id: &mut Option<Ulid>,
    campsite_id: &mut Option<Ulid>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_booking_filters(left, booking_id, campsite_id)?;
                extract_booking_filters(right, booking_id, campsite_id)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("id") => *booking_id = Some(parse_ulid(right)?),
                Some("campsite_id") => *campsite_id = Some(parse_ulid(right)?),
                _ => {}
            },
            _ => {}
        }
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

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

fn assignment_column(assignment: &Assignment) -> Result<String, SqlError> {
    match &assignment.target {
        AssignmentTarget::ColumnName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty column name".into()))
        }
        _ => Err(SqlError::Parse("unsupported assignment target".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            if values.rows.len() > 1 {
                return Err(SqlError::Unsupported("multi-row INSERT".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

/// `YYYY-MM-DD` string literal → epoch day, normalized at UTC day boundary.
fn parse_date(expr: &Expr) -> Result<Day, SqlError> {
    let s = parse_string(expr)?;
    parse_day(&s).ok_or_else(|| SqlError::Parse(format!("bad date: {s}")))
}

fn parse_equipment_json(expr: &Expr) -> Result<Vec<EquipmentRequest>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        return Ok(Vec::new());
    }
    let json = parse_string(expr)?;
    serde_json::from_str(&json).map_err(|e| SqlError::Parse(format!("bad equipment JSON: {e}")))
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    parse_i64_expr(expr)
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    #[test]
    fn parse_insert_campsite() {
        let sql = format!(
            "INSERT INTO campsites (id, name, nightly_price, daily_capacity) VALUES ('{ID}', 'Riverside', 10000, 10)"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertCampsite { id, name, nightly_price, daily_capacity } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(name, "Riverside");
                assert_eq!(nightly_price, 10000);
                assert_eq!(daily_capacity, 10);
            }
            _ => panic!("expected InsertCampsite, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_campsite_wrong_arity() {
        let sql = format!("INSERT INTO campsites (id) VALUES ('{ID}')");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::WrongArity("campsites", 4, 1))
        ));
    }

    #[test]
    fn parse_update_campsite_partial() {
        let sql = format!("UPDATE campsites SET nightly_price = 12000 WHERE id = '{ID}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::UpdateCampsite { name, nightly_price, daily_capacity, .. } => {
                assert_eq!(name, None);
                assert_eq!(nightly_price, Some(12000));
                assert_eq!(daily_capacity, None);
            }
            _ => panic!("expected UpdateCampsite, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_delete_campsite() {
        let sql = format!("DELETE FROM campsites WHERE id = '{ID}'");
        let cmd = parse_sql(&sql).unwrap();
        assert!(matches!(cmd, Command::DeactivateCampsite { .. }));
    }

    #[test]
    fn parse_insert_equipment() {
        let sql =
            format!("INSERT INTO equipment (id, name, price, stock) VALUES ('{ID}', 'Tent', 50000, 5)");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertEquipment { name, price, stock, .. } => {
                assert_eq!(name, "Tent");
                assert_eq!(price, 50000);
                assert_eq!(stock, 5);
            }
            _ => panic!("expected InsertEquipment, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_without_equipment() {
        let sql = format!(
            "INSERT INTO bookings (id, campsite_id, start_date, end_date, people) VALUES ('{ID}', '{ID}', '2025-02-01', '2025-02-03', 4)"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertBooking { range, people, equipment, .. } => {
                assert_eq!(range.nights(), 2);
                assert_eq!(format_day(range.start), "2025-02-01");
                assert_eq!(people, 4);
                assert!(equipment.is_empty());
            }
            _ => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_with_equipment_json() {
        let sql = format!(
            r#"INSERT INTO bookings (id, campsite_id, start_date, end_date, people, equipment) VALUES ('{ID}', '{ID}', '2025-02-01', '2025-02-03', 4, '[{{"equipment_id":"{ID}","quantity":2,"nights":1}}]')"#
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::InsertBooking { equipment, .. } => {
                assert_eq!(equipment.len(), 1);
                assert_eq!(equipment[0].quantity, 2);
                assert_eq!(equipment[0].nights, 1);
            }
            _ => panic!("expected InsertBooking, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_bad_date() {
        let sql = format!(
            "INSERT INTO bookings (id, campsite_id, start_date, end_date, people) VALUES ('{ID}', '{ID}', '02/01/2025', '2025-02-03', 4)"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_replace_equipment() {
        let sql = format!(
            r#"UPDATE bookings SET equipment = '[{{"equipment_id":"{ID}","quantity":1,"nights":2}}]' WHERE id = '{ID}'"#
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::ReplaceEquipment { equipment, .. } => {
                assert_eq!(equipment.len(), 1);
            }
            _ => panic!("expected ReplaceEquipment, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_replace_equipment_empty_set() {
        let sql = format!("UPDATE bookings SET equipment = '[]' WHERE id = '{ID}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::ReplaceEquipment { equipment, .. } => assert!(equipment.is_empty()),
            _ => panic!("expected ReplaceEquipment, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_set_status() {
        let sql = format!("UPDATE bookings SET status = 'PAID' WHERE id = '{ID}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SetStatus { status, .. } => assert_eq!(status, BookingStatus::Paid),
            _ => panic!("expected SetStatus, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_set_status_rejects_drift_spelling() {
        let sql = format!("UPDATE bookings SET status = 'CHECKOUT' WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_attach_payment_proof() {
        let sql = format!("UPDATE bookings SET payment_proof = 'blob/123' WHERE id = '{ID}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::AttachPaymentProof { reference, .. } => assert_eq!(reference, "blob/123"),
            _ => panic!("expected AttachPaymentProof, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_bookings_multiple_assignments_rejected() {
        let sql = format!(
            "UPDATE bookings SET status = 'PAID', payment_proof = 'x' WHERE id = '{ID}'"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_delete_bookings_unsupported() {
        let sql = format!("DELETE FROM bookings WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_select_availability() {
        let sql = format!(
            "SELECT * FROM availability WHERE campsite_id = '{ID}' AND day >= '2025-02-01' AND day < '2025-02-03'"
        );
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectAvailability { campsite_id, range } => {
                assert_eq!(campsite_id.to_string(), ID);
                assert_eq!(range.nights(), 2);
            }
            _ => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability_missing_bound() {
        let sql = format!(
            "SELECT * FROM availability WHERE campsite_id = '{ID}' AND day >= '2025-02-01'"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("day <"))));
    }

    #[test]
    fn parse_select_equipment_availability() {
        let sql = "SELECT * FROM equipment_availability WHERE day >= '2025-02-01' AND day < '2025-02-03'";
        let cmd = parse_sql(sql).unwrap();
        match cmd {
            Command::SelectEquipmentAvailability { range } => assert_eq!(range.nights(), 2),
            _ => panic!("expected SelectEquipmentAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_catalogs() {
        assert!(matches!(
            parse_sql("SELECT * FROM campsites").unwrap(),
            Command::SelectCampsites
        ));
        assert!(matches!(
            parse_sql("SELECT * FROM equipment").unwrap(),
            Command::SelectEquipment
        ));
    }

    #[test]
    fn parse_select_bookings_filters() {
        let sql = format!("SELECT * FROM bookings WHERE id = '{ID}'");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::SelectBookings { booking_id, campsite_id } => {
                assert!(booking_id.is_some());
                assert!(campsite_id.is_none());
            }
            _ => panic!("expected SelectBookings, got {cmd:?}"),
        }

        let cmd = parse_sql("SELECT * FROM bookings").unwrap();
        assert!(matches!(
            cmd,
            Command::SelectBookings { booking_id: None, campsite_id: None }
        ));
    }

    #[test]
    fn parse_listen() {
        let sql = format!("LISTEN campsite_{ID}");
        let cmd = parse_sql(&sql).unwrap();
        match cmd {
            Command::Listen { channel } => assert_eq!(channel, format!("campsite_{ID}")),
            _ => panic!("expected Listen, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
