//! Comparison operators and `and`/`or`
//!
//! Handlers are registered per `(property type, value type)` so the value
//! is checked and converted for the column it is compared with. Properties
//! stored in list tables are compared inside a distinct `_rid` sub-query.

use crate::builder::{PgQueryBuilder, Target};
use crate::sql::{BinOp, SqlExpr};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use strata_query::operand::natives;
use strata_query::{Args, Operand, QueryEnv, QueryError, Result, Value};
use strata_schema::dtype::TypeKind;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Compare {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    StartsWith,
    Contains,
}

impl Compare {
    fn from_name(name: &str) -> Result<Compare> {
        Ok(match name {
            "eq" => Compare::Eq,
            "ne" => Compare::Ne,
            "lt" => Compare::Lt,
            "le" => Compare::Le,
            "gt" => Compare::Gt,
            "ge" => Compare::Ge,
            "startswith" => Compare::StartsWith,
            "contains" => Compare::Contains,
            other => return Err(QueryError::invalid_value(other, "not a comparison")),
        })
    }

    fn is_search(&self) -> bool {
        matches!(self, Compare::StartsWith | Compare::Contains)
    }

    fn condition(&self, lhs: SqlExpr, rhs: SqlExpr) -> SqlExpr {
        let op = match self {
            Compare::Eq => BinOp::Eq,
            Compare::Ne => BinOp::Ne,
            Compare::Lt => BinOp::Lt,
            Compare::Le => BinOp::Le,
            Compare::Gt => BinOp::Gt,
            Compare::Ge => BinOp::Ge,
            Compare::StartsWith | Compare::Contains => BinOp::Like,
        };
        SqlExpr::binary(lhs, op, rhs)
    }
}

/// Property side of a comparison
fn left_side(env: &mut PgQueryBuilder, operator: &str, operand: Operand<SqlExpr>) -> Result<Target> {
    match operand {
        Operand::Prop(pref) => env.target(&pref),
        other => Err(QueryError::invalid_value(
            operator,
            format!("expected a property, got {}", other.describe(env.manifest())),
        )),
    }
}

fn split(args: Args<Operand<SqlExpr>>) -> Result<(Compare, Operand<SqlExpr>, Value)> {
    let op = Compare::from_name(&args.name)?;
    let mut pos = args.pos.into_iter();
    let lhs = pos
        .next()
        .ok_or_else(|| QueryError::invalid_value(&args.name, "missing property"))?;
    let value = match pos.next() {
        Some(Operand::Value(value)) => value,
        _ => return Err(QueryError::invalid_value(&args.name, "expected a value")),
    };
    Ok((op, lhs, value))
}

/// Emit `op` for a resolved target, going through list sub-queries when the
/// target lives in a list table
fn emit(env: &mut PgQueryBuilder, op: Compare, target: Target, rhs: SqlExpr) -> Result<Operand<SqlExpr>> {
    let Some(listed) = target.listed.clone() else {
        return Ok(Operand::Native(op.condition(target.expr, rhs)));
    };
    if op == Compare::Ne {
        // has a value and none of them equals rhs
        let exists = env.listed_subquery(&listed, target.expr.clone().is_not_null());
        let equal = env.listed_subquery(&listed, SqlExpr::eq(target.expr, rhs));
        return Ok(Operand::Native(SqlExpr::And(vec![
            SqlExpr::column(exists, "_rid").is_not_null(),
            SqlExpr::column(equal, "_rid").is_null(),
        ])));
    }
    let alias = env.listed_subquery(&listed, op.condition(target.expr, rhs));
    Ok(Operand::Native(SqlExpr::column(alias, "_rid").is_not_null()))
}

/// `eq(prop, value)` and friends for any property type
pub(crate) fn compare_value(env: &mut PgQueryBuilder, args: Args<Operand<SqlExpr>>) -> Result<Operand<SqlExpr>> {
    let (op, lhs, value) = split(args)?;
    let target = left_side(env, op_name(op), lhs)?;
    let param = to_param(op_name(op), target.kind, &value)?;
    emit(env, op, target, SqlExpr::Param(param))
}

/// Comparison against `null`: only equality makes sense
pub(crate) fn compare_null(env: &mut PgQueryBuilder, args: Args<Operand<SqlExpr>>) -> Result<Operand<SqlExpr>> {
    let (op, lhs, _) = split(args)?;
    let target = left_side(env, op_name(op), lhs)?;
    match op {
        Compare::Eq => Ok(Operand::Native(target_with(env, target, SqlExpr::is_null)?)),
        Compare::Ne => Ok(Operand::Native(target_with(env, target, SqlExpr::is_not_null)?)),
        _ => Err(QueryError::NoneValueComparison {
            operator: op_name(op).to_string(),
            property: target.place,
        }),
    }
}

fn target_with(env: &mut PgQueryBuilder, target: Target, wrap: fn(SqlExpr) -> SqlExpr) -> Result<SqlExpr> {
    match &target.listed {
        None => Ok(wrap(target.expr)),
        Some(listed) => {
            let alias = env.listed_subquery(listed, wrap(target.expr.clone()));
            Ok(SqlExpr::column(alias, "_rid").is_not_null())
        }
    }
}

/// `startswith`/`contains` on string-like properties
pub(crate) fn compare_like(env: &mut PgQueryBuilder, args: Args<Operand<SqlExpr>>) -> Result<Operand<SqlExpr>> {
    let (op, lhs, value) = split(args)?;
    let target = left_side(env, op_name(op), lhs)?;
    like(env, op, target, &value)
}

fn like(env: &mut PgQueryBuilder, op: Compare, target: Target, value: &Value) -> Result<Operand<SqlExpr>> {
    let text = value
        .as_str()
        .ok_or_else(|| QueryError::invalid_value(op_name(op), format!("expected a string, got {}", value)))?;
    if text.is_empty() {
        return Err(QueryError::EmptyStringSearch {
            operator: op_name(op).to_string(),
            property: target.place,
        });
    }
    let escaped = escape_like(text);
    let pattern = match op {
        Compare::StartsWith => format!("{}%", escaped),
        _ => format!("%{}%", escaped),
    };
    emit(env, op, target, SqlExpr::param(pattern))
}

/// Primary keys are UUIDs; anything else can never match
pub(crate) fn compare_pk(env: &mut PgQueryBuilder, args: Args<Operand<SqlExpr>>) -> Result<Operand<SqlExpr>> {
    let (op, lhs, value) = split(args)?;
    let text = value.as_str().unwrap_or_default();
    let id = Uuid::parse_str(text).map_err(|_| {
        QueryError::invalid_value(op_name(op), format!("{:?} is not a valid UUID", text))
    })?;
    let target = left_side(env, op_name(op), lhs)?;
    emit(env, op, target, SqlExpr::param(id))
}

/// Dates and times arrive as ISO strings
pub(crate) fn compare_temporal(env: &mut PgQueryBuilder, args: Args<Operand<SqlExpr>>) -> Result<Operand<SqlExpr>> {
    let (op, lhs, value) = split(args)?;
    let target = left_side(env, op_name(op), lhs)?;
    let param = temporal_param(op_name(op), target.kind, &value)?;
    emit(env, op, target, SqlExpr::Param(param))
}

/// Geometry equality against a WKT literal
pub(crate) fn compare_geometry(env: &mut PgQueryBuilder, args: Args<Operand<SqlExpr>>) -> Result<Operand<SqlExpr>> {
    let (op, lhs, value) = split(args)?;
    let target = left_side(env, op_name(op), lhs)?;
    let wkt = value
        .as_str()
        .ok_or_else(|| QueryError::invalid_value(op_name(op), "expected WKT"))?;
    let geometry = SqlExpr::func("ST_GeomFromEWKT", vec![SqlExpr::param(wkt.to_string())]);
    let equals = SqlExpr::func("ST_Equals", vec![target.expr.clone(), geometry]);
    let condition = match op {
        Compare::Eq => equals,
        Compare::Ne => equals.not(),
        _ => return Err(QueryError::invalid_value(op_name(op), "geometries only support eq and ne")),
    };
    Ok(Operand::Native(condition))
}

/// `op(lower(prop), value)` / `op(upper(prop), value)`
pub(crate) fn compare_func(env: &mut PgQueryBuilder, args: Args<Operand<SqlExpr>>) -> Result<Operand<SqlExpr>> {
    let (op, lhs, value) = split(args)?;
    let (func, inner) = match lhs {
        Operand::Lower(inner) => ("lower", *inner),
        Operand::Upper(inner) => ("upper", *inner),
        _ => return Err(QueryError::invalid_value(op_name(op), "expected lower() or upper()")),
    };
    let mut target = left_side(env, op_name(op), inner)?;
    if !matches!(target.kind, TypeKind::String | TypeKind::Url | TypeKind::Uri | TypeKind::Text) {
        return Err(QueryError::invalid_value(
            func,
            format!("{} is not a string property", target.place),
        ));
    }
    target.expr = SqlExpr::func(func, vec![target.expr]);
    if value.is_null() {
        return match op {
            Compare::Eq => Ok(Operand::Native(target_with(env, target, SqlExpr::is_null)?)),
            Compare::Ne => Ok(Operand::Native(target_with(env, target, SqlExpr::is_not_null)?)),
            _ => Err(QueryError::NoneValueComparison {
                operator: op_name(op).to_string(),
                property: target.place,
            }),
        };
    }
    if op.is_search() {
        return like(env, op, target, &value);
    }
    let param = to_param(op_name(op), TypeKind::String, &value)?;
    emit(env, op, target, SqlExpr::Param(param))
}

pub(crate) fn and(_: &mut PgQueryBuilder, args: Args<Operand<SqlExpr>>) -> Result<Operand<SqlExpr>> {
    Ok(match SqlExpr::all(natives("and", args.pos)?) {
        Some(expr) => Operand::Native(expr),
        None => Operand::Empty,
    })
}

pub(crate) fn or(_: &mut PgQueryBuilder, args: Args<Operand<SqlExpr>>) -> Result<Operand<SqlExpr>> {
    Ok(match SqlExpr::any(natives("or", args.pos)?) {
        Some(expr) => Operand::Native(expr),
        None => Operand::Empty,
    })
}

fn op_name(op: Compare) -> &'static str {
    match op {
        Compare::Eq => "eq",
        Compare::Ne => "ne",
        Compare::Lt => "lt",
        Compare::Le => "le",
        Compare::Gt => "gt",
        Compare::Ge => "ge",
        Compare::StartsWith => "startswith",
        Compare::Contains => "contains",
    }
}

/// Escape `LIKE` wildcards
pub(crate) fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Convert a literal into a bind value for a column of `kind`
pub(crate) fn to_param(operator: &str, kind: TypeKind, value: &Value) -> Result<sea_orm::Value> {
    let invalid = || {
        QueryError::invalid_value(
            operator,
            format!("{} is not a valid {} value", value, kind),
        )
    };
    match kind {
        TypeKind::Integer => value.as_i64().map(sea_orm::Value::from).ok_or_else(invalid),
        TypeKind::Number => match value {
            Value::Int(i) => Ok(sea_orm::Value::from(*i as f64)),
            Value::Float(f) => Ok(sea_orm::Value::from(*f)),
            Value::Str(s) => s.trim().parse::<f64>().map(sea_orm::Value::from).map_err(|_| invalid()),
            _ => Err(invalid()),
        },
        TypeKind::Boolean => match value {
            Value::Bool(b) => Ok(sea_orm::Value::from(*b)),
            Value::Str(s) if s.eq_ignore_ascii_case("true") => Ok(sea_orm::Value::from(true)),
            Value::Str(s) if s.eq_ignore_ascii_case("false") => Ok(sea_orm::Value::from(false)),
            _ => Err(invalid()),
        },
        TypeKind::PrimaryKey | TypeKind::Uuid => value
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(sea_orm::Value::from)
            .ok_or_else(invalid),
        TypeKind::Date | TypeKind::Time | TypeKind::DateTime => temporal_param(operator, kind, value),
        TypeKind::String
        | TypeKind::Url
        | TypeKind::Uri
        | TypeKind::Text
        | TypeKind::Json
        | TypeKind::Geometry => value
            .as_str()
            .map(|s| sea_orm::Value::from(s.to_string()))
            .ok_or_else(invalid),
        _ => Err(QueryError::invalid_value(
            operator,
            format!("cannot compare {} properties", kind),
        )),
    }
}

fn temporal_param(operator: &str, kind: TypeKind, value: &Value) -> Result<sea_orm::Value> {
    let text = value.as_str().ok_or_else(|| {
        QueryError::invalid_value(operator, format!("expected an ISO {} string, got {}", kind, value))
    })?;
    let parsed = match kind {
        TypeKind::Date => NaiveDate::parse_from_str(text, "%Y-%m-%d").ok().map(sea_orm::Value::from),
        TypeKind::Time => ["%H:%M:%S%.f", "%H:%M"]
            .iter()
            .find_map(|format| NaiveTime::parse_from_str(text, format).ok())
            .map(sea_orm::Value::from),
        _ => parse_datetime(text).map(sea_orm::Value::from),
    };
    parsed.ok_or_else(|| {
        QueryError::invalid_value(operator, format!("{:?} is not a valid ISO {}", text, kind))
    })
}

fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.naive_utc());
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}
