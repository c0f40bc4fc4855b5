//! Filter documents for comparisons, `and`/`or` and sorting

use crate::builder::{MongoQueryBuilder, Target, BACKEND};
use bson::{doc, Bson, Document};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use strata_query::operand::{int_arg, natives};
use strata_query::{Args, Operand, QueryBuilder, QueryEnv, QueryError, Result, Value};
use strata_schema::dtype::TypeKind;
use strata_schema::PropertyRef;
use uuid::Uuid;

type MongoArgs = Args<Operand<Document>>;
type MongoResult = Result<Operand<Document>>;

fn operator(name: &str) -> Result<&'static str> {
    Ok(match name {
        "ne" => "$ne",
        "lt" => "$lt",
        "le" => "$lte",
        "gt" => "$gt",
        "ge" => "$gte",
        "eq" => "$eq",
        other => return Err(QueryError::invalid_value(other, "not a comparison")),
    })
}

fn split(env: &MongoQueryBuilder, args: MongoArgs) -> Result<(String, Operand<Document>, Value)> {
    let mut pos = args.pos.into_iter();
    let lhs = pos
        .next()
        .ok_or_else(|| QueryError::invalid_value(&args.name, "missing property"))?;
    let value = match pos.next() {
        Some(Operand::Value(value)) => value,
        Some(other) => {
            return Err(QueryError::invalid_value(
                &args.name,
                format!("expected a value, got {}", other.describe(env.manifest())),
            ))
        }
        None => return Err(QueryError::invalid_value(&args.name, "expected a value")),
    };
    Ok((args.name, lhs, value))
}

fn left_side(env: &MongoQueryBuilder, name: &str, operand: &Operand<Document>) -> Result<Target> {
    match operand {
        Operand::Prop(pref) => env.target(pref),
        other => Err(QueryError::invalid_value(
            name,
            format!("expected a property, got {}", other.describe(env.manifest())),
        )),
    }
}

/// `{key: value}` for equality, `{key: {$op: value}}` otherwise.
///
/// `ne` also leaves out documents without a value, the same way SQL `<>`
/// never matches null. On arrays it keeps documents where no item equals
/// the value.
fn condition(name: &str, key: &str, value: Bson) -> Result<Document> {
    Ok(match name {
        "eq" => doc! { key: value },
        "ne" => doc! { key: { "$nin": [value, Bson::Null] } },
        other => doc! { key: { operator(other)?: value } },
    })
}

pub(crate) fn compare_value(env: &mut MongoQueryBuilder, args: MongoArgs) -> MongoResult {
    let (name, lhs, value) = split(env, args)?;
    let target = left_side(env, &name, &lhs)?;
    let value = to_bson(&name, target.kind, &value)?;
    Ok(Operand::Native(condition(&name, &target.key, value)?))
}

pub(crate) fn compare_null(env: &mut MongoQueryBuilder, args: MongoArgs) -> MongoResult {
    let (name, lhs, _) = split(env, args)?;
    let target = left_side(env, &name, &lhs)?;
    match name.as_str() {
        "eq" => Ok(Operand::Native(doc! { target.key: Bson::Null })),
        "ne" => Ok(Operand::Native(doc! { target.key: { "$ne": Bson::Null } })),
        _ => Err(QueryError::NoneValueComparison {
            operator: name.clone(),
            property: target.place,
        }),
    }
}

/// `startswith`/`contains` as an escaped regular expression
pub(crate) fn compare_like(env: &mut MongoQueryBuilder, args: MongoArgs) -> MongoResult {
    let (name, lhs, value) = split(env, args)?;
    let target = left_side(env, &name, &lhs)?;
    search(&name, &target, &value, false)
}

fn search(name: &str, target: &Target, value: &Value, insensitive: bool) -> MongoResult {
    let text = value
        .as_str()
        .ok_or_else(|| QueryError::invalid_value(name, format!("expected a string, got {}", value)))?;
    if text.is_empty() {
        return Err(QueryError::EmptyStringSearch {
            operator: name.to_string(),
            property: target.place.clone(),
        });
    }
    let escaped = regex::escape(text);
    let pattern = match name {
        "startswith" => format!("^{}", escaped),
        _ => escaped,
    };
    let mut clause = doc! { "$regex": pattern };
    if insensitive {
        clause.insert("$options", "i");
    }
    Ok(Operand::Native(doc! { target.key.as_str(): clause }))
}

/// `op(lower(prop), value)`: Mongo has no lower-cased index lookups, so
/// the comparison becomes a case-insensitive anchored regex
pub(crate) fn compare_func(env: &mut MongoQueryBuilder, args: MongoArgs) -> MongoResult {
    let (name, lhs, value) = split(env, args)?;
    let (func, inner) = match lhs {
        Operand::Lower(inner) => ("lower", *inner),
        Operand::Upper(inner) => ("upper", *inner),
        _ => return Err(QueryError::invalid_value(&name, "expected lower() or upper()")),
    };
    let target = left_side(env, &name, &inner)?;
    if !matches!(target.kind, TypeKind::String | TypeKind::Url | TypeKind::Uri | TypeKind::Text) {
        return Err(QueryError::invalid_value(func, format!("{} is not a string property", target.place)));
    }
    match name.as_str() {
        "startswith" | "contains" => search(&name, &target, &value, true),
        "eq" | "ne" => {
            let text = value
                .as_str()
                .ok_or_else(|| QueryError::invalid_value(&name, format!("expected a string, got {}", value)))?;
            let clause = doc! { "$regex": format!("^{}$", regex::escape(text)), "$options": "i" };
            if name == "eq" {
                Ok(Operand::Native(doc! { target.key: clause }))
            } else {
                Ok(Operand::Native(doc! { target.key: { "$not": clause } }))
            }
        }
        _ => Err(QueryError::not_implemented(BACKEND, format!("{}({}(...))", name, func))),
    }
}

pub(crate) fn and(_: &mut MongoQueryBuilder, args: MongoArgs) -> MongoResult {
    let mut items = natives("and", args.pos)?;
    Ok(match items.len() {
        0 => Operand::Empty,
        1 => Operand::Native(items.remove(0)),
        _ => Operand::Native(doc! { "$and": items.into_iter().map(Bson::Document).collect::<Vec<_>>() }),
    })
}

pub(crate) fn or(_: &mut MongoQueryBuilder, args: MongoArgs) -> MongoResult {
    let mut items = natives("or", args.pos)?;
    Ok(match items.len() {
        0 => Operand::Empty,
        1 => Operand::Native(items.remove(0)),
        _ => Operand::Native(doc! { "$or": items.into_iter().map(Bson::Document).collect::<Vec<_>>() }),
    })
}

/// Convert a literal into the value stored for a property of `kind`.
/// Ids, dates and times are stored as their ISO strings.
pub(crate) fn to_bson(name: &str, kind: TypeKind, value: &Value) -> Result<Bson> {
    let invalid = || QueryError::invalid_value(name, format!("{} is not a valid {} value", value, kind));
    match kind {
        TypeKind::Integer => value.as_i64().map(Bson::Int64).ok_or_else(invalid),
        TypeKind::Number => match value {
            Value::Int(i) => Ok(Bson::Double(*i as f64)),
            Value::Float(f) => Ok(Bson::Double(*f)),
            Value::Str(s) => s.trim().parse::<f64>().map(Bson::Double).map_err(|_| invalid()),
            _ => Err(invalid()),
        },
        TypeKind::Boolean => match value {
            Value::Bool(b) => Ok(Bson::Boolean(*b)),
            Value::Str(s) if s.eq_ignore_ascii_case("true") => Ok(Bson::Boolean(true)),
            Value::Str(s) if s.eq_ignore_ascii_case("false") => Ok(Bson::Boolean(false)),
            _ => Err(invalid()),
        },
        TypeKind::PrimaryKey | TypeKind::Uuid => value
            .as_str()
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(|id| Bson::String(id.to_string()))
            .ok_or_else(invalid),
        TypeKind::Date => value
            .as_str()
            .filter(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok())
            .map(|s| Bson::String(s.to_string()))
            .ok_or_else(invalid),
        TypeKind::Time => value
            .as_str()
            .filter(|s| {
                ["%H:%M:%S%.f", "%H:%M"]
                    .iter()
                    .any(|format| NaiveTime::parse_from_str(s, format).is_ok())
            })
            .map(|s| Bson::String(s.to_string()))
            .ok_or_else(invalid),
        TypeKind::DateTime => value
            .as_str()
            .filter(|s| {
                chrono::DateTime::parse_from_rfc3339(s).is_ok()
                    || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
            })
            .map(|s| Bson::String(s.to_string()))
            .ok_or_else(invalid),
        TypeKind::String | TypeKind::Url | TypeKind::Uri | TypeKind::Text | TypeKind::Json => value
            .as_str()
            .map(|s| Bson::String(s.to_string()))
            .ok_or_else(invalid),
        _ => Err(QueryError::invalid_value(name, format!("cannot compare {} properties", kind))),
    }
}

pub(crate) fn asc(_: &mut MongoQueryBuilder, mut args: MongoArgs) -> MongoResult {
    Ok(Operand::Positive(Box::new(args.pos.remove(0))))
}

pub(crate) fn desc(_: &mut MongoQueryBuilder, mut args: MongoArgs) -> MongoResult {
    Ok(Operand::Negative(Box::new(args.pos.remove(0))))
}

fn sort_key(env: &MongoQueryBuilder, name: &str, operand: Operand<Document>) -> Result<(PropertyRef, bool)> {
    match operand {
        Operand::Prop(pref) => Ok((pref, false)),
        Operand::Positive(inner) => sort_key(env, name, *inner).map(|(pref, _)| (pref, false)),
        Operand::Negative(inner) => sort_key(env, name, *inner).map(|(pref, _)| (pref, true)),
        other => Err(QueryError::invalid_value(
            name,
            format!("cannot sort by {}", other.describe(env.manifest())),
        )),
    }
}

/// Sort keys in the order given; arrays sort by their smallest (largest
/// when descending) item
pub(crate) fn sort(env: &mut MongoQueryBuilder, args: MongoArgs) -> MongoResult {
    for operand in args.pos {
        let (pref, desc) = sort_key(env, "sort", operand)?;
        let target = env.target(&pref)?;
        env.sort.insert(target.key, if desc { -1 } else { 1 });
    }
    Ok(Operand::Empty)
}

/// Keyset pagination, see the relational builder for the semantics
pub(crate) fn page(env: &mut MongoQueryBuilder, args: MongoArgs) -> MongoResult {
    let size = match args.kwarg("size") {
        Some(size) => Some(int_arg("page", Some(size))?),
        None => None,
    };
    let after: Vec<Value> = match args.kwarg("after") {
        None => Vec::new(),
        Some(Operand::Value(Value::List(values))) => values.clone(),
        Some(Operand::Value(value)) => vec![value.clone()],
        Some(_) => return Err(QueryError::invalid_value("page", "after= must be a list of values")),
    };

    let mut keys = Vec::with_capacity(args.pos.len());
    for operand in args.pos {
        let (pref, desc) = sort_key(env, "page", operand)?;
        let target = env.target(&pref)?;
        if target.listed {
            return Err(QueryError::invalid_value(
                "page",
                format!("cannot page by {}, it is inside a list", target.place),
            ));
        }
        keys.push((target, desc));
    }
    if keys.is_empty() {
        return Err(QueryError::invalid_value("page", "at least one key is required"));
    }
    if !after.is_empty() && after.len() != keys.len() {
        return Err(QueryError::invalid_value(
            "page",
            format!("expected {} values in after=, got {}", keys.len(), after.len()),
        ));
    }

    if !after.is_empty() {
        let mut values = Vec::with_capacity(keys.len());
        for ((target, _), value) in keys.iter().zip(&after) {
            values.push(to_bson("page", target.kind, value)?);
        }
        let mut branches = Vec::with_capacity(keys.len());
        for i in 0..keys.len() {
            let mut branch = Document::new();
            for j in 0..i {
                branch.insert(keys[j].0.key.as_str(), values[j].clone());
            }
            let (target, desc) = &keys[i];
            let op = if *desc { "$lt" } else { "$gt" };
            branch.insert(target.key.as_str(), doc! { op: values[i].clone() });
            branches.push(Bson::Document(branch));
        }
        let condition = if branches.len() == 1 {
            match branches.remove(0) {
                Bson::Document(branch) => branch,
                _ => Document::new(),
            }
        } else {
            doc! { "$or": branches }
        };
        env.push_where(condition);
    }

    for (target, desc) in keys {
        env.sort.insert(target.key, if desc { -1 } else { 1 });
    }
    if size.is_some() {
        env.limit = size;
    }
    Ok(Operand::Empty)
}

pub(crate) fn limit(env: &mut MongoQueryBuilder, args: MongoArgs) -> MongoResult {
    env.limit = Some(int_arg("limit", args.pos.first())?);
    Ok(Operand::Empty)
}

pub(crate) fn offset(env: &mut MongoQueryBuilder, args: MongoArgs) -> MongoResult {
    env.offset = Some(int_arg("offset", args.pos.first())?);
    Ok(Operand::Empty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ne_excludes_missing_values() {
        assert_eq!(
            condition("ne", "code", Bson::String("lt".into())).unwrap(),
            doc! { "code": { "$nin": ["lt", Bson::Null] } }
        );
        assert_eq!(
            condition("le", "n", Bson::Int64(3)).unwrap(),
            doc! { "n": { "$lte": 3i64 } }
        );
    }

    #[test]
    fn test_to_bson() {
        assert_eq!(to_bson("eq", TypeKind::Integer, &Value::Str("7".into())).unwrap(), Bson::Int64(7));
        assert!(to_bson("eq", TypeKind::Date, &Value::Str("2024-13-01".into())).is_err());
        assert_eq!(
            to_bson("eq", TypeKind::Date, &Value::Str("2024-12-01".into())).unwrap(),
            Bson::String("2024-12-01".into())
        );
        assert!(to_bson("eq", TypeKind::PrimaryKey, &Value::Str("x".into())).is_err());
    }
}
