//! Masks for comparisons, `and`/`or`, sorting and slicing

use crate::builder::{FrameQueryBuilder, Target};
use crate::mask::{Case, CmpOp, Column, Mask};
use strata_query::cast::cast_scalar;
use strata_query::operand::{int_arg, natives};
use strata_query::{Args, Operand, QueryBuilder, QueryEnv, QueryError, Result, Value};
use strata_schema::dtype::TypeKind;
use strata_schema::PropertyRef;

type FrameArgs = Args<Operand<Mask>>;
type FrameResult = Result<Operand<Mask>>;

fn split(env: &FrameQueryBuilder, args: FrameArgs) -> Result<(String, Operand<Mask>, Value)> {
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

fn left_side(env: &FrameQueryBuilder, name: &str, operand: &Operand<Mask>) -> Result<Target> {
    match operand {
        Operand::Prop(pref) => env.target(pref),
        other => Err(QueryError::invalid_value(
            name,
            format!("expected a property, got {}", other.describe(env.manifest())),
        )),
    }
}

fn cmp_op(name: &str) -> Result<CmpOp> {
    CmpOp::from_name(name).ok_or_else(|| QueryError::invalid_value(name, "not a comparison"))
}

/// Literal cast the same way column values are, so both sides compare
/// as the property type
pub(crate) fn to_json(name: &str, kind: TypeKind, value: &Value) -> Result<serde_json::Value> {
    let cast = cast_scalar(kind, value.to_json());
    let valid = match kind {
        TypeKind::Integer | TypeKind::Number => cast.is_number(),
        TypeKind::Boolean => cast.is_boolean(),
        TypeKind::Object | TypeKind::Array | TypeKind::PartialArray | TypeKind::File | TypeKind::Json => {
            return Err(QueryError::invalid_value(name, format!("cannot compare {} properties", kind)))
        }
        _ => cast.is_string(),
    };
    if valid {
        Ok(cast)
    } else {
        Err(QueryError::invalid_value(name, format!("{} is not a valid {} value", value, kind)))
    }
}

pub(crate) fn compare_value(env: &mut FrameQueryBuilder, args: FrameArgs) -> FrameResult {
    let (name, lhs, value) = split(env, args)?;
    let target = left_side(env, &name, &lhs)?;
    let value = to_json(&name, target.column.kind, &value)?;
    Ok(Operand::Native(Mask::Compare {
        column: target.column,
        op: cmp_op(&name)?,
        value,
    }))
}

pub(crate) fn compare_null(env: &mut FrameQueryBuilder, args: FrameArgs) -> FrameResult {
    let (name, lhs, _) = split(env, args)?;
    let target = left_side(env, &name, &lhs)?;
    match name.as_str() {
        "eq" => Ok(Operand::Native(Mask::IsNull(target.column))),
        "ne" => Ok(Operand::Native(Mask::NotNull(target.column))),
        _ => Err(QueryError::NoneValueComparison {
            operator: name.clone(),
            property: target.place,
        }),
    }
}

pub(crate) fn compare_like(env: &mut FrameQueryBuilder, args: FrameArgs) -> FrameResult {
    let (name, lhs, value) = split(env, args)?;
    let target = left_side(env, &name, &lhs)?;
    search(&name, target, &value)
}

fn search(name: &str, target: Target, value: &Value) -> FrameResult {
    let text = value
        .as_str()
        .ok_or_else(|| QueryError::invalid_value(name, format!("expected a string, got {}", value)))?;
    if text.is_empty() {
        return Err(QueryError::EmptyStringSearch {
            operator: name.to_string(),
            property: target.place,
        });
    }
    Ok(Operand::Native(match name {
        "startswith" => Mask::StartsWith(target.column, text.to_string()),
        _ => Mask::Contains(target.column, text.to_string()),
    }))
}

/// `op(lower(prop), value)`: the column is case mapped, the value is not
pub(crate) fn compare_func(env: &mut FrameQueryBuilder, args: FrameArgs) -> FrameResult {
    let (name, lhs, value) = split(env, args)?;
    let (func, case, inner) = match lhs {
        Operand::Lower(inner) => ("lower", Case::Lower, *inner),
        Operand::Upper(inner) => ("upper", Case::Upper, *inner),
        _ => return Err(QueryError::invalid_value(&name, "expected lower() or upper()")),
    };
    let mut target = left_side(env, &name, &inner)?;
    if !matches!(
        target.column.kind,
        TypeKind::String | TypeKind::Url | TypeKind::Uri | TypeKind::Text
    ) {
        return Err(QueryError::invalid_value(func, format!("{} is not a string property", target.place)));
    }
    target.column.case = Some(case);
    match name.as_str() {
        "startswith" | "contains" => search(&name, target, &value),
        _ => {
            let text = value
                .as_str()
                .ok_or_else(|| QueryError::invalid_value(&name, format!("expected a string, got {}", value)))?;
            Ok(Operand::Native(Mask::Compare {
                column: target.column,
                op: cmp_op(&name)?,
                value: serde_json::Value::String(text.to_string()),
            }))
        }
    }
}

pub(crate) fn and(_: &mut FrameQueryBuilder, args: FrameArgs) -> FrameResult {
    let mut items = natives("and", args.pos)?;
    Ok(match items.len() {
        0 => Operand::Empty,
        1 => Operand::Native(items.remove(0)),
        _ => Operand::Native(Mask::And(items)),
    })
}

pub(crate) fn or(_: &mut FrameQueryBuilder, args: FrameArgs) -> FrameResult {
    let mut items = natives("or", args.pos)?;
    Ok(match items.len() {
        0 => Operand::Empty,
        1 => Operand::Native(items.remove(0)),
        _ => Operand::Native(Mask::Or(items)),
    })
}

pub(crate) fn asc(_: &mut FrameQueryBuilder, mut args: FrameArgs) -> FrameResult {
    Ok(Operand::Positive(Box::new(args.pos.remove(0))))
}

pub(crate) fn desc(_: &mut FrameQueryBuilder, mut args: FrameArgs) -> FrameResult {
    Ok(Operand::Negative(Box::new(args.pos.remove(0))))
}

fn sort_key(env: &FrameQueryBuilder, name: &str, operand: Operand<Mask>) -> Result<(PropertyRef, bool)> {
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

pub(crate) fn sort(env: &mut FrameQueryBuilder, args: FrameArgs) -> FrameResult {
    for operand in args.pos {
        let (pref, desc) = sort_key(env, "sort", operand)?;
        let target = env.target(&pref)?;
        env.sort.push((target.column, desc));
    }
    Ok(Operand::Empty)
}

/// Keyset pagination: rows after the `after=` values in key order
pub(crate) fn page(env: &mut FrameQueryBuilder, args: FrameArgs) -> FrameResult {
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
        keys.push((env.target(&pref)?, desc));
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
            values.push(to_json("page", target.column.kind, value)?);
        }
        let mut branches = Vec::with_capacity(keys.len());
        for i in 0..keys.len() {
            let mut parts: Vec<Mask> = (0..i)
                .map(|j| Mask::Compare {
                    column: keys[j].0.column.clone(),
                    op: CmpOp::Eq,
                    value: values[j].clone(),
                })
                .collect();
            let (target, desc) = &keys[i];
            parts.push(Mask::Compare {
                column: target.column.clone(),
                op: if *desc { CmpOp::Lt } else { CmpOp::Gt },
                value: values[i].clone(),
            });
            branches.push(if parts.len() == 1 { parts.remove(0) } else { Mask::And(parts) });
        }
        let condition = if branches.len() == 1 {
            branches.remove(0)
        } else {
            Mask::Or(branches)
        };
        env.push_where(condition);
    }

    for (target, desc) in keys {
        env.sort.push((target.column, desc));
    }
    if size.is_some() {
        env.limit = size;
    }
    Ok(Operand::Empty)
}

pub(crate) fn limit(env: &mut FrameQueryBuilder, args: FrameArgs) -> FrameResult {
    env.limit = Some(int_arg("limit", args.pos.first())?);
    Ok(Operand::Empty)
}

pub(crate) fn offset(env: &mut FrameQueryBuilder, args: FrameArgs) -> FrameResult {
    env.offset = Some(int_arg("offset", args.pos.first())?);
    Ok(Operand::Empty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_literals_are_cast_to_property_type() {
        assert_eq!(to_json("eq", TypeKind::Integer, &Value::Str("1 000".into())).unwrap(), json!(1000));
        assert_eq!(to_json("eq", TypeKind::Boolean, &Value::Str("true".into())).unwrap(), json!(true));
        assert!(to_json("eq", TypeKind::Integer, &Value::Str("many".into())).is_err());
        assert!(to_json("eq", TypeKind::Object, &Value::Str("x".into())).is_err());
    }
}
