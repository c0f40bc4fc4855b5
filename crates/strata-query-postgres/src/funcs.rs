//! Sorting, paging and the remaining query functions

use crate::builder::{rebase, PgQueryBuilder, BACKEND};
use crate::compare::to_param;
use crate::sql::{BinOp, FromItem, Join, JoinKind, OrderBy, Select, SelectItem, SqlExpr};
use strata_query::operand::int_arg;
use strata_query::{Args, Item, Operand, QueryBuilder, QueryEnv, QueryError, Result, Selected, Value};
use strata_schema::dtype::TypeKind;
use strata_schema::{PropertyRef, ReservedProperty};

type PgArgs = Args<Operand<SqlExpr>>;
type PgResult = Result<Operand<SqlExpr>>;

pub(crate) fn asc(_: &mut PgQueryBuilder, mut args: PgArgs) -> PgResult {
    Ok(Operand::Positive(Box::new(args.pos.remove(0))))
}

pub(crate) fn desc(_: &mut PgQueryBuilder, mut args: PgArgs) -> PgResult {
    Ok(Operand::Negative(Box::new(args.pos.remove(0))))
}

/// Property and direction of a sort key (`name`, `+name`, `-name`)
fn sort_key(env: &PgQueryBuilder, operator: &str, operand: Operand<SqlExpr>) -> Result<(PropertyRef, bool)> {
    match operand {
        Operand::Prop(pref) => Ok((pref, false)),
        Operand::Positive(inner) => sort_key(env, operator, *inner).map(|(pref, _)| (pref, false)),
        Operand::Negative(inner) => sort_key(env, operator, *inner).map(|(pref, _)| (pref, true)),
        other => Err(QueryError::invalid_value(
            operator,
            format!("cannot sort by {}", other.describe(env.manifest())),
        )),
    }
}

impl PgQueryBuilder {
    /// Order expression for a sort key. Keys inside lists are taken from a
    /// `DISTINCT ON (_rid)` sub-query picking the first value per row.
    fn order_by(&mut self, pref: &PropertyRef, desc: bool) -> Result<OrderBy> {
        let target = self.target(pref)?;
        let Some(listed) = target.listed else {
            return Ok(OrderBy { expr: target.expr, desc });
        };
        let alias = self.next_alias(&listed.name);
        let rid = SqlExpr::column(listed.table.as_str(), "_rid");
        let query = Select {
            distinct_on: vec![rid.clone()],
            columns: vec![
                SelectItem {
                    expr: rid.clone(),
                    alias: None,
                },
                SelectItem {
                    expr: target.expr.clone(),
                    alias: Some("value".to_string()),
                },
            ],
            from: Some(FromItem::table(listed.table.as_str())),
            order_by: vec![
                OrderBy { expr: rid, desc: false },
                OrderBy { expr: target.expr, desc },
            ],
            ..Default::default()
        };
        self.add_join(Join {
            kind: JoinKind::LeftOuter,
            item: FromItem::Subquery {
                query: Box::new(query),
                alias: alias.clone(),
            },
            on: SqlExpr::eq(
                SqlExpr::column(alias.as_str(), "_rid"),
                SqlExpr::column(listed.owner.as_str(), "_id"),
            ),
        });
        Ok(OrderBy {
            expr: SqlExpr::column(alias, "value"),
            desc,
        })
    }
}

pub(crate) fn sort(env: &mut PgQueryBuilder, args: PgArgs) -> PgResult {
    for operand in args.pos {
        let (pref, desc) = sort_key(env, "sort", operand)?;
        let order = env.order_by(&pref, desc)?;
        env.sort.push(order);
    }
    Ok(Operand::Empty)
}

/// Keyset pagination: `page(key, ..., size=N, after=[v, ...])`
///
/// Keys become sort keys. With `after` given, only rows past that key
/// tuple are returned, honouring each key's direction.
pub(crate) fn page(env: &mut PgQueryBuilder, args: PgArgs) -> PgResult {
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
        if target.listed.is_some() {
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
        // (k1 > v1) OR (k1 = v1 AND k2 > v2) OR ...
        let mut params = Vec::with_capacity(keys.len());
        for ((target, _), value) in keys.iter().zip(&after) {
            params.push(SqlExpr::Param(to_param("page", target.kind, value)?));
        }
        let mut branches = Vec::with_capacity(keys.len());
        for i in 0..keys.len() {
            let mut parts: Vec<SqlExpr> = (0..i)
                .map(|j| SqlExpr::eq(keys[j].0.expr.clone(), params[j].clone()))
                .collect();
            let (target, desc) = &keys[i];
            let op = if *desc { BinOp::Lt } else { BinOp::Gt };
            parts.push(SqlExpr::binary(target.expr.clone(), op, params[i].clone()));
            branches.extend(SqlExpr::all(parts));
        }
        if let Some(condition) = SqlExpr::any(branches) {
            env.push_where(condition);
        }
    }

    for (target, desc) in keys {
        env.sort.push(OrderBy {
            expr: target.expr,
            desc,
        });
    }
    if size.is_some() {
        env.limit = size;
    }
    Ok(Operand::Empty)
}

pub(crate) fn limit(env: &mut PgQueryBuilder, args: PgArgs) -> PgResult {
    env.limit = Some(int_arg("limit", args.pos.first())?);
    Ok(Operand::Empty)
}

pub(crate) fn offset(env: &mut PgQueryBuilder, args: PgArgs) -> PgResult {
    env.offset = Some(int_arg("offset", args.pos.first())?);
    Ok(Operand::Empty)
}

/// `count()`: one aggregate row over the joined tables
pub(crate) fn count(env: &mut PgQueryBuilder, _: PgArgs) -> PgResult {
    env.aggregate = true;
    let key = "count()".to_string();
    let index = env.add_column(SqlExpr::func("count", vec![SqlExpr::Star]), Some(key.clone()));
    env.add_selected(key, Selected::column(Item::Index(index), None));
    Ok(Operand::Empty)
}

pub(crate) fn distinct(env: &mut PgQueryBuilder, _: PgArgs) -> PgResult {
    env.distinct = true;
    Ok(Operand::Empty)
}

/// `checksum(a, b, ...)`: md5 over the given columns, or over every scalar
/// column of the model when called without arguments
pub(crate) fn checksum(env: &mut PgQueryBuilder, args: PgArgs) -> PgResult {
    let mut columns = Vec::new();
    if args.pos.is_empty() {
        let manifest = env.manifest_arc();
        let model = env.model();
        let table = env.table.clone();
        let mut props: Vec<_> = manifest.model(model).id_prop().into_iter().collect();
        props.extend(
            manifest
                .flatprops(model)
                .filter(|p| p.list.is_none() && p.lang.is_none() && p.kind().is_scalar())
                .map(|p| p.id),
        );
        for prop in props {
            columns.push(env.value_column(&table, prop));
        }
    } else {
        for operand in args.pos {
            let pref = operand
                .as_prop()
                .cloned()
                .ok_or_else(|| QueryError::invalid_value("checksum", "expected properties"))?;
            let target = env.target(&pref)?;
            if target.listed.is_some() {
                return Err(QueryError::not_implemented(BACKEND, format!("checksum of listed {}", target.place)));
            }
            columns.push(target.expr);
        }
    }

    let mut parts = vec![SqlExpr::Literal("|".to_string())];
    parts.extend(columns.into_iter().map(|column| SqlExpr::cast(column, "text")));
    let digest = SqlExpr::func("md5", vec![SqlExpr::func("concat_ws", parts)]);
    let key = "_checksum".to_string();
    let index = env.add_column(digest, Some(key.clone()));
    env.add_selected(key, Selected::column(Item::Index(index), None));
    Ok(Operand::Empty)
}

/// `flip(geometry)`: swap the axes of a geometry column
pub(crate) fn flip(env: &mut PgQueryBuilder, args: PgArgs) -> PgResult {
    let pref = args
        .pos
        .first()
        .and_then(Operand::as_prop)
        .cloned()
        .ok_or_else(|| QueryError::invalid_value("flip", "expected a geometry property"))?;
    let target = env.target(&pref)?;
    let flipped = SqlExpr::func("ST_FlipCoordinates", vec![target.expr]);
    Ok(Operand::Native(SqlExpr::func("ST_AsEWKT", vec![flipped])))
}

/// `point(x, y)` as a WKT literal
pub(crate) fn point(_: &mut PgQueryBuilder, args: PgArgs) -> PgResult {
    let coordinate = |operand: Option<&Operand<SqlExpr>>| match operand {
        Some(Operand::Value(Value::Int(i))) => Ok(i.to_string()),
        Some(Operand::Value(Value::Float(f))) => Ok(f.to_string()),
        _ => Err(QueryError::invalid_value("point", "expected numeric coordinates")),
    };
    let x = coordinate(args.pos.first())?;
    let y = coordinate(args.pos.get(1))?;
    Ok(Operand::Value(Value::Str(format!("POINT ({} {})", x, y))))
}

/// `file(prop)`: the file content, filled in after the row is read
pub(crate) fn file(_: &mut PgQueryBuilder, mut args: PgArgs) -> PgResult {
    let pref = match args.pos.remove(0) {
        Operand::Prop(pref) => pref,
        _ => return Err(QueryError::invalid_value("file", "expected a file property")),
    };
    let content = PropertyRef::Reserved(ReservedProperty {
        prop: pref.prop(),
        name: "_content".to_string(),
        kind: TypeKind::Binary,
    });
    Ok(Operand::Prop(rebase(pref.chain(), content)))
}
