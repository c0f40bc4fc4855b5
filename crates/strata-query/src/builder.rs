//! Builder contract shared by every backend environment, plus handlers
//! that behave the same everywhere (`lower`, `upper`, `recurse`).

use crate::dispatch::{call, call_resolved, Args, Dispatcher, QueryEnv, TypeTag};
use crate::error::{QueryError, Result};
use crate::expr::{Expr, Value};
use crate::operand::Operand;
use crate::selected::Selected;
use strata_schema::PropertyRef;
use tracing::debug;

/// Compiled query: backend plan plus the shape of its rows
#[derive(Debug, Clone)]
pub struct BuiltQuery<P> {
    pub plan: P,
    pub selected: Vec<(String, Selected)>,
    /// `count()` style queries return one row of aggregates
    pub aggregate: bool,
}

pub trait QueryBuilder: QueryEnv {
    type Plan;

    /// Add a top level condition
    fn push_where(&mut self, condition: Self::Native);

    /// Assemble the plan from everything gathered so far
    fn build(self) -> Result<BuiltQuery<Self::Plan>>;
}

/// Evaluate `expr` in `env` and build the plan
pub fn compile<E: QueryBuilder>(mut env: E, expr: Option<&Expr>) -> Result<BuiltQuery<E::Plan>> {
    if let Some(expr) = expr {
        match call(&mut env, expr)? {
            Operand::Native(condition) => env.push_where(condition),
            Operand::Empty => {}
            other => {
                return Err(QueryError::invalid_value(
                    &expr.name,
                    format!(
                        "top level expression must be a condition, got {}",
                        other.describe(env.manifest())
                    ),
                ))
            }
        }
        debug!("Compiled {} in {}", expr, env.dispatcher().env());
    }
    env.build()
}

fn lower<E: QueryEnv>(_: &mut E, mut args: Args<Operand<E::Native>>) -> Result<Operand<E::Native>> {
    Ok(Operand::Lower(Box::new(args.pos.remove(0))))
}

fn upper<E: QueryEnv>(_: &mut E, mut args: Args<Operand<E::Native>>) -> Result<Operand<E::Native>> {
    Ok(Operand::Upper(Box::new(args.pos.remove(0))))
}

/// `recurse(name)`: every leaf of the model named `name`
fn recurse<E: QueryEnv>(env: &mut E, args: Args<Operand<E::Native>>) -> Result<Operand<E::Native>> {
    let prop = args
        .pos
        .first()
        .and_then(Operand::as_prop)
        .ok_or_else(|| QueryError::invalid_value("recurse", "expected a property"))?;
    let manifest = env.manifest();
    let name = &manifest.prop(prop.prop()).name;
    let leaves = manifest.model(env.model()).leaves(name).to_vec();
    if leaves.is_empty() {
        return Err(QueryError::invalid_value(
            "recurse",
            format!("{} has no leaf properties", name),
        ));
    }
    Ok(Operand::Recurse(leaves))
}

/// `op(recurse(name), value)` lifted into `or(op(leaf, value), ...)`
fn lift_recurse<E: QueryEnv>(env: &mut E, mut args: Args<Operand<E::Native>>) -> Result<Operand<E::Native>> {
    let Operand::Recurse(leaves) = args.pos.remove(0) else {
        return Err(QueryError::invalid_value(&args.name, "expected recurse()"));
    };
    let mut branches = Vec::with_capacity(leaves.len());
    for leaf in leaves {
        let mut pos = Vec::with_capacity(args.pos.len() + 1);
        pos.push(Operand::Prop(PropertyRef::Property(leaf)));
        pos.extend(args.pos.iter().cloned());
        branches.push(call_resolved(env, Args::new(args.name.clone(), pos))?);
    }
    call_resolved(env, Args::new("or", branches))
}

/// `any(op, prop, v1, v2, ...)` as `or(op(prop, v1), op(prop, v2), ...)`
fn any<E: QueryEnv>(env: &mut E, args: Args<Operand<E::Native>>) -> Result<Operand<E::Native>> {
    let mut pos = args.pos.into_iter();
    let op = match pos.next() {
        Some(Operand::Value(Value::Str(op))) if COMPARE_OPERATORS.contains(&op.as_str()) => op,
        _ => {
            return Err(QueryError::invalid_value(
                "any",
                format!("first argument must be one of {}", COMPARE_OPERATORS.join(", ")),
            ))
        }
    };
    let prop = pos
        .next()
        .ok_or_else(|| QueryError::invalid_value("any", "expected a property"))?;
    let mut branches = Vec::new();
    for value in pos {
        branches.push(call_resolved(env, Args::new(op.clone(), vec![prop.clone(), value]))?);
    }
    call_resolved(env, Args::new("or", branches))
}

/// Comparison functions every builder supports
pub const COMPARE_OPERATORS: [&str; 8] = ["eq", "ne", "lt", "le", "gt", "ge", "startswith", "contains"];

/// Register handlers shared by all environments
pub fn register_common<E: QueryEnv>(dispatcher: &mut Dispatcher<E, Operand<E::Native>>) {
    dispatcher
        .register("lower", &[TypeTag::Prop], lower::<E>)
        .register("upper", &[TypeTag::Prop], upper::<E>)
        .register("recurse", &[TypeTag::Prop], recurse::<E>)
        .register_variadic("any", &[TypeTag::Str, TypeTag::Prop], TypeTag::Value, any::<E>);
    for op in COMPARE_OPERATORS {
        dispatcher.register(op, &[TypeTag::Recurse, TypeTag::Value], lift_recurse::<E>);
    }
}
