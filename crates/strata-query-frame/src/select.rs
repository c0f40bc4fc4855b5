//! `select(...)`, `count()`, `distinct()`

use crate::builder::{FrameQueryBuilder, BACKEND};
use crate::mask::Mask;
use strata_query::{call, Args, Expr, Item, Node, Operand, QueryEnv, QueryError, Result, Selected};
use strata_schema::resolver::resolve_path;

type FrameArgs = Args<Operand<Mask>>;
type FrameResult = Result<Operand<Mask>>;

pub(crate) fn select(env: &mut FrameQueryBuilder, expr: &Expr) -> FrameResult {
    let select_all = match expr.args.as_slice() {
        [] => expr.kwargs.is_empty(),
        [Node::Bind(name)] => name == "*",
        _ => false,
    };
    if select_all {
        env.select_all()?;
        return Ok(Operand::Empty);
    }

    env.selected.get_or_insert_with(Vec::new);
    for node in &expr.args {
        select_node(env, node.to_string(), node)?;
    }
    for (key, node) in &expr.kwargs {
        select_node(env, key.clone(), node)?;
    }
    Ok(Operand::Empty)
}

fn select_node(env: &mut FrameQueryBuilder, key: String, node: &Node) -> Result<()> {
    let selected = match node {
        Node::Bind(_) | Node::GetAttr(..) => {
            let path = node
                .path()
                .ok_or_else(|| QueryError::invalid_value("select", node.to_string()))?;
            let manifest = env.manifest_arc();
            let pref = resolve_path(&manifest, env.model(), &path)?;
            env.select_prop(&pref)?
        }
        Node::Expr(inner) => match call(env, inner)? {
            Operand::Prop(pref) => env.select_prop(&pref)?,
            Operand::Empty => return Ok(()),
            other => {
                return Err(QueryError::not_implemented(
                    BACKEND,
                    format!("selecting {}", other.describe(env.manifest())),
                ))
            }
        },
        Node::Value(value) => Selected::constant(value.to_json()),
        Node::Negative(_) | Node::Positive(_) => {
            return Err(QueryError::invalid_value("select", format!("cannot select {}", node)))
        }
    };
    env.add_selected(key, selected);
    Ok(())
}

pub(crate) fn count(env: &mut FrameQueryBuilder, _: FrameArgs) -> FrameResult {
    env.count = true;
    env.add_selected(
        "count()".to_string(),
        Selected::column(Item::Key("count()".to_string()), None),
    );
    Ok(Operand::Empty)
}

/// `distinct()`: `drop_duplicates()` over the shaped rows
pub(crate) fn distinct(env: &mut FrameQueryBuilder, _: FrameArgs) -> FrameResult {
    env.distinct = true;
    Ok(Operand::Empty)
}

pub(crate) fn unsupported(_: &mut FrameQueryBuilder, args: FrameArgs) -> FrameResult {
    Err(QueryError::not_implemented(BACKEND, format!("{}()", args.name)))
}
