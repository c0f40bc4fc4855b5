//! `select(...)`, `count()` and the functions Mongo cannot express

use crate::builder::{MongoQueryBuilder, BACKEND};
use bson::Document;
use strata_query::{call, Args, Expr, Item, Node, Operand, QueryEnv, QueryError, Result, Selected};
use strata_schema::resolver::resolve_path;

type MongoArgs = Args<Operand<Document>>;
type MongoResult = Result<Operand<Document>>;

pub(crate) fn select(env: &mut MongoQueryBuilder, expr: &Expr) -> MongoResult {
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

fn select_node(env: &mut MongoQueryBuilder, key: String, node: &Node) -> Result<()> {
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

/// `count()`: the plan counts documents, the count comes back under
/// `count()`
pub(crate) fn count(env: &mut MongoQueryBuilder, _: MongoArgs) -> MongoResult {
    env.count = true;
    env.add_selected(
        "count()".to_string(),
        Selected::column(Item::Key("count()".to_string()), None),
    );
    Ok(Operand::Empty)
}

pub(crate) fn unsupported(_: &mut MongoQueryBuilder, args: MongoArgs) -> MongoResult {
    Err(QueryError::not_implemented(BACKEND, format!("{}()", args.name)))
}
