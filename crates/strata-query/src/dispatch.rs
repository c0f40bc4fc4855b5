//! Multi-parameter dispatcher
//!
//! Handlers are registered per function name with one [`TypeTag`] per
//! positional argument. A call is resolved against the tags of its actual
//! arguments: every tag has an ancestor chain (`url -> string -> prop ->
//! any`) and a handler matches when each of its parameters appears in the
//! chain of the corresponding argument. Among matching handlers the most
//! specific one wins, i.e. the one no other candidate beats on every
//! argument. Remaining ties go to the handler registered first.

use crate::error::{QueryError, Result};
use crate::expr::{Expr, Value};
use crate::operand::Operand;
use std::collections::HashMap;
use std::fmt;
use strata_schema::{Manifest, ModelId, TypeKind};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeTag {
    Any,
    /// Any literal
    Value,
    Null,
    Bool,
    Number,
    Int,
    Float,
    Str,
    List,
    /// Any property
    Prop,
    Type(TypeKind),
    Lower,
    Upper,
    Negative,
    Positive,
    Recurse,
    /// Backend expression produced by another handler
    Native,
    Empty,
}

impl TypeTag {
    pub fn of_value(value: &Value) -> TypeTag {
        match value {
            Value::Null => TypeTag::Null,
            Value::Bool(_) => TypeTag::Bool,
            Value::Int(_) => TypeTag::Int,
            Value::Float(_) => TypeTag::Float,
            Value::Str(_) => TypeTag::Str,
            Value::List(_) => TypeTag::List,
        }
    }

    /// The tag itself followed by ever more general tags
    pub fn ancestors(&self) -> Vec<TypeTag> {
        let mut chain = vec![*self];
        match self {
            TypeTag::Any => return chain,
            TypeTag::Int | TypeTag::Float => {
                chain.push(TypeTag::Number);
                chain.push(TypeTag::Value);
            }
            TypeTag::Null | TypeTag::Bool | TypeTag::Number | TypeTag::Str | TypeTag::List => {
                chain.push(TypeTag::Value)
            }
            TypeTag::Type(kind) => {
                let mut current = kind.parent();
                while let Some(parent) = current {
                    chain.push(TypeTag::Type(parent));
                    current = parent.parent();
                }
                chain.push(TypeTag::Prop);
            }
            _ => {}
        }
        chain.push(TypeTag::Any);
        chain
    }

    /// How far `param` is from this tag, `None` when it does not match
    pub fn distance(&self, param: &TypeTag) -> Option<usize> {
        self.ancestors().iter().position(|tag| tag == param)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Type(kind) => write!(f, "{}", kind),
            other => write!(f, "{}", format!("{:?}", other).to_lowercase()),
        }
    }
}

/// Arguments of a resolved call
#[derive(Debug, Clone)]
pub struct Args<T> {
    /// Function the arguments were given to
    pub name: String,
    pub pos: Vec<T>,
    pub kw: Vec<(String, T)>,
}

impl<T> Args<T> {
    pub fn new(name: impl Into<String>, pos: Vec<T>) -> Self {
        Self {
            name: name.into(),
            pos,
            kw: Vec::new(),
        }
    }

    pub fn kwarg(&self, name: &str) -> Option<&T> {
        self.kw.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }
}

pub type Handler<E, T> = fn(&mut E, Args<T>) -> Result<T>;

/// Handler receiving the unresolved expression (`select`, `sort`, ...)
pub type RawHandler<E, T> = fn(&mut E, &Expr) -> Result<T>;

pub type Fallback = fn(&'static str, &str, &[TypeTag]) -> QueryError;

struct Entry<E, T> {
    params: Vec<TypeTag>,
    variadic: Option<TypeTag>,
    handler: Handler<E, T>,
}

impl<E, T> Entry<E, T> {
    fn distances(&self, args: &[TypeTag]) -> Option<Vec<usize>> {
        if self.variadic.is_none() && args.len() != self.params.len() {
            return None;
        }
        if args.len() < self.params.len() {
            return None;
        }
        args.iter()
            .enumerate()
            .map(|(i, arg)| {
                let param = self.params.get(i).or(self.variadic.as_ref())?;
                arg.distance(param)
            })
            .collect()
    }
}

fn default_fallback(env: &'static str, name: &str, args: &[TypeTag]) -> QueryError {
    QueryError::UnknownMethod {
        env,
        name: name.to_string(),
        args: args.iter().map(TypeTag::to_string).collect(),
    }
}

/// Handler registry of one builder environment
pub struct Dispatcher<E, T> {
    env: &'static str,
    typed: HashMap<String, Vec<Entry<E, T>>>,
    raw: HashMap<String, RawHandler<E, T>>,
    fallback: Fallback,
}

impl<E, T> Dispatcher<E, T> {
    pub fn new(env: &'static str) -> Self {
        Self {
            env,
            typed: HashMap::new(),
            raw: HashMap::new(),
            fallback: default_fallback,
        }
    }

    pub fn env(&self) -> &'static str {
        self.env
    }

    pub fn register(&mut self, name: &str, params: &[TypeTag], handler: Handler<E, T>) -> &mut Self {
        self.typed.entry(name.to_string()).or_default().push(Entry {
            params: params.to_vec(),
            variadic: None,
            handler,
        });
        self
    }

    /// Register a handler taking `fixed` arguments followed by any number
    /// of `rest` arguments
    pub fn register_variadic(
        &mut self,
        name: &str,
        fixed: &[TypeTag],
        rest: TypeTag,
        handler: Handler<E, T>,
    ) -> &mut Self {
        self.typed.entry(name.to_string()).or_default().push(Entry {
            params: fixed.to_vec(),
            variadic: Some(rest),
            handler,
        });
        self
    }

    pub fn register_raw(&mut self, name: &str, handler: RawHandler<E, T>) -> &mut Self {
        self.raw.insert(name.to_string(), handler);
        self
    }

    pub fn set_fallback(&mut self, fallback: Fallback) -> &mut Self {
        self.fallback = fallback;
        self
    }

    pub fn raw(&self, name: &str) -> Option<RawHandler<E, T>> {
        self.raw.get(name).copied()
    }

    pub fn has(&self, name: &str) -> bool {
        self.raw.contains_key(name) || self.typed.contains_key(name)
    }

    /// Most specific handler for `name` called with `args`
    pub fn resolve(&self, name: &str, args: &[TypeTag]) -> Result<Handler<E, T>> {
        let entries = self
            .typed
            .get(name)
            .ok_or_else(|| (self.fallback)(self.env, name, args))?;

        let candidates: Vec<(usize, Vec<usize>)> = entries
            .iter()
            .enumerate()
            .filter_map(|(order, entry)| entry.distances(args).map(|d| (order, d)))
            .collect();

        let beats = |a: &[usize], b: &[usize]| {
            a.iter().zip(b).all(|(x, y)| x <= y) && a.iter().zip(b).any(|(x, y)| x < y)
        };

        // candidates keep registration order, so the first undominated one
        // is the earliest registered among the most specific
        let winner = candidates
            .iter()
            .find(|(_, dist)| !candidates.iter().any(|(_, other)| beats(other, dist)))
            .map(|(order, _)| *order)
            .ok_or_else(|| (self.fallback)(self.env, name, args))?;

        trace!(
            "Dispatch {}::{}({:?}) -> handler #{}",
            self.env,
            name,
            args,
            winner
        );
        Ok(entries[winner].handler)
    }
}

/// Environment a query expression is evaluated in
pub trait QueryEnv: Sized + 'static {
    /// Backend expression type (SQL expression, filter document, mask)
    type Native: Clone + fmt::Debug;

    fn manifest(&self) -> &Manifest;

    /// Model the query runs against
    fn model(&self) -> ModelId;

    fn dispatcher(&self) -> &'static Dispatcher<Self, Operand<Self::Native>>;

    /// Resolve a `Bind`/`GetAttr` path into an operand
    fn resolve_path(&mut self, path: &[String]) -> Result<Operand<Self::Native>>;
}

/// Evaluate a function call: raw handlers get the expression as is,
/// everything else is resolved argument by argument and dispatched on the
/// argument types
pub fn call<E: QueryEnv>(env: &mut E, expr: &Expr) -> Result<Operand<E::Native>> {
    let dispatcher = env.dispatcher();
    if let Some(raw) = dispatcher.raw(&expr.name) {
        return raw(env, expr);
    }
    let args = resolve_args(env, expr)?;
    call_resolved(env, args)
}

/// Dispatch already resolved arguments
pub fn call_resolved<E: QueryEnv>(env: &mut E, args: Args<Operand<E::Native>>) -> Result<Operand<E::Native>> {
    let tags: Vec<TypeTag> = args.pos.iter().map(|arg| arg.tag(env.manifest())).collect();
    let handler = env.dispatcher().resolve(&args.name, &tags)?;
    handler(env, args)
}

/// Resolve positional and keyword arguments of a call
pub fn resolve_args<E: QueryEnv>(env: &mut E, expr: &Expr) -> Result<Args<Operand<E::Native>>> {
    let mut pos = Vec::with_capacity(expr.args.len());
    for arg in &expr.args {
        pos.push(resolve_node(env, arg)?);
    }
    let mut kw = Vec::with_capacity(expr.kwargs.len());
    for (name, value) in &expr.kwargs {
        kw.push((name.clone(), resolve_node(env, value)?));
    }
    Ok(Args {
        name: expr.name.clone(),
        pos,
        kw,
    })
}

pub fn resolve_node<E: QueryEnv>(env: &mut E, node: &crate::expr::Node) -> Result<Operand<E::Native>> {
    use crate::expr::Node;
    match node {
        Node::Expr(expr) => call(env, expr),
        Node::Bind(_) | Node::GetAttr(..) => {
            let path = node
                .path()
                .ok_or_else(|| QueryError::invalid_value("getattr", node.to_string()))?;
            env.resolve_path(&path)
        }
        Node::Negative(inner) => Ok(Operand::Negative(Box::new(resolve_node(env, inner)?))),
        Node::Positive(inner) => Ok(Operand::Positive(Box::new(resolve_node(env, inner)?))),
        Node::Value(value) => Ok(Operand::Value(value.clone())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;

    fn one(_: &mut Dummy, _: Args<u8>) -> Result<u8> {
        Ok(1)
    }
    fn two(_: &mut Dummy, _: Args<u8>) -> Result<u8> {
        Ok(2)
    }
    fn three(_: &mut Dummy, _: Args<u8>) -> Result<u8> {
        Ok(3)
    }

    fn run(d: &Dispatcher<Dummy, u8>, name: &str, args: &[TypeTag]) -> Result<u8> {
        let handler = d.resolve(name, args)?;
        handler(&mut Dummy, Args::new(name, vec![]))
    }

    #[test]
    fn test_most_specific_wins() {
        let mut d = Dispatcher::new("dummy");
        d.register("eq", &[TypeTag::Prop, TypeTag::Any], one)
            .register("eq", &[TypeTag::Type(TypeKind::String), TypeTag::Str], two)
            .register("eq", &[TypeTag::Type(TypeKind::String), TypeTag::Value], three);

        let url = TypeTag::Type(TypeKind::Url);
        assert_eq!(run(&d, "eq", &[url, TypeTag::Str]).unwrap(), 2);
        assert_eq!(run(&d, "eq", &[url, TypeTag::Int]).unwrap(), 3);
        assert_eq!(run(&d, "eq", &[TypeTag::Type(TypeKind::Integer), TypeTag::Int]).unwrap(), 1);
    }

    #[test]
    fn test_ties_go_to_first_registered() {
        let mut d = Dispatcher::new("dummy");
        d.register("eq", &[TypeTag::Prop, TypeTag::Str], one)
            .register("eq", &[TypeTag::Type(TypeKind::Integer), TypeTag::Any], two);
        // neither beats the other on every argument
        let args = [TypeTag::Type(TypeKind::Integer), TypeTag::Str];
        assert_eq!(run(&d, "eq", &args).unwrap(), 1);
    }

    #[test]
    fn test_variadic_and_fallback() {
        let mut d = Dispatcher::new("dummy");
        d.register_variadic("and", &[], TypeTag::Any, one);
        assert_eq!(run(&d, "and", &[]).unwrap(), 1);
        assert_eq!(run(&d, "and", &[TypeTag::Native, TypeTag::Empty]).unwrap(), 1);

        let err = run(&d, "nope", &[TypeTag::Int]).unwrap_err();
        assert_eq!(err.kind(), "UnknownMethod");
        d.register("eq", &[TypeTag::Prop, TypeTag::Str], two);
        let err = run(&d, "eq", &[TypeTag::Int, TypeTag::Int]).unwrap_err();
        assert_eq!(err.kind(), "UnknownMethod");
    }

    #[test]
    fn test_ancestors() {
        assert_eq!(
            TypeTag::Type(TypeKind::Url).ancestors(),
            vec![
                TypeTag::Type(TypeKind::Url),
                TypeTag::Type(TypeKind::String),
                TypeTag::Prop,
                TypeTag::Any
            ]
        );
        assert_eq!(TypeTag::Int.distance(&TypeTag::Number), Some(1));
        assert_eq!(TypeTag::Str.distance(&TypeTag::Number), None);
    }
}
