//! Expression model
//!
//! Query expressions arrive already parsed from the URL query language as
//! an immutable tree. `select(name, country.code)&eq(code,"lt")&sort(-name)`
//! becomes:
//!
//! ```text
//! and(select(Bind(name), GetAttr(Bind(country), code)),
//!     eq(Bind(code), "lt"),
//!     sort(Negative(Bind(name))))
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Literal operand
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::List(items) => serde_json::Value::Array(items.iter().map(Value::to_json).collect()),
        }
    }

    pub fn from_json(value: &serde_json::Value) -> Value {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => Value::List(items.iter().map(Value::from_json).collect()),
            serde_json::Value::Object(_) => Value::Str(value.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value as i64)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Expr(Expr),
    Bind(String),
    GetAttr(Box<Node>, String),
    Negative(Box<Node>),
    Positive(Box<Node>),
    Value(Value),
}

impl Node {
    /// Dotted path of a `Bind`/`GetAttr` chain
    pub fn path(&self) -> Option<Vec<String>> {
        match self {
            Node::Bind(name) => Some(vec![name.clone()]),
            Node::GetAttr(obj, name) => {
                let mut path = obj.path()?;
                path.push(name.clone());
                Some(path)
            }
            _ => None,
        }
    }

    pub fn as_expr(&self) -> Option<&Expr> {
        match self {
            Node::Expr(expr) => Some(expr),
            _ => None,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Expr(expr) => write!(f, "{}", expr),
            Node::Bind(name) => f.write_str(name),
            Node::GetAttr(obj, name) => write!(f, "{}.{}", obj, name),
            Node::Negative(node) => write!(f, "-{}", node),
            Node::Positive(node) => write!(f, "+{}", node),
            Node::Value(value) => write!(f, "{}", value),
        }
    }
}

impl From<Expr> for Node {
    fn from(expr: Expr) -> Self {
        Node::Expr(expr)
    }
}

impl From<Value> for Node {
    fn from(value: Value) -> Self {
        Node::Value(value)
    }
}

/// Function call node: `name(*args, **kwargs)`
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub name: String,
    pub args: Vec<Node>,
    pub kwargs: Vec<(String, Node)>,
}

impl Expr {
    pub fn new(name: impl Into<String>, args: Vec<Node>) -> Self {
        Self {
            name: name.into(),
            args,
            kwargs: Vec::new(),
        }
    }

    pub fn with_kwarg(mut self, name: impl Into<String>, value: Node) -> Self {
        self.kwargs.push((name.into(), value));
        self
    }

    pub fn kwarg(&self, name: &str) -> Option<&Node> {
        self.kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    /// Top level calls of an `and` tree, or the expression itself
    pub fn conjuncts(&self) -> Vec<&Expr> {
        if self.name == "and" {
            self.args
                .iter()
                .filter_map(Node::as_expr)
                .flat_map(Expr::conjuncts)
                .collect()
        } else {
            vec![self]
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        let mut first = true;
        for arg in &self.args {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{}", arg)?;
        }
        for (name, value) in &self.kwargs {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{}={}", name, value)?;
        }
        f.write_str(")")
    }
}

pub fn bind(name: impl Into<String>) -> Node {
    Node::Bind(name.into())
}

/// `a.b.c` as nested `GetAttr` nodes
pub fn path(dotted: &str) -> Node {
    let mut parts = dotted.split('.');
    let first = parts.next().unwrap_or_default();
    parts.fold(bind(first), |node, name| {
        Node::GetAttr(Box::new(node), name.to_string())
    })
}

pub fn getattr(obj: Node, name: impl Into<String>) -> Node {
    Node::GetAttr(Box::new(obj), name.into())
}

pub fn call(name: impl Into<String>, args: Vec<Node>) -> Expr {
    Expr::new(name, args)
}

pub fn lit(value: impl Into<Value>) -> Node {
    Node::Value(value.into())
}

pub fn neg(node: Node) -> Node {
    Node::Negative(Box::new(node))
}

pub fn pos(node: Node) -> Node {
    Node::Positive(Box::new(node))
}
