use crate::dispatch::TypeTag;
use crate::error::{QueryError, Result};
use crate::expr::Value;
use strata_schema::{Manifest, PropId, PropertyRef};

/// Resolved argument of a query function
#[derive(Debug, Clone)]
pub enum Operand<N> {
    Value(Value),
    Prop(PropertyRef),
    Lower(Box<Operand<N>>),
    Upper(Box<Operand<N>>),
    Negative(Box<Operand<N>>),
    Positive(Box<Operand<N>>),
    /// Every leaf property sharing a name, from `recurse(name)`
    Recurse(Vec<PropId>),
    Native(N),
    /// Nothing to add, e.g. `and()` without arguments
    Empty,
}

impl<N> Operand<N> {
    pub fn tag(&self, manifest: &Manifest) -> TypeTag {
        match self {
            Operand::Value(value) => TypeTag::of_value(value),
            Operand::Prop(prop) => TypeTag::Type(prop.kind(manifest)),
            Operand::Lower(_) => TypeTag::Lower,
            Operand::Upper(_) => TypeTag::Upper,
            Operand::Negative(_) => TypeTag::Negative,
            Operand::Positive(_) => TypeTag::Positive,
            Operand::Recurse(_) => TypeTag::Recurse,
            Operand::Native(_) => TypeTag::Native,
            Operand::Empty => TypeTag::Empty,
        }
    }

    pub fn as_prop(&self) -> Option<&PropertyRef> {
        match self {
            Operand::Prop(prop) => Some(prop),
            _ => None,
        }
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Operand::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn into_native(self) -> Option<N> {
        match self {
            Operand::Native(native) => Some(native),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Operand::Empty)
    }

    /// Readable form for error messages
    pub fn describe(&self, manifest: &Manifest) -> String {
        match self {
            Operand::Value(value) => value.to_string(),
            Operand::Prop(prop) => manifest.prop(prop.prop()).place.clone(),
            Operand::Lower(inner) => format!("lower({})", inner.describe(manifest)),
            Operand::Upper(inner) => format!("upper({})", inner.describe(manifest)),
            Operand::Negative(inner) => format!("-{}", inner.describe(manifest)),
            Operand::Positive(inner) => format!("+{}", inner.describe(manifest)),
            Operand::Recurse(leaves) => format!("recurse({} leaves)", leaves.len()),
            Operand::Native(_) => "<expression>".to_string(),
            Operand::Empty => "<empty>".to_string(),
        }
    }
}

/// Split `and`/`or` arguments into backend expressions, dropping empty ones
pub fn natives<N>(operator: &str, args: Vec<Operand<N>>) -> Result<Vec<N>> {
    let mut items = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Operand::Native(native) => items.push(native),
            Operand::Empty | Operand::Value(Value::Null) => {}
            other => {
                return Err(QueryError::invalid_value(
                    operator,
                    format!("expected a condition, got {}", other.kind_name()),
                ))
            }
        }
    }
    Ok(items)
}

impl<N> Operand<N> {
    fn kind_name(&self) -> &'static str {
        match self {
            Operand::Value(_) => "value",
            Operand::Prop(_) => "property",
            Operand::Lower(_) => "lower()",
            Operand::Upper(_) => "upper()",
            Operand::Negative(_) => "negative",
            Operand::Positive(_) => "positive",
            Operand::Recurse(_) => "recurse()",
            Operand::Native(_) => "expression",
            Operand::Empty => "empty",
        }
    }
}

/// Integer argument of `limit`, `offset`, `size=`
pub fn int_arg<N>(operator: &str, arg: Option<&Operand<N>>) -> Result<u64> {
    let value = arg
        .and_then(Operand::as_value)
        .ok_or_else(|| QueryError::invalid_value(operator, "expected an integer"))?;
    match value.as_i64() {
        Some(n) if n >= 0 => Ok(n as u64),
        _ => Err(QueryError::invalid_value(
            operator,
            format!("expected a non negative integer, got {}", value),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_natives_strip_empty() {
        let args: Vec<Operand<&str>> = vec![
            Operand::Native("a"),
            Operand::Empty,
            Operand::Value(Value::Null),
            Operand::Native("b"),
        ];
        assert_eq!(natives("and", args).unwrap(), vec!["a", "b"]);

        let bad: Vec<Operand<&str>> = vec![Operand::Value(Value::Int(1))];
        assert_eq!(natives("and", bad).unwrap_err().kind(), "InvalidValue");
    }

    #[test]
    fn test_int_arg() {
        let arg: Operand<()> = Operand::Value(Value::Int(10));
        assert_eq!(int_arg("limit", Some(&arg)).unwrap(), 10);
        let arg: Operand<()> = Operand::Value(Value::Str("5".into()));
        assert_eq!(int_arg("limit", Some(&arg)).unwrap(), 5);
        let arg: Operand<()> = Operand::Value(Value::Int(-1));
        assert!(int_arg("limit", Some(&arg)).is_err());
        assert!(int_arg::<()>("limit", None).is_err());
    }
}
