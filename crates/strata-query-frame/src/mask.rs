//! Boolean masks over records
//!
//! A mask is evaluated per record. Values are cast to the property type
//! before comparing, so text columns read from CSV compare as numbers,
//! dates and booleans where the property says so.

use serde_json::{Map, Value};
use std::cmp::Ordering;
use strata_query::cast::cast_scalar;
use strata_schema::dtype::TypeKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn from_name(name: &str) -> Option<CmpOp> {
        Some(match name {
            "eq" => CmpOp::Eq,
            "ne" => CmpOp::Ne,
            "lt" => CmpOp::Lt,
            "le" => CmpOp::Le,
            "gt" => CmpOp::Gt,
            "ge" => CmpOp::Ge,
            _ => return None,
        })
    }

    fn test(&self, ordering: Ordering) -> bool {
        match self {
            CmpOp::Eq => ordering == Ordering::Equal,
            CmpOp::Ne => ordering != Ordering::Equal,
            CmpOp::Lt => ordering == Ordering::Less,
            CmpOp::Le => ordering != Ordering::Greater,
            CmpOp::Gt => ordering == Ordering::Greater,
            CmpOp::Ge => ordering != Ordering::Less,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Case {
    Lower,
    Upper,
}

impl Case {
    fn apply(&self, text: &str) -> String {
        match self {
            Case::Lower => text.to_lowercase(),
            Case::Upper => text.to_uppercase(),
        }
    }
}

/// Column a mask reads, with the type its values are cast to
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub kind: TypeKind,
    pub case: Option<Case>,
}

impl Column {
    pub fn new(name: impl Into<String>, kind: TypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            case: None,
        }
    }

    /// Cast value of the column in `record`, `Null` when missing
    pub fn read(&self, record: &Map<String, Value>) -> Value {
        let raw = record.get(&self.name).cloned().unwrap_or(Value::Null);
        let value = match raw {
            Value::String(ref s) if s.is_empty() => Value::Null,
            other => cast_scalar(self.kind, other),
        };
        match (self.case, value) {
            (Some(case), Value::String(text)) => Value::String(case.apply(&text)),
            (_, value) => value,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mask {
    Compare {
        column: Column,
        op: CmpOp,
        value: Value,
    },
    StartsWith(Column, String),
    Contains(Column, String),
    IsNull(Column),
    NotNull(Column),
    And(Vec<Mask>),
    Or(Vec<Mask>),
}

impl Mask {
    pub fn test(&self, record: &Map<String, Value>) -> bool {
        match self {
            Mask::Compare { column, op, value } => {
                let actual = column.read(record);
                // null never compares, like a missing value in a frame
                if actual.is_null() {
                    return false;
                }
                compare(&actual, value).map_or(false, |ordering| op.test(ordering))
            }
            Mask::StartsWith(column, prefix) => match column.read(record) {
                Value::String(text) => text.starts_with(prefix.as_str()),
                _ => false,
            },
            Mask::Contains(column, needle) => match column.read(record) {
                Value::String(text) => text.contains(needle.as_str()),
                _ => false,
            },
            Mask::IsNull(column) => column.read(record).is_null(),
            Mask::NotNull(column) => !column.read(record).is_null(),
            Mask::And(masks) => masks.iter().all(|mask| mask.test(record)),
            Mask::Or(masks) => masks.iter().any(|mask| mask.test(record)),
        }
    }
}

/// Order of two values of the same type; `None` for mismatching types
pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Sort order with nulls last regardless of direction
pub fn sort_order(a: &Value, b: &Value, desc: bool) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => {
            let ordering = compare(a, b).unwrap_or(Ordering::Equal);
            if desc {
                ordering.reverse()
            } else {
                ordering
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_values_are_cast_before_comparing() {
        let row = record(json!({"population": "1 200", "name": "Vilnius", "empty": ""}));
        let mask = Mask::Compare {
            column: Column::new("population", TypeKind::Integer),
            op: CmpOp::Gt,
            value: json!(1000),
        };
        assert!(mask.test(&row));
        assert!(Mask::IsNull(Column::new("empty", TypeKind::String)).test(&row));
        assert!(Mask::IsNull(Column::new("missing", TypeKind::String)).test(&row));

        let mut column = Column::new("name", TypeKind::String);
        column.case = Some(Case::Lower);
        assert!(Mask::StartsWith(column, "vil".into()).test(&row));
    }

    #[test]
    fn test_nulls_sort_last() {
        let mut values = vec![json!(2), Value::Null, json!(1)];
        values.sort_by(|a, b| sort_order(a, b, true));
        assert_eq!(values, vec![json!(2), json!(1), Value::Null]);
        values.sort_by(|a, b| sort_order(a, b, false));
        assert_eq!(values, vec![json!(1), json!(2), Value::Null]);
    }
}
