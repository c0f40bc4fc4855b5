//! Row shaper
//!
//! Turns a flat backend row into the nested response object described by
//! a [`Selected`] tree.

use crate::cast::cast_value;
use crate::selected::{Item, Prep, Selected};
use serde_json::{Map, Value};
use strata_schema::dtype::TypeKind;
use strata_schema::Manifest;

/// Backend row the shaper reads values from
pub trait Row {
    fn get(&self, item: &Item) -> Option<&Value>;
}

impl Row for [Value] {
    fn get(&self, item: &Item) -> Option<&Value> {
        match item {
            Item::Index(index) => <[Value]>::get(self, *index),
            Item::Key(_) => None,
        }
    }
}

impl Row for Vec<Value> {
    fn get(&self, item: &Item) -> Option<&Value> {
        Row::get(self.as_slice(), item)
    }
}

impl Row for Map<String, Value> {
    fn get(&self, item: &Item) -> Option<&Value> {
        match item {
            Item::Key(key) => {
                if let Some(value) = Map::get(self, key) {
                    return Some(value);
                }
                // nested documents: `country._id`
                let mut parts = key.split('.');
                let mut current = Map::get(self, parts.next()?)?;
                for part in parts {
                    current = current.as_object()?.get(part)?;
                }
                Some(current)
            }
            Item::Index(_) => None,
        }
    }
}

/// Shape one row
pub fn shape<R: Row + ?Sized>(
    manifest: &Manifest,
    selected: &[(String, Selected)],
    row: &R,
) -> Map<String, Value> {
    selected
        .iter()
        .map(|(key, sel)| (key.clone(), shape_one(manifest, sel, row)))
        .collect()
}

fn shape_one<R: Row + ?Sized>(manifest: &Manifest, sel: &Selected, row: &R) -> Value {
    match &sel.prep {
        Prep::None => {
            let raw = sel
                .item
                .as_ref()
                .and_then(|item| row.get(item))
                .cloned()
                .unwrap_or(Value::Null);
            match sel.prop {
                Some(prop) if !raw.is_null() => cast_value(manifest, prop, raw),
                _ => raw,
            }
        }
        Prep::Map(children) => {
            let mut object = shape(manifest, children, row);
            let is_ref = sel
                .prop
                .map(|p| matches!(manifest.prop(p).kind(), TypeKind::Ref | TypeKind::ExternalRef))
                .unwrap_or(false);
            if is_ref && object.contains_key("_uri") {
                object.shift_remove("_id");
            }
            // a reference without any value is null, not `{"_id": null}`
            if is_ref && object.values().all(Value::is_null) {
                return Value::Null;
            }
            Value::Object(object)
        }
        Prep::Langs { items, collapse } => {
            if *collapse {
                items
                    .iter()
                    .map(|(_, child)| shape_one(manifest, child, row))
                    .find(|value| !value.is_null())
                    .unwrap_or(Value::Null)
            } else {
                Value::Object(shape(manifest, items, row))
            }
        }
        Prep::Const(value) => value.clone(),
        Prep::Deferred => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_map_row_nested_lookup() {
        let row = json!({"country": {"_id": "abc"}, "name.lt": "x"});
        let row = row.as_object().unwrap();
        assert_eq!(
            Row::get(row, &Item::Key("country._id".into())),
            Some(&json!("abc"))
        );
        assert_eq!(Row::get(row, &Item::Key("name.lt".into())), Some(&json!("x")));
        assert_eq!(Row::get(row, &Item::Key("missing.key".into())), None);
        assert_eq!(Row::get(row, &Item::Index(0)), None);
    }
}
