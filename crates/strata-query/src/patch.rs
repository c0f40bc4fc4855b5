//! Data patch computed before a write
//!
//! Compares incoming data with the stored row and keeps only what
//! changed. Reserved keys (`_id`, `_revision`, `_op`, ...) always stay,
//! objects and texts are compared leaf by leaf.

use crate::cast::cast_value;
use crate::error::Result;
use serde_json::{Map, Value};
use strata_schema::dtype::DataType;
use strata_schema::{Manifest, ModelId, PropId, SchemaError};
use tracing::debug;

pub fn prepare_patch(
    manifest: &Manifest,
    model: ModelId,
    given: &Map<String, Value>,
    saved: &Map<String, Value>,
) -> Result<Map<String, Value>> {
    let m = manifest.model(model);
    let mut patch = Map::new();
    for (key, value) in given {
        if key.starts_with('_') {
            patch.insert(key.clone(), value.clone());
            continue;
        }
        let prop = m
            .property(key)
            .ok_or_else(|| SchemaError::field_not_found(&m.name, key))?;
        if let Some(changed) = diff(manifest, prop, value, saved.get(key))? {
            patch.insert(key.clone(), changed);
        }
    }
    debug!(
        "Patch for {} keeps {} of {} keys",
        m.name,
        patch.len(),
        given.len()
    );
    Ok(patch)
}

fn diff(manifest: &Manifest, prop: PropId, given: &Value, saved: Option<&Value>) -> Result<Option<Value>> {
    let property = manifest.prop(prop);
    let subs: Option<Vec<(String, PropId)>> = match &property.dtype {
        DataType::Object(object) => Some(object.properties.clone()),
        DataType::Text(text) => Some(text.langs.clone()),
        _ => None,
    };

    match (subs, given, saved) {
        (Some(subs), Value::Object(given), Some(Value::Object(saved))) => {
            let mut changed = Map::new();
            for (key, value) in given {
                let sub = subs
                    .iter()
                    .find(|(name, _)| name == key)
                    .map(|(_, id)| *id)
                    .ok_or_else(|| {
                        SchemaError::field_not_found(
                            &manifest.owner(prop).name,
                            format!("{}.{}", property.place, key),
                        )
                    })?;
                if let Some(sub_changed) = diff(manifest, sub, value, saved.get(key))? {
                    changed.insert(key.clone(), sub_changed);
                }
            }
            Ok((!changed.is_empty()).then_some(Value::Object(changed)))
        }
        (_, given, saved) => {
            let before = saved.cloned().unwrap_or(Value::Null);
            let same = cast_value(manifest, prop, given.clone()) == cast_value(manifest, prop, before);
            Ok((!same).then(|| given.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_schema::load_yaml;

    fn manifest() -> Manifest {
        load_yaml(
            r#"
models:
  City:
    properties:
      name@lt: string
      name@en: string
      population: integer
      address:
        type: object
        properties:
          street: string
          zip: string
"#,
        )
        .unwrap()
    }

    #[test]
    fn test_unchanged_values_are_dropped() {
        let manifest = manifest();
        let city = manifest.model_id("City").unwrap();
        let saved = json!({
            "_id": "a",
            "name": {"lt": "Vilnius", "en": "Vilnius"},
            "population": 500000,
            "address": {"street": "Gedimino", "zip": "01103"}
        });
        let given = json!({
            "_revision": "r1",
            "name": {"lt": "Vilnius", "en": "Vilna"},
            "population": "500 000",
            "address": {"street": "Gedimino", "zip": "01104"}
        });
        let patch = prepare_patch(
            &manifest,
            city,
            given.as_object().unwrap(),
            saved.as_object().unwrap(),
        )
        .unwrap();
        assert_eq!(
            Value::Object(patch),
            json!({
                "_revision": "r1",
                "name": {"en": "Vilna"},
                "address": {"zip": "01104"}
            })
        );
    }

    #[test]
    fn test_unknown_property_is_rejected() {
        let manifest = manifest();
        let city = manifest.model_id("City").unwrap();
        let given = json!({"nope": 1});
        let err = prepare_patch(&manifest, city, given.as_object().unwrap(), &Map::new()).unwrap_err();
        assert_eq!(err.kind(), "FieldNotInResource");
    }
}
