//! Running a built plan with the MongoDB driver

use crate::builder::MongoPlan;
use crate::error::Result;
use bson::{Bson, Document};
use futures::TryStreamExt;
use mongodb::{Collection, Database};
use serde_json::{Map, Value};
use strata_query::selected::Item;
use strata_query::shaper::shape;
use strata_query::{BuiltQuery, Selected};
use strata_schema::Manifest;
use tracing::debug;

/// Run `built` against its collection in `db` and shape every document
pub async fn fetch(db: &Database, manifest: &Manifest, built: &BuiltQuery<MongoPlan>) -> Result<Vec<Map<String, Value>>> {
    let plan = &built.plan;
    let collection: Collection<Document> = db.collection(&plan.collection);

    if plan.count {
        let count = collection.count_documents(plan.filter.clone()).await?;
        debug!("Counted {} documents in {}", count, plan.collection);
        let mut row = Map::new();
        row.insert("count()".to_string(), Value::from(count));
        return Ok(vec![shape(manifest, &built.selected, &row)]);
    }

    let mut find = collection
        .find(plan.filter.clone())
        .projection(plan.projection.clone());
    if !plan.sort.is_empty() {
        find = find.sort(plan.sort.clone());
    }
    if let Some(skip) = plan.skip {
        find = find.skip(skip);
    }
    if let Some(limit) = plan.limit {
        find = find.limit(i64::try_from(limit).unwrap_or(i64::MAX));
    }
    let documents: Vec<Document> = find.await?.try_collect().await?;
    debug!("Fetched {} documents from {}", documents.len(), plan.collection);

    Ok(documents
        .into_iter()
        .map(|document| {
            let row = flatten(document, &built.selected);
            shape(manifest, &built.selected, &row)
        })
        .collect())
}

/// Turn a document into a row: every selected key that passes through an
/// array gets the list of values found under it
pub fn flatten(document: Document, selected: &[(String, Selected)]) -> Map<String, Value> {
    let mut row = match Bson::Document(document).into_relaxed_extjson() {
        Value::Object(row) => row,
        _ => Map::new(),
    };
    for (_, sel) in selected {
        for item in sel.items() {
            if let Item::Key(key) = item {
                if key.contains('.') && !row.contains_key(key) {
                    let parts: Vec<&str> = key.split('.').collect();
                    let value = pluck(&Value::Object(row.clone()), &parts);
                    row.insert(key.clone(), value);
                }
            }
        }
    }
    row
}

/// Value under a dotted path, mapping over arrays on the way
fn pluck(value: &Value, parts: &[&str]) -> Value {
    let Some((first, rest)) = parts.split_first() else {
        return value.clone();
    };
    match value {
        Value::Object(object) => object
            .get(*first)
            .map(|child| pluck(child, rest))
            .unwrap_or(Value::Null),
        Value::Array(items) => Value::Array(items.iter().map(|item| pluck(item, parts)).collect()),
        _ => Value::Null,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use serde_json::json;

    #[test]
    fn test_flatten_maps_over_arrays() {
        let document = doc! {
            "__id": "a",
            "notes": [{"note": "x"}, {"note": "y"}],
            "country": {"_id": "c"},
        };
        let selected = vec![
            ("notes".to_string(), Selected::column(Item::Key("notes.note".into()), None)),
            ("country".to_string(), Selected::column(Item::Key("country._id".into()), None)),
        ];
        let row = flatten(document, &selected);
        assert_eq!(row["notes.note"], json!(["x", "y"]));
        assert_eq!(row["country._id"], json!("c"));
        assert_eq!(row["__id"], json!("a"));
    }
}
