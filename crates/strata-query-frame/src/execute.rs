//! In-memory execution of a frame plan over JSON records

use crate::builder::{FramePlan, FrameQueryBuilder};
use crate::mask::sort_order;
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::sync::Arc;
use strata_query::expr::{call, lit, path};
use strata_query::shaper::shape;
use strata_query::{BuiltQuery, QueryError, Result};
use strata_schema::{Manifest, ModelId};
use tracing::debug;

pub type Record = Map<String, Value>;

/// Run a built query: mask, sort, shape, `drop_duplicates`,
/// `loc[offset:]`, `head`
pub fn execute(manifest: &Manifest, built: &BuiltQuery<FramePlan>, records: &[Record]) -> Vec<Record> {
    let plan = &built.plan;
    let mut matched: Vec<&Record> = records
        .iter()
        .filter(|record| plan.mask.as_ref().map_or(true, |mask| mask.test(record)))
        .collect();
    debug!("{} of {} {} records matched", matched.len(), records.len(), plan.source);

    if plan.count {
        let mut row = Map::new();
        row.insert("count()".to_string(), Value::from(matched.len()));
        return vec![row];
    }

    if !plan.sort.is_empty() {
        matched.sort_by(|a, b| {
            plan.sort
                .iter()
                .map(|(column, desc)| sort_order(&column.read(a), &column.read(b), *desc))
                .find(|ordering| *ordering != Ordering::Equal)
                .unwrap_or(Ordering::Equal)
        });
    }

    let mut rows: Vec<Record> = matched
        .into_iter()
        .map(|record| shape(manifest, &built.selected, record))
        .collect();
    if plan.distinct {
        let mut unique: Vec<Record> = Vec::with_capacity(rows.len());
        for row in rows {
            if !unique.contains(&row) {
                unique.push(row);
            }
        }
        rows = unique;
    }

    let offset = plan.offset.unwrap_or(0) as usize;
    let head = plan.head.map_or(usize::MAX, |n| n as usize);
    rows.into_iter().skip(offset).take(head).collect()
}

/// Single object by `_id`
pub fn get_one(manifest: Arc<Manifest>, model: ModelId, records: &[Record], id: &str) -> Result<Record> {
    let expr = call("eq", vec![path("_id"), lit(id)]);
    let built = FrameQueryBuilder::new(Arc::clone(&manifest), model).compile(Some(&expr))?;
    execute(&manifest, &built, records)
        .into_iter()
        .next()
        .ok_or_else(|| QueryError::ItemDoesNotExist {
            model: manifest.model(model).name.clone(),
            id: id.to_string(),
        })
}
