//! Selected tree
//!
//! Describes how a response row is put together from backend columns.
//! Builders emit it alongside the plan, the row shaper consumes it.

use crate::params::QueryParams;
use strata_schema::dtype::TypeKind;
use strata_schema::{Manifest, ModelId, PropId};

/// Where a value sits in a backend row
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    /// Column position in a relational result
    Index(usize),
    /// Dotted key in a document or record
    Key(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Prep {
    None,
    /// Object built from named children
    Map(Vec<(String, Selected)>),
    /// Text languages; `collapse` returns the first non-null language
    /// instead of the whole map
    Langs {
        items: Vec<(String, Selected)>,
        collapse: bool,
    },
    /// Fixed value (`_type`)
    Const(serde_json::Value),
    /// Filled in by the caller after shaping (`_content` of a file)
    Deferred,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selected {
    pub item: Option<Item>,
    pub prop: Option<PropId>,
    pub prep: Prep,
}

impl Selected {
    pub fn column(item: Item, prop: Option<PropId>) -> Self {
        Self {
            item: Some(item),
            prop,
            prep: Prep::None,
        }
    }

    pub fn map(prop: Option<PropId>, children: Vec<(String, Selected)>) -> Self {
        Self {
            item: None,
            prop,
            prep: Prep::Map(children),
        }
    }

    pub fn langs(prop: PropId, items: Vec<(String, Selected)>, collapse: bool) -> Self {
        Self {
            item: None,
            prop: Some(prop),
            prep: Prep::Langs { items, collapse },
        }
    }

    pub fn constant(value: serde_json::Value) -> Self {
        Self {
            item: None,
            prop: None,
            prep: Prep::Const(value),
        }
    }

    pub fn deferred(prop: PropId) -> Self {
        Self {
            item: None,
            prop: Some(prop),
            prep: Prep::Deferred,
        }
    }

    /// Row positions used by this node and its children
    pub fn items(&self) -> Vec<&Item> {
        let mut items: Vec<&Item> = self.item.iter().collect();
        match &self.prep {
            Prep::Map(children) | Prep::Langs { items: children, .. } => {
                for (_, child) in children {
                    items.extend(child.items());
                }
            }
            _ => {}
        }
        items
    }
}

/// Properties `select()` without arguments returns: reserved `_type`,
/// `_id`, `_revision` first, then every visible top level property.
/// Back references and intermediate arrays only when expanded.
pub fn default_selection(manifest: &Manifest, model: ModelId, params: &QueryParams) -> Vec<PropId> {
    let m = manifest.model(model);
    let mut props: Vec<PropId> = ["_id", "_revision"]
        .iter()
        .filter_map(|name| m.reserved_prop(name))
        .collect();
    for prop in manifest.top_props(model) {
        if prop.access < params.access {
            continue;
        }
        let expandable = matches!(prop.kind(), TypeKind::BackRef | TypeKind::ArrayBackRef)
            || prop.dtype.as_array().map_or(false, |a| a.model.is_some());
        if expandable && !params.is_expanded(&prop.place) {
            continue;
        }
        props.push(prop.id);
    }
    props
}
