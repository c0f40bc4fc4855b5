//! Property resolver
//!
//! Walks a dotted path (`city.country.name`, `notes.note`, `title@lt`)
//! over the logical schema. The result is either a plain property, a
//! property nested in an object or array, a reserved attribute (`_id` of a
//! ref, `_size` of a file, ...) or a [`ForeignProperty`] chain describing
//! the joins needed to reach a property of another model.

use crate::dtype::{DataType, TypeKind};
use crate::error::{Result, SchemaError};
use crate::manifest::{Manifest, ModelId, PropId, FILE_ATTRIBUTES};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// One join: `left` is the ref-like property of the source model, `right`
/// the property of the target model reached through it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Hop {
    pub left: PropId,
    pub right: PropId,
}

struct Link {
    parent: Option<ForeignProperty>,
    hop: Hop,
    depth: usize,
}

/// Append-only chain of hops. Pushing returns a new chain sharing its
/// prefix, so one chain can be used for select and sort at once.
#[derive(Clone)]
pub struct ForeignProperty {
    link: Arc<Link>,
}

impl ForeignProperty {
    pub fn new(left: PropId, right: PropId) -> Self {
        Self {
            link: Arc::new(Link {
                parent: None,
                hop: Hop { left, right },
                depth: 1,
            }),
        }
    }

    /// Step from the current right property onto `right`
    pub fn push(&self, right: PropId) -> Self {
        Self {
            link: Arc::new(Link {
                parent: Some(self.clone()),
                hop: Hop {
                    left: self.right(),
                    right,
                },
                depth: self.link.depth + 1,
            }),
        }
    }

    /// Append every hop of `other`, which must start at our right property
    pub fn extend(&self, other: &ForeignProperty) -> Self {
        other
            .hops()
            .into_iter()
            .fold(self.clone(), |chain, hop| chain.push(hop.right))
    }

    pub fn left(&self) -> PropId {
        self.link.hop.left
    }

    pub fn right(&self) -> PropId {
        self.link.hop.right
    }

    pub fn parent(&self) -> Option<&ForeignProperty> {
        self.link.parent.as_ref()
    }

    pub fn len(&self) -> usize {
        self.link.depth
    }

    pub fn is_empty(&self) -> bool {
        false
    }

    /// Hops from the root model outwards
    pub fn hops(&self) -> Vec<Hop> {
        let mut hops = Vec::with_capacity(self.len());
        let mut current = Some(self);
        while let Some(chain) = current {
            hops.push(chain.link.hop);
            current = chain.parent();
        }
        hops.reverse();
        hops
    }

    /// Ref-like properties joined, one per hop; two chains sharing this
    /// prefix share their joins
    pub fn join_path(&self) -> Vec<PropId> {
        self.hops().iter().map(|hop| hop.left).collect()
    }

    pub fn display(&self, manifest: &Manifest) -> String {
        let mut parts: Vec<&str> = self
            .hops()
            .iter()
            .map(|hop| manifest.prop(hop.left).place.as_str())
            .collect();
        parts.push(&manifest.prop(self.right()).place);
        parts.join("->")
    }
}

impl PartialEq for ForeignProperty {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.link, &other.link) || self.hops() == other.hops()
    }
}

impl Eq for ForeignProperty {}

impl Hash for ForeignProperty {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hops().hash(state);
    }
}

impl fmt::Debug for ForeignProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.hops()).finish()
    }
}

/// Property inside an object or array
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NestedProperty {
    pub container: PropId,
    pub prop: PropId,
}

/// Reserved attribute of a property (`country._id`, `file._size`) or, for
/// level 3 refs, an inline key column (`country.id`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReservedProperty {
    pub prop: PropId,
    pub name: String,
    pub kind: TypeKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertyRef {
    Property(PropId),
    Nested(NestedProperty),
    Reserved(ReservedProperty),
    /// Property reached through joins; `leaf` is resolved in the model the
    /// last hop lands in
    Foreign {
        chain: ForeignProperty,
        leaf: Box<PropertyRef>,
    },
}

impl PropertyRef {
    /// Property the reference finally points at
    pub fn prop(&self) -> PropId {
        match self {
            PropertyRef::Property(prop) => *prop,
            PropertyRef::Nested(nested) => nested.prop,
            PropertyRef::Reserved(reserved) => reserved.prop,
            PropertyRef::Foreign { leaf, .. } => leaf.prop(),
        }
    }

    /// Type the value of the reference has
    pub fn kind(&self, manifest: &Manifest) -> TypeKind {
        match self {
            PropertyRef::Reserved(reserved) => reserved.kind,
            PropertyRef::Foreign { leaf, .. } => leaf.kind(manifest),
            other => manifest.prop(other.prop()).kind(),
        }
    }

    pub fn chain(&self) -> Option<&ForeignProperty> {
        match self {
            PropertyRef::Foreign { chain, .. } => Some(chain),
            _ => None,
        }
    }

    /// Reference without its join chain
    pub fn local(&self) -> &PropertyRef {
        match self {
            PropertyRef::Foreign { leaf, .. } => leaf.local(),
            other => other,
        }
    }

    fn through(chain: ForeignProperty, inner: PropertyRef) -> PropertyRef {
        match inner {
            PropertyRef::Foreign { chain: rest, leaf } => PropertyRef::Foreign {
                chain: chain.extend(&rest),
                leaf,
            },
            leaf => PropertyRef::Foreign {
                chain,
                leaf: Box::new(leaf),
            },
        }
    }
}

/// Split a dotted path, keeping `@lang` suffixes attached to their segment
pub fn split_path(path: &str) -> Vec<String> {
    path.split('.')
        .map(|segment| segment.trim_end_matches("[]").to_string())
        .filter(|segment| !segment.is_empty())
        .collect()
}

pub fn resolve(manifest: &Manifest, model: ModelId, path: &str) -> Result<PropertyRef> {
    let segments = split_path(path);
    resolve_path(manifest, model, &segments)
}

/// Resolve path segments starting at a model
pub fn resolve_path(manifest: &Manifest, model: ModelId, path: &[String]) -> Result<PropertyRef> {
    let m = manifest.model(model);
    let (first, rest) = path
        .split_first()
        .ok_or_else(|| SchemaError::field_not_found(&m.name, ""))?;

    if let Some((name, lang)) = first.split_once('@') {
        let prop = m
            .property(name)
            .ok_or_else(|| SchemaError::field_not_found(&m.name, first))?;
        let mut tail = Vec::with_capacity(rest.len() + 1);
        tail.push(lang.to_string());
        tail.extend_from_slice(rest);
        return resolve_in(manifest, prop, &tail);
    }

    if let Some(reserved) = m.reserved_prop(first) {
        if rest.is_empty() {
            return Ok(PropertyRef::Property(reserved));
        }
        return Err(SchemaError::field_not_found(&m.name, path.join(".")));
    }

    let prop = m
        .property(first)
        .or_else(|| m.flatprop(first))
        .ok_or_else(|| SchemaError::field_not_found(&m.name, first))?;
    resolve_in(manifest, prop, rest)
}

/// Resolve the remaining segments inside a property
pub fn resolve_in(manifest: &Manifest, prop: PropId, rest: &[String]) -> Result<PropertyRef> {
    let property = manifest.prop(prop);
    let not_found = |name: &str| {
        SchemaError::field_not_found(
            &manifest.owner(prop).name,
            format!("{}.{}", property.place, name),
        )
    };

    // inherited properties always live in the base table
    if let DataType::Inherit(inherit) = &property.dtype {
        let base_prop = inherit
            .base_prop
            .ok_or_else(|| not_found(&property.name))?;
        let chain = ForeignProperty::new(prop, base_prop);
        let inner = resolve_in(manifest, base_prop, rest)?;
        return Ok(PropertyRef::through(chain, inner));
    }

    let Some((name, tail)) = rest.split_first() else {
        return Ok(PropertyRef::Property(prop));
    };

    match &property.dtype {
        DataType::Ref(r) | DataType::ExternalRef(r) => {
            if let Some(sub) = r.sub_property(name) {
                return resolve_in(manifest, sub, tail);
            }
            if name == "_id" && r.stores_id() && tail.is_empty() {
                return Ok(PropertyRef::Reserved(ReservedProperty {
                    prop,
                    name: "_id".to_string(),
                    kind: TypeKind::PrimaryKey,
                }));
            }
            if !r.stores_id() && tail.is_empty() {
                if let Some(key) = r.refprops.iter().find(|key| manifest.prop(**key).name == *name) {
                    return Ok(PropertyRef::Reserved(ReservedProperty {
                        prop,
                        name: name.clone(),
                        kind: manifest.prop(*key).kind(),
                    }));
                }
            }
            let target = manifest
                .target(prop)
                .ok_or_else(|| not_found(name))?;
            let right = target
                .property(name)
                .or_else(|| target.reserved_prop(name))
                .ok_or_else(|| SchemaError::field_not_found(&target.name, name))?;
            let chain = ForeignProperty::new(prop, right);
            let inner = resolve_in(manifest, right, tail)?;
            Ok(PropertyRef::through(chain, inner))
        }
        DataType::BackRef(_) | DataType::ArrayBackRef(_) => {
            let target = manifest
                .target(prop)
                .ok_or_else(|| not_found(name))?;
            let right = target
                .property(name)
                .or_else(|| target.reserved_prop(name))
                .ok_or_else(|| SchemaError::field_not_found(&target.name, name))?;
            let chain = ForeignProperty::new(prop, right);
            let inner = resolve_in(manifest, right, tail)?;
            Ok(PropertyRef::through(chain, inner))
        }
        DataType::Object(object) => {
            let sub = object
                .properties
                .iter()
                .find(|(sub, _)| sub == name)
                .map(|(_, id)| *id)
                .ok_or_else(|| not_found(name))?;
            Ok(nest(prop, resolve_in(manifest, sub, tail)?))
        }
        DataType::Array(array) | DataType::PartialArray(array) => {
            let items = array.items.ok_or_else(|| not_found(name))?;
            Ok(nest(prop, resolve_in(manifest, items, rest)?))
        }
        DataType::Text(text) => {
            let lang = text.lang(name).ok_or_else(|| SchemaError::LangNotDeclared {
                property: property.place.clone(),
                lang: name.clone(),
                declared: text.lang_names().iter().map(|l| l.to_string()).collect(),
            })?;
            resolve_in(manifest, lang, tail)
        }
        DataType::File(_) => {
            if tail.is_empty() && FILE_ATTRIBUTES.contains(&name.as_str()) {
                let kind = match name.as_str() {
                    "_size" | "_bsize" => TypeKind::Integer,
                    "_content" => TypeKind::Binary,
                    "_blocks" => TypeKind::Json,
                    _ => TypeKind::String,
                };
                Ok(PropertyRef::Reserved(ReservedProperty {
                    prop,
                    name: name.clone(),
                    kind,
                }))
            } else {
                Err(not_found(name))
            }
        }
        _ => Err(not_found(name)),
    }
}

fn nest(container: PropId, inner: PropertyRef) -> PropertyRef {
    match inner {
        PropertyRef::Property(prop) => PropertyRef::Nested(NestedProperty { container, prop }),
        // innermost container wins
        other => other,
    }
}
