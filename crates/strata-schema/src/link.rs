//! Link pass
//!
//! Resolves model names to models, fills refprops, denorm targets, back
//! reference forward refs and inherit targets, and rejects inconsistent
//! manifests. Runs once, right after loading.

use crate::dtype::{DataType, TypeKind};
use crate::error::{Result, SchemaError};
use crate::manifest::{Manifest, ModelId, PropId};
use tracing::debug;

pub fn link(manifest: &mut Manifest) -> Result<()> {
    link_bases(manifest)?;
    for index in 0..manifest.prop_count() {
        let id = PropId(index);
        if let Some(dtype) = link_property(manifest, id)? {
            manifest.prop_mut(id).dtype = dtype;
        }
    }
    // denorms and inherits need every ref linked first
    for index in 0..manifest.prop_count() {
        let id = PropId(index);
        if let Some(dtype) = link_dependent(manifest, id)? {
            manifest.prop_mut(id).dtype = dtype;
        }
    }
    Ok(())
}

fn link_bases(manifest: &mut Manifest) -> Result<()> {
    let ids: Vec<ModelId> = manifest.models().map(|m| m.id).collect();
    for id in ids {
        let Some(base) = manifest.model(id).base.clone() else {
            continue;
        };
        let base_id = manifest
            .model_id(&base.model)
            .ok_or_else(|| SchemaError::ModelReferenceNotFound {
                model: manifest.model(id).name.clone(),
                property: "_base".to_string(),
                target: base.model.clone(),
            })?;
        for key in &base.pkeys {
            if manifest.model(base_id).flatprop(key).is_none() {
                return Err(SchemaError::field_not_found(&base.model, key));
            }
        }
        if let Some(base) = manifest.model_mut(id).base.as_mut() {
            base.model_id = Some(base_id);
        }
    }
    Ok(())
}

fn target_model(manifest: &Manifest, prop: PropId, target: &str) -> Result<ModelId> {
    manifest
        .model_id(target)
        .ok_or_else(|| SchemaError::ModelReferenceNotFound {
            model: manifest.owner(prop).name.clone(),
            property: manifest.prop(prop).place.clone(),
            target: target.to_string(),
        })
}

fn link_property(manifest: &Manifest, id: PropId) -> Result<Option<DataType>> {
    let prop = manifest.prop(id);
    let owner = manifest.owner(id);
    match &prop.dtype {
        DataType::Ref(r) | DataType::ExternalRef(r) => {
            let target_id = target_model(manifest, id, &r.model)?;
            let target = manifest.model(target_id);
            let mut linked = r.clone();

            linked.refprops = if r.given_refprops.is_empty() {
                if target.pkeys.is_empty() {
                    target.id_prop().into_iter().collect()
                } else {
                    target.pkeys.clone()
                }
            } else {
                let mut refprops = Vec::with_capacity(r.given_refprops.len());
                for name in &r.given_refprops {
                    let refprop = target
                        .flatprop(name)
                        .ok_or_else(|| SchemaError::field_not_found(&target.name, name))?;
                    refprops.push(refprop);
                }
                refprops
            };

            // key sub-properties must agree with the target refprop types
            for (sub, sub_id) in &r.properties {
                let sub_kind = manifest.prop(*sub_id).kind();
                if sub_kind == TypeKind::Denorm {
                    continue;
                }
                if let Some(refprop) = linked
                    .refprops
                    .iter()
                    .find(|p| manifest.prop(**p).name == *sub)
                {
                    let expected = manifest.prop(*refprop).kind();
                    if expected != sub_kind {
                        return Err(SchemaError::RefPropTypeMissmatch {
                            model: owner.name.clone(),
                            property: prop.place.clone(),
                            refprop: sub.clone(),
                            expected,
                            found: sub_kind,
                        });
                    }
                }
            }

            linked.inherited = owner
                .base
                .as_ref()
                .and_then(|base| base.model_id)
                .map(|base| manifest.model(base).flatprop(&prop.place).is_some())
                .unwrap_or(false);

            Ok(Some(match prop.dtype {
                DataType::Ref(_) => DataType::Ref(linked),
                _ => DataType::ExternalRef(linked),
            }))
        }
        DataType::BackRef(b) | DataType::ArrayBackRef(b) => {
            let target_id = target_model(manifest, id, &b.model)?;
            let target = manifest.model(target_id);
            let points_back = |candidate: PropId| {
                manifest
                    .prop(candidate)
                    .dtype
                    .as_ref_type()
                    .map(|r| r.model == owner.name)
                    .unwrap_or(false)
            };

            let refprop = match &b.given_refprop {
                Some(name) => match target.flatprop(name) {
                    Some(candidate) if points_back(candidate) => candidate,
                    _ => {
                        return Err(SchemaError::NoBackRefReferencesFound {
                            model: owner.name.clone(),
                            property: prop.place.clone(),
                            target: target.name.clone(),
                        })
                    }
                },
                None => {
                    let candidates: Vec<PropId> = target
                        .flatprops
                        .iter()
                        .copied()
                        .filter(|candidate| points_back(*candidate))
                        .collect();
                    match candidates.as_slice() {
                        [] => {
                            return Err(SchemaError::NoBackRefReferencesFound {
                                model: owner.name.clone(),
                                property: prop.place.clone(),
                                target: target.name.clone(),
                            })
                        }
                        [single] => *single,
                        many => {
                            return Err(SchemaError::MultipleBackRefReferencesFound {
                                model: owner.name.clone(),
                                property: prop.place.clone(),
                                target: target.name.clone(),
                                candidates: many
                                    .iter()
                                    .map(|c| manifest.prop(*c).place.clone())
                                    .collect(),
                            })
                        }
                    }
                }
            };

            if matches!(prop.dtype, DataType::BackRef(_)) && manifest.prop(refprop).list.is_some() {
                return Err(SchemaError::OneToManyBackRefNotSupported {
                    model: owner.name.clone(),
                    property: prop.place.clone(),
                    refprop: manifest.prop(refprop).place.clone(),
                });
            }

            let mut linked = b.clone();
            linked.refprop = Some(refprop);
            Ok(Some(match prop.dtype {
                DataType::BackRef(_) => DataType::BackRef(linked),
                _ => DataType::ArrayBackRef(linked),
            }))
        }
        DataType::Array(a) | DataType::PartialArray(a) => {
            let Some(model) = &a.model else {
                return Ok(None);
            };
            let intermediate_id = target_model(manifest, id, model)?;
            let intermediate = manifest.model(intermediate_id);
            let invalid = |details: String| SchemaError::InvalidIntermediateModel {
                model: owner.name.clone(),
                property: prop.place.clone(),
                details,
            };

            let (left_name, right_name) = a.given_refs.clone().ok_or_else(|| {
                invalid(format!("{} needs left and right refs", intermediate.name))
            })?;
            let left = intermediate
                .flatprop(&left_name)
                .ok_or_else(|| invalid(format!("{} has no {:?}", intermediate.name, left_name)))?;
            let right = intermediate
                .flatprop(&right_name)
                .ok_or_else(|| invalid(format!("{} has no {:?}", intermediate.name, right_name)))?;

            let left_target = manifest.prop(left).dtype.as_ref_type().map(|r| r.model.clone());
            if left_target.as_deref() != Some(owner.name.as_str()) {
                return Err(invalid(format!(
                    "{:?} must reference {}",
                    left_name, owner.name
                )));
            }
            let item_model = a
                .items
                .and_then(|items| manifest.prop(items).dtype.as_ref_type().map(|r| r.model.clone()));
            let right_target = manifest.prop(right).dtype.as_ref_type().map(|r| r.model.clone());
            if right_target.is_none() || right_target != item_model {
                return Err(invalid(format!(
                    "{:?} must reference the item model {}",
                    right_name,
                    item_model.unwrap_or_else(|| "(items are not a ref)".to_string())
                )));
            }

            let mut linked = a.clone();
            linked.left_prop = Some(left);
            linked.right_prop = Some(right);
            Ok(Some(match prop.dtype {
                DataType::Array(_) => DataType::Array(linked),
                _ => DataType::PartialArray(linked),
            }))
        }
        _ => Ok(None),
    }
}

fn link_dependent(manifest: &Manifest, id: PropId) -> Result<Option<DataType>> {
    let prop = manifest.prop(id);
    let owner = manifest.owner(id);
    match &prop.dtype {
        DataType::Denorm(denorm) => {
            let parent = prop.parent.map(|parent| manifest.prop(parent));
            let invalid = |reason: &str| SchemaError::InvalidDenormProperty {
                model: owner.name.clone(),
                property: prop.place.clone(),
                reason: reason.to_string(),
            };
            let Some(ref_type) = parent.and_then(|p| p.dtype.as_ref_type()) else {
                return Err(invalid("parent is not a reference"));
            };
            let key = ref_type
                .refprops
                .iter()
                .find(|refprop| manifest.prop(**refprop).name == prop.name);
            if let Some(key) = key {
                if denorm.explicit {
                    return Err(invalid("property is one of the reference keys"));
                }
                // untyped key sub-property takes the type of the target key
                return Ok(Some(manifest.prop(*key).dtype.clone()));
            }
            let target = manifest
                .model_by_name(&ref_type.model)
                .ok_or_else(|| invalid("reference is not linked"))?;
            let rel_prop = target
                .flatprop(&prop.name)
                .ok_or_else(|| SchemaError::field_not_found(&target.name, &prop.name))?;
            debug!(
                "Linked denorm {}.{} to {}.{}",
                owner.name, prop.place, target.name, prop.name
            );
            Ok(Some(DataType::Denorm(crate::dtype::DenormType {
                rel_prop: Some(rel_prop),
                explicit: denorm.explicit,
            })))
        }
        DataType::Inherit(_) => {
            let base = owner
                .base
                .as_ref()
                .and_then(|base| base.model_id)
                .ok_or_else(|| SchemaError::ModelReferenceNotFound {
                    model: owner.name.clone(),
                    property: prop.place.clone(),
                    target: "_base".to_string(),
                })?;
            let base_model = manifest.model(base);
            let base_prop = base_model
                .flatprop(&prop.place)
                .ok_or_else(|| SchemaError::field_not_found(&base_model.name, &prop.place))?;
            Ok(Some(DataType::Inherit(crate::dtype::InheritType {
                base_prop: Some(base_prop),
            })))
        }
        _ => Ok(None),
    }
}
