//! `select(...)` and the per data type column selection behind it

use crate::builder::{rebase, through, PgQueryBuilder, BACKEND};
use crate::sql::{BinOp, FromItem, Join, JoinKind, Select, SelectItem, SqlExpr};
use strata_core::TableType;
use strata_query::{call, Expr, Item, Node, Operand, QueryEnv, QueryError, Result, Selected};
use strata_schema::dtype::{ArrayType, BackRefType, DataType, RefType};
use strata_schema::resolver::{resolve_in, resolve_path};
use strata_schema::{ForeignProperty, NestedProperty, PropId, PropertyRef, ReservedProperty};

/// `select()`, `select(*)`, `select(name, country.code, n=count())`
pub(crate) fn select(env: &mut PgQueryBuilder, expr: &Expr) -> Result<Operand<SqlExpr>> {
    let select_all = match expr.args.as_slice() {
        [] => expr.kwargs.is_empty(),
        [Node::Bind(name)] => name == "*",
        _ => false,
    };
    if select_all {
        env.select_all()?;
        return Ok(Operand::Empty);
    }

    env.selected.get_or_insert_with(Vec::new);
    for node in &expr.args {
        env.select_node(node.to_string(), node)?;
    }
    for (key, node) in &expr.kwargs {
        env.select_node(key.clone(), node)?;
    }
    Ok(Operand::Empty)
}

impl PgQueryBuilder {
    fn select_node(&mut self, key: String, node: &Node) -> Result<()> {
        match node {
            Node::Bind(_) | Node::GetAttr(..) => {
                let path = node
                    .path()
                    .ok_or_else(|| QueryError::invalid_value("select", node.to_string()))?;
                let manifest = self.manifest_arc();
                let pref = resolve_path(&manifest, self.model(), &path)?;
                let selected = self.select_prop(&pref)?;
                self.add_selected(key, selected);
            }
            Node::Expr(inner) => match call(self, inner)? {
                Operand::Native(expr) => {
                    let index = self.add_column(expr, Some(key.clone()));
                    self.add_selected(key, Selected::column(Item::Index(index), None));
                }
                Operand::Prop(pref) => {
                    let selected = self.select_prop(&pref)?;
                    self.add_selected(key, selected);
                }
                // the function registered its own output (`count()`)
                Operand::Empty => {}
                other => {
                    return Err(QueryError::invalid_value(
                        "select",
                        format!("cannot select {}", other.describe(self.manifest())),
                    ))
                }
            },
            Node::Value(value) => self.add_selected(key, Selected::constant(value.to_json())),
            Node::Negative(_) | Node::Positive(_) => {
                return Err(QueryError::invalid_value("select", format!("cannot select {}", node)))
            }
        }
        Ok(())
    }

    pub(crate) fn select_prop(&mut self, pref: &PropertyRef) -> Result<Selected> {
        let alias = self.alias_for(pref)?;
        match pref.local() {
            PropertyRef::Reserved(reserved) => self.select_reserved(&alias, reserved),
            PropertyRef::Property(prop) | PropertyRef::Nested(NestedProperty { prop, .. }) => {
                self.select_property(&alias, pref.chain(), *prop)
            }
            PropertyRef::Foreign { .. } => {
                Err(QueryError::invalid_value("select", "unresolved foreign property"))
            }
        }
    }

    fn select_reserved(&mut self, alias: &str, reserved: &ReservedProperty) -> Result<Selected> {
        if reserved.name == "_content" {
            return Ok(Selected::deferred(reserved.prop));
        }
        let column = format!("{}.{}", self.column_name(reserved.prop), reserved.name);
        let index = self.add_column(SqlExpr::column(alias, column), None);
        Ok(Selected::column(Item::Index(index), None))
    }

    fn select_property(
        &mut self,
        alias: &str,
        chain: Option<&ForeignProperty>,
        prop: PropId,
    ) -> Result<Selected> {
        let manifest = self.manifest_arc();
        let property = manifest.prop(prop);
        if property.list.is_some() {
            return self.select_listed(alias, prop);
        }

        match &property.dtype {
            DataType::Text(text) => {
                let (langs, collapse) = self.params.choose_langs(text);
                let mut items = Vec::with_capacity(langs.len());
                for (lang, lang_prop) in langs {
                    let expr = self.value_column(alias, lang_prop);
                    let label = manifest.prop(lang_prop).place.clone();
                    let index = self.add_column(expr, Some(label));
                    items.push((lang, Selected::column(Item::Index(index), Some(lang_prop))));
                }
                Ok(Selected::langs(prop, items, collapse))
            }
            DataType::Object(object) => {
                let mut children = Vec::with_capacity(object.properties.len());
                for (name, sub) in &object.properties {
                    children.push((name.clone(), self.select_property(alias, chain, *sub)?));
                }
                Ok(Selected::map(Some(prop), children))
            }
            DataType::Ref(r) | DataType::ExternalRef(r) => self.select_ref(alias, chain, prop, r),
            DataType::BackRef(b) | DataType::ArrayBackRef(b) => self.select_backref(alias, prop, b),
            DataType::Array(array) | DataType::PartialArray(array) if array.model.is_some() => {
                self.select_intermediate(alias, prop, array)
            }
            DataType::File(file) => {
                let mut names = vec!["_id", "_content_type", "_size"];
                if file.backend.is_none() || self.params.file_blocks {
                    names.extend(["_bsize", "_blocks"]);
                }
                let mut children = Vec::with_capacity(names.len() + 1);
                for name in names {
                    let column = format!("{}.{}", property.column(), name);
                    let index = self.add_column(SqlExpr::column(alias, column), None);
                    children.push((name.to_string(), Selected::column(Item::Index(index), None)));
                }
                children.push(("_content".to_string(), Selected::deferred(prop)));
                Ok(Selected::map(Some(prop), children))
            }
            DataType::Denorm(denorm) => {
                let unlinked = || QueryError::invalid_value("select", format!("{} is not linked", property.place));
                let rel = denorm.rel_prop.ok_or_else(unlinked)?;
                let parent = property.parent.ok_or_else(unlinked)?;
                let chain = through(chain, parent, rel)?;
                let joined = self.join_chain(&chain)?;
                self.select_property(&joined, Some(&chain), rel)
            }
            DataType::Inherit(_) => {
                let inner = resolve_in(&manifest, prop, &[])?;
                self.select_prop(&rebase(chain, inner))
            }
            DataType::Geometry(_) => {
                let column = self.value_column(alias, prop);
                let index = self.add_column(SqlExpr::func("ST_AsEWKT", vec![column]), Some(property.place.clone()));
                Ok(Selected::column(Item::Index(index), Some(prop)))
            }
            _ => {
                let index = self.add_column(self.value_column(alias, prop), None);
                Ok(Selected::column(Item::Index(index), Some(prop)))
            }
        }
    }

    /// Level 4 refs expose `_id` (or `_uri`), level 3 refs their key
    /// columns; declared sub-properties follow
    fn select_ref(
        &mut self,
        alias: &str,
        chain: Option<&ForeignProperty>,
        prop: PropId,
        r: &RefType,
    ) -> Result<Selected> {
        let manifest = self.manifest_arc();
        let column = manifest.prop(prop).column();
        let mut children: Vec<(String, Selected)> = Vec::new();

        if r.stores_id() {
            let index = self.add_column(SqlExpr::column(alias, format!("{}._id", column)), None);
            children.push(("_id".to_string(), Selected::column(Item::Index(index), None)));

            let uri = match manifest.target(prop) {
                Some(target) if self.params.prioritize_uri => manifest.uri_prop(target.id),
                _ => None,
            };
            if let Some(uri) = uri {
                let uri_chain = through(chain, prop, uri)?;
                let joined = self.join_chain(&uri_chain)?;
                let index = self.add_column(self.value_column(&joined, uri), None);
                children.push(("_uri".to_string(), Selected::column(Item::Index(index), Some(uri))));
            }
        } else {
            for key in &r.refprops {
                let key_prop = manifest.prop(*key);
                let expr = SqlExpr::column(alias, format!("{}.{}", column, key_prop.name));
                let index = self.add_column(expr, None);
                children.push((key_prop.name.clone(), Selected::column(Item::Index(index), Some(*key))));
            }
        }

        for (name, sub) in &r.properties {
            if children.iter().any(|(existing, _)| existing == name) {
                continue;
            }
            children.push((name.clone(), self.select_property(alias, chain, *sub)?));
        }
        Ok(Selected::map(Some(prop), children))
    }

    fn select_backref(&mut self, alias: &str, prop: PropId, backref: &BackRefType) -> Result<Selected> {
        let manifest = self.manifest_arc();
        let property = manifest.prop(prop);
        let refprop = backref.refprop.ok_or_else(|| {
            QueryError::invalid_value("select", format!("{} is not linked", property.place))
        })?;
        let target = manifest.owner(refprop);
        let mut fields: Vec<(String, String)> = target
            .pkeys
            .iter()
            .map(|key| {
                let key = manifest.prop(*key);
                (key.name.clone(), key.column())
            })
            .collect();
        if fields.is_empty() {
            fields.push(("_id".to_string(), "_id".to_string()));
        }
        let many = matches!(property.dtype, DataType::ArrayBackRef(_));
        self.aggregate_join(alias, prop, refprop, fields, many)
    }

    /// Array through an intermediate model: items are collected from the
    /// intermediate table by its ref back to us
    fn select_intermediate(&mut self, alias: &str, prop: PropId, array: &ArrayType) -> Result<Selected> {
        let manifest = self.manifest_arc();
        let place = &manifest.prop(prop).place;
        let (left, right) = array
            .left_prop
            .zip(array.right_prop)
            .ok_or_else(|| QueryError::invalid_value("select", format!("{} is not linked", place)))?;
        let right_prop = manifest.prop(right);
        let r = right_prop
            .dtype
            .as_ref_type()
            .ok_or_else(|| QueryError::invalid_value("select", format!("{} is not a ref", right_prop.place)))?;
        let fields = if r.stores_id() {
            vec![("_id".to_string(), format!("{}._id", right_prop.column()))]
        } else {
            r.refprops
                .iter()
                .map(|key| {
                    let name = manifest.prop(*key).name.clone();
                    let column = format!("{}.{}", right_prop.column(), name);
                    (name, column)
                })
                .collect()
        };
        self.aggregate_join(alias, prop, left, fields, true)
    }

    /// Outer join a grouped sub-query over the model holding `forward`, a
    /// ref pointing back at the table behind `alias`. Each group becomes a
    /// JSON object (or an array of them when `many`) built from `fields`.
    fn aggregate_join(
        &mut self,
        alias: &str,
        prop: PropId,
        forward: PropId,
        fields: Vec<(String, String)>,
        many: bool,
    ) -> Result<Selected> {
        let manifest = self.manifest_arc();
        let forward_prop = manifest.prop(forward);
        if forward_prop.list.is_some() {
            return Err(QueryError::not_implemented(
                BACKEND,
                format!("back reference through {} inside a list", forward_prop.place),
            ));
        }
        let r = forward_prop.dtype.as_ref_type().ok_or_else(|| {
            QueryError::invalid_value("select", format!("{} is not a ref", forward_prop.place))
        })?;
        let table = self.namer.table(&manifest.owner(forward).name, &TableType::Main);
        let sub_alias = self.next_alias(&manifest.prop(prop).name);

        // (column in the sub-query, column of the owner it must equal)
        let keys: Vec<(String, String)> = if r.stores_id() {
            vec![(format!("{}._id", forward_prop.column()), "_id".to_string())]
        } else {
            r.refprops
                .iter()
                .map(|key| {
                    let key = manifest.prop(*key);
                    (format!("{}.{}", forward_prop.column(), key.name), key.column())
                })
                .collect()
        };

        let mut object_args = Vec::with_capacity(fields.len() * 2);
        for (name, column) in fields {
            object_args.push(SqlExpr::Literal(name));
            object_args.push(SqlExpr::column(table.as_str(), column));
        }
        let aggregated = SqlExpr::func("jsonb_agg", vec![SqlExpr::func("jsonb_build_object", object_args)]);
        let value = if many {
            aggregated
        } else {
            SqlExpr::binary(aggregated, BinOp::Arrow, SqlExpr::Number(0))
        };

        let mut columns = Vec::with_capacity(keys.len() + 1);
        let mut group_by = Vec::with_capacity(keys.len());
        let mut filter = Vec::with_capacity(keys.len());
        let mut on = Vec::with_capacity(keys.len());
        for (i, (column, owner_column)) in keys.into_iter().enumerate() {
            let rid = format!("_rid{}", i);
            let expr = SqlExpr::column(table.as_str(), column);
            columns.push(SelectItem {
                expr: expr.clone(),
                alias: Some(rid.clone()),
            });
            group_by.push(expr.clone());
            filter.push(expr.is_not_null());
            on.push(SqlExpr::eq(
                SqlExpr::column(sub_alias.as_str(), rid),
                SqlExpr::column(alias, owner_column),
            ));
        }
        columns.push(SelectItem {
            expr: value,
            alias: Some("value".to_string()),
        });

        let query = Select {
            columns,
            from: Some(FromItem::table(table.as_str())),
            filter: SqlExpr::all(filter),
            group_by,
            ..Default::default()
        };
        self.add_join(Join {
            kind: JoinKind::LeftOuter,
            item: FromItem::Subquery {
                query: Box::new(query),
                alias: sub_alias.clone(),
            },
            on: SqlExpr::all(on).unwrap_or(SqlExpr::Null),
        });

        let index = self.add_column(SqlExpr::column(sub_alias.as_str(), "value"), None);
        Ok(Selected::column(Item::Index(index), None))
    }

    /// Values inside arrays come from the JSONB copy of the outermost
    /// array on the main table
    fn select_listed(&mut self, alias: &str, prop: PropId) -> Result<Selected> {
        let manifest = self.manifest_arc();
        let property = manifest.prop(prop);
        let root = manifest
            .root_list(prop)
            .ok_or_else(|| QueryError::invalid_value("select", format!("{} is not in a list", property.place)))?;
        let root_prop = manifest.prop(root);
        let relative = property
            .place
            .strip_prefix(&format!("{}[]", root_prop.place))
            .unwrap_or_default();
        let path = format!("$[*]{}", relative.replace("[]", "[*]").replace('@', "."));
        let expr = SqlExpr::func(
            "jsonb_path_query_array",
            vec![SqlExpr::column(alias, root_prop.column()), SqlExpr::Literal(path)],
        );
        let index = self.add_column(expr, Some(property.place.clone()));
        Ok(Selected::column(Item::Index(index), None))
    }
}
