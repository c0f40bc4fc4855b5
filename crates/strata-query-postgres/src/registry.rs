//! Handlers the relational builder understands

use crate::builder::{PgQueryBuilder, BACKEND};
use crate::sql::SqlExpr;
use crate::{compare, funcs, select};
use once_cell::sync::Lazy;
use strata_query::{register_common, Dispatcher, Operand, TypeTag};
use strata_schema::dtype::TypeKind;

const ORDERING: [&str; 6] = ["eq", "ne", "lt", "le", "gt", "ge"];
const ALL_COMPARISONS: [&str; 8] = ["eq", "ne", "lt", "le", "gt", "ge", "startswith", "contains"];

pub(crate) static DISPATCHER: Lazy<Dispatcher<PgQueryBuilder, Operand<SqlExpr>>> = Lazy::new(|| {
    let mut d = Dispatcher::new(BACKEND);
    register_common(&mut d);

    d.register_raw("select", select::select)
        .register_variadic("and", &[], TypeTag::Any, compare::and)
        .register_variadic("or", &[], TypeTag::Any, compare::or);

    for op in ORDERING {
        d.register(op, &[TypeTag::Prop, TypeTag::Value], compare::compare_value)
            .register(op, &[TypeTag::Type(TypeKind::PrimaryKey), TypeTag::Str], compare::compare_pk);
        for kind in [TypeKind::Date, TypeKind::Time, TypeKind::DateTime] {
            d.register(op, &[TypeTag::Type(kind), TypeTag::Str], compare::compare_temporal);
        }
    }
    for op in ALL_COMPARISONS {
        d.register(op, &[TypeTag::Prop, TypeTag::Null], compare::compare_null)
            .register(op, &[TypeTag::Lower, TypeTag::Value], compare::compare_func)
            .register(op, &[TypeTag::Upper, TypeTag::Value], compare::compare_func);
    }
    for op in ["startswith", "contains"] {
        d.register(op, &[TypeTag::Type(TypeKind::String), TypeTag::Str], compare::compare_like)
            .register(op, &[TypeTag::Type(TypeKind::Text), TypeTag::Str], compare::compare_like);
    }
    for op in ["eq", "ne"] {
        d.register(op, &[TypeTag::Type(TypeKind::Geometry), TypeTag::Str], compare::compare_geometry);
    }

    d.register("asc", &[TypeTag::Prop], funcs::asc)
        .register("desc", &[TypeTag::Prop], funcs::desc)
        .register_variadic("sort", &[], TypeTag::Any, funcs::sort)
        .register_variadic("page", &[], TypeTag::Any, funcs::page)
        .register("limit", &[TypeTag::Value], funcs::limit)
        .register("offset", &[TypeTag::Value], funcs::offset)
        .register("count", &[], funcs::count)
        .register("distinct", &[], funcs::distinct)
        .register_variadic("checksum", &[], TypeTag::Prop, funcs::checksum)
        .register("flip", &[TypeTag::Type(TypeKind::Geometry)], funcs::flip)
        .register("point", &[TypeTag::Number, TypeTag::Number], funcs::point)
        .register("file", &[TypeTag::Type(TypeKind::File)], funcs::file);
    d
});
