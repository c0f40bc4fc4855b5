use crate::builder::{MongoQueryBuilder, BACKEND};
use crate::{filter, select};
use bson::Document;
use once_cell::sync::Lazy;
use strata_query::{register_common, Dispatcher, Operand, TypeTag};
use strata_schema::dtype::TypeKind;

const ORDERING: [&str; 6] = ["eq", "ne", "lt", "le", "gt", "ge"];

pub(crate) static DISPATCHER: Lazy<Dispatcher<MongoQueryBuilder, Operand<Document>>> = Lazy::new(|| {
    let mut d = Dispatcher::new(BACKEND);
    register_common(&mut d);

    d.register_raw("select", select::select)
        .register_variadic("and", &[], TypeTag::Any, filter::and)
        .register_variadic("or", &[], TypeTag::Any, filter::or);

    for op in ORDERING {
        d.register(op, &[TypeTag::Prop, TypeTag::Value], filter::compare_value)
            .register(op, &[TypeTag::Prop, TypeTag::Null], filter::compare_null);
    }
    for op in ["eq", "ne", "startswith", "contains"] {
        d.register(op, &[TypeTag::Lower, TypeTag::Str], filter::compare_func)
            .register(op, &[TypeTag::Upper, TypeTag::Str], filter::compare_func);
    }
    for op in ["startswith", "contains"] {
        d.register(op, &[TypeTag::Prop, TypeTag::Null], filter::compare_null)
            .register(op, &[TypeTag::Type(TypeKind::String), TypeTag::Str], filter::compare_like)
            .register(op, &[TypeTag::Type(TypeKind::Text), TypeTag::Str], filter::compare_like);
    }

    d.register("asc", &[TypeTag::Prop], filter::asc)
        .register("desc", &[TypeTag::Prop], filter::desc)
        .register_variadic("sort", &[], TypeTag::Any, filter::sort)
        .register_variadic("page", &[], TypeTag::Any, filter::page)
        .register("limit", &[TypeTag::Value], filter::limit)
        .register("offset", &[TypeTag::Value], filter::offset)
        .register("count", &[], select::count)
        .register("distinct", &[], select::unsupported)
        .register_variadic("checksum", &[], TypeTag::Any, select::unsupported);
    d
});
