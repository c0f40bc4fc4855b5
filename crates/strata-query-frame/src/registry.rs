use crate::builder::{FrameQueryBuilder, BACKEND};
use crate::mask::Mask;
use crate::{handlers, select};
use once_cell::sync::Lazy;
use strata_query::{register_common, Dispatcher, Operand, TypeTag};
use strata_schema::dtype::TypeKind;

const ORDERING: [&str; 6] = ["eq", "ne", "lt", "le", "gt", "ge"];

pub(crate) static DISPATCHER: Lazy<Dispatcher<FrameQueryBuilder, Operand<Mask>>> = Lazy::new(|| {
    let mut d = Dispatcher::new(BACKEND);
    register_common(&mut d);

    d.register_raw("select", select::select)
        .register_variadic("and", &[], TypeTag::Any, handlers::and)
        .register_variadic("or", &[], TypeTag::Any, handlers::or);

    for op in ORDERING {
        d.register(op, &[TypeTag::Prop, TypeTag::Value], handlers::compare_value)
            .register(op, &[TypeTag::Prop, TypeTag::Null], handlers::compare_null)
            .register(op, &[TypeTag::Lower, TypeTag::Str], handlers::compare_func)
            .register(op, &[TypeTag::Upper, TypeTag::Str], handlers::compare_func);
    }
    for op in ["startswith", "contains"] {
        d.register(op, &[TypeTag::Prop, TypeTag::Null], handlers::compare_null)
            .register(op, &[TypeTag::Type(TypeKind::String), TypeTag::Str], handlers::compare_like)
            .register(op, &[TypeTag::Type(TypeKind::Text), TypeTag::Str], handlers::compare_like)
            .register(op, &[TypeTag::Lower, TypeTag::Str], handlers::compare_func)
            .register(op, &[TypeTag::Upper, TypeTag::Str], handlers::compare_func);
    }

    d.register("asc", &[TypeTag::Prop], handlers::asc)
        .register("desc", &[TypeTag::Prop], handlers::desc)
        .register_variadic("sort", &[], TypeTag::Any, handlers::sort)
        .register_variadic("page", &[], TypeTag::Any, handlers::page)
        .register("limit", &[TypeTag::Value], handlers::limit)
        .register("offset", &[TypeTag::Value], handlers::offset)
        .register("count", &[], select::count)
        .register("distinct", &[], select::distinct)
        .register_variadic("checksum", &[], TypeTag::Any, select::unsupported);
    d
});
