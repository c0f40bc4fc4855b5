use bson::{doc, Bson};
use serde_json::json;
use std::sync::Arc;
use strata_query::expr::{call, lit, neg, path};
use strata_query::shaper::shape;
use strata_query::{Expr, QueryParams, Value};
use strata_query_mongodb::{flatten, MongoPlan, MongoQueryBuilder};
use strata_schema::{load_yaml, Manifest};

const MANIFEST: &str = r#"
models:
  example/Country:
    pkeys: [code]
    properties:
      code: string
      name: string
  example/City:
    properties:
      name@lt: string
      name@en: string
      population: integer
      country:
        type: ref
        model: Country
      notes:
        type: array
        items:
          type: object
          properties:
            note: string
      tags[]: string
"#;

fn manifest() -> Arc<Manifest> {
    Arc::new(load_yaml(MANIFEST).unwrap())
}

fn builder() -> MongoQueryBuilder {
    let manifest = manifest();
    let city = manifest.model_id("example/City").unwrap();
    MongoQueryBuilder::new(manifest, city)
}

fn build(expr: Expr) -> MongoPlan {
    builder().compile(Some(&expr)).unwrap().plan
}

fn error_kind(expr: Expr) -> &'static str {
    builder().compile(Some(&expr)).unwrap_err().kind()
}

#[test]
fn test_filter_documents() {
    let expr = call(
        "and",
        vec![
            call("gt", vec![path("population"), lit(1000)]).into(),
            call(
                "or",
                vec![
                    call("eq", vec![path("country._id"), lit("0b9d8d33-7f42-4e5e-9a43-4b2bd3f2a2a1")]).into(),
                    call("startswith", vec![path("name"), lit("Vil.")]).into(),
                ],
            )
            .into(),
        ],
    );
    let plan = build(expr);
    assert_eq!(plan.collection, "example/City");
    assert_eq!(
        plan.filter,
        doc! {
            "$and": [
                { "population": { "$gt": 1000i64 } },
                { "$or": [
                    { "country._id": "0b9d8d33-7f42-4e5e-9a43-4b2bd3f2a2a1" },
                    { "name.lt": { "$regex": "^Vil\\." } },
                ] },
            ]
        }
    );
}

#[test]
fn test_ne_and_null() {
    let plan = build(call("ne", vec![path("tags"), lit("old")]));
    assert_eq!(plan.filter, doc! { "tags": { "$nin": ["old", Bson::Null] } });

    let plan = build(call("eq", vec![path("population"), Value::Null.into()]));
    assert_eq!(plan.filter, doc! { "population": Bson::Null });

    assert_eq!(
        error_kind(call("lt", vec![path("population"), Value::Null.into()])),
        "NoneValueComparison"
    );
}

#[test]
fn test_search_errors() {
    assert_eq!(
        error_kind(call("contains", vec![path("name"), lit("")])),
        "EmptyStringSearch"
    );
    assert_eq!(
        error_kind(call("contains", vec![path("population"), lit("1")])),
        "UnknownMethod"
    );
}

#[test]
fn test_lower_is_case_insensitive_regex() {
    let expr = call(
        "eq",
        vec![call("lower", vec![path("notes.note")]).into(), lit("a+b")],
    );
    let plan = build(expr);
    assert_eq!(
        plan.filter,
        doc! { "notes.note": { "$regex": "^a\\+b$", "$options": "i" } }
    );
}

#[test]
fn test_foreign_properties_are_not_supported() {
    assert_eq!(
        error_kind(call("eq", vec![path("country.name"), lit("Lithuania")])),
        "NotImplementedFeature"
    );
    assert_eq!(error_kind(call("checksum", vec![])), "NotImplementedFeature");
    assert_eq!(error_kind(call("distinct", vec![])), "NotImplementedFeature");
}

#[test]
fn test_projection_sort_and_paging() {
    let expr = call(
        "and",
        vec![
            call("select", vec![path("_id"), path("name"), path("country")]).into(),
            call("sort", vec![neg(path("population")), path("name")]).into(),
            call("limit", vec![lit(10)]).into(),
            call("offset", vec![lit(20)]).into(),
        ],
    );
    let plan = build(expr);
    assert_eq!(
        plan.projection,
        doc! { "_id": 0, "__id": 1, "country._id": 1, "name.lt": 1 }
    );
    assert_eq!(plan.sort, doc! { "population": -1, "name.lt": 1 });
    assert_eq!(plan.limit, Some(10));
    assert_eq!(plan.skip, Some(20));
}

#[test]
fn test_keyset_page() {
    let expr = call("page", vec![path("population")])
        .with_kwarg("size", lit(5))
        .with_kwarg("after", Value::List(vec![Value::Int(100)]).into());
    let plan = build(expr);
    assert_eq!(plan.filter, doc! { "population": { "$gt": 100i64 } });
    assert_eq!(plan.sort, doc! { "population": 1 });
    assert_eq!(plan.limit, Some(5));
}

#[test]
fn test_count() {
    let built = builder()
        .compile(Some(&call("select", vec![call("count", vec![]).into()])))
        .unwrap();
    assert!(built.plan.count);
    assert!(built.aggregate);
    assert_eq!(built.selected[0].0, "count()");
}

#[test]
fn test_shape_documents() {
    let manifest = manifest();
    let city = manifest.model_id("example/City").unwrap();
    let mut params = QueryParams::default();
    params.default_langs = vec!["lt".to_string()];
    let expr = call("select", vec![path("name"), path("notes.note"), path("country")]);
    let built = MongoQueryBuilder::new(Arc::clone(&manifest), city)
        .with_params(params)
        .compile(Some(&expr))
        .unwrap();

    let document = doc! {
        "name": { "lt": "Vilnius", "en": "Vilnius" },
        "notes": [{ "note": "old" }, { "note": "capital" }],
        "country": { "_id": "0b9d8d33-7f42-4e5e-9a43-4b2bd3f2a2a1" },
    };
    let row = flatten(document, &built.selected);
    assert_eq!(
        json!(shape(&manifest, &built.selected, &row)),
        json!({
            "name": "Vilnius",
            "notes.note": ["old", "capital"],
            "country": { "_id": "0b9d8d33-7f42-4e5e-9a43-4b2bd3f2a2a1" },
        })
    );
}
