use serde_json::json;
use std::sync::Arc;
use strata_query::expr::{call, lit, neg, path, pos};
use strata_query::shaper::shape;
use strata_query::{Expr, QueryParams, Value};
use strata_query_postgres::{PgPlan, PgQueryBuilder};
use strata_schema::{load_yaml, Manifest, ModelId};

const MANIFEST: &str = r#"
models:
  datasets/gov/example/Country:
    pkeys: [code]
    properties:
      code: string
      name: string
  datasets/gov/example/City:
    properties:
      name@lt: string
      name@en: string
      population: integer
      founded: date
      country:
        type: ref
        model: Country
      notes:
        type: array
        items:
          type: object
          properties:
            note: string
            labels[]: string
      tags[]: string
  datasets/gov/example/Street:
    properties:
      name: string
      city:
        type: ref
        model: City
  datasets/gov/example/Town:
    properties:
      name: string
      country:
        type: ref
        model: Country
        refprops: [code]
        level: 3
"#;

const CITY: &str = "\"datasets/gov/example/City\"";

fn manifest() -> Arc<Manifest> {
    Arc::new(load_yaml(MANIFEST).unwrap())
}

fn model(manifest: &Manifest, name: &str) -> ModelId {
    manifest.model_id(&format!("datasets/gov/example/{}", name)).unwrap()
}

fn builder(model_name: &str) -> PgQueryBuilder {
    let manifest = manifest();
    let id = model(&manifest, model_name);
    PgQueryBuilder::new(manifest, id)
}

fn build(model_name: &str, expr: Expr) -> PgPlan {
    builder(model_name).compile(Some(&expr)).unwrap().plan
}

fn error_kind(model_name: &str, expr: Expr) -> &'static str {
    builder(model_name).compile(Some(&expr)).unwrap_err().kind()
}

#[test]
fn test_count_with_multi_hop_filter() {
    let expr = call(
        "and",
        vec![
            call("select", vec![call("count", vec![]).into()]).into(),
            call("eq", vec![path("city.country.name"), lit("LT")]).into(),
        ],
    );
    let built = builder("Street").compile(Some(&expr)).unwrap();

    assert!(built.aggregate);
    assert_eq!(
        built.plan.sql,
        "SELECT count(*) AS \"count()\" FROM \"datasets/gov/example/Street\" \
         LEFT OUTER JOIN \"datasets/gov/example/City\" AS \"City_1\" \
         ON \"datasets/gov/example/Street\".\"city._id\" = \"City_1\".\"_id\" \
         LEFT OUTER JOIN \"datasets/gov/example/Country\" AS \"Country_2\" \
         ON \"City_1\".\"country._id\" = \"Country_2\".\"_id\" \
         WHERE \"Country_2\".\"name\" = $1"
    );
    assert_eq!(built.plan.values, vec![sea_orm::Value::from("LT".to_string())]);
    assert_eq!(built.selected.len(), 1);
    assert_eq!(built.selected[0].0, "count()");
}

#[test]
fn test_shared_hops_are_joined_once() {
    let expr = call(
        "and",
        vec![
            call("eq", vec![path("city.country.name"), lit("LT")]).into(),
            call("eq", vec![path("city.country.code"), lit("lt")]).into(),
            call("select", vec![path("name")]).into(),
        ],
    );
    let plan = build("Street", expr);
    assert_eq!(plan.sql.matches("LEFT OUTER JOIN").count(), 2);
}

#[test]
fn test_text_collapses_to_default_language() {
    let manifest = manifest();
    let city = model(&manifest, "City");
    let mut params = QueryParams::default();
    params.default_langs = vec!["lt".to_string()];

    let expr = call("select", vec![path("name")]);
    let built = PgQueryBuilder::new(Arc::clone(&manifest), city)
        .with_params(params.clone())
        .compile(Some(&expr))
        .unwrap();
    assert_eq!(
        built.plan.sql,
        format!("SELECT {city}.\"name\"->>'lt' AS \"name@lt\" FROM {city}", city = CITY)
    );
    let row = vec![json!("LT")];
    assert_eq!(
        json!(shape(&manifest, &built.selected, &row)),
        json!({"name": "LT"})
    );

    let built = PgQueryBuilder::new(Arc::clone(&manifest), city)
        .with_params(params.with_lang(["*"]))
        .compile(Some(&expr))
        .unwrap();
    assert!(built.plan.sql.contains("\"name\"->>'en' AS \"name@en\""));
    let row = vec![json!("LT"), json!("EN")];
    assert_eq!(
        json!(shape(&manifest, &built.selected, &row)),
        json!({"name": {"lt": "LT", "en": "EN"}})
    );
}

#[test]
fn test_sort_by_listed_property() {
    let plan = build("City", call("sort", vec![pos(path("notes.note"))]));
    let list = "\"datasets/gov/example/City/:list/notes\"";
    assert!(plan.sql.contains(&format!(
        "LEFT OUTER JOIN (SELECT DISTINCT ON ({list}.\"_rid\") {list}.\"_rid\", {list}.\"note\" AS \"value\" \
         FROM {list} ORDER BY {list}.\"_rid\" ASC, {list}.\"note\" ASC) AS \"notes_1\" \
         ON \"notes_1\".\"_rid\" = {city}.\"_id\"",
        list = list,
        city = CITY
    )));
    assert!(plan.sql.ends_with("ORDER BY \"notes_1\".\"value\" ASC"));

    let plan = build("City", call("sort", vec![neg(path("population"))]));
    assert!(plan.sql.ends_with(&format!("ORDER BY {}.\"population\" DESC", CITY)));
}

#[test]
fn test_listed_equality_matches_row_once() {
    let plan = build("City", call("eq", vec![path("tags"), lit("old")]));
    let list = "\"datasets/gov/example/City/:list/tags\"";
    assert!(plan.sql.contains(&format!(
        "LEFT OUTER JOIN (SELECT DISTINCT {list}.\"_rid\" FROM {list} WHERE {list}.\"tags\" = $1) AS \"tags_1\" \
         ON \"tags_1\".\"_rid\" = {city}.\"_id\"",
        list = list,
        city = CITY
    )));
    assert!(plan.sql.ends_with("WHERE \"tags_1\".\"_rid\" IS NOT NULL"));
}

#[test]
fn test_nested_array_filters_outermost_list_table() {
    let plan = build("City", call("eq", vec![path("notes.labels"), lit("old")]));
    let list = "\"datasets/gov/example/City/:list/notes\"";
    assert!(plan.sql.contains(&format!(
        "LEFT OUTER JOIN (SELECT DISTINCT {list}.\"_rid\" FROM {list} WHERE {list}.\"labels\" = $1) AS \"notes_1\" \
         ON \"notes_1\".\"_rid\" = {city}.\"_id\"",
        list = list,
        city = CITY
    )));
    assert!(!plan.sql.contains(":list/labels"));
}

#[test]
fn test_listed_ne_excludes_rows_with_any_match() {
    let plan = build("City", call("ne", vec![path("tags"), lit("old")]));
    assert_eq!(plan.sql.matches("SELECT DISTINCT").count(), 2);
    assert!(plan
        .sql
        .ends_with("WHERE \"tags_1\".\"_rid\" IS NOT NULL AND \"tags_2\".\"_rid\" IS NULL"));
}

#[test]
fn test_plain_ne_and_null_comparisons() {
    let plan = build("City", call("ne", vec![path("population"), lit(10)]));
    assert!(plan.sql.ends_with(&format!("WHERE {}.\"population\" <> $1", CITY)));

    let plan = build("City", call("eq", vec![path("population"), Value::Null.into()]));
    assert!(plan.sql.ends_with(&format!("WHERE {}.\"population\" IS NULL", CITY)));

    let kind = error_kind("City", call("gt", vec![path("population"), Value::Null.into()]));
    assert_eq!(kind, "NoneValueComparison");
}

#[test]
fn test_string_search() {
    let plan = build("Country", call("startswith", vec![path("name"), lit("Lit")]));
    assert!(plan.sql.ends_with("WHERE \"datasets/gov/example/Country\".\"name\" LIKE $1"));
    assert_eq!(plan.values, vec![sea_orm::Value::from("Lit%".to_string())]);

    let plan = build("Country", call("contains", vec![path("name"), lit("50%")]));
    assert_eq!(plan.values, vec![sea_orm::Value::from("%50\\%%".to_string())]);

    let kind = error_kind("Country", call("contains", vec![path("name"), lit("")]));
    assert_eq!(kind, "EmptyStringSearch");
}

#[test]
fn test_lower_applies_to_strings_only() {
    let expr = call(
        "eq",
        vec![call("lower", vec![path("name")]).into(), lit("vilnius")],
    );
    let plan = build("Street", expr);
    assert!(plan
        .sql
        .ends_with("WHERE lower(\"datasets/gov/example/Street\".\"name\") = $1"));

    let expr = call(
        "eq",
        vec![call("lower", vec![path("population")]).into(), lit("1")],
    );
    assert_eq!(error_kind("City", expr), "InvalidValue");
}

#[test]
fn test_primary_key_must_be_uuid() {
    let id = "9f7f1b4e-3c1a-4d2b-8f6e-1a2b3c4d5e6f";
    let plan = build("City", call("eq", vec![path("_id"), lit(id)]));
    assert!(plan.sql.ends_with(&format!("WHERE {}.\"_id\" = $1", CITY)));

    let kind = error_kind("City", call("eq", vec![path("_id"), lit("nope")]));
    assert_eq!(kind, "InvalidValue");
}

#[test]
fn test_unsupported_combination_is_unknown_method() {
    let kind = error_kind("City", call("startswith", vec![path("population"), lit("1")]));
    assert_eq!(kind, "UnknownMethod");
    let kind = error_kind("City", call("frobnicate", vec![path("population")]));
    assert_eq!(kind, "UnknownMethod");
}

#[test]
fn test_temporal_values_are_parsed() {
    let plan = build("City", call("gt", vec![path("founded"), lit("1323-01-25")]));
    assert!(plan.sql.ends_with(&format!("WHERE {}.\"founded\" > $1", CITY)));
    let kind = error_kind("City", call("gt", vec![path("founded"), lit("25/01/1323")]));
    assert_eq!(kind, "InvalidValue");
}

#[test]
fn test_ref_select_depends_on_level() {
    let plan = build("City", call("select", vec![path("country")]));
    assert_eq!(
        plan.sql,
        format!("SELECT {city}.\"country._id\" FROM {city}", city = CITY)
    );

    let plan = build("Town", call("select", vec![path("country")]));
    assert_eq!(
        plan.sql,
        "SELECT \"datasets/gov/example/Town\".\"country.code\" FROM \"datasets/gov/example/Town\""
    );

    // level 3 refs join on their key columns
    let plan = build("Town", call("eq", vec![path("country.name"), lit("Lithuania")]));
    assert!(plan.sql.contains(
        "ON \"datasets/gov/example/Town\".\"country.code\" = \"Country_1\".\"code\""
    ));
}

#[test]
fn test_keyset_page() {
    let expr = call("page", vec![path("population"), neg(path("founded"))])
        .with_kwarg("size", lit(2))
        .with_kwarg(
            "after",
            Value::List(vec![Value::Int(10), Value::Str("2000-01-01".into())]).into(),
        );
    let plan = build("City", expr);
    assert!(plan.sql.contains(&format!(
        "WHERE ({city}.\"population\" > $1 OR ({city}.\"population\" = $2 AND {city}.\"founded\" < $3))",
        city = CITY
    )));
    assert!(plan.sql.ends_with(&format!(
        "ORDER BY {city}.\"population\" ASC, {city}.\"founded\" DESC LIMIT 2",
        city = CITY
    )));
    assert_eq!(plan.values.len(), 3);
}

#[test]
fn test_limit_offset_and_count_drop_order() {
    let expr = call(
        "and",
        vec![
            call("select", vec![call("count", vec![]).into()]).into(),
            call("sort", vec![path("population")]).into(),
        ],
    );
    let plan = build("City", expr);
    assert!(!plan.sql.contains("ORDER BY"));

    let expr = call(
        "and",
        vec![
            call("select", vec![path("population")]).into(),
            call("limit", vec![lit(5)]).into(),
            call("offset", vec![lit(10)]).into(),
        ],
    );
    let plan = build("City", expr);
    assert!(plan.sql.ends_with("LIMIT 5 OFFSET 10"));
}

#[test]
fn test_select_all_starts_with_type() {
    let manifest = manifest();
    let city = model(&manifest, "City");
    let built = PgQueryBuilder::new(Arc::clone(&manifest), city)
        .compile(None)
        .unwrap();
    assert_eq!(built.selected[0].0, "_type");
    let keys: Vec<&str> = built.selected.iter().map(|(k, _)| k.as_str()).collect();
    assert!(keys.contains(&"_id"));
    assert!(keys.contains(&"population"));
    assert!(built.plan.sql.starts_with("SELECT "));
}

#[test]
fn test_any_expands_into_or() {
    let expr = call(
        "any",
        vec![lit("eq"), path("population"), lit(1), lit(2)],
    );
    let plan = build("City", expr);
    assert!(plan.sql.ends_with(&format!(
        "WHERE ({city}.\"population\" = $1 OR {city}.\"population\" = $2)",
        city = CITY
    )));
}
