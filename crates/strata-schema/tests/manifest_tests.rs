use strata_schema::dtype::{DataType, TypeKind};
use strata_schema::resolver::resolve;
use strata_schema::{load_json, load_yaml, PropertyRef, SchemaError};

const MANIFEST: &str = r#"
models:
  datasets/gov/example/Continent:
    pkeys: [id]
    properties:
      id: integer
      name: string
  datasets/gov/example/Country:
    pkeys: [id]
    properties:
      id: integer unique
      code: string
      name: string
      continent:
        type: ref
        model: Continent
  datasets/gov/example/City:
    properties:
      name@lt: string
      name@en: string
      population: integer
      country:
        type: ref
        model: Country
        properties:
          code: denorm
      address:
        type: object
        properties:
          street: string
          zip: string
      notes:
        type: array
        items:
          type: object
          properties:
            note: string
            author: string
      tags[]: string
      flag: file
  datasets/gov/example/Street:
    properties:
      name: string
      city:
        type: ref
        model: City
"#;

#[test]
fn test_flatprops_follow_declaration_order() {
    let manifest = load_yaml(MANIFEST).unwrap();
    let city = manifest.model_by_name("datasets/gov/example/City").unwrap();
    let places: Vec<&str> = manifest
        .flatprops(city.id)
        .map(|p| p.place.as_str())
        .collect();
    assert_eq!(
        places,
        [
            "name",
            "name@lt",
            "name@en",
            "population",
            "country",
            "country.code",
            "address",
            "address.street",
            "address.zip",
            "notes",
            "notes[]",
            "notes[].note",
            "notes[].author",
            "tags",
            "tags[]",
            "flag",
        ]
    );
    assert_eq!(city.basename(), "City");
    assert_eq!(city.dataset(), "datasets/gov/example");
}

#[test]
fn test_list_links_and_columns() {
    let manifest = load_yaml(MANIFEST).unwrap();
    let city = manifest.model_by_name("datasets/gov/example/City").unwrap();
    let notes = city.flatprop("notes").unwrap();
    let note = city.flatprop("notes[].note").unwrap();
    let tag = city.flatprop("tags[]").unwrap();

    assert_eq!(manifest.prop(note).list, Some(notes));
    assert_eq!(manifest.list_column(note), "note");
    assert_eq!(manifest.list_column(tag), "tags");
    assert_eq!(manifest.prop(note).column(), "notes.note");
    assert_eq!(manifest.prop(city.flatprop("address.zip").unwrap()).list, None);
}

#[test]
fn test_leafprops_group_by_name() {
    let manifest = load_yaml(MANIFEST).unwrap();
    let city = manifest.model_by_name("datasets/gov/example/City").unwrap();
    let leaves: Vec<&str> = city
        .leaves("note")
        .iter()
        .map(|id| manifest.prop(*id).place.as_str())
        .collect();
    assert_eq!(leaves, ["notes[].note"]);
    assert!(city.leaves("notes").is_empty());
    assert_eq!(city.leaves("name").len(), 1);
}

#[test]
fn test_refs_are_linked() {
    let manifest = load_yaml(MANIFEST).unwrap();
    let city = manifest.model_by_name("datasets/gov/example/City").unwrap();
    let country = manifest.prop(city.flatprop("country").unwrap());
    let ref_type = country.dtype.as_ref_type().unwrap();

    assert_eq!(ref_type.model, "datasets/gov/example/Country");
    assert!(ref_type.stores_id());
    let refprops: Vec<&str> = ref_type
        .refprops
        .iter()
        .map(|id| manifest.prop(*id).place.as_str())
        .collect();
    assert_eq!(refprops, ["id"]);

    let code = manifest.prop(city.flatprop("country.code").unwrap());
    match &code.dtype {
        DataType::Denorm(denorm) => {
            let rel = manifest.prop(denorm.rel_prop.unwrap());
            assert_eq!(rel.place, "code");
            assert_eq!(manifest.owner(rel.id).basename(), "Country");
        }
        other => panic!("expected denorm, got {:?}", other),
    }
}

#[test]
fn test_resolve_multi_hop_ref() {
    let manifest = load_yaml(MANIFEST).unwrap();
    let street = manifest.model_id("datasets/gov/example/Street").unwrap();
    let resolved = resolve(&manifest, street, "city.country.name").unwrap();

    let chain = resolved.chain().unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain.display(&manifest), "city->country->name");
    assert_eq!(resolved.kind(&manifest), TypeKind::String);

    // same chain built twice compares equal
    let again = resolve(&manifest, street, "city.country.name").unwrap();
    assert_eq!(resolved, again);
}

#[test]
fn test_resolve_ref_id_and_denorm_without_join() {
    let manifest = load_yaml(MANIFEST).unwrap();
    let city = manifest.model_id("datasets/gov/example/City").unwrap();

    match resolve(&manifest, city, "country._id").unwrap() {
        PropertyRef::Reserved(reserved) => {
            assert_eq!(reserved.name, "_id");
            assert_eq!(reserved.kind, TypeKind::PrimaryKey);
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(matches!(
        resolve(&manifest, city, "country.code").unwrap(),
        PropertyRef::Property(_)
    ));
    assert!(resolve(&manifest, city, "country.name").unwrap().chain().is_some());
}

#[test]
fn test_resolve_nested_text_and_file() {
    let manifest = load_yaml(MANIFEST).unwrap();
    let city = manifest.model_id("datasets/gov/example/City").unwrap();

    match resolve(&manifest, city, "notes.note").unwrap() {
        PropertyRef::Nested(nested) => {
            assert_eq!(manifest.prop(nested.prop).place, "notes[].note");
        }
        other => panic!("unexpected {:?}", other),
    }
    let lt = resolve(&manifest, city, "name@lt").unwrap();
    assert_eq!(manifest.prop(lt.prop()).lang.as_deref(), Some("lt"));
    assert_eq!(resolve(&manifest, city, "name.en").unwrap().kind(&manifest), TypeKind::String);

    let err = resolve(&manifest, city, "name@de").unwrap_err();
    assert_eq!(err.kind(), "LangNotDeclared");

    match resolve(&manifest, city, "flag._size").unwrap() {
        PropertyRef::Reserved(reserved) => assert_eq!(reserved.kind, TypeKind::Integer),
        other => panic!("unexpected {:?}", other),
    }
    let err = resolve(&manifest, city, "nope").unwrap_err();
    assert_eq!(err.kind(), "FieldNotInResource");
}

#[test]
fn test_level_three_ref_keys_are_inline() {
    let manifest = load_yaml(
        r#"
models:
  Country:
    pkeys: [id]
    properties:
      id: integer
  City:
    properties:
      country:
        type: ref
        model: Country
        refprops: [id]
        level: 3
"#,
    )
    .unwrap();
    let city = manifest.model_id("City").unwrap();
    match resolve(&manifest, city, "country.id").unwrap() {
        PropertyRef::Reserved(reserved) => {
            assert_eq!(reserved.name, "id");
            assert_eq!(reserved.kind, TypeKind::Integer);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_unknown_ref_model() {
    let err = load_yaml(
        r#"
models:
  City:
    properties:
      country: {type: ref, model: Country}
"#,
    )
    .unwrap_err();
    assert_eq!(err.kind(), "ModelReferenceNotFound");
}

#[test]
fn test_denorm_of_key_is_rejected() {
    let err = load_yaml(
        r#"
models:
  Country:
    pkeys: [id]
    properties:
      id: integer
  City:
    properties:
      country:
        type: ref
        model: Country
        properties:
          id: denorm
"#,
    )
    .unwrap_err();
    assert!(matches!(err, SchemaError::InvalidDenormProperty { .. }));
}

#[test]
fn test_refprop_type_mismatch() {
    let err = load_yaml(
        r#"
models:
  Country:
    pkeys: [id]
    properties:
      id: integer
  City:
    properties:
      country:
        type: ref
        model: Country
        level: 3
        properties:
          id: string
"#,
    )
    .unwrap_err();
    assert_eq!(err.kind(), "RefPropTypeMissmatch");
}

#[test]
fn test_backref_validation() {
    let ok = load_yaml(
        r#"
models:
  Country:
    properties:
      name: string
      cities: {type: array_backref, model: City}
  City:
    properties:
      country: {type: ref, model: Country}
"#,
    )
    .unwrap();
    let country = ok.model_by_name("Country").unwrap();
    let cities = ok.prop(country.flatprop("cities").unwrap());
    let refprop = cities.dtype.as_backref().unwrap().refprop.unwrap();
    assert_eq!(ok.prop(refprop).place, "country");

    let none = load_yaml(
        r#"
models:
  Country:
    properties:
      cities: {type: backref, model: City}
  City:
    properties:
      name: string
"#,
    )
    .unwrap_err();
    assert_eq!(none.kind(), "NoBackRefReferencesFound");

    let many = load_yaml(
        r#"
models:
  Country:
    properties:
      cities: {type: backref, model: City}
  City:
    properties:
      country: {type: ref, model: Country}
      capital_of: {type: ref, model: Country}
"#,
    )
    .unwrap_err();
    assert_eq!(many.kind(), "MultipleBackRefReferencesFound");

    let listed = load_yaml(
        r#"
models:
  Country:
    properties:
      city: {type: backref, model: City}
  City:
    properties:
      countries:
        type: array
        items: {type: ref, model: Country}
"#,
    )
    .unwrap_err();
    assert_eq!(listed.kind(), "OneToManyBackRefNotSupported");
}

#[test]
fn test_inherit_resolves_through_base() {
    let manifest = load_yaml(
        r#"
models:
  Place:
    properties:
      name: string
  City:
    base: Place
    properties:
      name: inherit
      population: integer
"#,
    )
    .unwrap();
    let city = manifest.model_id("City").unwrap();
    let resolved = resolve(&manifest, city, "name").unwrap();
    let chain = resolved.chain().unwrap();
    assert_eq!(chain.len(), 1);
    assert_eq!(manifest.owner(resolved.prop()).name, "Place");
}

#[test]
fn test_json_manifest_and_type_flags() {
    let manifest = load_json(
        r#"{"models": {"City": {"properties": {
            "code": "string unique required",
            "location": "geometry(point;3346)"
        }}}}"#,
    )
    .unwrap();
    let city = manifest.model_by_name("City").unwrap();
    let code = manifest.prop(city.flatprop("code").unwrap());
    assert!(code.unique && code.required);
    match &manifest.prop(city.flatprop("location").unwrap()).dtype {
        DataType::Geometry(geometry) => {
            assert_eq!(geometry.srid, Some(3346));
            assert_eq!(geometry.geometry_type.as_deref(), Some("point"));
        }
        other => panic!("unexpected {:?}", other),
    }
    assert!(!city.is_reserved());
}

#[test]
fn test_load_file_by_extension() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("manifest.yaml");
    std::fs::write(&path, "models:\n  _Schema:\n    properties:\n      name: string\n").unwrap();
    let manifest = strata_schema::load_file(&path).unwrap();
    assert!(manifest.model_by_name("_Schema").unwrap().is_reserved());

    let missing = strata_schema::load_file(&dir.path().join("missing.yaml")).unwrap_err();
    assert_eq!(missing.kind(), "InvalidManifest");
}
