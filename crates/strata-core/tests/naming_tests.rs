use strata_core::naming::{compress_name, Namer, TableType};

const LONG_MODEL: &str = "datasets/gov/example/very/very/long/dataset/name/ExtremelyLongModelName";

#[test]
fn test_long_name_is_compressed_deterministically() {
    let first = compress_name(LONG_MODEL, 63);
    let second = compress_name(LONG_MODEL, 63);

    assert_eq!(first, second);
    assert!(first.chars().count() <= 63);
    assert!(first.starts_with("datasets/gov/example/very/very/long/datase_"));
    assert!(first.ends_with("_ngModelName"));

    let hash = &first["datasets/gov/example/very/very/long/datase_".len()..][..8];
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn test_compressed_parts_fill_the_limit() {
    let name = compress_name(LONG_MODEL, 63);
    let parts: Vec<&str> = name.rsplitn(3, '_').collect();

    assert_eq!(name.chars().count(), 63);
    assert_eq!(parts[0], "ngModelName");
    assert_eq!(parts[1].len(), 8);
    assert_eq!(parts[2].chars().count(), 42);
}

#[test]
fn test_compression_is_idempotent() {
    let once = compress_name(LONG_MODEL, 63);
    assert_eq!(compress_name(&once, 63), once);
}

#[test]
fn test_different_names_get_different_hashes() {
    let a = compress_name(&format!("{}A", LONG_MODEL), 63);
    let b = compress_name(&format!("{}B", LONG_MODEL), 63);
    assert_ne!(a, b);
}

#[test]
fn test_namer_side_tables() {
    let namer = Namer::default();
    assert_eq!(
        namer.table("datasets/gov/City", &TableType::Changelog),
        "datasets/gov/City/:changelog"
    );
    let list = namer.table(LONG_MODEL, &TableType::List("notes".to_string()));
    assert!(list.chars().count() <= 63);
    assert!(list.ends_with("list/notes"));
}

#[test]
fn test_constraint_names() {
    let namer = Namer::default();
    assert_eq!(
        namer.unique("datasets/gov/City", "someInteger"),
        "uq_datasets/gov/City_someInteger"
    );
    assert_eq!(namer.index("City", "country._id"), "ix_City_country._id");
    assert_eq!(namer.foreign_key("City", "country._id"), "fk_City_country._id");
}
