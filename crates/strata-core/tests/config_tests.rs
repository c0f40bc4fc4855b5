use std::io::Write;
use strata_core::config::Settings;

#[test]
fn test_settings_defaults() {
    let settings = Settings::default();

    assert!(settings.query.default_langs.is_empty());
    assert!(!settings.query.prioritize_uri);
    assert_eq!(settings.query.max_identifier_length, 63);
    assert_eq!(settings.migration.schema, "public");
    assert!(settings.migration.rename_map.is_none());
    assert!(settings.validate().is_ok());
}

#[test]
fn test_settings_from_file() {
    let mut file = tempfile::Builder::new()
        .suffix(".json")
        .tempfile()
        .unwrap();
    write!(
        file,
        r#"{{"query": {{"default_langs": ["lt", "en"], "prioritize_uri": true}},
            "migration": {{"schema": "data"}}}}"#
    )
    .unwrap();

    let settings = Settings::load(Some(file.path())).unwrap();
    assert_eq!(settings.query.default_langs, vec!["lt", "en"]);
    assert!(settings.query.prioritize_uri);
    assert_eq!(settings.migration.schema, "data");
    assert_eq!(settings.migration.max_identifier_length, 63);
}

#[test]
fn test_settings_reject_tiny_identifier_length() {
    let mut settings = Settings::default();
    settings.migration.max_identifier_length = 5;
    assert!(settings.validate().is_err());
}
