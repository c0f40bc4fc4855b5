use strata_core::Namer;
use strata_migrations::{
    desired_schema, Action, Column, ColumnChange, Differ, MigrationPlan, RenameMap, Result, Role, Snapshot, SqlType,
};
use strata_schema::load_yaml;

fn snapshot(yaml: &str) -> Snapshot {
    desired_schema(&load_yaml(yaml).unwrap(), &Namer::default())
}

fn try_diff(current: &Snapshot, desired: &Snapshot) -> Result<MigrationPlan> {
    Differ::new(&Namer::default(), "public").diff(current, desired)
}

fn diff(current: &Snapshot, desired: &Snapshot) -> MigrationPlan {
    try_diff(current, desired).unwrap()
}

fn names(plan: &MigrationPlan) -> Vec<&'static str> {
    plan.actions.iter().map(Action::name).collect()
}

fn table_mut<'a>(snapshot: &'a mut Snapshot, logical: &str) -> &'a mut strata_migrations::Table {
    snapshot
        .tables
        .iter_mut()
        .find(|t| t.logical() == logical)
        .unwrap()
}

const CITY_LEVEL_4: &str = r#"
models:
  example/Country:
    properties:
      id: integer
      name: string
  example/City:
    properties:
      id: integer
      country:
        type: ref
        model: Country
"#;

const CITY_LEVEL_3: &str = r#"
models:
  example/Country:
    properties:
      id: integer
      name: string
  example/City:
    properties:
      id: integer
      country:
        type: ref
        model: Country
        refprops: [id]
        level: 3
"#;

#[test]
fn test_ref_level_4_to_level_3_copies_keys() {
    let plan = diff(&snapshot(CITY_LEVEL_4), &snapshot(CITY_LEVEL_3));
    assert_eq!(
        names(&plan),
        ["DropConstraint", "DropIndex", "AddColumn", "TransferData", "DropColumn"]
    );
    assert_eq!(
        plan.actions[0],
        Action::DropConstraint {
            table: "example/City".into(),
            name: "fk_example/City_country._id".into(),
        }
    );
    assert_eq!(
        plan.actions[1],
        Action::DropIndex {
            name: "ix_example/City_country._id".into()
        }
    );
    assert_eq!(
        plan.actions[3],
        Action::TransferData {
            sql: r#"UPDATE "public"."example/City" AS t SET "country.id" = r."id" FROM "public"."example/Country" AS r WHERE t."country._id" = r."_id""#.into()
        }
    );
    assert_eq!(
        plan.actions[4],
        Action::DropColumn {
            table: "example/City".into(),
            column: "country._id".into(),
            name: "__country._id".into(),
            comment: "__country._id".into(),
        }
    );

    // the soft-deleted column stays put on the next run
    let mut migrated = snapshot(CITY_LEVEL_3);
    table_mut(&mut migrated, "example/City")
        .columns
        .push(Column::new("__country._id", SqlType::Uuid).commented("__country._id"));
    assert!(diff(&migrated, &snapshot(CITY_LEVEL_3)).is_empty());
}

#[test]
fn test_ref_level_3_to_level_4_rebuilds_id() {
    let plan = diff(&snapshot(CITY_LEVEL_3), &snapshot(CITY_LEVEL_4));
    assert_eq!(
        names(&plan),
        ["AddColumn", "TransferData", "AddConstraint", "AddIndex", "DropColumn"]
    );
    assert_eq!(
        plan.actions[1],
        Action::TransferData {
            sql: r#"UPDATE "public"."example/City" AS t SET "country._id" = r."_id" FROM "public"."example/Country" AS r WHERE t."country.id" = r."id""#.into()
        }
    );
}

#[test]
fn test_dropping_unique_only_drops_constraint() {
    let unique = snapshot(
        r#"
models:
  example/Test:
    properties:
      someInteger: integer unique
"#,
    );
    let plain = snapshot(
        r#"
models:
  example/Test:
    properties:
      someInteger: integer
"#,
    );
    let plan = diff(&unique, &plain);
    assert_eq!(
        plan.actions,
        [Action::DropConstraint {
            table: "example/Test".into(),
            name: "uq_example/Test_someInteger".into(),
        }]
    );
    assert!(diff(&plain, &plain).is_empty());
}

#[test]
fn test_long_names_are_compressed() {
    let name = "datasets/gov/example/very/very/long/dataset/name/ExtremelyLongModelName";
    let manifest = format!("models:\n  {}:\n    properties:\n      title: string\n", name);
    let plan = diff(&Snapshot::default(), &snapshot(&manifest));

    let Action::CreateTable(table) = &plan.actions[0] else {
        panic!("expected CreateTable, got {}", plan.actions[0]);
    };
    assert_eq!(table.comment.as_deref(), Some(name));
    assert_eq!(table.name.chars().count(), 63);
    assert!(table.name.starts_with("datasets/gov/example/very/very/long/datase_"));
    assert!(table.name.ends_with("_ngModelName"));
    assert!(table.name[43..51].chars().all(|c| c.is_ascii_hexdigit()));

    assert_eq!(snapshot(&manifest).tables[0].name, table.name);
    assert!(diff(&snapshot(&manifest), &snapshot(&manifest)).is_empty());
}

#[test]
fn test_unchanged_manifest_has_empty_plan() {
    let manifest = r#"
models:
  example/_ns:
    properties:
      title: string
  example/Country:
    pkeys: [code]
    properties:
      code: string unique
      title@lt: string
      title@en: string
  example/City:
    properties:
      name: string required
      population: integer
      area: number
      location: geometry(point;3346)
      founded: date
      country:
        type: ref
        model: Country
      region:
        type: ref
        model: Country
        refprops: [code]
        level: 3
      flag: file
      tags[]: string
"#;
    assert!(diff(&snapshot(manifest), &snapshot(manifest)).is_empty());
}

#[test]
fn test_new_model_creates_side_tables() {
    let plan = diff(
        &Snapshot::default(),
        &snapshot(
            r#"
models:
  example/City:
    properties:
      name: string
      tags[]: string
"#,
        ),
    );
    let created: Vec<&str> = plan
        .actions
        .iter()
        .filter_map(|action| match action {
            Action::CreateTable(table) => Some(table.logical()),
            _ => None,
        })
        .collect();
    assert_eq!(
        created,
        [
            "example/City",
            "example/City/:list/tags",
            "example/City/:changelog",
            "example/City/:redirect"
        ]
    );

    // foreign keys wait until every table exists
    let Some(Action::AddConstraint { table, constraint }) = plan
        .actions
        .iter()
        .find(|action| matches!(action, Action::AddConstraint { .. }))
    else {
        panic!("missing list foreign key");
    };
    assert_eq!(table, "example/City/:list/tags");
    assert_eq!(constraint.columns, ["_rid"]);

    let sql = plan.to_sql();
    assert!(sql.contains(r#"REFERENCES "public"."example/City" ("_id") ON DELETE CASCADE"#));
    assert!(sql.contains(r#"COMMENT ON TABLE "public"."example/City/:changelog" IS 'example/City/:changelog'"#));
    assert!(sql.contains(r#""_id" bigserial NOT NULL"#));
}

#[test]
fn test_removed_model_is_soft_deleted() {
    let plan = diff(
        &snapshot(
            r#"
models:
  example/Country:
    properties:
      name: string
  example/City:
    properties:
      name: string
"#,
        ),
        &snapshot(
            r#"
models:
  example/Country:
    properties:
      name: string
"#,
        ),
    );
    assert_eq!(
        plan.actions,
        [
            Action::DropTable {
                table: "example/City".into(),
                name: "example/__City".into(),
                comment: "example/__City".into(),
            },
            Action::DropTable {
                table: "example/City/:changelog".into(),
                name: "example/__City/:changelog".into(),
                comment: "example/__City/:changelog".into(),
            },
            Action::DropTable {
                table: "example/City/:redirect".into(),
                name: "example/__City/:redirect".into(),
                comment: "example/__City/:redirect".into(),
            },
        ]
    );
}

#[test]
fn test_removed_column_is_restored() {
    let with_title = snapshot(
        r#"
models:
  example/City:
    properties:
      name: string
      title: string
"#,
    );
    let without_title = snapshot(
        r#"
models:
  example/City:
    properties:
      name: string
"#,
    );

    let plan = diff(&with_title, &without_title);
    assert_eq!(
        plan.actions,
        [Action::DropColumn {
            table: "example/City".into(),
            column: "title".into(),
            name: "__title".into(),
            comment: "__title".into(),
        }]
    );

    let mut removed = without_title.clone();
    table_mut(&mut removed, "example/City")
        .columns
        .push(Column::new("__title", SqlType::Text).commented("__title"));
    assert!(diff(&removed, &without_title).is_empty());

    let plan = diff(&removed, &with_title);
    assert_eq!(
        plan.actions,
        [Action::RenameColumn {
            table: "example/City".into(),
            from: "__title".into(),
            to: "title".into(),
            comment: "title".into(),
        }]
    );
}

#[test]
fn test_renamed_model_keeps_tables() {
    let renames = RenameMap::parse(r#"{"example/Old": {"": "example/New", "title": "name"}}"#).unwrap();
    let old = snapshot(
        r#"
models:
  example/Old:
    properties:
      title: string
"#,
    );
    let new = snapshot(
        r#"
models:
  example/New:
    properties:
      name: string
"#,
    );
    let namer = Namer::default();
    let plan = Differ::new(&namer, "public")
        .with_renames(&renames)
        .diff(&old, &new)
        .unwrap();
    assert_eq!(
        names(&plan),
        [
            "RenameTable",
            "RenameTable",
            "RenameSequence",
            "RenameTable",
            "RenameColumn",
            "RenameConstraint",
            "RenameConstraint",
            "RenameConstraint",
            "RenameIndex"
        ]
    );
    assert_eq!(
        plan.actions[2],
        Action::RenameSequence {
            from: "example/Old/:changelog__id_seq".into(),
            to: "example/New/:changelog__id_seq".into(),
        }
    );
    assert_eq!(
        plan.actions[4],
        Action::RenameColumn {
            table: "example/New".into(),
            from: "title".into(),
            to: "name".into(),
            comment: "name".into(),
        }
    );
}

#[test]
fn test_casts() {
    let text = snapshot("models:\n  example/Item:\n    properties:\n      code: string\n");
    let integer = snapshot("models:\n  example/Item:\n    properties:\n      code: integer\n");
    let plan = diff(&text, &integer);
    assert_eq!(
        plan.actions,
        [Action::AlterColumn {
            table: "example/Item".into(),
            column: "code".into(),
            change: ColumnChange::Type {
                sql_type: SqlType::BigInt,
                using: r#"CAST("code" AS bigint)"#.into(),
            },
        }]
    );
    assert_eq!(plan.warnings.len(), 1);

    let date = snapshot("models:\n  example/Item:\n    properties:\n      day: date\n");
    let time = snapshot("models:\n  example/Item:\n    properties:\n      day: time\n");
    let err = try_diff(&date, &time).unwrap_err();
    assert_eq!(err.kind(), "UnableToCastColumnTypes");
}

fn scalar_to_ref(country_pkeys: &str, city_country: &str) -> (Snapshot, Snapshot) {
    let country = format!(
        "  example/Country:\n    pkeys: {}\n    properties:\n      code: string\n      name: string\n",
        country_pkeys
    );
    let before = format!(
        "models:\n{}  example/City:\n    properties:\n      country: {}\n",
        country, city_country
    );
    let after = format!(
        "models:\n{}  example/City:\n    properties:\n      country:\n        type: ref\n        model: Country\n",
        country
    );
    (snapshot(&before), snapshot(&after))
}

#[test]
fn test_scalar_to_ref() {
    let (before, after) = scalar_to_ref("[code]", "string");
    let plan = diff(&before, &after);
    assert_eq!(
        names(&plan),
        ["AddColumn", "TransferData", "AddConstraint", "AddIndex", "DropColumn"]
    );
    assert_eq!(
        plan.actions[1],
        Action::TransferData {
            sql: r#"UPDATE "public"."example/City" AS t SET "country._id" = r."_id" FROM "public"."example/Country" AS r WHERE t."country" = r."code""#.into()
        }
    );

    let (before, after) = scalar_to_ref("[code, name]", "string");
    assert_eq!(
        try_diff(&before, &after).unwrap_err().kind(),
        "MigrateScalarToRefTooManyKeys"
    );

    let (before, after) = scalar_to_ref("[code]", "integer");
    assert_eq!(
        try_diff(&before, &after).unwrap_err().kind(),
        "MigrateScalarToRefTypeMissmatch"
    );
}

const PLAIN_NAME: &str = "models:\n  example/City:\n    properties:\n      name: string\n";
const TEXT_NAME: &str = "models:\n  example/City:\n    properties:\n      name@lt: string\n      name@en: string\n";

#[test]
fn test_string_to_text() {
    let plan = diff(&snapshot(PLAIN_NAME), &snapshot(TEXT_NAME));
    assert_eq!(names(&plan), ["DropColumn", "AddColumn", "TransferData"]);
    let Action::AddColumn { column, .. } = &plan.actions[1] else {
        panic!("expected AddColumn");
    };
    assert_eq!(column.sql_type, SqlType::Jsonb);
    assert_eq!(column.default.as_deref(), Some("'{}'::jsonb"));
    assert_eq!(
        plan.actions[2],
        Action::TransferData {
            sql: r#"UPDATE "public"."example/City" SET "name" = jsonb_build_object('lt', "__name") WHERE "__name" IS NOT NULL"#
                .into()
        }
    );
}

#[test]
fn test_text_to_string_reads_default_lang() {
    let namer = Namer::default();
    let plan = Differ::new(&namer, "public")
        .with_default_lang(Some("en"))
        .diff(&snapshot(TEXT_NAME), &snapshot(PLAIN_NAME))
        .unwrap();
    assert_eq!(names(&plan), ["DropColumn", "AddColumn", "TransferData"]);
    let Action::TransferData { sql } = &plan.actions[2] else {
        panic!("expected TransferData");
    };
    assert!(sql.starts_with(r#"UPDATE "public"."example/City" SET "name" = CASE jsonb_typeof("__name")"#));
    assert!(sql.contains(r#"COALESCE("__name" ->> 'en', "#));
}

#[test]
fn test_removed_language_moves_aside() {
    let mut current = snapshot(TEXT_NAME);
    let city = table_mut(&mut current, "example/City");
    for column in city.columns.iter_mut().filter(|c| c.name == "name") {
        column.role = Role::Text {
            langs: vec!["lt".into(), "en".into()],
        };
    }
    let only_lt = snapshot("models:\n  example/City:\n    properties:\n      name@lt: string\n");

    let plan = diff(&current, &only_lt);
    assert_eq!(
        plan.actions,
        [Action::TransferData {
            sql: r#"UPDATE "public"."example/City" SET "name" = ("name" - 'en') || jsonb_build_object('__en', "name" -> 'en') WHERE "name" -> 'en' IS NOT NULL"#.into()
        }]
    );

    let city = table_mut(&mut current, "example/City");
    for column in city.columns.iter_mut().filter(|c| c.name == "name") {
        column.role = Role::Text {
            langs: vec!["lt".into(), "__en".into()],
        };
    }
    assert!(diff(&current, &only_lt).is_empty());
    let plan = diff(&current, &snapshot(TEXT_NAME));
    assert_eq!(names(&plan), ["TransferData"]);
}

fn ref_to_scalar(country_pkeys: &str, code: &str, city_country: &str) -> (Snapshot, Snapshot) {
    let country = format!(
        "  example/Country:\n    pkeys: {}\n    properties:\n      code: {}\n      name: string\n",
        country_pkeys, code
    );
    let before = format!(
        "models:\n{}  example/City:\n    properties:\n      country:\n        type: ref\n        model: Country\n",
        country
    );
    let after = format!(
        "models:\n{}  example/City:\n    properties:\n      country: {}\n",
        country, city_country
    );
    (snapshot(&before), snapshot(&after))
}

#[test]
fn test_ref_to_integer_copies_target_key() {
    let (before, after) = ref_to_scalar("[code]", "integer", "integer");
    let plan = diff(&before, &after);
    assert_eq!(
        names(&plan),
        ["DropConstraint", "DropIndex", "AddColumn", "TransferData", "DropColumn"]
    );
    assert_eq!(
        plan.actions[3],
        Action::TransferData {
            sql: r#"UPDATE "public"."example/City" AS t SET "country" = r."code" FROM "public"."example/Country" AS r WHERE t."country._id" = r."_id""#.into()
        }
    );
    assert!(plan.warnings.is_empty());
}

#[test]
fn test_ref_to_string_casts_target_key() {
    let (before, after) = ref_to_scalar("[code]", "integer", "string");
    let plan = diff(&before, &after);
    assert_eq!(
        plan.actions[3],
        Action::TransferData {
            sql: r#"UPDATE "public"."example/City" AS t SET "country" = CAST(r."code" AS text) FROM "public"."example/Country" AS r WHERE t."country._id" = r."_id""#.into()
        }
    );
}

#[test]
fn test_ref_to_scalar_rejects_composite_key() {
    let (before, after) = ref_to_scalar("[code, name]", "string", "string");
    let err = try_diff(&before, &after).unwrap_err();
    assert_eq!(err.kind(), "MigrateScalarToRefTooManyKeys");
}

#[test]
fn test_ref_to_scalar_without_pkeys_keeps_id() {
    let (before, after) = ref_to_scalar("[]", "integer", "string");
    let plan = diff(&before, &after);
    assert_eq!(
        plan.actions[3],
        Action::TransferData {
            sql: r#"UPDATE "public"."example/City" AS t SET "country" = CAST(r."_id" AS text) FROM "public"."example/Country" AS r WHERE t."country._id" = r."_id""#.into()
        }
    );

    let (before, after) = ref_to_scalar("[]", "integer", "integer");
    let err = try_diff(&before, &after).unwrap_err();
    assert_eq!(err.kind(), "UnableToCastColumnTypes");
}

const COUNTRY_BY_CODE: &str = "  example/Country:\n    pkeys: [code]\n    properties:\n      code: string\n      name: string\n";

fn city_with(country: &str) -> Snapshot {
    snapshot(&format!(
        "models:\n{}  example/City:\n    properties:\n      country:\n{}",
        COUNTRY_BY_CODE, country
    ))
}

#[test]
fn test_level_3_ref_to_scalar_copies_key_column() {
    let level_3 = city_with("        type: ref\n        model: Country\n        refprops: [code]\n        level: 3\n");
    let plain = snapshot(&format!(
        "models:\n{}  example/City:\n    properties:\n      country: string\n",
        COUNTRY_BY_CODE
    ));
    let plan = diff(&level_3, &plain);
    assert_eq!(names(&plan), ["AddColumn", "TransferData", "DropColumn"]);
    assert_eq!(
        plan.actions[1],
        Action::TransferData {
            sql: r#"UPDATE "public"."example/City" SET "country" = "country.code""#.into()
        }
    );

    let two_keys = city_with("        type: ref\n        model: Country\n        refprops: [code, name]\n        level: 3\n");
    let err = try_diff(&two_keys, &plain).unwrap_err();
    assert_eq!(err.kind(), "MigrateScalarToRefTooManyKeys");
}

#[test]
fn test_scalar_to_level_3_ref_copies_value() {
    let plain = snapshot(&format!(
        "models:\n{}  example/City:\n    properties:\n      country: string\n",
        COUNTRY_BY_CODE
    ));
    let level_3 = city_with("        type: ref\n        model: Country\n        refprops: [code]\n        level: 3\n");
    let plan = diff(&plain, &level_3);
    assert_eq!(names(&plan), ["AddColumn", "TransferData", "DropColumn"]);
    assert_eq!(
        plan.actions[1],
        Action::TransferData {
            sql: r#"UPDATE "public"."example/City" SET "country.code" = "country""#.into()
        }
    );
}

#[test]
fn test_ref_level_changes_follow_refprops() {
    let by_name_3 = city_with("        type: ref\n        model: Country\n        refprops: [name]\n        level: 3\n");
    let by_name_4 = city_with("        type: ref\n        model: Country\n        refprops: [name]\n");

    let plan = diff(&by_name_3, &by_name_4);
    assert_eq!(
        names(&plan),
        ["AddColumn", "TransferData", "AddConstraint", "AddIndex", "DropColumn"]
    );
    assert_eq!(
        plan.actions[1],
        Action::TransferData {
            sql: r#"UPDATE "public"."example/City" AS t SET "country._id" = r."_id" FROM "public"."example/Country" AS r WHERE t."country.name" = r."name""#.into()
        }
    );

    let plan = diff(&by_name_4, &by_name_3);
    assert_eq!(
        names(&plan),
        ["DropConstraint", "DropIndex", "AddColumn", "TransferData", "DropColumn"]
    );
    assert_eq!(
        plan.actions[3],
        Action::TransferData {
            sql: r#"UPDATE "public"."example/City" AS t SET "country.name" = r."name" FROM "public"."example/Country" AS r WHERE t."country._id" = r."_id""#.into()
        }
    );
}

#[test]
fn test_renamed_model_uses_stored_sequence_name() {
    let renames = RenameMap::parse(r#"{"example/Old": {"": "example/New"}}"#).unwrap();
    let mut old = snapshot("models:\n  example/Old:\n    properties:\n      title: string\n");
    let changelog = table_mut(&mut old, "example/Old/:changelog");
    for column in changelog.columns.iter_mut().filter(|c| c.name == "_id") {
        column.sequence = Some("example/Old/:changelog__id_se".into());
    }
    let new = snapshot("models:\n  example/New:\n    properties:\n      title: string\n");

    let namer = Namer::default();
    let plan = Differ::new(&namer, "public")
        .with_renames(&renames)
        .diff(&old, &new)
        .unwrap();
    let sequences: Vec<&Action> = plan
        .actions
        .iter()
        .filter(|action| matches!(action, Action::RenameSequence { .. }))
        .collect();
    assert_eq!(
        sequences,
        [&Action::RenameSequence {
            from: "example/Old/:changelog__id_se".into(),
            to: "example/New/:changelog__id_seq".into(),
        }]
    );
}
