//! Integration test: register the fixture schema directory and validate
//! payloads against the loaded types.

use std::path::PathBuf;

use chorizo_core::{FieldType, SchemaDefinitionError};
use chorizo_schema::{load_file, Mode, SchemaValidator};
use serde_json::{json, Value};

fn fixtures() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures")
}

fn loaded() -> SchemaValidator {
    let mut validator = SchemaValidator::new().expect("meta-schema compiles");
    validator
        .load_dir(fixtures().join("schemas"))
        .expect("fixture schemas register");
    validator
}

#[test]
fn test_load_dir_registers_bases_before_subtypes() {
    let mut validator = SchemaValidator::new().unwrap();
    let order = validator.load_dir(fixtures().join("schemas")).unwrap();

    assert_eq!(order.len(), 3, "README.txt must be skipped");
    assert_eq!(order[0], "identity");
    assert!(order.contains(&"person".to_string()));
    assert!(order.contains(&"organization".to_string()));
}

#[test]
fn test_subtype_inherits_table_and_fields() {
    let validator = loaded();
    let person = validator.get("person").unwrap().schema().clone();

    assert_eq!(person.table(), "identity");
    assert_eq!(person.primary_key().unwrap().name.as_str(), "identity");
    let names: Vec<&str> = person.fields().iter().map(|f| f.name.as_str()).collect();
    assert_eq!(
        names,
        ["identity", "kind", "created_at", "settings", "given_name", "born_on", "avatar"]
    );
    assert_eq!(person.field("settings").unwrap().field_type, FieldType::Map);
}

#[test]
fn test_yaml_defaults_apply_on_create() {
    let validator = loaded();
    let record = validator
        .validate(
            "organization",
            &json!({"kind": "organization", "legal_name": "Acme"}),
            Mode::Create,
        )
        .unwrap();

    assert_eq!(record.get("headcount"), Some(&json!(1)));
    assert_eq!(record.get("verified"), Some(&json!(false)));
    assert_eq!(record.get("settings"), Some(&json!({})));
    assert_eq!(record.get("identity"), Some(&Value::Null));
}

#[test]
fn test_required_fields_across_inheritance() {
    let validator = loaded();
    let err = validator
        .validate("person", &json!({"born_on": "1990-01-01"}), Mode::Create)
        .unwrap_err();

    assert_eq!(err.reasons("kind").unwrap(), ["required field"]);
    assert_eq!(err.reasons("given_name").unwrap(), ["required field"]);
    assert_eq!(err.fields().len(), 2);
}

#[test]
fn test_broken_directory_fails_registration() {
    let mut validator = SchemaValidator::new().unwrap();
    let err = validator.load_dir(fixtures().join("broken")).unwrap_err();
    match err {
        SchemaDefinitionError::Malformed { schema, violations } => {
            assert_eq!(schema, "bad");
            assert!(violations
                .as_slice()
                .iter()
                .any(|v| v.path == "/fields/amount/type"));
        }
        other => panic!("expected Malformed, got {other}"),
    }
    assert!(validator.is_empty());
}

#[test]
fn test_missing_directory_is_a_load_error() {
    let mut validator = SchemaValidator::new().unwrap();
    let err = validator.load_dir(fixtures().join("does-not-exist")).unwrap_err();
    assert!(matches!(err, SchemaDefinitionError::Load { .. }));
}

#[test]
fn test_load_file_reads_json_and_yaml() {
    let json_def = load_file(&fixtures().join("schemas/person.schema.json")).unwrap();
    let yaml_def = load_file(&fixtures().join("schemas/identity.schema.yaml")).unwrap();
    assert_eq!(json_def["base"], json!("identity"));
    assert_eq!(yaml_def["fields"]["settings"]["type"], json!("dict"));
}
