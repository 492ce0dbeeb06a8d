//! Integration tests for the config crate

use docflow_config::{
    collect_validation_errors, validate_config, AppConfig, ConfigError, ConfigLoader, Environment,
};
use std::io::Write;
use std::path::PathBuf;

fn deploy_config(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("../../config")
        .join(name)
}

#[test]
fn test_load_local_config() {
    let config = ConfigLoader::from_file(&deploy_config("local.toml"))
        .expect("Failed to load local config");

    assert_eq!(config.service.environment, Environment::Local);
    assert_eq!(config.service.log_level, "debug");
    assert_eq!(config.database.url, "sqlite::memory:");
    assert_eq!(config.cascade.hold_terminal_hours, 4);
    // Keywords fall back to the built-in list
    assert_eq!(config.hold_detection.keywords.len(), 8);
    assert!(validate_config(&config).is_ok());
}

#[test]
fn test_load_production_config() {
    let config = ConfigLoader::from_file(&deploy_config("production.toml"))
        .expect("Failed to load production config");

    assert_eq!(config.service.environment, Environment::Production);
    assert!(config.service.log_json);
    assert_eq!(config.cascade.hold_terminal_hours, 7 * 24);
    assert_eq!(config.cascade.final_approval_timeout_hours, 21 * 24);
    assert_eq!(config.refund.final_approval_refund_pct, 50);
    assert!(validate_config(&config).is_ok());
}

#[test]
fn test_production_matches_defaults_for_business_rules() {
    let config = ConfigLoader::from_file(&deploy_config("production.toml")).unwrap();
    let defaults = AppConfig::default();

    assert_eq!(config.workflow, defaults.workflow);
    assert_eq!(config.hold_detection, defaults.hold_detection);
    assert_eq!(config.cascade, defaults.cascade);
    assert_eq!(config.refund, defaults.refund);
}

#[test]
fn test_config_validation_reports_every_field() {
    let toml = r#"
[workflow]
passing_score = 120.0
max_revision_loops = 5

[cascade]
hold_reminder_hours = 100
hold_escalation_hours = 50
hold_terminal_hours = 40
    "#;

    let config = ConfigLoader::from_toml(toml).unwrap();
    let errors = collect_validation_errors(&config);
    let fields: Vec<_> = errors.iter().map(|e| e.field.as_str()).collect();

    assert!(fields.contains(&"workflow.passing_score"));
    assert!(fields.contains(&"workflow.max_revision_loops"));
    assert!(fields.contains(&"cascade.hold_escalation_hours"));
    assert!(fields.contains(&"cascade.hold_terminal_hours"));

    match validate_config(&config) {
        Err(ConfigError::ValidationError(msg)) => {
            assert!(msg.contains("workflow.passing_score"));
            assert!(msg.contains("; "));
        }
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn test_malformed_toml_is_a_parse_error() {
    let result = ConfigLoader::from_toml("[workflow\npassing_score = ");
    assert!(matches!(result, Err(ConfigError::TomlError(_))));
}

#[test]
fn test_file_with_env_overrides() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        r#"
[workflow]
passing_score = 80.0

[recovery]
batch_size = 25
"#
    )
    .unwrap();

    // Unique prefix so parallel tests never see each other's variables
    std::env::set_var("DOCFLOWTEST_WORKFLOW__PASSING_SCORE", "91.5");
    std::env::set_var("DOCFLOWTEST_RECOVERY__ENABLED", "false");

    let config = ConfigLoader::from_file_with_env(file.path(), "DOCFLOWTEST").unwrap();

    std::env::remove_var("DOCFLOWTEST_WORKFLOW__PASSING_SCORE");
    std::env::remove_var("DOCFLOWTEST_RECOVERY__ENABLED");

    assert_eq!(config.workflow.passing_score, 91.5);
    assert!(!config.recovery.enabled);
    // Untouched keys keep the file's value
    assert_eq!(config.recovery.batch_size, 25);
    assert_eq!(config.workflow.max_revision_loops, 3);
}

#[test]
fn test_missing_file_with_env() {
    let result = ConfigLoader::from_file_with_env(
        &deploy_config("does-not-exist.toml"),
        "DOCFLOWMISSING",
    );
    assert!(matches!(result, Err(ConfigError::LoadError(_))));
}

#[test]
fn test_config_builder_layers() {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    writeln!(
        file,
        r#"
service:
  name: docflow-batch
effects:
  max_attempts: 4
"#
    )
    .unwrap();

    let config = ConfigLoader::builder()
        .set_default("refund.final_approval_refund_pct", "25")
        .unwrap()
        .add_file(file.path(), true)
        .unwrap()
        .build()
        .unwrap();

    assert_eq!(config.service.name, "docflow-batch");
    assert_eq!(config.effects.max_attempts, 4);
    assert_eq!(config.refund.final_approval_refund_pct, 25);
}

#[test]
fn test_default_values() {
    let config = AppConfig::default();

    assert_eq!(config.service.name, "docflow");
    assert_eq!(config.service.environment, Environment::Local);
    assert_eq!(config.workflow.passing_score, 87.0);
    assert_eq!(config.workflow.max_revision_loops, 3);
    assert_eq!(config.hold_detection.min_keyword_matches, 2);
    assert_eq!(config.cascade.hold_reminder_hours, 24);
    assert_eq!(config.cascade.hold_escalation_hours, 72);
    assert_eq!(config.cascade.external_review_timeout_hours, 168);
    assert_eq!(config.refund.hold_timeout_refund_pct, 100);
    assert_eq!(config.recovery.safety_margin_hours, 24);
}
