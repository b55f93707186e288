//! Table-driven tests for configuration loading and validation.

mod common;

use folio::config::{load_config, load_config_from_str};
use folio::Folio;

use common::TestHarness;

struct ConfigTestCase {
    name: &'static str,
    config_json: &'static str,
    should_succeed: bool,
    expected_error: Option<&'static str>,
}

const CONFIG_TESTS: &[ConfigTestCase] = &[
    ConfigTestCase {
        name: "valid_minimal",
        config_json: r#"{
            "version": "1.0",
            "storage_directory": "/srv/folio",
            "database_path": "/srv/folio/folio.db"
        }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "valid_full",
        config_json: r#"{
            "version": "1.0",
            "storage_directory": "/srv/folio",
            "database_path": "/srv/folio/folio.db",
            "worker_count": 4,
            "queue_capacity": 64,
            "max_attempts": 5,
            "retry_backoff_ms": 50,
            "thumbnail": { "width": 120, "height": 160 },
            "cache": { "default_ttl_secs": 600, "search_ttl_secs": 60, "max_capacity": 500 },
            "search": { "snippet_length": 150, "default_per_page": 10 },
            "logging": { "level": "debug", "json": true }
        }"#,
        should_succeed: true,
        expected_error: None,
    },
    ConfigTestCase {
        name: "wrong_version",
        config_json: r#"{ "version": "2.0", "storage_directory": "/srv/folio" }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "missing_storage_directory",
        config_json: r#"{ "version": "1.0" }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "zero_workers",
        config_json: r#"{
            "version": "1.0",
            "storage_directory": "/srv/folio",
            "worker_count": 0
        }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "unknown_field",
        config_json: r#"{
            "version": "1.0",
            "storage_directory": "/srv/folio",
            "input_directory": "/input"
        }"#,
        should_succeed: false,
        expected_error: Some("Schema validation failed"),
    },
    ConfigTestCase {
        name: "search_ttl_outlives_default",
        config_json: r#"{
            "version": "1.0",
            "storage_directory": "/srv/folio",
            "database_path": "/srv/folio/folio.db",
            "cache": { "default_ttl_secs": 60, "search_ttl_secs": 600 }
        }"#,
        should_succeed: false,
        expected_error: Some("exceeds cache.default_ttl_secs"),
    },
    ConfigTestCase {
        name: "not_json",
        config_json: "version: 1.0",
        should_succeed: false,
        expected_error: Some("Failed to parse config JSON"),
    },
];

#[test]
fn test_config_table() {
    for case in CONFIG_TESTS {
        let result = load_config_from_str(case.config_json);
        match (result, case.should_succeed) {
            (Ok(_), true) => {}
            (Err(e), false) => {
                if let Some(expected) = case.expected_error {
                    assert!(
                        e.to_string().contains(expected),
                        "[{}] expected error containing '{}', got '{}'",
                        case.name,
                        expected,
                        e
                    );
                }
            }
            (Ok(_), false) => panic!("[{}] expected failure, config loaded", case.name),
            (Err(e), true) => panic!("[{}] expected success, got '{}'", case.name, e),
        }
    }
}

#[test]
fn test_loaded_file_starts_service() {
    let harness = TestHarness::new();
    let config_path = harness.path().join("folio.json");
    let json = serde_json::json!({
        "version": "1.0",
        "storage_directory": harness.path().join("blobs"),
        "database_path": harness.path().join("db").join("folio.db"),
        "worker_count": 1,
    });
    std::fs::write(&config_path, json.to_string()).unwrap();

    let config = load_config(&config_path).unwrap();
    assert_eq!(config.worker_count, 1);

    let service = Folio::open(&config).unwrap();
    assert!(service.orchestrator().health().healthy);
    assert!(harness.path().join("db").join("folio.db").exists());
    service.shutdown();
}
