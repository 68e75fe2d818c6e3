use imposter_harness::{
    BuildOptions, HarnessError, Method, MockManager, MockStatus, PluginConfig, PluginKind,
    ValidationLevel, DEFAULT_CONFIG_FILE_NAME,
};
use serde_json::json;

fn rest_builder(manager: &MockManager) -> imposter_harness::MockBuilder {
    manager
        .builder()
        .and_then(|builder| builder.with_plugin("rest"))
        .expect("builder")
}

#[test]
fn plugin_is_fixed_once_chosen() {
    let manager = MockManager::new();
    let builder = rest_builder(&manager)
        .with_plugin("rest")
        .expect("same plugin again is fine");

    let err = builder.with_plugin("openapi").expect_err("plugin conflict");
    match err {
        HarnessError::PluginConflict { current, requested } => {
            assert_eq!(current, PluginKind::Rest);
            assert_eq!(requested, PluginKind::OpenApi);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[test]
fn unknown_plugin_is_rejected() {
    let manager = MockManager::new();
    let err = manager
        .builder()
        .expect("builder")
        .with_plugin("graphql")
        .expect_err("unknown plugin");
    assert!(matches!(err, HarnessError::UnknownPlugin(name) if name == "graphql"));
}

#[test]
fn document_requires_a_plugin() {
    let manager = MockManager::new();
    let builder = manager.builder().expect("builder");
    assert!(matches!(builder.document(), Err(HarnessError::MissingPlugin)));
    assert!(matches!(builder.build(), Err(HarnessError::MissingPlugin)));
}

#[test]
fn resources_serialize_to_engine_format() {
    let manager = MockManager::new();
    let mut builder = rest_builder(&manager);
    let mut users = builder.add_resource("/users/{userName}", Method::Post);
    users.captures().from_path("userName");
    users
        .responds(201)
        .with_template_data("${request.userName} registered");
    builder
        .add_resource("/health", Method::Get)
        .responds(204)
        .with_header("X-Mock", "yes");

    let document = serde_json::to_value(builder.document().expect("valid")).expect("json");
    assert_eq!(
        document,
        json!({
            "plugin": "rest",
            "resources": [
                {
                    "path": "/users/{userName}",
                    "method": "POST",
                    "capture": { "userName": { "pathParam": "userName" } },
                    "response": {
                        "statusCode": 201,
                        "staticData": "${request.userName} registered",
                        "template": true
                    }
                },
                {
                    "path": "/health",
                    "method": "GET",
                    "response": { "statusCode": 204, "headers": { "X-Mock": "yes" } }
                }
            ]
        })
    );
}

#[test]
fn capture_sources_and_stores_serialize() {
    let manager = MockManager::new();
    let mut builder = rest_builder(&manager);
    builder
        .add_resource("/orders", Method::Put)
        .captures()
        .from_query("region")
        .from_header("X-Trace")
        .from_body_json_path("$.id")
        .capture(
            "customer",
            imposter_harness::CaptureSource::PathParam("customer".to_string()),
            Some("customers"),
        );

    let document = serde_json::to_value(builder.document().expect("valid")).expect("json");
    assert_eq!(
        document["resources"][0]["capture"],
        json!({
            "region": { "queryParam": "region" },
            "X-Trace": { "requestHeader": "X-Trace" },
            "body": { "jsonPath": "$.id" },
            "customer": { "pathParam": "customer", "store": "customers" }
        })
    );
}

#[test]
fn built_file_matches_document() {
    let manager = MockManager::new();
    let mut builder = rest_builder(&manager).with_port(8443);
    builder
        .add_resource("/example", Method::Get)
        .responds(200)
        .with_file("response.json")
        .template(false);
    let document = builder.document().expect("valid");

    let mock = builder
        .build_with(BuildOptions { log_config: true })
        .expect("build");
    let written = PluginConfig::read_from(&mock.config_dir().join(DEFAULT_CONFIG_FILE_NAME))
        .expect("written config parses");
    assert_eq!(written, document);

    assert_eq!(mock.status(), MockStatus::Configured);
    assert_eq!(mock.port(), Some(8443));
    assert_eq!(mock.base_url().expect("fixed port"), "http://localhost:8443");
    assert_eq!(manager.mocks().len(), 1);
}

#[test]
fn base_url_needs_a_port() {
    let manager = MockManager::new();
    let mock = rest_builder(&manager).build().expect("build");
    assert!(matches!(mock.base_url(), Err(HarnessError::PortNotAssigned)));
}

#[test]
fn config_dir_is_removed_with_the_last_handle() {
    let manager = MockManager::new();
    let mock = rest_builder(&manager).build().expect("build");
    let dir = mock.config_dir().to_path_buf();
    assert!(dir.join(DEFAULT_CONFIG_FILE_NAME).is_file());

    drop(mock);
    drop(manager);
    assert!(!dir.exists());
}

#[test]
fn raw_config_replaces_document() {
    let manager = MockManager::new();
    let mut builder = rest_builder(&manager);
    builder.add_resource("/discarded", Method::Get);

    let builder = builder
        .with_raw_config(json!({
            "plugin": "rest",
            "resources": [{
                "path": "/example",
                "method": "POST",
                "response": { "statusCode": 201, "staticData": "Hello world" }
            }]
        }))
        .expect("raw config");
    let document = builder.document().expect("valid");
    assert_eq!(document.resources.len(), 1);
    assert_eq!(document.resources[0].path, "/example");
    assert_eq!(document.resources[0].method, Method::Post);
}

#[test]
fn malformed_raw_config_is_rejected() {
    let cases = [
        (json!({ "resources": [] }), "missing plugin"),
        (json!({ "plugin": 7 }), "non-string plugin"),
        (json!({ "plugin": "graphql" }), "unknown plugin"),
        (json!({ "plugin": "rest", "resources": [{ "path": "no-slash" }] }), "relative path"),
        (
            json!({ "plugin": "rest", "resources": [{ "path": "/x", "response": { "statusCode": 42 } }] }),
            "bad status",
        ),
        (json!({ "plugin": "rest", "specFile": "api.yaml" }), "specFile without openapi"),
        (json!({ "plugin": "rest", "resources": "nope" }), "wrong shape"),
        (
            json!({ "plugin": "rest", "resources": [{
                "path": "/a",
                "response": { "staticData": "inline", "staticFile": "file.txt" }
            }] }),
            "two body sources",
        ),
        (
            json!({ "plugin": "rest", "resources": [{
                "path": "/a",
                "response": { "staticData": "inline", "contentType": "text/csv" }
            }] }),
            "unknown response key",
        ),
        (json!({ "plugin": "rest", "system": { "stores": {} } }), "unknown top-level key"),
        (
            json!({ "plugin": "rest", "resources": [{ "path": "/a", "scriptFile": "x.groovy" }] }),
            "unknown resource key",
        ),
        (
            json!({ "plugin": "rest", "resources": [{
                "path": "/a",
                "capture": { "id": { "pathParam": "id", "queryParam": "id" } }
            }] }),
            "two capture sources",
        ),
    ];

    let manager = MockManager::new();
    for (config, case) in cases {
        let result = manager
            .builder()
            .expect("builder")
            .with_raw_config(config);
        assert!(result.is_err(), "{case} should be rejected");
    }
}

#[test]
fn raw_config_is_never_silently_trimmed() {
    let manager = MockManager::new();
    let err = manager
        .builder()
        .expect("builder")
        .with_raw_config(json!({
            "plugin": "rest",
            "resources": [{
                "path": "/a",
                "response": {
                    "staticData": "inline",
                    "staticFile": "file.txt",
                    "contentType": "text/csv",
                    "scriptFile": "x.groovy"
                }
            }],
            "system": { "stores": {} }
        }))
        .expect_err("document would lose keys");
    assert!(matches!(err, HarnessError::InvalidConfig(_)), "got {err:?}");

    let err = manager
        .builder()
        .expect("builder")
        .with_raw_config(json!({
            "plugin": "rest",
            "resources": [{ "path": "/a", "response": { "staticData": "a", "exampleName": "b" } }]
        }))
        .expect_err("ambiguous body");
    match err {
        HarnessError::InvalidConfig(message) => assert!(message.contains("more than one"), "{message}"),
        other => panic!("expected invalid config, got {other:?}"),
    }
}

#[test]
fn example_name_needs_openapi() {
    let manager = MockManager::new();
    let mut builder = rest_builder(&manager);
    builder
        .add_resource("/pets", Method::Get)
        .responds(200)
        .with_example_name("cat");
    assert!(matches!(
        builder.document(),
        Err(HarnessError::InvalidConfig(_))
    ));
}

#[test]
fn open_api_spec_is_copied_next_to_config() {
    let source = tempfile::tempdir().expect("tempdir");
    let spec_path = source.path().join("petstore.yaml");
    std::fs::write(&spec_path, "openapi: 3.0.0\n").expect("write spec");

    let manager = MockManager::new();
    let builder = manager
        .builder()
        .and_then(|builder| builder.with_open_api_spec(&spec_path))
        .and_then(|builder| builder.with_request_validation())
        .expect("openapi builder");

    assert!(builder.config_dir().join("petstore.yaml").is_file());
    let document = serde_json::to_value(builder.document().expect("valid")).expect("json");
    assert_eq!(
        document,
        json!({
            "plugin": "openapi",
            "specFile": "petstore.yaml",
            "validation": {
                "request": true,
                "levels": {
                    "validation.request.security.invalid": "WARN",
                    "validation.request.security.missing": "WARN"
                }
            }
        })
    );

    assert!(matches!(
        builder.with_plugin("rest"),
        Err(HarnessError::PluginConflict { .. })
    ));
}

#[test]
fn validation_levels_are_configurable() {
    let manager = MockManager::new();
    let builder = manager
        .builder()
        .and_then(|builder| {
            builder.with_request_validation_levels(ValidationLevel::Error, ValidationLevel::Ignore)
        })
        .expect("builder");
    let document = builder.document().expect("valid");
    assert_eq!(document.plugin, PluginKind::OpenApi);

    let levels = document.validation.expect("validation").levels;
    assert_eq!(
        levels.get(imposter_harness::SECURITY_MISSING_LEVEL),
        Some(&ValidationLevel::Error)
    );
    assert_eq!(
        levels.get(imposter_harness::SECURITY_INVALID_LEVEL),
        Some(&ValidationLevel::Ignore)
    );
}

#[test]
fn request_validation_conflicts_with_rest() {
    let manager = MockManager::new();
    let err = rest_builder(&manager)
        .with_request_validation()
        .expect_err("validation requires openapi");
    assert!(matches!(err, HarnessError::PluginConflict { .. }));
}

#[test]
fn missing_open_api_spec_is_an_io_error() {
    let manager = MockManager::new();
    let err = manager
        .builder()
        .and_then(|builder| builder.with_open_api_spec("/nonexistent/petstore.yaml"))
        .expect_err("spec file is missing");
    assert!(matches!(err, HarnessError::Io(_)), "got {err:?}");
}
