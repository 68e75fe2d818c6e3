#![cfg(feature = "test-support")]

#[path = "mock_support.rs"]
mod support;

use imposter_harness::Method;
use serde_json::json;
use support::{client, manager};

#[tokio::test]
async fn path_parameter_is_rendered_into_response() {
    let manager = manager();
    let mut builder = manager
        .builder()
        .and_then(|builder| builder.with_plugin("rest"))
        .expect("builder");
    let mut users = builder.add_resource("/users/{userName}", Method::Post);
    users.captures().from_path("userName");
    users
        .responds(201)
        .with_template_data("${request.userName} registered");
    let mock = builder.start().await.expect("mock should start");

    let response = client()
        .post(format!("{}/users/alice", mock.base_url().expect("port")))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status().as_u16(), 201);
    assert_eq!(response.text().await.expect("body"), "alice registered");

    manager.stop_all();
}

#[tokio::test]
async fn raw_configuration_is_served() {
    let manager = manager();
    let mock = manager
        .builder()
        .and_then(|builder| {
            builder.with_raw_config(json!({
                "plugin": "rest",
                "resources": [{
                    "path": "/example",
                    "method": "POST",
                    "response": { "statusCode": 201, "staticData": "Hello world" }
                }]
            }))
        })
        .expect("raw config accepted")
        .start()
        .await
        .expect("mock should start");

    let response = client()
        .post(format!("{}/example", mock.base_url().expect("port")))
        .send()
        .await
        .expect("request");
    assert_eq!(response.status().as_u16(), 201);
    assert_eq!(response.text().await.expect("body"), "Hello world");

    manager.stop_all();
}

#[tokio::test]
async fn concurrent_mocks_get_distinct_free_ports() {
    let manager = manager();
    let first = manager
        .builder()
        .and_then(|builder| builder.with_plugin("rest"))
        .expect("builder")
        .start()
        .await
        .expect("first mock");
    let second = manager
        .builder()
        .and_then(|builder| builder.with_plugin("rest"))
        .expect("builder")
        .start()
        .await
        .expect("second mock");

    assert_ne!(first.port(), second.port());
    assert_ne!(first.config_dir(), second.config_dir());
    manager.stop_all();
}

#[tokio::test]
async fn explicit_port_is_used() {
    let port = imposter_harness::assign_free_port().expect("free port");
    let manager = manager();
    let mock = manager
        .builder()
        .and_then(|builder| builder.with_plugin("rest"))
        .expect("builder")
        .with_port(port)
        .start()
        .await
        .expect("mock should start");

    assert_eq!(mock.base_url().expect("port"), format!("http://localhost:{port}"));
    manager.stop_all();
}

#[tokio::test]
async fn query_header_and_body_captures_feed_templates() {
    let manager = manager();
    let mut builder = manager
        .builder()
        .and_then(|builder| builder.with_plugin("rest"))
        .expect("builder");

    let mut orders = builder.add_resource("/orders", Method::Put);
    orders
        .captures()
        .from_query("region")
        .from_header("X-Trace")
        .from_body_json_path("$.order.id");
    orders
        .responds(202)
        .with_header("Content-Type", "text/plain")
        .with_template_data("${request.region}/${request.X-Trace}/${request.body}");
    let mock = builder.start().await.expect("mock should start");

    let response = client()
        .put(format!("{}/orders?region=eu", mock.base_url().expect("port")))
        .header("X-Trace", "abc")
        .body(r#"{"order":{"id":42}}"#)
        .send()
        .await
        .expect("request");
    assert_eq!(response.status().as_u16(), 202);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok()),
        Some("text/plain")
    );
    assert_eq!(response.text().await.expect("body"), "eu/abc/42");

    manager.stop_all();
}

#[tokio::test]
async fn named_store_outlives_the_request() {
    let manager = manager();
    let mut builder = manager
        .builder()
        .and_then(|builder| builder.with_plugin("rest"))
        .expect("builder");

    builder
        .add_resource("/session", Method::Post)
        .captures()
        .from_body_json_path_into("$.user", "user", Some("session"));
    builder
        .add_resource("/whoami", Method::Get)
        .responds(200)
        .with_template_data("hello ${session.user}");
    let mock = builder.start().await.expect("mock should start");
    let base_url = mock.base_url().expect("port");

    client()
        .post(format!("{base_url}/session"))
        .body(r#"{"user":"bob"}"#)
        .send()
        .await
        .expect("login");
    let body = client()
        .get(format!("{base_url}/whoami"))
        .send()
        .await
        .expect("request")
        .text()
        .await
        .expect("body");
    assert_eq!(body, "hello bob");

    manager.stop_all();
}

#[tokio::test]
async fn static_file_is_read_from_config_dir() {
    let manager = manager();
    let mut builder = manager
        .builder()
        .and_then(|builder| builder.with_plugin("rest"))
        .expect("builder");
    std::fs::write(builder.config_dir().join("greeting.txt"), "hi from file").expect("write");
    builder
        .add_resource("/greeting", Method::Get)
        .responds(200)
        .with_file("greeting.txt");
    let mock = builder.start().await.expect("mock should start");

    let body = client()
        .get(format!("{}/greeting", mock.base_url().expect("port")))
        .send()
        .await
        .expect("request")
        .text()
        .await
        .expect("body");
    assert_eq!(body, "hi from file");

    manager.stop_all();
}
