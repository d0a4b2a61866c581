use chartsync_sync::{HttpTransport, RemoteConfig, RemoteTransport, WireRecord};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport(server: &MockServer, token: Option<&str>) -> HttpTransport {
    HttpTransport::new(RemoteConfig {
        base_url: format!("{}/api", server.uri()),
        api_token: token.map(str::to_string),
        timeout_secs: 5,
    })
    .unwrap()
}

fn wire(id: &str) -> WireRecord {
    let mut record = WireRecord::new();
    record.insert("id".into(), json!(id));
    record.insert("updatedAt".into(), json!("2024-01-01T00:00:00.000Z"));
    record
}

// ── Config ───────────────────────────────────────────────────────

#[test]
fn remote_config_defaults() {
    let config = RemoteConfig::default();
    assert_eq!(config.base_url, "http://localhost:8080/api");
    assert_eq!(config.api_token, None);
    assert_eq!(config.timeout_secs, 30);
}

#[test]
fn invalid_base_url_is_rejected() {
    let result = HttpTransport::new(RemoteConfig {
        base_url: "not a url".into(),
        ..Default::default()
    });
    assert!(result.is_err());

    let result = HttpTransport::new(RemoteConfig {
        base_url: "mailto:ops@example.org".into(),
        ..Default::default()
    });
    assert!(result.is_err());
}

// ── Pull ─────────────────────────────────────────────────────────

#[tokio::test]
async fn pull_returns_records() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tables/patients/records"))
        .and(header("authorization", "Bearer secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "data": [{"id": "p1", "updatedAt": "2024-01-01T00:00:00.000Z"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let response = transport(&server, Some("secret")).pull("patients").await;

    assert!(response.success);
    let data = response.data.unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["id"], "p1");
}

#[tokio::test]
async fn pull_folds_http_errors_into_response() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tables/patients/records"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "success": false,
            "error": "database locked"
        })))
        .mount(&server)
        .await;

    let response = transport(&server, None).pull("patients").await;

    assert!(!response.success);
    let error = response.error.unwrap();
    assert!(error.contains("500"), "{error}");
    assert!(error.contains("database locked"), "{error}");
}

#[tokio::test]
async fn pull_reports_application_level_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tables/vitals/records"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "error": "table missing"
        })))
        .mount(&server)
        .await;

    let response = transport(&server, None).pull("vitals").await;

    assert!(!response.success);
    assert_eq!(response.error.as_deref(), Some("table missing"));
}

#[tokio::test]
async fn unreachable_remote_is_not_an_error() {
    let server = MockServer::start().await;
    let transport = transport(&server, None);
    drop(server);

    let pull = transport.pull("patients").await;
    assert!(!pull.success);
    assert!(pull.error.is_some());

    assert!(!transport.health_check().await.healthy);
}

// ── Push ─────────────────────────────────────────────────────────

#[tokio::test]
async fn push_batch_posts_records() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/tables/patients/records/batch"))
        .and(body_json(json!({
            "records": [
                {"id": "p1", "updatedAt": "2024-01-01T00:00:00.000Z"},
                {"id": "p2", "updatedAt": "2024-01-01T00:00:00.000Z"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let response = transport(&server, None)
        .push_batch("patients", &[wire("p1"), wire("p2")])
        .await;

    assert!(response.success);
}

#[tokio::test]
async fn push_batch_failure_carries_status() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/tables/patients/records/batch"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let response = transport(&server, None)
        .push_batch("patients", &[wire("p1")])
        .await;

    assert!(!response.success);
    assert!(response.error.unwrap().contains("maintenance"));
}

#[tokio::test]
async fn upsert_one_puts_by_id() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/api/tables/notes/records/n-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let response = transport(&server, None).upsert_one("notes", &wire("n-1")).await;
    assert!(response.success);
}

#[tokio::test]
async fn upsert_without_id_fails_locally() {
    let server = MockServer::start().await;
    let response = transport(&server, None)
        .upsert_one("notes", &WireRecord::new())
        .await;
    assert!(!response.success);
}

// ── Health ───────────────────────────────────────────────────────

#[tokio::test]
async fn health_check_reads_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "healthy": true,
            "provider": "postgres"
        })))
        .mount(&server)
        .await;

    let health = transport(&server, None).health_check().await;
    assert!(health.healthy);
    assert_eq!(health.provider.as_deref(), Some("postgres"));
}

#[tokio::test]
async fn health_check_treats_errors_as_unhealthy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    assert!(!transport(&server, None).health_check().await.healthy);
}
