//! Redis pointed at a closed port: every decision is made on local state.

use indoc::indoc;
use integration_tests::{TestServer, summary};

const UNREACHABLE_REDIS: &str = indoc! {r#"
    [admission.storage]
    type = "redis"
    url = "redis://127.0.0.1:1/0"
    response_timeout = "500ms"
    connection_timeout = "200ms"
    recovery_interval = "1h"

    [admission.policies.auth]
    path_prefix = "/auth"
    capacity = 2
"#};

#[tokio::test]
async fn unreachable_store_does_not_fail_requests() {
    let server = TestServer::start(UNREACHABLE_REDIS).await;

    let mut statuses = Vec::new();

    for _ in 0..3 {
        let response = server.client.get("/auth").await;
        statuses.push(summary(response).await["status"].clone());
    }

    insta::assert_json_snapshot!(statuses, @r#"
    [
      200,
      200,
      429
    ]
    "#);
}

#[tokio::test]
async fn unreachable_store_reports_degraded_health() {
    let server = TestServer::start(UNREACHABLE_REDIS).await;

    // Health is optimistic until the store has been tried.
    let response = server.client.get("/health").await;
    insta::assert_snapshot!(response.text().await.unwrap(), @r#"{"status":"healthy"}"#);

    assert_eq!(server.client.get("/auth").await.status(), 200);

    let response = server.client.get("/health").await;
    assert_eq!(response.status(), 200);
    insta::assert_snapshot!(response.text().await.unwrap(), @r#"{"status":"degraded"}"#);
}
