mod blocking;
mod failover;
mod lists;

use indoc::indoc;
use integration_tests::{TestServer, summary};

#[tokio::test]
async fn quota_headers_count_down() {
    let config = indoc! {r#"
        [admission.policies.auth]
        path_prefix = "/auth"
        capacity = 3
    "#};

    let server = TestServer::start(config).await;

    let mut remaining = Vec::new();

    for _ in 0..3 {
        let response = server.client.get("/auth/login").await;
        assert_eq!(response.status(), 200);
        assert_eq!(response.headers()["x-ratelimit-limit"], "3");
        assert!(response.headers().get("x-ratelimit-reset").is_some());

        remaining.push(response.headers()["x-ratelimit-remaining"].to_str().unwrap().to_string());
    }

    assert_eq!(remaining, vec!["2", "1", "0"]);
}

#[tokio::test]
async fn categories_have_separate_buckets() {
    let config = indoc! {r#"
        [admission.policies.auth]
        path_prefix = "/auth"
        capacity = 1

        [admission.policies.clip]
        path_prefix = "/clip"
        capacity = 1
    "#};

    let server = TestServer::start(config).await;

    let auth = server.client.get("/auth").await;
    let clip = server.client.get("/clip").await;

    assert_eq!(auth.status(), 200);
    assert_eq!(clip.status(), 200);
}

#[tokio::test]
async fn unmatched_paths_use_the_default_policy() {
    let config = indoc! {r#"
        [admission.default_policy]
        capacity = 7
    "#};

    let server = TestServer::start(config).await;

    let response = server.client.get("/profile").await;
    assert_eq!(response.headers()["x-ratelimit-limit"], "7");
}

#[tokio::test]
async fn global_limit_overloads() {
    let config = indoc! {r#"
        [admission]
        global_limit = 2
    "#};

    let server = TestServer::start(config).await;

    let mut results = Vec::new();

    for _ in 0..3 {
        let response = server.client.get("/clip").await;
        results.push(summary(response).await["status"].clone());
    }

    insta::assert_json_snapshot!(results, @r#"
    [
      200,
      200,
      503
    ]
    "#);

    let response = server.client.get("/clip").await;

    insta::assert_json_snapshot!(summary(response).await, @r#"
    {
      "body": {
        "error": "Server overloaded, try later",
        "type": "overloaded"
      },
      "remaining": null,
      "retry_after": null,
      "status": 503
    }
    "#);
}

#[tokio::test]
async fn disabled_admission_forwards_everything() {
    let config = indoc! {r#"
        [admission]
        enabled = false
        deny_list = ["127.0.0.1"]
    "#};

    let server = TestServer::start(config).await;

    for _ in 0..30 {
        let response = server.client.get("/auth").await;
        assert_eq!(response.status(), 200);
        assert!(response.headers().get("x-ratelimit-limit").is_none());
    }
}
