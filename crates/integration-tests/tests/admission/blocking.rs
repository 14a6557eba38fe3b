use indoc::indoc;
use integration_tests::{TestServer, summary};

#[tokio::test]
async fn exhausted_quota_blocks_for_fifteen_minutes() {
    let config = indoc! {r#"
        [admission.policies.auth]
        path_prefix = "/auth"
        capacity = 2
    "#};

    let server = TestServer::start(config).await;

    let mut results = Vec::new();

    for _ in 0..4 {
        let response = server.client.get("/auth/login").await;
        results.push(summary(response).await);
    }

    insta::assert_json_snapshot!(results, @r#"
    [
      {
        "body": "upstream",
        "remaining": "1",
        "retry_after": null,
        "status": 200
      },
      {
        "body": "upstream",
        "remaining": "0",
        "retry_after": null,
        "status": 200
      },
      {
        "body": {
          "error": "Rate limit exceeded for auth. You are blocked for 15 min",
          "remainingMinutes": 15,
          "type": "temporary"
        },
        "remaining": null,
        "retry_after": "900",
        "status": 429
      },
      {
        "body": {
          "error": "You are temporarily blocked for 15 min",
          "remainingMinutes": 15,
          "type": "temporary"
        },
        "remaining": null,
        "retry_after": "900",
        "status": 429
      }
    ]
    "#);
}

#[tokio::test]
async fn block_covers_every_category() {
    let config = indoc! {r#"
        [admission.policies.auth]
        path_prefix = "/auth"
        capacity = 1
    "#};

    let server = TestServer::start(config).await;

    assert_eq!(server.client.get("/auth").await.status(), 200);
    assert_eq!(server.client.get("/auth").await.status(), 429);

    // The default category still has tokens, but the client is blocked.
    let response = server.client.get("/profile").await;
    assert_eq!(response.status(), 429);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["type"], "temporary");
}
