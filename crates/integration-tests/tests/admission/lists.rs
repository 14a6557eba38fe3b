use indoc::indoc;
use integration_tests::{TestServer, summary};

#[tokio::test]
async fn deny_listed_client_is_rejected() {
    let config = indoc! {r#"
        [admission]
        deny_list = ["127.0.0.1"]
    "#};

    let server = TestServer::start(config).await;
    let response = server.client.get("/clip").await;

    insta::assert_json_snapshot!(summary(response).await, @r#"
    {
      "body": {
        "error": "Access denied",
        "type": "blacklisted"
      },
      "remaining": null,
      "retry_after": null,
      "status": 429
    }
    "#);
}

#[tokio::test]
async fn allow_listed_client_is_never_limited() {
    let config = indoc! {r#"
        [admission]
        global_limit = 1
        allow_list = ["127.0.0.1"]

        [admission.policies.auth]
        path_prefix = "/auth"
        capacity = 1
    "#};

    let server = TestServer::start(config).await;

    for _ in 0..10 {
        let response = server.client.get("/auth").await;

        assert_eq!(response.status(), 200);
        assert!(response.headers().get("x-ratelimit-limit").is_none());
    }
}

#[tokio::test]
async fn allow_list_wins_over_deny_list() {
    let config = indoc! {r#"
        [admission]
        allow_list = ["127.0.0.1"]
        deny_list = ["127.0.0.1"]
    "#};

    let server = TestServer::start(config).await;

    assert_eq!(server.client.get("/auth").await.status(), 200);
}
