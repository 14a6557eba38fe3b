use indoc::indoc;
use integration_tests::{TestServer, access_token};
use serde_json::json;

const SECRET: &str = "integration-secret";

fn config(extra: &str) -> String {
    let base = indoc! {r#"
        [identity]
        jwt_secret = "integration-secret"

        [admission.policies.auth]
        path_prefix = "/auth"
        capacity = 1
    "#};

    format!("{base}{extra}")
}

#[tokio::test]
async fn principals_have_their_own_quota() {
    let server = TestServer::start(&config("")).await;

    let alice = access_token(SECRET, json!({ "userId": "alice" }));
    let bob = access_token(SECRET, json!({ "userId": "bob" }));

    assert_eq!(server.client.get_as("/auth", &alice).await.status(), 200);
    assert_eq!(server.client.get_as("/auth", &alice).await.status(), 429);

    // Same address, different principal.
    assert_eq!(server.client.get_as("/auth", &bob).await.status(), 200);

    // Anonymous requests are keyed by the address, which has not been limited yet.
    assert_eq!(server.client.get("/auth").await.status(), 200);
}

#[tokio::test]
async fn invalid_tokens_share_the_address_quota() {
    let server = TestServer::start(&config("")).await;

    let forged = access_token("wrong-secret", json!({ "userId": "alice" }));

    assert_eq!(server.client.get_as("/auth", &forged).await.status(), 200);
    assert_eq!(server.client.get_as("/auth", "garbage").await.status(), 429);
    assert_eq!(server.client.get("/auth").await.status(), 429);
}

#[tokio::test]
async fn bearer_tokens_identify_principals() {
    let server = TestServer::start(&config("")).await;
    let alice = access_token(SECRET, json!({ "userId": "alice" }));

    for expected in [200, 429] {
        let response = server
            .client
            .request(reqwest::Method::GET, "/auth")
            .bearer_auth(&alice)
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), expected);
    }

    // The envelope header resolves to the same principal.
    assert_eq!(server.client.get_as("/auth", &alice).await.status(), 429);
}

#[tokio::test]
async fn unknown_principals_are_keyed_by_address() {
    let config = indoc! {r#"
        [identity]
        jwt_secret = "integration-secret"
        principals = ["alice"]

        [admission.policies.auth]
        path_prefix = "/auth"
        capacity = 1
    "#};

    let server = TestServer::start(config).await;

    let alice = access_token(SECRET, json!({ "userId": "alice" }));
    let mallory = access_token(SECRET, json!({ "userId": "mallory" }));

    assert_eq!(server.client.get_as("/auth", &mallory).await.status(), 200);
    assert_eq!(server.client.get("/auth").await.status(), 429);
    assert_eq!(server.client.get_as("/auth", &alice).await.status(), 200);
}

#[tokio::test]
async fn principals_can_be_deny_listed() {
    let extra = indoc! {r#"
        [admission]
        deny_list = ["mallory"]
    "#};

    let server = TestServer::start(&config(extra)).await;
    let mallory = access_token(SECRET, json!({ "userId": "mallory" }));

    let response = server.client.get_as("/auth", &mallory).await;
    assert_eq!(response.status(), 429);

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["type"], "blacklisted");

    assert_eq!(server.client.get("/auth").await.status(), 200);
}
