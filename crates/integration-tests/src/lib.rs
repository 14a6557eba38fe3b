use std::net::SocketAddr;
use std::time::Duration;

use axum::{Router, routing::any};
use config::Config;
use jwt_compact::{
    AlgorithmExt, Claims, Header,
    alg::{Hs256, Hs256Key},
};
use server::ServeConfig;
use tokio::net::{TcpListener, TcpStream};

/// Test client for making HTTP requests to the test server
pub struct TestClient {
    base_url: String,
    client: reqwest::Client,
}

impl TestClient {
    /// Create a new test client for the given base URL
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            client: reqwest::Client::new(),
        }
    }

    /// Start building a request to the given path
    pub fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client.request(method, format!("{}{}", self.base_url, path))
    }

    /// Send a GET request to the given path
    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.request(reqwest::Method::GET, path).send().await.unwrap()
    }

    /// Send a GET request to the given path with the credential envelope header
    pub async fn get_as(&self, path: &str, token: &str) -> reqwest::Response {
        self.request(reqwest::Method::GET, path)
            .header("token", envelope(token))
            .send()
            .await
            .unwrap()
    }
}

/// Test server that manages the lifecycle of a server instance
pub struct TestServer {
    pub client: TestClient,
    pub address: SocketAddr,
    _handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    /// Start a new test server with the given TOML configuration
    pub async fn start(config_toml: &str) -> Self {
        let config: Config = toml::from_str(config_toml).unwrap();
        Self::start_with_config(config).await
    }

    /// Start a new test server with an already parsed configuration
    pub async fn start_with_config(config: Config) -> Self {
        // Find an available port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let serve_config = ServeConfig {
            listen_address: address,
            config,
            upstream: upstream(),
        };

        let handle = tokio::spawn(async move {
            // Drop the listener so the server can bind to the address
            drop(listener);

            if let Err(e) = server::serve(serve_config).await {
                eprintln!("Server failed to start: {e}");
            }
        });

        // Wait until the port accepts connections. A request would be admitted
        // and spend tokens, so only connect.
        for _ in 0..50 {
            if TcpStream::connect(address).await.is_ok() {
                break;
            }

            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        TestServer {
            client: TestClient::new(format!("http://{address}")),
            address,
            _handle: handle,
        }
    }
}

/// Upstream used behind the gateway: every path answers `upstream`.
pub fn upstream() -> Router {
    Router::new()
        .route("/", any(|| async { "upstream" }))
        .route("/{*path}", any(|| async { "upstream" }))
}

/// An HS256 access token carrying `claims`.
pub fn access_token(secret: &str, claims: serde_json::Value) -> String {
    let custom: server::CustomClaims = serde_json::from_value(claims).unwrap();
    let key = Hs256Key::new(secret.as_bytes());

    Hs256.token(&Header::empty(), &Claims::new(custom), &key).unwrap()
}

/// The credential envelope header value for `token`.
pub fn envelope(token: &str) -> String {
    serde_json::json!({ "access_token": token }).to_string()
}

/// Status, remaining quota and body of a response, for snapshots.
pub async fn summary(response: reqwest::Response) -> serde_json::Value {
    let status = response.status().as_u16();

    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    };

    let remaining = header("x-ratelimit-remaining");
    let retry_after = header("retry-after");
    let body = response.text().await.unwrap();

    let body = serde_json::from_str::<serde_json::Value>(&body).unwrap_or(serde_json::Value::String(body));

    serde_json::json!({
        "status": status,
        "remaining": remaining,
        "retry_after": retry_after,
        "body": body,
    })
}
