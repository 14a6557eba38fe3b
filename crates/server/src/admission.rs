//! Admission control middleware for HTTP requests.

use std::{
    fmt::Display,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::{Json, body::Body, response::IntoResponse};
use http::{HeaderMap, HeaderValue, Request, Response, StatusCode, header::RETRY_AFTER};
use rate_limit::{Denial, RateLimitHeaders, RateLimitManager, RateLimitRequest, Verdict};
use serde_json::json;
use tower::Layer;

use crate::identity::{ClientKeyResolver, client_address};

/// Admits or rejects requests before they reach the wrapped service.
#[derive(Clone)]
pub struct AdmissionLayer {
    manager: Arc<RateLimitManager>,
    resolver: ClientKeyResolver,
}

impl AdmissionLayer {
    /// Create a layer checking requests against `manager`, keyed by `resolver`.
    pub fn new(manager: Arc<RateLimitManager>, resolver: ClientKeyResolver) -> Self {
        Self { manager, resolver }
    }
}

impl<Service> Layer<Service> for AdmissionLayer
where
    Service: Send + Clone,
{
    type Service = AdmissionService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        AdmissionService {
            next,
            manager: self.manager.clone(),
            resolver: self.resolver.clone(),
        }
    }
}

/// Service produced by [`AdmissionLayer`].
#[derive(Clone)]
pub struct AdmissionService<Service> {
    next: Service,
    manager: Arc<RateLimitManager>,
    resolver: ClientKeyResolver,
}

impl<Service, ReqBody> tower::Service<Request<ReqBody>> for AdmissionService<Service>
where
    Service: tower::Service<Request<ReqBody>, Response = Response<Body>> + Send + Clone + 'static,
    Service::Future: Send,
    Service::Error: Display + 'static,
    ReqBody: http_body::Body + Send + 'static,
{
    type Response = Response<Body>;
    type Error = Service::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let mut next = self.next.clone();
        let manager = self.manager.clone();
        let resolver = self.resolver.clone();

        Box::pin(async move {
            let address = client_address(&req);
            let client_key = resolver.resolve(req.headers(), address).await;
            let admission = RateLimitRequest::new(client_key, req.uri().path());

            match manager.check_request(&admission).await {
                Ok(Verdict::Allowed(headers)) => {
                    let mut response = next.call(req).await?;

                    if let Some(headers) = headers {
                        insert_quota_headers(response.headers_mut(), &headers);
                    }

                    Ok(response)
                }
                Ok(Verdict::Denied(denial)) => Ok(denial_response(denial)),
                Err(e) => {
                    log::error!("Admission check failed for '{}': {e}", admission.client_key);
                    Ok(internal_error())
                }
            }
        })
    }
}

fn insert_quota_headers(headers: &mut HeaderMap, quota: &RateLimitHeaders) {
    headers.insert("x-ratelimit-limit", HeaderValue::from(quota.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(quota.remaining));

    if let Ok(reset) = HeaderValue::from_str(&quota.reset()) {
        headers.insert("x-ratelimit-reset", reset);
    }
}

/// Attached to responses the admission layer produced itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection(pub &'static str);

fn denial_response(denial: Denial) -> Response<Body> {
    let status = StatusCode::from_u16(denial.status_code()).unwrap_or(StatusCode::TOO_MANY_REQUESTS);
    let retry_after = denial.retry_after_secs();
    let reason = denial.reason.as_str();

    let mut response = (status, Json(denial)).into_response();
    response.extensions_mut().insert(Rejection(reason));

    if let Some(seconds) = retry_after {
        response.headers_mut().insert(RETRY_AFTER, HeaderValue::from(seconds));
    }

    response
}

fn internal_error() -> Response<Body> {
    let body = json!({ "error": "Internal server error", "type": "internal" });
    let mut response = (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response();
    response.extensions_mut().insert(Rejection("internal"));

    response
}
