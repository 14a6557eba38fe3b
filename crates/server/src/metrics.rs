//! HTTP metrics middleware
//!
//! Records `http.server.request.duration` for every request, in milliseconds,
//! labelled with the method, the matched route, the status code and, for
//! requests turned away at the door, the admission rejection reason.

use std::{
    fmt::Display,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use axum::{body::Body, extract::MatchedPath};
use http::{Request, Response};
use telemetry::metrics::{self, Recorder};
use tower::Layer;

use crate::admission::Rejection;

/// Layer for HTTP metrics tracking
#[derive(Clone, Default)]
pub struct MetricsLayer;

impl<Service> Layer<Service> for MetricsLayer
where
    Service: Send + Clone,
{
    type Service = MetricsService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        MetricsService { next }
    }
}

/// Service that tracks HTTP metrics
#[derive(Clone)]
pub struct MetricsService<Service> {
    next: Service,
}

impl<Service, ReqBody> tower::Service<Request<ReqBody>> for MetricsService<Service>
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
        let route = req
            .extensions()
            .get::<MatchedPath>()
            .map(|matched_path| matched_path.as_str().to_owned())
            .unwrap_or_else(|| "unmatched".to_string());

        let mut next = self.next.clone();

        Box::pin(async move {
            let mut recorder = Recorder::new(metrics::HTTP_SERVER_REQUEST_DURATION);
            recorder.push_attribute("http.request.method", req.method().to_string());
            recorder.push_attribute("http.route", route);

            let response = next.call(req).await?;
            recorder.push_attribute("http.response.status_code", i64::from(response.status().as_u16()));

            if let Some(Rejection(reason)) = response.extensions().get::<Rejection>() {
                recorder.push_attribute("gateway.admission.rejection", *reason);
            }

            recorder.record();

            Ok(response)
        })
    }
}
