//! Metric names. HTTP metrics follow the OpenTelemetry semantic conventions.

/// HTTP server request duration in milliseconds.
pub const HTTP_SERVER_REQUEST_DURATION: &str = "http.server.request.duration";

/// Admission decisions, by `decision` and `category`.
pub const ADMISSION_DECISIONS: &str = "gateway.admission.decisions";

/// Time spent deciding on one request, in milliseconds.
pub const ADMISSION_DURATION: &str = "gateway.admission.duration";

/// Store operations answered by the local fallback, by `operation`.
pub const STORE_FALLBACKS: &str = "gateway.store.fallbacks";
