use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::time::Instant;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const RESPONSE_TIME_HEADER: &str = "x-response-time-ms";

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub start_time: Instant,
    pub path: String,
    pub method: String,
}

impl RequestContext {
    pub fn from_request(req: &Request) -> Self {
        let request_id = req
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|h| h.to_str().ok())
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        Self {
            request_id,
            start_time: Instant::now(),
            path: req.uri().path().to_string(),
            method: req.method().to_string(),
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.start_time.elapsed().as_millis()
    }

    pub fn create_span(&self) -> tracing::Span {
        tracing::info_span!(
            "request",
            request_id = %self.request_id,
            path = %self.path,
            method = %self.method,
        )
    }
}

pub async fn request_context_middleware(request: Request, next: Next) -> Response {
    let context = RequestContext::from_request(&request);

    let span = context.create_span();
    let _enter = span.enter();

    tracing::debug!(
        target: "http_request_start",
        request_id = %context.request_id,
        method = %context.method,
        path = %context.path,
        "Incoming request"
    );

    let mut response = next.run(request).await;

    let duration_ms = context.elapsed_ms();
    let status = response.status();

    if let Ok(value) = HeaderValue::from_str(&context.request_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
    }

    if let Ok(value) = HeaderValue::from_str(&duration_ms.to_string()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(RESPONSE_TIME_HEADER), value);
    }

    if status.is_server_error() {
        tracing::error!(
            target: "http_request_complete",
            request_id = %context.request_id,
            status = %status.as_u16(),
            duration_ms = %duration_ms,
            "Request completed with server error"
        );
    } else if status.is_client_error() {
        tracing::warn!(
            target: "http_request_complete",
            request_id = %context.request_id,
            status = %status.as_u16(),
            duration_ms = %duration_ms,
            "Request completed with client error"
        );
    } else {
        tracing::info!(
            target: "http_request_complete",
            request_id = %context.request_id,
            status = %status.as_u16(),
            duration_ms = %duration_ms,
            "Request completed successfully"
        );
    }

    metrics::histogram!("cernunnos_http_request_duration_ms").record(duration_ms as f64);
    metrics::counter!(
        "cernunnos_http_requests_total",
        "status" => status.as_u16().to_string()
    )
    .increment(1);

    response
}
