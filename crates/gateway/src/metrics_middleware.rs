//! Per-request counters and latency for the front end.

use std::time::Instant;

use {
    axum::{body::Body, extract::MatchedPath, http::Request, middleware::Next, response::Response},
    volbroker_metrics::{counter, histogram, http as http_metrics, labels},
};

/// Records `volbroker_http_requests_total` and
/// `volbroker_http_request_duration_seconds`, labelled by the matched route
/// so unknown paths collapse into one series.
pub async fn http_metrics_middleware(request: Request<Body>, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |p| p.as_str().to_string());

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    counter!(
        http_metrics::REQUESTS_TOTAL,
        labels::ENDPOINT => endpoint.clone(),
        labels::METHOD => method.clone(),
        labels::STATUS => status
    )
    .increment(1);
    histogram!(
        http_metrics::REQUEST_DURATION_SECONDS,
        labels::ENDPOINT => endpoint,
        labels::METHOD => method
    )
    .record(start.elapsed().as_secs_f64());

    response
}
