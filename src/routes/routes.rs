//! Defines routes for the file manager API.
//!
//! ## Structure
//! - **Probes**
//!   - `GET    /health`, `/healthz`: liveness
//!   - `GET    /readyz`: object store readiness
//!
//! - **Files**
//!   - `GET    /api/v1/files`: list files with metadata
//!   - `POST   /api/v1/files`: multipart upload
//!   - `GET    /api/v1/files/{name}`: download
//!   - `DELETE /api/v1/files/{name}`: delete
//!   - `GET    /api/v1/files/{name}/metadata`: read metadata
//!   - `PUT    /api/v1/files/{name}/metadata`: merge metadata
//!
//! Anything else answers 404 with a JSON body.

use crate::handlers::{
    AppState,
    file_handlers::{
        delete_file, download_file, get_file_metadata, list_files, route_not_found,
        update_file_metadata, upload_file,
    },
    health_handlers::{healthz, readyz},
};
use axum::{
    Router,
    extract::{DefaultBodyLimit, Request},
    http::{HeaderName, HeaderValue, Method, header},
    middleware,
    routing::get,
};
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};

/// Room for multipart boundaries and the metadata part on top of the file.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Request header that opts a single response out of compression.
const NO_COMPRESSION: &str = "x-no-compression";

/// Hardening headers added to every response that does not set its own.
/// No `content-security-policy`: downloads are served from the same origin.
const SECURITY_HEADERS: [(&str, &str); 10] = [
    ("cross-origin-opener-policy", "same-origin"),
    ("cross-origin-resource-policy", "same-origin"),
    ("origin-agent-cluster", "?1"),
    ("referrer-policy", "no-referrer"),
    ("strict-transport-security", "max-age=15552000; includeSubDomains"),
    ("x-content-type-options", "nosniff"),
    ("x-dns-prefetch-control", "off"),
    ("x-download-options", "noopen"),
    ("x-frame-options", "SAMEORIGIN"),
    ("x-permitted-cross-domain-policies", "none"),
];

/// Build the router for all file manager routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(healthz))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/api/v1/files", get(list_files).post(upload_file))
        .route(
            "/api/v1/files/{name}",
            get(download_file).delete(delete_file),
        )
        .route(
            "/api/v1/files/{name}/metadata",
            get(get_file_metadata).put(update_file_metadata),
        )
        .fallback(route_not_found)
}

/// The complete application: routes, state and middleware.
///
/// Layers from the inside out: security headers, body limit, compression,
/// the `x-no-compression` opt-out, request id propagation, request tracing,
/// request id generation, CORS.
pub fn app(state: AppState, cors_origin: &str) -> Router {
    let body_limit = state
        .files
        .policy()
        .max_file_size
        .saturating_add(MULTIPART_OVERHEAD);
    let body_limit = usize::try_from(body_limit).unwrap_or(usize::MAX);

    let mut router = routes().with_state(state);
    for (name, value) in SECURITY_HEADERS {
        router = router.layer(SetResponseHeaderLayer::if_not_present(
            HeaderName::from_static(name),
            HeaderValue::from_static(value),
        ));
    }

    router
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CompressionLayer::new())
        .layer(middleware::map_request(honor_no_compression))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http().make_span_with(|request: &Request| {
            let request_id = request
                .headers()
                .get("x-request-id")
                .and_then(|value| value.to_str().ok())
                .unwrap_or("-");
            tracing::info_span!(
                "request",
                method = %request.method(),
                uri = %request.uri(),
                request_id = %request_id,
            )
        }))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(cors_layer(cors_origin))
}

/// Drop `accept-encoding` when the client asked for an uncompressed reply.
async fn honor_no_compression(mut request: Request) -> Request {
    if request.headers().contains_key(NO_COMPRESSION) {
        request.headers_mut().remove(header::ACCEPT_ENCODING);
    }
    request
}

fn cors_layer(origin: &str) -> CorsLayer {
    let allow_origin = match HeaderValue::from_str(origin) {
        Ok(value) if origin != "*" => AllowOrigin::exact(value),
        _ => AllowOrigin::any(),
    };
    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .expose_headers([header::CONTENT_DISPOSITION])
        .max_age(Duration::from_secs(600))
}
