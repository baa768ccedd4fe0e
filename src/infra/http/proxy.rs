use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::State,
    http::{HeaderName, HeaderValue, Method, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::{
    application::error::HttpError,
    cache::{ResponseCache, ResponseSource, Served},
};

use super::middleware::{log_responses, set_request_context};

pub const CACHE_SOURCE_HEADER: &str = "x-wittr-cache";

/// Headers that describe the origin connection rather than the resource.
const HOP_BY_HOP: [&str; 4] = ["connection", "content-length", "keep-alive", "transfer-encoding"];

#[derive(Clone)]
pub struct ProxyState {
    pub cache: Arc<ResponseCache>,
}

/// Local listener that answers every `GET` through the tiered cache.
pub fn build_proxy_router(state: ProxyState) -> Router {
    Router::new()
        .fallback(proxy)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn proxy(
    State(state): State<ProxyState>,
    method: Method,
    uri: Uri,
) -> Result<Response, HttpError> {
    const SOURCE: &str = "infra::http::proxy";

    if method != Method::GET {
        return Err(
            HttpError::new(SOURCE, StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
                .detail(format!("{method} is not served by the cache proxy")),
        );
    }

    let request = uri
        .path_and_query()
        .map(|path_and_query| path_and_query.as_str())
        .unwrap_or("/");
    let served = state.cache.handle(request).await?;
    debug!(
        target = "wittr::http::proxy",
        request,
        status = served.response.status,
        source = ?served.source,
        "proxied request"
    );
    Ok(build_response(served))
}

fn build_response(served: Served) -> Response {
    let status = StatusCode::from_u16(served.response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);

    for (name, value) in &served.response.headers {
        if HOP_BY_HOP
            .iter()
            .any(|hop| name.eq_ignore_ascii_case(hop))
        {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            builder = builder.header(name, value);
        }
    }

    let source = match served.source {
        ResponseSource::Cache => "hit",
        ResponseSource::Network => "miss",
    };
    builder
        .header(CACHE_SOURCE_HEADER, source)
        .body(Body::from(served.response.body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
mod tests {
    use crate::cache::CachedResponse;

    use super::*;

    #[test]
    fn hop_by_hop_headers_are_dropped() {
        let served = Served {
            response: CachedResponse::new(
                200,
                vec![
                    ("Content-Type".to_string(), "image/jpeg".to_string()),
                    ("Transfer-Encoding".to_string(), "chunked".to_string()),
                ],
                "jpeg",
            ),
            source: ResponseSource::Cache,
        };

        let response = build_response(served);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["content-type"], "image/jpeg");
        assert!(response.headers().get("transfer-encoding").is_none());
        assert_eq!(response.headers()[CACHE_SOURCE_HEADER], "hit");
    }

    #[test]
    fn opaque_status_is_reported_as_bad_gateway() {
        let served = Served {
            response: CachedResponse::new(0, Vec::new(), ""),
            source: ResponseSource::Network,
        };
        assert_eq!(build_response(served).status(), StatusCode::BAD_GATEWAY);
    }
}
