//! Whole-response cache keyed by request path.
//!
//! Tile handlers are pure functions of the request for a given database
//! state, so a successful response can be replayed until its TTL runs out.
//! Only `200 OK` responses are stored.

use std::time::Duration;

use axum::{
    body::{to_bytes, Body, Bytes, HttpBody},
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use moka::future::Cache;

// Tiles are small; anything bigger than this is served but not kept around.
pub(crate) const MAX_BODY_SIZE: u64 = 16 * 1024 * 1024;
// Total bytes of keys and bodies held by the cache.
const MAX_CACHE_BYTES: u64 = 512 * 1024 * 1024;

#[derive(Clone, Debug)]
struct CachedResponse {
    content_type: Option<HeaderValue>,
    body: Bytes,
}

#[derive(Clone)]
pub struct ResponseCache {
    ttl: Duration,
    cache: Option<Cache<String, CachedResponse>>,
}

impl ResponseCache {
    /// A cache holding responses for `ttl`. A zero TTL disables caching.
    pub fn new(ttl: Duration) -> ResponseCache {
        let cache = (!ttl.is_zero()).then(|| {
            Cache::builder()
                .weigher(|key: &String, value: &CachedResponse| -> u32 {
                    (key.len() + value.body.len())
                        .try_into()
                        .unwrap_or(u32::MAX)
                })
                .max_capacity(MAX_CACHE_BYTES)
                .time_to_live(ttl)
                .build()
        });

        ResponseCache { ttl, cache }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.as_ref().map_or(0, |cache| cache.entry_count())
    }

    fn cache_control(&self) -> HeaderValue {
        HeaderValue::from_str(&format!("max-age={}", self.ttl.as_secs()))
            .expect("max-age is a valid header value")
    }
}

/// Middleware answering repeated requests from the cache.
pub async fn cache_responses(
    State(state): State<ResponseCache>,
    request: Request,
    next: Next,
) -> Response {
    let Some(cache) = &state.cache else {
        return next.run(request).await;
    };

    // Tile handlers never look at the query string
    let key = request.uri().path().to_owned();

    if let Some(cached) = cache.get(&key).await {
        log::trace!("cache hit: {key}");
        return replay(&state, cached);
    }

    let response = next.run(request).await;
    if response.status() != StatusCode::OK {
        return response;
    }

    let (parts, body) = response.into_parts();
    match body.size_hint().upper() {
        Some(size) if size <= MAX_BODY_SIZE => {}
        _ => {
            log::debug!("not caching oversized response for {key}");
            return Response::from_parts(parts, body);
        }
    }

    let body = match to_bytes(body, MAX_BODY_SIZE as usize).await {
        Ok(body) => body,
        Err(err) => {
            log::warn!("unable to buffer response for {key}: {err}");
            return super::handlers::error_500();
        }
    };

    let cached = CachedResponse {
        content_type: parts.headers.get(header::CONTENT_TYPE).cloned(),
        body,
    };
    cache.insert(key, cached.clone()).await;

    let mut response = Response::from_parts(parts, Body::from(cached.body));
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, state.cache_control());
    response
}

fn replay(state: &ResponseCache, cached: CachedResponse) -> Response {
    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CACHE_CONTROL, state.cache_control());
    if let Some(content_type) = cached.content_type {
        response = response.header(header::CONTENT_TYPE, content_type);
    }

    response
        .body(Body::from(cached.body))
        .expect("failed to build cached response")
}
