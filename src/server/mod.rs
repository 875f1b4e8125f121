//! HTTP surface: one vector tile route per configured view.

pub mod cache;
pub mod handlers;

use crate::{store::TileStore, view::TileView, Error};

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{middleware, routing::get, Router};
use cache::{cache_responses, ResponseCache};
use handlers::{error_404, serve_tile, TileState};

/// Builds the router serving every `(prefix, view)` pair under
/// `/{prefix}/{z}/{x}/{y}`, wrapped in a response cache holding tiles for
/// `cache_ttl`.
pub fn router(
    views: Vec<(String, TileView)>,
    store: Arc<dyn TileStore>,
    cache_ttl: Duration,
) -> Result<Router, Error> {
    let mut prefixes: Vec<String> = Vec::new();
    let mut tiles = Router::new();

    for (prefix, view) in views {
        let prefix = normalize_prefix(&prefix)?;
        if prefixes.contains(&prefix) {
            return Err(Error::Configuration(format!(
                "multiple tile endpoints with the prefix '{prefix}' are defined"
            )));
        }

        log::info!("add tile endpoint: prefix='{}', layer={}", prefix, view.layer());

        let state = TileState {
            view: Arc::new(view),
            store: Arc::clone(&store),
        };
        tiles = tiles.merge(
            Router::new()
                .route(&format!("{prefix}{{z}}/{{x}}/{{y}}"), get(serve_tile))
                .with_state(state),
        );
        prefixes.push(prefix);
    }

    let cache = ResponseCache::new(cache_ttl);
    let tiles = tiles.layer(middleware::from_fn_with_state(cache, cache_responses));

    Ok(Router::new()
        .route("/status", get(|| async { "ready!" }))
        .merge(tiles)
        .fallback(|| async { error_404() }))
}

fn normalize_prefix(prefix: &str) -> Result<String, Error> {
    let trimmed = prefix.trim().trim_matches('/');
    if trimmed.is_empty() || trimmed.contains(['{', '}', '*', ' ']) {
        return Err(Error::Configuration(format!(
            "invalid endpoint path '{prefix}'"
        )));
    }
    Ok(format!("/{trimmed}/"))
}

/// Serves `router` on `addr` until `shutdown` resolves.
pub async fn serve(
    addr: SocketAddr,
    router: Router,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    log::info!("server starts listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bounds::TileCoordinate, store::testing::FakeStore, view::TileSpec};

    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use tower::ServiceExt;

    fn stops() -> (String, TileView) {
        let spec = TileSpec::new("stop", "location", [("stop_id", Some("id")), ("name", None)]);
        (String::from("stops/mvt"), TileView::build(&spec).unwrap())
    }

    fn app(store: Arc<FakeStore>, ttl: Duration) -> Router {
        router(vec![stops()], store, ttl).unwrap()
    }

    async fn get_tile(app: &Router, uri: &str) -> (StatusCode, Option<String>, Vec<u8>) {
        let response = app
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|value| value.to_str().unwrap().to_owned());
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, content_type, body.to_vec())
    }

    #[tokio::test]
    async fn serves_tile() {
        let store = Arc::new(FakeStore::with_tile(b"\x1a\x04stop"));
        let app = app(store.clone(), Duration::ZERO);

        let (status, content_type, body) = get_tile(&app, "/stops/mvt/12/650/1463").await;
        assert_eq!(StatusCode::OK, status);
        assert_eq!(Some("application/x-protobuf"), content_type.as_deref());
        assert_eq!(b"\x1a\x04stop".to_vec(), body);
        assert_eq!(1, store.calls());

        let bounds = TileCoordinate::new(12, 650, 1463).unwrap().bounds();
        assert_eq!(
            Some(bounds.bind_params()),
            *store.last_params.lock().unwrap()
        );
    }

    #[tokio::test]
    async fn serves_empty_tile() {
        let store = Arc::new(FakeStore::default());
        let app = app(store, Duration::ZERO);

        let (status, content_type, body) = get_tile(&app, "/stops/mvt/0/0/0").await;
        assert_eq!(StatusCode::OK, status);
        assert_eq!(Some("application/x-protobuf"), content_type.as_deref());
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn rejects_malformed_coordinates() {
        let store = Arc::new(FakeStore::with_tile(b"\x1a\x00"));
        let app = app(store.clone(), Duration::from_secs(60));

        for uri in [
            "/stops/mvt/z/0/0",
            "/stops/mvt/1/one/0",
            "/stops/mvt/1/0/-1",
            "/stops/mvt/1/2/0",
            "/stops/mvt/99/0/0",
            "/stops/mvt/1/0/0.png",
            "/stops/mvt/+1/+0/+0",
            "/stops/mvt/1/-0/0",
        ] {
            let (status, _, _) = get_tile(&app, uri).await;
            assert_eq!(StatusCode::BAD_REQUEST, status, "{uri}");
        }
        assert_eq!(0, store.calls());
    }

    #[tokio::test]
    async fn store_errors_are_server_errors() {
        let store = Arc::new(FakeStore::failing());
        let app = app(store.clone(), Duration::from_secs(60));

        let (status, _, _) = get_tile(&app, "/stops/mvt/0/0/0").await;
        assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, status);

        // Failures are never cached
        let (status, _, _) = get_tile(&app, "/stops/mvt/0/0/0").await;
        assert_eq!(StatusCode::INTERNAL_SERVER_ERROR, status);
        assert_eq!(2, store.calls());
    }

    #[tokio::test]
    async fn repeated_requests_are_identical() {
        let store = Arc::new(FakeStore::with_tile(&[0x1a, 0x02, 0x78, 0x02]));
        let app = app(store.clone(), Duration::ZERO);

        let (_, _, first) = get_tile(&app, "/stops/mvt/3/1/2").await;
        let (_, _, second) = get_tile(&app, "/stops/mvt/3/1/2").await;
        assert_eq!(first, second);
        assert_eq!(2, store.calls());
    }

    #[tokio::test]
    async fn cached_responses_skip_the_store() {
        let store = Arc::new(FakeStore::with_tile(b"\x1a\x04stop"));
        let app = app(store.clone(), Duration::from_secs(60));

        let response = app
            .clone()
            .oneshot(Request::get("/stops/mvt/3/1/2").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "max-age=60"
        );

        let (status, content_type, body) = get_tile(&app, "/stops/mvt/3/1/2").await;
        assert_eq!(StatusCode::OK, status);
        assert_eq!(Some("application/x-protobuf"), content_type.as_deref());
        assert_eq!(b"\x1a\x04stop".to_vec(), body);
        assert_eq!(1, store.calls());

        get_tile(&app, "/stops/mvt/3/1/3").await;
        assert_eq!(2, store.calls());
    }

    #[tokio::test]
    async fn oversized_tiles_are_served_uncached() {
        let tile = vec![0x1a; cache::MAX_BODY_SIZE as usize + 1];
        let store = Arc::new(FakeStore::with_tile(&tile));
        let app = app(store.clone(), Duration::from_secs(60));

        for _ in 0..2 {
            let (status, content_type, body) = get_tile(&app, "/stops/mvt/3/1/2").await;
            assert_eq!(StatusCode::OK, status);
            assert_eq!(Some("application/x-protobuf"), content_type.as_deref());
            assert_eq!(tile.len(), body.len());
        }
        assert_eq!(2, store.calls());
    }

    #[tokio::test]
    async fn query_strings_share_a_cache_entry() {
        let store = Arc::new(FakeStore::with_tile(b"\x1a\x04stop"));
        let app = app(store.clone(), Duration::from_secs(60));

        for uri in [
            "/stops/mvt/3/1/2",
            "/stops/mvt/3/1/2?a=1",
            "/stops/mvt/3/1/2?a=2",
        ] {
            let (status, _, body) = get_tile(&app, uri).await;
            assert_eq!(StatusCode::OK, status, "{uri}");
            assert_eq!(b"\x1a\x04stop".to_vec(), body);
        }
        assert_eq!(1, store.calls());
    }

    #[tokio::test]
    async fn status_and_unknown_routes() {
        let app = app(Arc::new(FakeStore::default()), Duration::ZERO);

        let (status, _, body) = get_tile(&app, "/status").await;
        assert_eq!(StatusCode::OK, status);
        assert_eq!(b"ready!".to_vec(), body);

        let (status, _, _) = get_tile(&app, "/routes/mvt/0/0/0").await;
        assert_eq!(StatusCode::NOT_FOUND, status);
    }

    #[test]
    fn duplicate_prefixes_are_rejected() {
        let store: Arc<dyn TileStore> = Arc::new(FakeStore::default());
        let (_, view) = stops();
        let views = vec![
            (String::from("stops/mvt"), view.clone()),
            (String::from("/stops/mvt/"), view),
        ];

        assert!(matches!(
            router(views, store, Duration::ZERO),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn test_normalize_prefix() {
        assert_eq!("/stops/mvt/", normalize_prefix("stops/mvt").unwrap());
        assert_eq!("/stops/mvt/", normalize_prefix(" /stops/mvt/ ").unwrap());
        assert!(normalize_prefix("/").is_err());
        assert!(normalize_prefix("stops/{z}").is_err());
    }
}
