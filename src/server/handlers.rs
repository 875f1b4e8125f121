//! HTTP handlers and small response helpers for the tile server.

use crate::{bounds::TileCoordinate, store::TileStore, view::TileView, Error, TileSource};

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::Response,
};

pub const MVT_CONTENT_TYPE: &str = "application/x-protobuf";

/// Everything one tile route needs; cheap to clone per request.
#[derive(Clone)]
pub struct TileState {
    pub view: Arc<TileView>,
    pub store: Arc<dyn TileStore>,
}

/// Serves `/{endpoint}/{z}/{x}/{y}`.
pub async fn serve_tile(
    Path((z, x, y)): Path<(String, String, String)>,
    State(state): State<TileState>,
) -> Response<Body> {
    log::debug!("handle tile request: {}/{z}/{x}/{y}", state.view.layer());

    let rendered = match TileCoordinate::from_path(&z, &x, &y) {
        Ok(tile) => state.view.render_mvt(state.store.as_ref(), tile).await,
        Err(err) => Err(err),
    };

    match rendered {
        Ok(blob) => ok_mvt(blob),
        Err(err) if err.is_client_error() => {
            log::debug!("send 400 for tile request: {err}");
            error_400(&err.to_string())
        }
        Err(err) => {
            log::warn!(
                "send 500 for tile request {}/{z}/{x}/{y}. Error:\n{}",
                state.view.layer(),
                format_error_chain(&err)
            );
            error_500()
        }
    }
}

// --- small helpers -----------------------------------------------------------

fn format_error_chain(err: &Error) -> String {
    let mut result = err.to_string();
    let mut source = std::error::Error::source(err);

    if source.is_some() {
        result.push_str("\n  Caused by:");
    }
    while let Some(cause) = source {
        result.push_str(&format!("\n    {cause}"));
        source = std::error::Error::source(cause);
    }

    result
}

fn error_with(status: StatusCode, message: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(message.to_owned()))
        .expect("failed to build error response")
}

pub fn error_400(message: &str) -> Response<Body> {
    error_with(StatusCode::BAD_REQUEST, message)
}

pub fn error_404() -> Response<Body> {
    error_with(StatusCode::NOT_FOUND, "Not Found")
}

pub fn error_500() -> Response<Body> {
    error_with(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
}

fn ok_mvt(blob: Vec<u8>) -> Response<Body> {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, MVT_CONTENT_TYPE)
        .body(Body::from(blob))
        .expect("failed to build OK response")
}
