//! # MyStops
//!
//! Serves transit stops as Mapbox Vector Tiles rendered by PostGIS.
//!
//! ## How it works
//!
//! Each tile endpoint is described by a [`TileSpec`]: the relation to read,
//! its geometry column and the columns to carry along as feature properties.
//! [`TileView::build`] turns a `TileSpec` into a SQL statement once, at startup.
//! For every request the tile's geographic bounds are bound into that
//! statement and PostGIS clips, simplifies and encodes the features itself.
//! The resulting bytes are handed to the client untouched.
//!
//! ## Known Limitations
//!
//! Stored geometries are assumed to be in EPSG:4326. Relation and column names
//! are trusted configuration; they are validated against a strict identifier
//! format but must never be taken from a request.

#![deny(warnings)]

use async_trait::async_trait;

pub mod bounds;
pub mod config;
pub mod error;
pub mod server;
pub mod store;
pub mod view;

pub use bounds::{resolve, GeoBoundingBox, TileCoordinate};
pub use error::Error;
pub use store::TileStore;
pub use view::{TileSpec, TileView};

/// This is the main trait exported by this crate: anything that can render
/// the vector tile for a slippy map tile.
#[async_trait]
pub trait TileSource {
    /// Renders the Mapbox vector tile for a slippy map tile in XYZ format.
    ///
    /// An area without features yields an empty tile, not an error.
    async fn render_mvt(
        &self,
        store: &dyn TileStore,
        tile: TileCoordinate,
    ) -> Result<Vec<u8>, Error>;
}
