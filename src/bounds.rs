//! Slippy map tile addressing and the geographic bounds of a tile.
//!
//! Further reading: https://wiki.openstreetmap.org/wiki/Slippy_map_tilenames
use crate::error::Error;

use slippy_map_tilenames::tile2lonlat;

/// The deepest zoom level a tile request may address.
pub const MAX_ZOOM: u8 = 30;

/// A validated (z, x, y) tile address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileCoordinate {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

/// Geographic bounds of a tile in EPSG:4326 degrees.
///
/// `west`/`east` are the minimum/maximum longitude and `south`/`north`
/// the minimum/maximum latitude.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GeoBoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl TileCoordinate {
    /// Validates a tile address. Both indices must lie in `[0, 2^zoom)`.
    pub fn new(zoom: u8, x: i64, y: i64) -> Result<TileCoordinate, Error> {
        if zoom > MAX_ZOOM {
            return Err(Error::invalid_coordinate(zoom, x, y));
        }

        let size = 1i64 << zoom;
        if !(0..size).contains(&x) || !(0..size).contains(&y) {
            return Err(Error::invalid_coordinate(zoom, x, y));
        }

        Ok(TileCoordinate {
            zoom,
            x: x as u32,
            y: y as u32,
        })
    }

    /// Parses the raw `{z}/{x}/{y}` segments of a request path.
    ///
    /// The y segment may carry a `.mvt` or `.pbf` extension.
    pub fn from_path(z: &str, x: &str, y: &str) -> Result<TileCoordinate, Error> {
        let y_index = y
            .strip_suffix(".mvt")
            .or_else(|| y.strip_suffix(".pbf"))
            .unwrap_or(y);

        if ![z, x, y_index].iter().all(|segment| is_plain_integer(segment)) {
            return Err(Error::invalid_coordinate(z, x, y));
        }

        match (z.parse::<u8>(), x.parse::<i64>(), y_index.parse::<i64>()) {
            (Ok(zoom), Ok(x), Ok(y)) => TileCoordinate::new(zoom, x, y),
            _ => Err(Error::invalid_coordinate(z, x, y)),
        }
    }

    /// Computes the geographic bounding box of this tile.
    pub fn bounds(&self) -> GeoBoundingBox {
        // The northwest corner of this tile and of its southeastern neighbour
        let (west, north) = tile2lonlat(self.x, self.y, self.zoom);
        let (east, south) = tile2lonlat(self.x + 1, self.y + 1, self.zoom);

        GeoBoundingBox {
            west,
            south,
            east,
            north,
        }
    }
}

// Only ASCII digits; `parse` alone would also take a leading sign.
fn is_plain_integer(segment: &str) -> bool {
    !segment.is_empty() && segment.bytes().all(|byte| byte.is_ascii_digit())
}

/// Resolves a tile address to its geographic bounding box.
pub fn resolve(zoom: u8, x: i64, y: i64) -> Result<GeoBoundingBox, Error> {
    Ok(TileCoordinate::new(zoom, x, y)?.bounds())
}

impl GeoBoundingBox {
    /// The bounding box bound twice, in the order the tile statement expects:
    /// once for clipping and once for the intersection filter.
    pub fn bind_params(&self) -> [f64; 8] {
        [
            self.west, self.south, self.east, self.north, self.west, self.south, self.east,
            self.north,
        ]
    }
}
