use crate::error::TileError;
use geo_types::{coord, Polygon, Rect};
use lazy_static::lazy_static;
use regex::Regex;
use std::f64::consts::PI;
use std::fmt;

/// Deepest zoom level a tile address may name.
pub const MAX_ZOOM: u32 = 30;

/// Web Mercator cuts the world off at this latitude.
pub const MAX_LATITUDE: f64 = 85.051_128_779_806_59;

lazy_static! {
    static ref TILE_PATH: Regex =
        Regex::new(r"^/(?:.*/)?([^/]+)/(\d+)/(\d+)/(\d+)\.(\w+)$").unwrap();
}

/// A tile in the slippy map pyramid plus the layer it was requested for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileAddress {
    pub layer: String,
    pub z: u32,
    pub x: u32,
    pub y: u32,
}

impl TileAddress {
    pub fn new(layer: impl Into<String>, z: u32, x: u32, y: u32) -> Result<Self, TileError> {
        if z > MAX_ZOOM {
            return Err(TileError::InvalidAddress(format!(
                "zoom {} exceeds maximum of {}",
                z, MAX_ZOOM
            )));
        }
        let tile_count = 1_u64 << z;
        if u64::from(x) >= tile_count || u64::from(y) >= tile_count {
            return Err(TileError::InvalidAddress(format!(
                "tile {}/{}/{} is outside the zoom level",
                z, x, y
            )));
        }

        Ok(TileAddress {
            layer: layer.into(),
            z,
            x,
            y,
        })
    }

    pub fn bound(&self) -> TileBound {
        TileBound::new(self.z, self.x, self.y)
    }
}

impl fmt::Display for TileAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.z, self.x, self.y)
    }
}

/**
Parses a request path of the form `.../{layer}/{z}/{x}/{y}.{ext}` into a [`TileAddress`].

The extension is accepted but ignored: every tile is encoded the same way. The layer
segment is percent-decoded.

# Example

```rust
use tileshow::structs::parse_tile_path;

let address = parse_tile_path("/tiles/places/3/2/1.mvt").unwrap();
assert_eq!(address.layer, "places");
assert_eq!((address.z, address.x, address.y), (3, 2, 1));
```
*/
pub fn parse_tile_path(path: &str) -> Result<TileAddress, TileError> {
    let captures = TILE_PATH
        .captures(path)
        .ok_or_else(|| TileError::InvalidAddress(format!("{} is not a tile path", path)))?;

    let layer = urlencoding::decode(&captures[1])
        .map_err(|e| TileError::InvalidAddress(format!("invalid layer name: {}", e)))?;
    let z = parse_coordinate(&captures[2], "z")?;
    let x = parse_coordinate(&captures[3], "x")?;
    let y = parse_coordinate(&captures[4], "y")?;

    TileAddress::new(layer.into_owned(), z, x, y)
}

fn parse_coordinate(value: &str, name: &str) -> Result<u32, TileError> {
    value
        .parse::<u32>()
        .map_err(|e| TileError::InvalidAddress(format!("invalid {{{}}} parameter: {}", name, e)))
}

/// Geographic rectangle (EPSG:4326 degrees) covered by a tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileBound {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl TileBound {
    pub fn new(z: u32, x: u32, y: u32) -> Self {
        let n = 2_f64.powi(z as i32);
        TileBound {
            min_lon: tile_to_lon(x as f64, n),
            min_lat: tile_to_lat(y as f64 + 1.0, n),
            max_lon: tile_to_lon(x as f64 + 1.0, n),
            max_lat: tile_to_lat(y as f64, n),
        }
    }

    pub fn to_polygon(&self) -> Polygon<f64> {
        Rect::new(
            coord! { x: self.min_lon, y: self.min_lat },
            coord! { x: self.max_lon, y: self.max_lat },
        )
        .to_polygon()
    }
}

fn tile_to_lon(x: f64, n: f64) -> f64 {
    x / n * 360.0 - 180.0
}

fn tile_to_lat(y: f64, n: f64) -> f64 {
    (PI * (1.0 - 2.0 * y / n)).sinh().atan().to_degrees()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(left: f64, right: f64) {
        assert!((left - right).abs() < 1e-6, "{} != {}", left, right);
    }

    #[test]
    fn parses_tile_path() {
        let address = parse_tile_path("/tiles/buildings/12/654/1583.pbf").unwrap();
        assert_eq!(
            address,
            TileAddress {
                layer: "buildings".to_string(),
                z: 12,
                x: 654,
                y: 1583
            }
        );
    }

    #[test]
    fn parses_path_without_prefix() {
        let address = parse_tile_path("/water/0/0/0.mvt").unwrap();
        assert_eq!(address.layer, "water");
        assert_eq!(address.to_string(), "0/0/0");
    }

    #[test]
    fn decodes_layer_name() {
        let address = parse_tile_path("/tiles/sf%20museum/1/1/0.mvt").unwrap();
        assert_eq!(address.layer, "sf museum");
    }

    #[test]
    fn rejects_malformed_paths() {
        for path in [
            "",
            "/",
            "/tiles/places/1/0/0",
            "/tiles/places/a/0/0.mvt",
            "/tiles/places/1/-1/0.mvt",
            "/tiles/places/1/0/0.5.mvt",
            "/tiles/1/0/0.mvt/extra",
            "/tiles/places/99999999999/0/0.mvt",
        ] {
            assert!(
                matches!(parse_tile_path(path), Err(TileError::InvalidAddress(_))),
                "{} should be rejected",
                path
            );
        }
    }

    #[test]
    fn rejects_tiles_outside_zoom_level() {
        assert!(parse_tile_path("/tiles/places/1/2/0.mvt").is_err());
        assert!(parse_tile_path("/tiles/places/0/0/1.mvt").is_err());
        assert!(parse_tile_path("/tiles/places/31/0/0.mvt").is_err());
        assert!(parse_tile_path("/tiles/places/1/1/1.mvt").is_ok());
    }

    #[test]
    fn world_tile_bound() {
        let bound = TileBound::new(0, 0, 0);
        assert_close(bound.min_lon, -180.0);
        assert_close(bound.max_lon, 180.0);
        assert_close(bound.min_lat, -MAX_LATITUDE);
        assert_close(bound.max_lat, MAX_LATITUDE);
    }

    #[test]
    fn quadrant_tile_bound() {
        let bound = TileBound::new(1, 1, 0);
        assert_close(bound.min_lon, 0.0);
        assert_close(bound.max_lon, 180.0);
        assert_close(bound.min_lat, 0.0);
        assert_close(bound.max_lat, MAX_LATITUDE);
    }

    #[test]
    fn bounds_are_deterministic_and_in_range() {
        for z in [0, 1, 5, 12, 20, MAX_ZOOM] {
            let last = (1_u64 << z) - 1;
            for (x, y) in [(0, 0), (last, last), (last / 2, last / 3)] {
                let bound = TileBound::new(z, x as u32, y as u32);
                assert_eq!(bound, TileBound::new(z, x as u32, y as u32));
                assert!(bound.min_lon >= -180.0 && bound.max_lon <= 180.0);
                assert!(bound.min_lat >= -MAX_LATITUDE - 1e-9);
                assert!(bound.max_lat <= MAX_LATITUDE + 1e-9);
                assert!(bound.min_lon < bound.max_lon);
                assert!(bound.min_lat < bound.max_lat);
            }
        }
    }

    #[test]
    fn bound_polygon_is_closed_rectangle() {
        let polygon = TileBound::new(2, 1, 1).to_polygon();
        assert_eq!(polygon.exterior().0.len(), 5);
        assert!(polygon.interiors().is_empty());
    }
}
