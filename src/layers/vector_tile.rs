use crate::error::TileError;
use crate::features::{FeatureCollection, PropertyValue};
use crate::structs::{TileAddress, MAX_LATITUDE};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use geo::orient::{Direction, Orient};
use geo::{Area, BooleanOps, BoundingRect, MapCoords, Simplify};
use geo_types::{
    coord, Coord, Geometry, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon,
    Rect,
};
use geozero::mvt::{tile, Message, TagsBuilder, Tile, TileValue};
use geozero::ToMvt;
use std::f64::consts::PI;

pub const MVT_CONTENT_TYPE: &str = "application/vnd.mapbox-vector-tile";

const EXTENT: u32 = 4096;
const BUFFER: u32 = 64;
const SIMPLIFY_TOLERANCE: f64 = 1.0;
const MIN_LINE_LENGTH: f64 = 1.0;
const MIN_POLYGON_AREA: f64 = 1.0;

/// A serialized vector tile, ready to be written to the response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedTile {
    bytes: Vec<u8>,
}

impl EncodedTile {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn content_type(&self) -> &'static str {
        MVT_CONTENT_TYPE
    }
}

impl IntoResponse for EncodedTile {
    fn into_response(self) -> Response {
        ([(header::CONTENT_TYPE, MVT_CONTENT_TYPE)], self.bytes).into_response()
    }
}

/// Projects, clips, simplifies and serializes feature collections into a tile.
#[derive(Debug, Clone, Copy)]
pub struct TileEncoder {
    pub simplify: bool,
}

impl Default for TileEncoder {
    fn default() -> Self {
        TileEncoder { simplify: true }
    }
}

impl TileEncoder {
    pub fn encode(
        &self,
        collections: &[FeatureCollection],
        address: &TileAddress,
    ) -> Result<EncodedTile, TileError> {
        let layers = collections
            .iter()
            .map(|collection| self.encode_layer(collection, address))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(EncodedTile {
            bytes: Tile { layers }.encode_to_vec(),
        })
    }

    fn encode_layer(
        &self,
        collection: &FeatureCollection,
        address: &TileAddress,
    ) -> Result<tile::Layer, TileError> {
        let mut tags = TagsBuilder::<String>::new();
        let mut features = Vec::with_capacity(collection.features.len());

        for record in &collection.features {
            for geometry in self.prepare(&record.geometry, address) {
                let mut feature = geometry
                    .to_mvt_unscaled()
                    .map_err(|e| TileError::EncodingFailed(e.to_string()))?;

                for (key, value) in &record.properties {
                    if let Some(value) = tile_value(value) {
                        let (key_idx, value_idx) = tags.insert(key.clone(), value);
                        feature.tags.push(key_idx);
                        feature.tags.push(value_idx);
                    }
                }
                features.push(feature);
            }
        }

        let (keys, values) = tags.into_tags();
        Ok(tile::Layer {
            version: 2,
            name: collection.name.clone(),
            features,
            keys,
            values: values.into_iter().map(Into::into).collect(),
            extent: Some(EXTENT),
        })
    }

    /// Turns one feature geometry into the tile-local geometries that survive encoding.
    fn prepare(&self, geometry: &Geometry<f64>, address: &TileAddress) -> Vec<Geometry<f64>> {
        let mut parts = Vec::new();
        flatten(geometry, &mut parts);

        parts
            .into_iter()
            .filter_map(|part| {
                let clipped = clip(&project(&part, address))?;
                let simplified = if self.simplify {
                    simplify(clipped)
                } else {
                    clipped
                };
                snap(simplified)
            })
            .collect()
    }
}

/// Null has no vector tile representation and is left out.
fn tile_value(value: &PropertyValue) -> Option<TileValue> {
    match value {
        PropertyValue::Null => None,
        PropertyValue::Bool(b) => Some(TileValue::Bool(*b)),
        PropertyValue::Int(i) => Some(TileValue::Int(*i)),
        PropertyValue::Float(f) => Some(TileValue::Double(*f)),
        PropertyValue::Text(s) => Some(TileValue::Str(s.clone())),
    }
}

/// Splits collections apart and turns the remaining geo-only shapes into encodable ones.
fn flatten(geometry: &Geometry<f64>, parts: &mut Vec<Geometry<f64>>) {
    match geometry {
        Geometry::GeometryCollection(collection) => {
            for member in collection.iter() {
                flatten(member, parts);
            }
        }
        Geometry::Line(line) => parts.push(Geometry::LineString(LineString::from(*line))),
        Geometry::Rect(rect) => parts.push(Geometry::Polygon(rect.to_polygon())),
        Geometry::Triangle(triangle) => parts.push(Geometry::Polygon(triangle.to_polygon())),
        other => parts.push(other.clone()),
    }
}

/// Web Mercator projection of lon/lat degrees into the tile's pixel grid, y pointing down.
fn project(geometry: &Geometry<f64>, address: &TileAddress) -> Geometry<f64> {
    let n = 2_f64.powi(address.z as i32);
    let extent = EXTENT as f64;
    geometry.map_coords(|Coord { x, y }| {
        let x_frac = (x + 180.0) / 360.0 * n;
        let lat_rad = y.clamp(-MAX_LATITUDE, MAX_LATITUDE).to_radians();
        let y_frac = (1.0 - (lat_rad.tan() + 1.0 / lat_rad.cos()).ln() / PI) / 2.0 * n;
        coord! {
            x: (x_frac - address.x as f64) * extent,
            y: (y_frac - address.y as f64) * extent,
        }
    })
}

fn clip_rect() -> Rect<f64> {
    let min = -(BUFFER as f64);
    let max = (EXTENT + BUFFER) as f64;
    Rect::new(coord! { x: min, y: min }, coord! { x: max, y: max })
}

fn inside(rect: &Rect<f64>, c: Coord<f64>) -> bool {
    c.x >= rect.min().x && c.x <= rect.max().x && c.y >= rect.min().y && c.y <= rect.max().y
}

fn overlaps(a: &Rect<f64>, b: &Rect<f64>) -> bool {
    a.min().x <= b.max().x && a.max().x >= b.min().x && a.min().y <= b.max().y && a.max().y >= b.min().y
}

fn contains(outer: &Rect<f64>, inner: &Rect<f64>) -> bool {
    inside(outer, inner.min()) && inside(outer, inner.max())
}

/// Clips a projected geometry to the tile extent plus its buffer.
fn clip(geometry: &Geometry<f64>) -> Option<Geometry<f64>> {
    let rect = clip_rect();
    let bounds = geometry.bounding_rect()?;
    if !overlaps(&rect, &bounds) {
        return None;
    }
    if contains(&rect, &bounds) {
        return Some(geometry.clone());
    }

    let area = rect.to_polygon();
    match geometry {
        Geometry::Point(p) => inside(&rect, p.0).then_some(Geometry::Point(*p)),
        Geometry::MultiPoint(mp) => {
            let points: Vec<Point<f64>> = mp.iter().filter(|p| inside(&rect, p.0)).copied().collect();
            (!points.is_empty()).then(|| Geometry::MultiPoint(MultiPoint::new(points)))
        }
        Geometry::LineString(ls) => {
            lines(area.clip(&MultiLineString::new(vec![ls.clone()]), false))
        }
        Geometry::MultiLineString(mls) => lines(area.clip(mls, false)),
        Geometry::Polygon(poly) => polygons(poly.intersection(&area)),
        Geometry::MultiPolygon(mp) => polygons(mp.intersection(&area)),
        _ => None,
    }
}

fn lines(mut clipped: MultiLineString<f64>) -> Option<Geometry<f64>> {
    match clipped.0.len() {
        0 => None,
        1 => clipped.0.pop().map(Geometry::LineString),
        _ => Some(Geometry::MultiLineString(clipped)),
    }
}

fn polygons(mut clipped: MultiPolygon<f64>) -> Option<Geometry<f64>> {
    match clipped.0.len() {
        0 => None,
        1 => clipped.0.pop().map(Geometry::Polygon),
        _ => Some(Geometry::MultiPolygon(clipped)),
    }
}

/// Douglas-Peucker in pixel units. Points pass through.
fn simplify(geometry: Geometry<f64>) -> Geometry<f64> {
    match geometry {
        Geometry::LineString(ls) => Geometry::LineString(ls.simplify(&SIMPLIFY_TOLERANCE)),
        Geometry::MultiLineString(mls) => {
            Geometry::MultiLineString(mls.simplify(&SIMPLIFY_TOLERANCE))
        }
        Geometry::Polygon(poly) => Geometry::Polygon(poly.simplify(&SIMPLIFY_TOLERANCE)),
        Geometry::MultiPolygon(mp) => Geometry::MultiPolygon(mp.simplify(&SIMPLIFY_TOLERANCE)),
        other => other,
    }
}

/// Rounds onto the integer grid and drops whatever became degenerate.
fn snap(geometry: Geometry<f64>) -> Option<Geometry<f64>> {
    let rounded = geometry.map_coords(|Coord { x, y }| coord! { x: x.round(), y: y.round() });
    match rounded {
        Geometry::Point(p) => Some(Geometry::Point(p)),
        Geometry::MultiPoint(mp) => (!mp.0.is_empty()).then_some(Geometry::MultiPoint(mp)),
        Geometry::LineString(ls) => snap_line(ls).map(Geometry::LineString),
        Geometry::MultiLineString(mls) => {
            let kept: Vec<LineString<f64>> = mls.into_iter().filter_map(snap_line).collect();
            lines(MultiLineString::new(kept))
        }
        Geometry::Polygon(poly) => snap_polygon(poly).map(Geometry::Polygon),
        Geometry::MultiPolygon(mp) => {
            let kept: Vec<Polygon<f64>> = mp.into_iter().filter_map(snap_polygon).collect();
            polygons(MultiPolygon::new(kept))
        }
        _ => None,
    }
}

fn snap_line(mut ls: LineString<f64>) -> Option<LineString<f64>> {
    ls.0.dedup();
    let length: f64 = ls.lines().map(|l| l.dx().hypot(l.dy())).sum();
    (ls.0.len() >= 2 && length >= MIN_LINE_LENGTH).then_some(ls)
}

fn snap_ring(mut ring: LineString<f64>) -> Option<LineString<f64>> {
    ring.0.dedup();
    if ring.0.len() < 4 {
        return None;
    }
    let area = Polygon::new(ring.clone(), vec![]).unsigned_area();
    (area >= MIN_POLYGON_AREA).then_some(ring)
}

/// Exterior rings end up with positive area in tile space, as the wire format expects.
fn snap_polygon(poly: Polygon<f64>) -> Option<Polygon<f64>> {
    let (exterior, interiors) = poly.into_inner();
    let exterior = snap_ring(exterior)?;
    let interiors = interiors.into_iter().filter_map(snap_ring).collect();
    Some(Polygon::new(exterior, interiors).orient(Direction::Default))
}
