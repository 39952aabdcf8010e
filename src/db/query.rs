use super::structs::{quote_ident, ColumnSchema, ScanSlot, SlotKind, GEOMETRY_COLUMN};
use crate::config::{BboxHint, DatasetConfig};
use crate::error::TileError;
use crate::structs::{TileAddress, TileBound};
use geo_types::Geometry;
use geozero::{CoordDimensions, ToWkb};
use std::fmt;

/// SRID of the coordinates exchanged with the tile pipeline.
const WGS84_SRID: i32 = 4326;

/// A value bound to a `$n` placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryArg {
    Float(f64),
    Text(String),
}

impl fmt::Display for QueryArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryArg::Float(v) => write!(f, "{}", v),
            QueryArg::Text(v) => write!(f, "{}", v),
        }
    }
}

/// A feature query for one tile: SQL text plus its arguments in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct TileQuery {
    pub sql: String,
    pub args: Vec<QueryArg>,
}

/// Builds spatially filtered feature queries.
///
/// The select list is fixed at construction: every property column cast to the type of
/// its scan slot, then the geometry column as well-known text. The geometry is always the
/// last selected column, so `slots()` lines up positionally with every row returned.
#[derive(Debug, Clone)]
pub struct TileQueryBuilder {
    slots: Vec<ScanSlot>,
    select: String,
    srid: i32,
    bbox_hint: Option<BboxHint>,
}

impl TileQueryBuilder {
    pub fn new(schema: &ColumnSchema, dataset: &DatasetConfig) -> Result<Self, TileError> {
        if !schema.has_geometry() {
            return Err(TileError::SchemaUnavailable(format!(
                "{} has no {} column",
                dataset.datasource, GEOMETRY_COLUMN
            )));
        }

        if let Some(hint) = &dataset.bbox_hint {
            for column in [&hint.max_x, &hint.max_y] {
                if !schema.contains(column) {
                    return Err(TileError::Config(format!(
                        "Bounding box column {} not found in {}",
                        column, dataset.datasource
                    )));
                }
            }
        }

        let mut slots: Vec<ScanSlot> = schema
            .columns
            .iter()
            .filter(|c| c.name != GEOMETRY_COLUMN && !dataset.is_helper_column(&c.name))
            .map(|c| ScanSlot {
                name: c.name.clone(),
                kind: SlotKind::from_data_type(&c.data_type),
            })
            .collect();

        let mut columns: Vec<String> = slots
            .iter()
            .map(|slot| {
                let quoted = quote_ident(&slot.name);
                format!("{}::{} AS {}", quoted, slot.kind.cast(), quoted)
            })
            .collect();

        let geometry = quote_ident(GEOMETRY_COLUMN);
        let geometry_text = if dataset.srid == WGS84_SRID {
            format!("ST_AsText({})", geometry)
        } else {
            format!("ST_AsText(ST_Transform({}, {}))", geometry, WGS84_SRID)
        };
        columns.push(format!("{} AS {}", geometry_text, geometry));
        slots.push(ScanSlot {
            name: GEOMETRY_COLUMN.to_string(),
            kind: SlotKind::Text,
        });

        Ok(TileQueryBuilder {
            slots,
            select: format!(
                "SELECT {} FROM {}",
                columns.join(", "),
                dataset.datasource.quoted()
            ),
            srid: dataset.srid,
            bbox_hint: dataset.bbox_hint.clone(),
        })
    }

    /// Scan targets in select order, geometry last.
    pub fn slots(&self) -> &[ScanSlot] {
        &self.slots
    }

    pub fn build(&self, tile: &TileAddress) -> Result<TileQuery, TileError> {
        let bound = tile.bound();
        let mut args = Vec::new();
        let mut clauses = Vec::new();

        if let Some(hint) = &self.bbox_hint {
            // A feature whose maximum lies below the tile minimum cannot reach the tile.
            let min_lon = bind(&mut args, QueryArg::Float(bound.min_lon));
            let min_lat = bind(&mut args, QueryArg::Float(bound.min_lat));
            clauses.push(format!(
                "({} >= {} AND {} >= {})",
                quote_ident(&hint.max_x),
                min_lon,
                quote_ident(&hint.max_y),
                min_lat
            ));
        }

        let wkb = bind(&mut args, QueryArg::Text(encode_bound(&bound)?));
        let tile_geometry = format!("ST_GeomFromWKB(decode({}, 'hex'), {})", wkb, WGS84_SRID);
        let tile_geometry = if self.srid == WGS84_SRID {
            tile_geometry
        } else {
            format!("ST_Transform({}, {})", tile_geometry, self.srid)
        };
        clauses.push(format!(
            "ST_Intersects({}, {})",
            quote_ident(GEOMETRY_COLUMN),
            tile_geometry
        ));

        Ok(TileQuery {
            sql: format!("{} WHERE {}", self.select, clauses.join(" AND ")),
            args,
        })
    }
}

fn bind(args: &mut Vec<QueryArg>, arg: QueryArg) -> String {
    args.push(arg);
    format!("${}", args.len())
}

/// Serializes a tile bound as uppercase hex well-known binary.
pub fn encode_bound(bound: &TileBound) -> Result<String, TileError> {
    let wkb = Geometry::Polygon(bound.to_polygon())
        .to_wkb(CoordDimensions::xy())
        .map_err(|e| TileError::GeometryEncodingFailed(e.to_string()))?;
    Ok(hex::encode_upper(wkb))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::structs::{Column, Datasource};
    use lazy_static::lazy_static;
    use regex::Regex;

    lazy_static! {
        static ref PLACEHOLDER: Regex = Regex::new(r"\$(\d+)").unwrap();
    }

    fn schema(columns: &[(&str, &str)]) -> ColumnSchema {
        ColumnSchema::new(
            columns
                .iter()
                .map(|(name, data_type)| Column {
                    name: name.to_string(),
                    data_type: data_type.to_string(),
                })
                .collect(),
        )
    }

    fn places() -> ColumnSchema {
        schema(&[
            ("id", "bigint"),
            ("geometry", "USER-DEFINED"),
            ("name", "text"),
            ("height", "double precision"),
            ("max_lon", "double precision"),
            ("max_lat", "double precision"),
            ("geometry_bbox", "USER-DEFINED"),
            ("is_open", "boolean"),
        ])
    }

    fn dataset() -> DatasetConfig {
        DatasetConfig::new(Datasource::parse("public.places").unwrap())
    }

    fn with_hint() -> DatasetConfig {
        let mut dataset = dataset();
        dataset.bbox_hint = Some(BboxHint {
            max_x: "max_lon".to_string(),
            max_y: "max_lat".to_string(),
        });
        dataset
    }

    fn placeholders(sql: &str) -> Vec<usize> {
        PLACEHOLDER
            .captures_iter(sql)
            .map(|c| c[1].parse().unwrap())
            .collect()
    }

    #[test]
    fn geometry_is_last_slot() {
        let builder = TileQueryBuilder::new(&places(), &dataset()).unwrap();
        let names: Vec<&str> = builder.slots().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["id", "name", "height", "max_lon", "max_lat", "is_open", "geometry"]
        );
        assert_eq!(builder.slots().last().unwrap().kind, SlotKind::Text);
    }

    #[test]
    fn hint_columns_are_not_properties() {
        let builder = TileQueryBuilder::new(&places(), &with_hint()).unwrap();
        let names: Vec<&str> = builder.slots().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "height", "is_open", "geometry"]);
    }

    #[test]
    fn select_list_casts_and_ends_with_geometry() {
        let builder = TileQueryBuilder::new(&places(), &dataset()).unwrap();
        let query = builder.build(&TileAddress::new("places", 0, 0, 0).unwrap()).unwrap();
        assert!(query.sql.starts_with(
            r#"SELECT "id"::int8 AS "id", "name"::text AS "name", "height"::float8 AS "height""#
        ));
        assert!(query
            .sql
            .contains(r#""is_open"::bool AS "is_open", ST_AsText("geometry") AS "geometry" FROM "public"."places" WHERE "#));
    }

    #[test]
    fn intersects_only_without_hint() {
        let builder = TileQueryBuilder::new(&places(), &dataset()).unwrap();
        let query = builder.build(&TileAddress::new("places", 3, 1, 2).unwrap()).unwrap();
        assert!(query.sql.ends_with(
            r#"WHERE ST_Intersects("geometry", ST_GeomFromWKB(decode($1, 'hex'), 4326))"#
        ));
        assert_eq!(query.args.len(), 1);
        assert_eq!(
            query.args[0],
            QueryArg::Text(encode_bound(&TileBound::new(3, 1, 2)).unwrap())
        );
    }

    #[test]
    fn hint_predicate_precedes_intersects() {
        let builder = TileQueryBuilder::new(&places(), &with_hint()).unwrap();
        let tile = TileAddress::new("places", 1, 1, 0).unwrap();
        let query = builder.build(&tile).unwrap();
        assert!(query.sql.contains(
            r#"WHERE ("max_lon" >= $1 AND "max_lat" >= $2) AND ST_Intersects("geometry", ST_GeomFromWKB(decode($3, 'hex'), 4326))"#
        ));
        let bound = tile.bound();
        assert_eq!(query.args[0], QueryArg::Float(bound.min_lon));
        assert_eq!(query.args[1], QueryArg::Float(bound.min_lat));
        assert!(matches!(query.args[2], QueryArg::Text(_)));
    }

    #[test]
    fn placeholders_match_arguments() {
        for dataset in [dataset(), with_hint()] {
            let builder = TileQueryBuilder::new(&places(), &dataset).unwrap();
            for (z, x, y) in [(0, 0, 0), (4, 3, 9), (14, 2620, 6332)] {
                let query = builder.build(&TileAddress::new("places", z, x, y).unwrap()).unwrap();
                let found = placeholders(&query.sql);
                let expected: Vec<usize> = (1..=query.args.len()).collect();
                assert_eq!(found, expected);
            }
        }
    }

    #[test]
    fn transforms_projected_datasets() {
        let mut dataset = dataset();
        dataset.srid = 3857;
        let builder = TileQueryBuilder::new(&places(), &dataset).unwrap();
        let query = builder.build(&TileAddress::new("places", 0, 0, 0).unwrap()).unwrap();
        assert!(query
            .sql
            .contains(r#"ST_AsText(ST_Transform("geometry", 4326)) AS "geometry""#));
        assert!(query.sql.contains(
            "ST_Transform(ST_GeomFromWKB(decode($1, 'hex'), 4326), 3857)"
        ));
    }

    #[test]
    fn requires_geometry_column() {
        let result = TileQueryBuilder::new(&schema(&[("id", "bigint")]), &dataset());
        assert!(matches!(result, Err(TileError::SchemaUnavailable(_))));
    }

    #[test]
    fn requires_hint_columns_in_schema() {
        let result = TileQueryBuilder::new(
            &schema(&[("id", "bigint"), ("geometry", "USER-DEFINED")]),
            &with_hint(),
        );
        assert!(matches!(result, Err(TileError::Config(_))));
    }

    #[test]
    fn encodes_bound_as_hex_wkb() {
        let hex = encode_bound(&TileBound::new(0, 0, 0)).unwrap();
        // little endian polygon, one ring of five points
        assert!(hex.starts_with("01030000000100000005000000"));
        assert_eq!(hex.len(), 2 * (1 + 4 + 4 + 4 + 5 * 16));
        assert_eq!(hex, hex.to_uppercase());
    }
}
