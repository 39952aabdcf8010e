use crate::error::TileError;
use crate::structs::MAX_LATITUDE;
use serde::Serialize;
use std::fmt;

/// Name of the column holding feature geometries.
pub const GEOMETRY_COLUMN: &str = "geometry";

/// Wraps an identifier in double quotes, doubling any embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// The relation features are read from, `table` or `schema.table`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datasource {
    pub schema: String,
    pub table: String,
}

impl Datasource {
    pub fn parse(locator: &str) -> Result<Datasource, TileError> {
        let parts: Vec<&str> = locator.trim().split('.').collect();
        let (schema, table) = match parts.as_slice() {
            [table] => ("public", *table),
            [schema, table] => (*schema, *table),
            _ => {
                return Err(TileError::Config(format!(
                    "Invalid datasource {}, expected table or schema.table",
                    locator
                )))
            }
        };

        if schema.is_empty() || table.is_empty() {
            return Err(TileError::Config(format!(
                "Invalid datasource {}, empty schema or table name",
                locator
            )));
        }

        Ok(Datasource {
            schema: schema.to_string(),
            table: table.to_string(),
        })
    }

    /// The relation as it appears in a FROM clause.
    pub fn quoted(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.table))
    }
}

impl fmt::Display for Datasource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

/// How a column is selected and decoded when scanning rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Integer,
    Float,
    Boolean,
    Text,
}

impl SlotKind {
    /// Maps an `information_schema` data type onto a scan slot.
    pub fn from_data_type(data_type: &str) -> SlotKind {
        match data_type.to_ascii_lowercase().as_str() {
            "smallint" | "integer" | "bigint" => SlotKind::Integer,
            "real" | "double precision" | "numeric" | "decimal" => SlotKind::Float,
            "boolean" => SlotKind::Boolean,
            _ => SlotKind::Text,
        }
    }

    /// The cast applied in the select list so the slot decodes with a fixed type.
    pub fn cast(&self) -> &'static str {
        match self {
            SlotKind::Integer => "int8",
            SlotKind::Float => "float8",
            SlotKind::Boolean => "bool",
            SlotKind::Text => "text",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub data_type: String,
}

/// Columns of the dataset in their native order. Built once at startup and
/// shared read-only afterwards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnSchema {
    pub columns: Vec<Column>,
}

impl ColumnSchema {
    pub fn new(columns: Vec<Column>) -> Self {
        ColumnSchema { columns }
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names().any(|n| n == name)
    }

    pub fn has_geometry(&self) -> bool {
        self.contains(GEOMETRY_COLUMN)
    }
}

/// One positional target of a row scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanSlot {
    pub name: String,
    pub kind: SlotKind,
}

/// Extent of all dataset geometries in EPSG:4326 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DatasetExtent {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl DatasetExtent {
    pub fn world() -> Self {
        DatasetExtent {
            minx: -180.0,
            miny: -MAX_LATITUDE,
            maxx: 180.0,
            maxy: MAX_LATITUDE,
        }
    }
}
