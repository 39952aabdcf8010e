pub mod query;
pub mod structs;

use crate::config::Config;
use crate::error::TileError;
use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, query_as, Pool, Postgres};
use structs::{quote_ident, Column, ColumnSchema, Datasource, DatasetExtent, GEOMETRY_COLUMN};
use tracing::{debug, error};

pub use query::{QueryArg, TileQuery, TileQueryBuilder};
pub use structs::{ScanSlot, SlotKind};

pub async fn get_db_connector(config: &Config) -> Result<Pool<Postgres>> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(&config.database_url)
        .await
        .context("Failed to connect using provided connection string.")
}

/// Discovers the dataset's columns in their native order.
pub async fn load_column_schema(
    p: &Pool<Postgres>,
    datasource: &Datasource,
) -> Result<ColumnSchema, TileError> {
    let q = "select column_name::text, data_type::text
        from information_schema.columns
        where table_schema = $1 and table_name = $2
        order by ordinal_position";

    let rows: Vec<(String, String)> = query_as(q)
        .bind(&datasource.schema)
        .bind(&datasource.table)
        .fetch_all(p)
        .await
        .map_err(|e| {
            error!(error = %e, query = q, "Failed to query dataset schema");
            TileError::SchemaUnavailable(e.to_string())
        })?;

    if rows.is_empty() {
        return Err(TileError::SchemaUnavailable(format!(
            "{} not found or has no columns",
            datasource
        )));
    }

    let schema = ColumnSchema::new(
        rows.into_iter()
            .map(|(name, data_type)| Column { name, data_type })
            .collect(),
    );
    debug!(columns = ?schema.names().collect::<Vec<_>>(), "Discovered dataset schema");

    Ok(schema)
}

/// Computes the extent of every geometry in the dataset, in EPSG:4326.
pub async fn load_dataset_extent(
    p: &Pool<Postgres>,
    datasource: &Datasource,
    srid: i32,
) -> Result<DatasetExtent, TileError> {
    let geometry = if srid == 4326 {
        quote_ident(GEOMETRY_COLUMN)
    } else {
        format!("ST_Transform({}, 4326)", quote_ident(GEOMETRY_COLUMN))
    };
    let q = format!(
        "select min(ST_XMin({g}))::float8, min(ST_YMin({g}))::float8,
            max(ST_XMax({g}))::float8, max(ST_YMax({g}))::float8
        from {}",
        datasource.quoted(),
        g = geometry
    );

    let (minx, miny, maxx, maxy): (Option<f64>, Option<f64>, Option<f64>, Option<f64>) =
        query_as(&q).fetch_one(p).await.map_err(|e| {
            error!(error = %e, query = %q, "Failed to derive dataset extent");
            TileError::ExtentUnavailable(e)
        })?;

    match (minx, miny, maxx, maxy) {
        (Some(minx), Some(miny), Some(maxx), Some(maxy)) => Ok(DatasetExtent {
            minx,
            miny,
            maxx,
            maxy,
        }),
        _ => {
            debug!("Dataset {} is empty, using world extent", datasource);
            Ok(DatasetExtent::world())
        }
    }
}

/// Checks the connection is usable and PostGIS is installed.
pub async fn check_postgis(p: &Pool<Postgres>) -> Result<String> {
    sqlx::query("select PostGIS_Lib_Version()")
        .fetch_one(p)
        .await
        .and_then(|row| sqlx::Row::try_get::<String, usize>(&row, 0))
        .context("PostGIS is not available in the target database")
}
