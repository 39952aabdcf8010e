use super::{collect_features, Collected, FeatureCollection, FeatureSource, PropertyValue};
use crate::db::{QueryArg, ScanSlot, SlotKind, TileQueryBuilder};
use crate::error::TileError;
use crate::structs::TileAddress;
use async_trait::async_trait;
use futures::StreamExt;
use sqlx::{postgres::PgRow, query, Pool, Postgres, Row};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

/// SQLSTATE raised when Postgres cancels a running statement.
const QUERY_CANCELED: &str = "57014";

/// Reads features from a PostGIS relation.
#[derive(Debug, Clone)]
pub struct PostGisSource {
    pool: Pool<Postgres>,
    builder: TileQueryBuilder,
}

impl PostGisSource {
    pub fn new(pool: Pool<Postgres>, builder: TileQueryBuilder) -> Self {
        PostGisSource { pool, builder }
    }
}

#[async_trait]
impl FeatureSource for PostGisSource {
    async fn fetch_features(
        &self,
        cancel: &CancellationToken,
        tile: &TileAddress,
    ) -> Result<Vec<FeatureCollection>, TileError> {
        let started = Instant::now();
        let tile_query = self.builder.build(tile)?;

        let mut q = query(&tile_query.sql);
        for arg in &tile_query.args {
            q = match arg {
                QueryArg::Float(v) => q.bind(*v),
                QueryArg::Text(v) => q.bind(v.as_str()),
            };
        }

        let slots = self.builder.slots();
        let rows = q
            .fetch(&self.pool)
            .map(|row| row.and_then(|row| scan_row(&row, slots)));

        let collected = collect_features(cancel, slots, rows, is_cancellation)
            .await
            .map_err(|e| {
                let args: Vec<String> = tile_query.args.iter().map(|a| a.to_string()).collect();
                error!(error = %e, query = %tile_query.sql, args = ?args, "Failed to query database");
                TileError::QueryFailed(e)
            })?;

        let mut collection = FeatureCollection::new(tile.layer.as_str());
        match collected {
            Collected::Features(features) => collection.features = features,
            Collected::Canceled => debug!("Feature query canceled, returning empty collection"),
        }

        debug!(
            count = collection.features.len(),
            time = ?started.elapsed(),
            "Time to get features"
        );

        Ok(vec![collection])
    }
}

/// Scans every slot of a row, in select order, into dynamically typed values.
fn scan_row(row: &PgRow, slots: &[ScanSlot]) -> Result<Vec<PropertyValue>, sqlx::Error> {
    slots
        .iter()
        .enumerate()
        .map(|(idx, slot)| {
            let value = match slot.kind {
                SlotKind::Integer => row.try_get::<Option<i64>, _>(idx)?.map(PropertyValue::Int),
                SlotKind::Float => row.try_get::<Option<f64>, _>(idx)?.map(PropertyValue::Float),
                SlotKind::Boolean => row.try_get::<Option<bool>, _>(idx)?.map(PropertyValue::Bool),
                SlotKind::Text => row
                    .try_get::<Option<String>, _>(idx)?
                    .map(PropertyValue::Text),
            };
            Ok(value.unwrap_or(PropertyValue::Null))
        })
        .collect()
}

fn is_cancellation(e: &sqlx::Error) -> bool {
    match e {
        sqlx::Error::Database(db) => db.code().as_deref() == Some(QUERY_CANCELED),
        _ => false,
    }
}
