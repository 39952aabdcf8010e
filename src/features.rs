pub mod postgis;
pub mod repair;

use crate::db::structs::ScanSlot;
use crate::error::TileError;
use crate::structs::TileAddress;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use geo_types::Geometry;
use geozero::{wkt::Wkt, ToGeo};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub use postgis::PostGisSource;
pub use repair::repair_multipoint;

/// A scalar column value, also used as the dynamically typed scan slot.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

pub type Properties = BTreeMap<String, PropertyValue>;

#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    pub geometry: Geometry<f64>,
    pub properties: Properties,
}

/// Features destined for one named layer of a tile, in query order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureCollection {
    pub name: String,
    pub features: Vec<FeatureRecord>,
}

impl FeatureCollection {
    pub fn new(name: impl Into<String>) -> Self {
        FeatureCollection {
            name: name.into(),
            features: Vec::new(),
        }
    }
}

/// Supplies the features of a tile. The tile encoder only ever sees this trait.
#[async_trait]
pub trait FeatureSource: Send + Sync {
    /// Fetches the feature collections, keyed by layer, intersecting `tile`.
    ///
    /// Once `cancel` fires, implementations stop work and return an empty result
    /// rather than an error.
    async fn fetch_features(
        &self,
        cancel: &CancellationToken,
        tile: &TileAddress,
    ) -> Result<Vec<FeatureCollection>, TileError>;
}

/// Why a scanned row did not become a feature.
#[derive(Debug, Clone, PartialEq)]
pub enum SkippedFeature {
    MissingGeometry,
    InvalidGeometry { wkt: String, error: String },
}

/**
Turns one scanned row into a feature.

`values` lines up positionally with `slots`; the last slot is the geometry as well-known
text. The text is repaired before parsing.
*/
pub fn assemble_feature(
    slots: &[ScanSlot],
    mut values: Vec<PropertyValue>,
) -> Result<FeatureRecord, SkippedFeature> {
    let geometry = match values.pop() {
        Some(PropertyValue::Text(wkt)) => wkt,
        _ => return Err(SkippedFeature::MissingGeometry),
    };

    let wkt = repair_multipoint(&geometry);
    let geometry = Wkt(wkt.as_bytes())
        .to_geo()
        .map_err(|e| SkippedFeature::InvalidGeometry {
            wkt: wkt.to_string(),
            error: e.to_string(),
        })?;

    let properties = slots
        .iter()
        .zip(values)
        .map(|(slot, value)| (slot.name.clone(), value))
        .collect();

    Ok(FeatureRecord {
        geometry,
        properties,
    })
}

/// Outcome of draining a row stream.
#[derive(Debug)]
pub enum Collected {
    Features(Vec<FeatureRecord>),
    Canceled,
}

/// Drains scanned rows into features, in row order.
///
/// Rows whose geometry cannot be parsed are logged and skipped. The stream is abandoned
/// as soon as `cancel` fires. Errors for which `is_cancellation` holds count as
/// cancellation too; any other error is returned.
pub async fn collect_features<S, E>(
    cancel: &CancellationToken,
    slots: &[ScanSlot],
    rows: S,
    is_cancellation: impl Fn(&E) -> bool,
) -> Result<Collected, E>
where
    S: Stream<Item = Result<Vec<PropertyValue>, E>>,
{
    futures::pin_mut!(rows);
    let mut features = Vec::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Collected::Canceled),
            next = rows.try_next() => next,
        };

        match next {
            Ok(Some(values)) => match assemble_feature(slots, values) {
                Ok(feature) => features.push(feature),
                Err(SkippedFeature::MissingGeometry) => {
                    warn!("Skipping feature without geometry");
                }
                Err(SkippedFeature::InvalidGeometry { wkt, error }) => {
                    warn!(geom = %wkt, error = %error, "Failed to unmarshal geometry");
                }
            },
            Ok(None) => break,
            Err(e) if is_cancellation(&e) => {
                debug!("Query canceled while scanning rows");
                return Ok(Collected::Canceled);
            }
            Err(e) => return Err(e),
        }
    }

    Ok(Collected::Features(features))
}
