pub mod vector_tile;

use crate::db::structs::DatasetExtent;
use crate::features::FeatureCollection;
use crate::structs::parse_tile_path;
use crate::{AppError, AppState};
use axum::extract::State;
use axum::http::Uri;
use axum::Json;
use axum_macros::debug_handler;
use serde::Serialize;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, Instrument};
use vector_tile::EncodedTile;

pub use vector_tile::{TileEncoder, MVT_CONTENT_TYPE};

/// What a map client needs to know before it starts requesting tiles.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapConfig {
    #[serde(flatten)]
    pub extent: DatasetExtent,
    pub label_properties: Vec<String>,
    pub layer: String,
}

#[debug_handler]
/**
Serves one vector tile for any path ending in `{layer}/{z}/{x}/{y}.{ext}`.

The requested layer segment names the single layer of the returned tile. When the
request outlives its timeout, or the client goes away, the feature query is canceled
and whatever is left is an empty layer, still answered with `200 OK`.

# Example

```text
GET /tiles/places/3/2/1.mvt
200 OK
Content-Type: application/vnd.mapbox-vector-tile
```
*/
pub async fn get_tile(
    State(state): State<AppState>,
    uri: Uri,
) -> Result<EncodedTile, AppError> {
    let address = parse_tile_path(uri.path())?;
    let span = info_span!("tile", layer = %address.layer, tile = %address);

    async move {
        let cancel = CancellationToken::new();
        // dropping the handler future (client disconnect) cancels the query too
        let _guard = cancel.clone().drop_guard();

        let mut fetch = state.source.fetch_features(&cancel, &address);
        let fetched = tokio::select! {
            fetched = &mut fetch => fetched,
            _ = tokio::time::sleep(state.request_timeout) => {
                cancel.cancel();
                fetch.await
            }
        };

        let mut collections = fetched?;
        if collections.is_empty() {
            collections.push(FeatureCollection::new(address.layer.as_str()));
        }
        if cancel.is_cancelled() {
            debug!("Request deadline elapsed, serving what was fetched");
        }

        let started = Instant::now();
        let tile = state.encoder.encode(&collections, &address)?;
        debug!(
            bytes = tile.as_bytes().len(),
            time = ?started.elapsed(),
            "Time to encode tile"
        );

        Ok::<_, AppError>(tile)
    }
    .instrument(span)
    .await
}

pub async fn get_map_config(State(state): State<AppState>) -> Json<MapConfig> {
    Json(state.map_config.as_ref().clone())
}
