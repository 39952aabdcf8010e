pub mod config;
pub mod db;
pub mod error;
pub mod features;
pub mod layers;
pub mod structs;

use crate::error::TileError;
use crate::features::FeatureSource;
use crate::layers::{get_map_config, get_tile, MapConfig, TileEncoder};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

pub struct AppError(anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self.0.downcast_ref::<TileError>() {
            Some(e) if e.is_client_error() => {
                warn!(error = %e, "Rejected tile request");
                (StatusCode::BAD_REQUEST, e.to_string()).into_response()
            }
            _ => {
                error!(error = ?self.0, "Failed to serve request");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[derive(Clone)]
pub struct AppState {
    pub source: Arc<dyn FeatureSource>,
    pub encoder: TileEncoder,
    pub request_timeout: Duration,
    pub map_config: Arc<MapConfig>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/tiles/*path", get(get_tile))
        .route("/map.json", get(get_map_config))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
