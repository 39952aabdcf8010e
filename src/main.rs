use anyhow::{Context, Error};
use dotenv::dotenv;
use std::sync::Arc;
use tileshow::config::{Config, LogFormat};
use tileshow::db::{
    check_postgis, get_db_connector, load_column_schema, load_dataset_extent, TileQueryBuilder,
};
use tileshow::features::PostGisSource;
use tileshow::layers::{MapConfig, TileEncoder};
use tileshow::{app, AppState};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;
    init_tracing(&config);

    let db_pool = get_db_connector(&config).await?;
    let postgis = check_postgis(&db_pool).await?;
    info!(postgis = %postgis, "Connected to database");

    let dataset = &config.dataset;
    let schema = load_column_schema(&db_pool, &dataset.datasource)
        .await
        .context("Failed to load dataset schema")?;
    for label in &dataset.label_properties {
        if !schema.contains(label) {
            warn!(property = %label, "Label property is not a column of {}", dataset.datasource);
        }
    }

    let extent = load_dataset_extent(&db_pool, &dataset.datasource, dataset.srid)
        .await
        .context("Failed to compute dataset extent")?;
    let builder = TileQueryBuilder::new(&schema, dataset).context("Failed to plan tile query")?;

    let state = AppState {
        source: Arc::new(PostGisSource::new(db_pool, builder)),
        encoder: TileEncoder {
            simplify: config.simplify,
        },
        request_timeout: config.request_timeout,
        map_config: Arc::new(MapConfig {
            extent,
            label_properties: dataset.label_properties.clone(),
            layer: dataset.datasource.table.clone(),
        }),
    };

    let server = axum::Server::try_bind(&config.bind_address)
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    info!("Listening on http://{}", config.bind_address);

    server
        .serve(app(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Error occurred while starting server")
}

fn init_tracing(config: &Config) {
    let default_level = if config.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Pretty => subscriber.init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}
