use crate::db::structs::Datasource;
use crate::error::TileError;
use regex::Regex;
use std::net::SocketAddr;
use std::time::Duration;

pub const DEFAULT_EXCLUDED_COLUMNS: &[&str] = &["^bbox$", "_bbox$"];
const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:3000";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_SRID: i32 = 4326;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 30_000;

/// Precomputed per-row extrema columns used to cheapen the spatial predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BboxHint {
    pub max_x: String,
    pub max_y: String,
}

/// Patterns naming helper columns that never become feature properties.
#[derive(Debug, Clone)]
pub struct ExcludedColumns(Vec<Regex>);

impl ExcludedColumns {
    pub fn new<I, S>(patterns: I) -> Result<Self, TileError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        patterns
            .into_iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|e| {
                    TileError::Config(format!("Invalid excluded column pattern {}: {}", p.as_ref(), e))
                })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(ExcludedColumns)
    }

    pub fn matches(&self, column: &str) -> bool {
        self.0.iter().any(|re| re.is_match(column))
    }
}

impl Default for ExcludedColumns {
    fn default() -> Self {
        ExcludedColumns(
            DEFAULT_EXCLUDED_COLUMNS
                .iter()
                .map(|p| Regex::new(p).unwrap())
                .collect(),
        )
    }
}

/// Everything that shapes the feature query for one dataset.
#[derive(Debug, Clone)]
pub struct DatasetConfig {
    pub datasource: Datasource,
    pub srid: i32,
    pub bbox_hint: Option<BboxHint>,
    pub excluded_columns: ExcludedColumns,
    pub label_properties: Vec<String>,
}

impl DatasetConfig {
    pub fn new(datasource: Datasource) -> Self {
        DatasetConfig {
            datasource,
            srid: DEFAULT_SRID,
            bbox_hint: None,
            excluded_columns: ExcludedColumns::default(),
            label_properties: Vec::new(),
        }
    }

    /// Whether `column` is a helper column kept out of feature properties.
    pub fn is_helper_column(&self, column: &str) -> bool {
        if let Some(hint) = &self.bbox_hint {
            if column == hint.max_x || column == hint.max_y {
                return true;
            }
        }
        self.excluded_columns.matches(column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub bind_address: SocketAddr,
    pub dataset: DatasetConfig,
    pub simplify: bool,
    pub request_timeout: Duration,
    pub log_format: LogFormat,
    pub verbose: bool,
}

impl Config {
    /// Reads configuration from the process environment.
    pub fn from_env() -> Result<Config, TileError> {
        Config::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds configuration from any key lookup, so callers decide where values come from.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, TileError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| TileError::Config(format!("No {} found in environment", key)))
        };

        let database_url = required("DB_CONNECTION_STRING")?;
        let datasource = Datasource::parse(&required("TILE_DATASOURCE")?)?;

        let mut dataset = DatasetConfig::new(datasource);
        dataset.srid = parse_or(get("TILE_DATASET_SRID"), "TILE_DATASET_SRID", DEFAULT_SRID)?;
        dataset.bbox_hint = match (get("TILE_MAX_X_COLUMN"), get("TILE_MAX_Y_COLUMN")) {
            (Some(max_x), Some(max_y)) => Some(BboxHint { max_x, max_y }),
            (None, None) => None,
            _ => {
                return Err(TileError::Config(
                    "Bounding box hint needs both TILE_MAX_X_COLUMN and TILE_MAX_Y_COLUMN".to_string(),
                ))
            }
        };
        if let Some(patterns) = get("TILE_EXCLUDED_COLUMNS") {
            dataset.excluded_columns = ExcludedColumns::new(split_list(&patterns))?;
        }
        dataset.label_properties = get("TILE_LABEL_PROPERTIES")
            .map(|v| split_list(&v))
            .unwrap_or_default();

        let bind_address = get("BIND_ADDRESS")
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string())
            .parse::<SocketAddr>()
            .map_err(|e| TileError::Config(format!("Invalid BIND_ADDRESS: {}", e)))?;

        let log_format = match get("LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(TileError::Config(format!(
                    "Invalid LOG_FORMAT {}, expected pretty or json",
                    other
                )))
            }
        };

        Ok(Config {
            database_url,
            max_connections: parse_or(
                get("DB_MAX_CONNECTIONS"),
                "DB_MAX_CONNECTIONS",
                DEFAULT_MAX_CONNECTIONS,
            )?,
            bind_address,
            dataset,
            simplify: parse_or(get("TILE_SIMPLIFY"), "TILE_SIMPLIFY", true)?,
            request_timeout: Duration::from_millis(parse_or(
                get("TILE_REQUEST_TIMEOUT_MS"),
                "TILE_REQUEST_TIMEOUT_MS",
                DEFAULT_REQUEST_TIMEOUT_MS,
            )?),
            log_format,
            verbose: parse_or(get("VERBOSE"), "VERBOSE", false)?,
        })
    }
}

fn parse_or<T>(value: Option<String>, key: &str, default: T) -> Result<T, TileError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(v) => v
            .trim()
            .parse::<T>()
            .map_err(|e| TileError::Config(format!("Invalid {} {}: {}", key, v, e))),
        None => Ok(default),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
