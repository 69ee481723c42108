use chrono::NaiveTime;
use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Fallback variable for the source API key, kept for existing deployments.
pub const LEGACY_API_KEY_VAR: &str = "MASSIVE_API_KEY";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub source: SourceConfig,
    pub sink: SinkConfig,
    pub schedule: ScheduleConfig,
    pub telemetry: TelemetryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SourceConfig {
    pub catalog_url: String,
    pub api_key: String,
    pub market: String,
    pub active_only: bool,
    pub sort: String,
    pub order: String,
    pub page_limit: u32,
    pub page_delay_ms: u64,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SinkConfig {
    pub kind: SinkKind,
    /// Write an aborted run's records to the snapshot sink for inspection.
    pub flush_partial: bool,
    pub snapshot: SnapshotConfig,
    pub warehouse: WarehouseConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    Snapshot,
    Warehouse,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SnapshotConfig {
    pub path: PathBuf,
    pub absent_marker: String,
}

/// Warehouse coordinates. `database` and `schema` are required at write
/// time; the sink refuses to connect without them.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WarehouseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub role: Option<String>,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub table: String,
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScheduleConfig {
    pub interval_secs: Option<u64>,
    /// Daily trigger as "HH:MM" in UTC.
    pub daily_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        // A missing .env file is normal outside local development
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();

        // Load default configuration
        builder = builder.add_source(config::Config::try_from(&Config::default())?);

        // Layer on config file if it exists
        if Path::new("config.toml").exists() {
            builder = builder.add_source(File::with_name("config"));
        }

        // Layer on environment variables (TICKERS_ prefix)
        builder = builder.add_source(
            Environment::with_prefix("TICKERS")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let mut settings: Config = config.try_deserialize()?;

        if settings.source.api_key.is_empty() {
            if let Ok(key) = std::env::var(LEGACY_API_KEY_VAR) {
                settings.source.api_key = key;
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.catalog_url.is_empty() {
            return Err(ConfigError::Message("source.catalog_url is required".into()));
        }

        if !(1..=1000).contains(&self.source.page_limit) {
            return Err(ConfigError::Message(
                "source.page_limit must be between 1 and 1000".into(),
            ));
        }

        self.schedule.daily_time()?;

        Ok(())
    }
}

impl SourceConfig {
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }
}

impl SnapshotConfig {
    /// Sibling path that receives catalogs from aborted runs.
    pub fn partial_path(&self) -> PathBuf {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot".to_string());
        let name = match self.path.extension() {
            Some(ext) => format!("{}.partial.{}", stem, ext.to_string_lossy()),
            None => format!("{}.partial", stem),
        };
        self.path.with_file_name(name)
    }
}

impl ScheduleConfig {
    pub fn daily_time(&self) -> Result<Option<NaiveTime>, ConfigError> {
        self.daily_at
            .as_deref()
            .map(|raw| {
                NaiveTime::parse_from_str(raw, "%H:%M").map_err(|e| {
                    ConfigError::Message(format!(
                        "schedule.daily_at must be HH:MM, got '{}': {}",
                        raw, e
                    ))
                })
            })
            .transpose()
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            source: SourceConfig {
                catalog_url: "https://api.massive.com/v3/reference/tickers".to_string(),
                api_key: String::new(),
                market: "stocks".to_string(),
                active_only: true,
                sort: "ticker".to_string(),
                order: "asc".to_string(),
                page_limit: 1000,
                page_delay_ms: 1000,
                request_timeout_secs: 30,
            },
            sink: SinkConfig {
                kind: SinkKind::Snapshot,
                flush_partial: true,
                snapshot: SnapshotConfig {
                    path: PathBuf::from("tickers.csv"),
                    absent_marker: String::new(),
                },
                warehouse: WarehouseConfig {
                    host: "localhost".to_string(),
                    port: 5432,
                    user: "postgres".to_string(),
                    password: String::new(),
                    role: None,
                    database: None,
                    schema: None,
                    table: "tickers".to_string(),
                    connect_timeout_secs: 10,
                },
            },
            schedule: ScheduleConfig {
                interval_secs: Some(60),
                daily_at: Some("09:00".to_string()),
            },
            telemetry: TelemetryConfig {
                log_level: "info".to_string(),
                log_format: LogFormat::Pretty,
                metrics_enabled: false,
                metrics_port: 9090,
            },
        }
    }
}
