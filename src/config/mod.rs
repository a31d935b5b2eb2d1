use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

// Top-level configuration, one section per concern.
#[derive(Debug, Clone)]
pub struct Config {
    pub app: AppConfig,
    pub database: Option<DatabaseConfig>,
    pub redis: Option<RedisConfig>,
    pub reservation: ReservationConfig,
    pub payment: PaymentConfig,
    pub sale_log_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub pool_size: u32,
}

#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Redis,
}

// Seat hold and payment timing
#[derive(Debug, Clone)]
pub struct ReservationConfig {
    pub backend: StoreBackend,
    pub claim_hold: Duration,
    pub payment_timeout: Duration,
    pub sweep_interval: Duration,
    pub settled_retention: Duration,
}

#[derive(Debug, Clone)]
pub struct PaymentConfig {
    pub merchant_secret: String,
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
    }
}

fn seconds_or(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: u64,
) -> Result<Duration, ConfigError> {
    let secs: u64 = parse_or(lookup, key, default)?;
    if secs == 0 {
        return Err(ConfigError::Invalid { key, value: "0".to_string() });
    }
    Ok(Duration::from_secs(secs))
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok().filter(|v| !v.is_empty()))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let log_format = match lookup("LOG_FORMAT").as_deref() {
            None | Some("pretty") => LogFormat::Pretty,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(ConfigError::Invalid { key: "LOG_FORMAT", value: other.to_string() })
            }
        };

        let database = match lookup("DATABASE_URL") {
            Some(url) => Some(DatabaseConfig {
                url,
                pool_size: parse_or(&lookup, "DB_POOL_SIZE", 20)?,
            }),
            None => None,
        };

        let redis = lookup("REDIS_URL").map(|url| RedisConfig { url });

        let backend = match lookup("STORE_BACKEND").as_deref() {
            None | Some("memory") => StoreBackend::Memory,
            Some("redis") => StoreBackend::Redis,
            Some(other) => {
                return Err(ConfigError::Invalid { key: "STORE_BACKEND", value: other.to_string() })
            }
        };
        if backend == StoreBackend::Redis && redis.is_none() {
            return Err(ConfigError::Missing("REDIS_URL"));
        }

        let claim_hold = seconds_or(&lookup, "CLAIM_HOLD_SECONDS", 300)?;

        Ok(Config {
            app: AppConfig {
                host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                port: parse_or(&lookup, "PORT", 8000)?,
                environment: lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
                rust_log: lookup("RUST_LOG")
                    .unwrap_or_else(|| "box_office=debug,tower_http=debug".to_string()),
                log_format,
            },
            database,
            redis,
            reservation: ReservationConfig {
                backend,
                claim_hold,
                payment_timeout: seconds_or(&lookup, "PAYMENT_TIMEOUT_SECONDS", claim_hold.as_secs())?,
                sweep_interval: seconds_or(&lookup, "SWEEP_INTERVAL_SECONDS", 30)?,
                settled_retention: seconds_or(&lookup, "SETTLED_RETENTION_SECONDS", 3600)?,
            },
            payment: PaymentConfig {
                merchant_secret: lookup("MERCHANT_SECRET").ok_or(ConfigError::Missing("MERCHANT_SECRET"))?,
            },
            sale_log_path: lookup("SALE_LOG_PATH").map(PathBuf::from),
        })
    }
}
