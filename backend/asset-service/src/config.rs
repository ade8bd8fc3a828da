/// Configuration management for asset-service
///
/// Loads configuration from environment variables with sensible defaults.
/// Only the blob store access key is mandatory.
use resilience::{database_timeout, object_storage_timeout};
use std::fmt;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub blob: BlobConfig,
    pub image: ImageConfig,
    pub deadlines: Deadlines,
    pub sweep: SweepSettings,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub env: String,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Clone)]
pub struct BlobConfig {
    /// Storage API root, e.g. `https://storage.bunnycdn.com`
    pub storage_base_url: String,
    pub zone: String,
    pub access_key: String,
    /// Public origin the stored objects are served from
    pub cdn_base_url: String,
}

impl fmt::Debug for BlobConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobConfig")
            .field("storage_base_url", &self.storage_base_url)
            .field("zone", &self.zone)
            .field("access_key", &"<redacted>")
            .field("cdn_base_url", &self.cdn_base_url)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct ImageConfig {
    pub max_width: u32,
    pub quality: u8,
    pub max_upload_bytes: usize,
}

/// Per-call deadlines applied to remote store calls unless a request overrides them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadlines {
    pub blob: Duration,
    pub index: Duration,
}

impl Default for Deadlines {
    fn default() -> Self {
        Self {
            blob: object_storage_timeout().duration,
            index: database_timeout().duration,
        }
    }
}

#[derive(Clone, Debug)]
pub struct SweepSettings {
    pub grace_period: Duration,
    pub poll_interval: Duration,
    pub batch_size: i64,
    pub max_retries: i32,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let parsed = |key: &str, default: u64| -> u64 {
            lookup(key).and_then(|v| v.parse().ok()).unwrap_or(default)
        };

        let port = match lookup("ASSET_SERVICE_PORT") {
            Some(value) => value
                .trim()
                .parse::<u16>()
                .map_err(|_| ConfigError::Invalid {
                    key: "ASSET_SERVICE_PORT",
                    value,
                })?,
            None => 8085,
        };

        let defaults = Deadlines::default();

        Ok(Config {
            app: AppConfig {
                host: var("ASSET_SERVICE_HOST", "0.0.0.0"),
                port,
                env: var("APP_ENV", "development"),
            },
            database: DatabaseConfig {
                url: var("DATABASE_URL", "postgresql://localhost/assets"),
                max_connections: parsed("DATABASE_MAX_CONNECTIONS", 10) as u32,
            },
            blob: BlobConfig {
                storage_base_url: var("BLOB_STORAGE_BASE_URL", "https://storage.bunnycdn.com")
                    .trim_end_matches('/')
                    .to_string(),
                zone: var("BLOB_STORAGE_ZONE", "lavi"),
                access_key: lookup("BLOB_ACCESS_KEY")
                    .filter(|v| !v.trim().is_empty())
                    .ok_or(ConfigError::Missing("BLOB_ACCESS_KEY"))?,
                cdn_base_url: var("CDN_BASE_URL", "https://cdn.laviarquitetura.com.br")
                    .trim_end_matches('/')
                    .to_string(),
            },
            image: ImageConfig {
                max_width: parsed("IMAGE_MAX_WIDTH", 1080) as u32,
                quality: parsed("IMAGE_QUALITY", 75).clamp(1, 100) as u8,
                max_upload_bytes: parsed("MAX_UPLOAD_BYTES", 25 * 1024 * 1024) as usize,
            },
            deadlines: Deadlines {
                blob: Duration::from_millis(parsed(
                    "BLOB_TIMEOUT_MS",
                    defaults.blob.as_millis() as u64,
                )),
                index: Duration::from_millis(parsed(
                    "INDEX_TIMEOUT_MS",
                    defaults.index.as_millis() as u64,
                )),
            },
            sweep: SweepSettings {
                grace_period: Duration::from_secs(parsed("SWEEP_GRACE_SECS", 15 * 60)),
                poll_interval: Duration::from_secs(parsed("SWEEP_POLL_SECS", 60)),
                batch_size: parsed("SWEEP_BATCH_SIZE", 100) as i64,
                max_retries: parsed("SWEEP_MAX_RETRIES", 5) as i32,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_with_access_key_only() {
        let config = Config::from_lookup(lookup_from(&[("BLOB_ACCESS_KEY", "secret")])).unwrap();

        assert_eq!(config.app.port, 8085);
        assert_eq!(config.image.max_width, 1080);
        assert_eq!(config.image.quality, 75);
        assert_eq!(config.deadlines, Deadlines::default());
        assert_eq!(config.sweep.batch_size, 100);
    }

    #[test]
    fn test_missing_access_key_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("BLOB_ACCESS_KEY")));
    }

    #[test]
    fn test_overrides_and_trailing_slashes() {
        let config = Config::from_lookup(lookup_from(&[
            ("BLOB_ACCESS_KEY", "secret"),
            ("CDN_BASE_URL", "https://cdn.example.com/"),
            ("BLOB_TIMEOUT_MS", "1500"),
            ("IMAGE_QUALITY", "250"),
            ("SWEEP_MAX_RETRIES", "not-a-number"),
        ]))
        .unwrap();

        assert_eq!(config.blob.cdn_base_url, "https://cdn.example.com");
        assert_eq!(config.deadlines.blob, Duration::from_millis(1500));
        assert_eq!(config.image.quality, 100);
        assert_eq!(config.sweep.max_retries, 5);
    }

    #[test]
    fn test_out_of_range_port_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            ("BLOB_ACCESS_KEY", "secret"),
            ("ASSET_SERVICE_PORT", "70000"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "ASSET_SERVICE_PORT",
                ..
            }
        ));

        let config = Config::from_lookup(lookup_from(&[
            ("BLOB_ACCESS_KEY", "secret"),
            ("ASSET_SERVICE_PORT", "9090"),
        ]))
        .unwrap();
        assert_eq!(config.app.port, 9090);
    }

    #[test]
    fn test_access_key_is_redacted() {
        let config = Config::from_lookup(lookup_from(&[("BLOB_ACCESS_KEY", "hunter2")])).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }
}
