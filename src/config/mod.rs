use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::constants::defaults;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub environment: String,
    pub server_address: SocketAddr,
    pub storage: StorageConfig,
    /// Upper bound on an ingested request body.
    pub max_body_bytes: usize,
    pub request_timeout_secs: u64,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "kebab-case")]
pub enum StorageConfig {
    PostgresS3 {
        database_url: String,
        max_connections: u32,
        minio: MinioConfig,
    },
    Memory,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct MinioConfig {
    /// `host[:port]` without scheme.
    pub host: String,
    pub access_key: String,
    #[serde(skip_serializing)]
    pub secret_key: String,
    pub use_ssl: bool,
    pub region: String,
}

impl std::fmt::Debug for MinioConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MinioConfig")
            .field("host", &self.host)
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .field("use_ssl", &self.use_ssl)
            .field("region", &self.region)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(anyhow!("unknown LOG_FORMAT {other:?}, expected pretty or json")),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if it exists
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var_or = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let required = |key: &str| {
            lookup(key).ok_or_else(|| anyhow!("{key} environment variable is required"))
        };
        fn parsed<T>(key: &str, raw: String) -> Result<T>
        where
            T: FromStr,
            T::Err: std::error::Error + Send + Sync + 'static,
        {
            raw.parse().with_context(|| format!("invalid value for {key}: {raw:?}"))
        }

        let storage = match var_or("STORAGE_BACKEND", defaults::STORAGE_BACKEND).as_str() {
            "postgres-s3" => StorageConfig::PostgresS3 {
                database_url: required("DATABASE_URL")?,
                max_connections: parsed(
                    "DATABASE_MAX_CONNECTIONS",
                    var_or("DATABASE_MAX_CONNECTIONS", &defaults::DATABASE_MAX_CONNECTIONS.to_string()),
                )?,
                minio: MinioConfig {
                    host: required("MINIO_HOST")?,
                    access_key: required("MINIO_ACCESS_KEY")?,
                    secret_key: required("MINIO_SECRET_KEY")?,
                    use_ssl: parsed("MINIO_USE_SSL", var_or("MINIO_USE_SSL", "false"))?,
                    region: var_or("MINIO_REGION", defaults::MINIO_REGION),
                },
            },
            "memory" => StorageConfig::Memory,
            other => {
                return Err(anyhow!(
                    "unknown STORAGE_BACKEND {other:?}, expected postgres-s3 or memory"
                ))
            }
        };

        Ok(Config {
            environment: var_or("ENVIRONMENT", defaults::ENVIRONMENT),
            server_address: parsed(
                "SERVER_ADDRESS",
                var_or("SERVER_ADDRESS", defaults::SERVER_ADDRESS),
            )?,
            storage,
            max_body_bytes: parsed(
                "MAX_BODY_BYTES",
                var_or("MAX_BODY_BYTES", &defaults::MAX_BODY_BYTES.to_string()),
            )?,
            request_timeout_secs: parsed(
                "REQUEST_TIMEOUT_SECS",
                var_or("REQUEST_TIMEOUT_SECS", &defaults::REQUEST_TIMEOUT_SECS.to_string()),
            )?,
            log_format: var_or("LOG_FORMAT", "pretty").parse()?,
        })
    }

    /// In-memory configuration for tests and local experiments.
    pub fn in_memory() -> Self {
        Config {
            environment: "test".to_string(),
            server_address: SocketAddr::from(([127, 0, 0, 1], 0)),
            storage: StorageConfig::Memory,
            max_body_bytes: defaults::MAX_BODY_BYTES,
            request_timeout_secs: defaults::REQUEST_TIMEOUT_SECS,
            log_format: LogFormat::Pretty,
        }
    }

    pub fn storage_backend(&self) -> &'static str {
        match self.storage {
            StorageConfig::PostgresS3 { .. } => "postgres-s3",
            StorageConfig::Memory => "memory",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_memory_backend_defaults() {
        let config = config(&[("STORAGE_BACKEND", "memory")]).unwrap();
        assert_eq!(config.environment, "development");
        assert_eq!(config.server_address.port(), 8080);
        assert_eq!(config.max_body_bytes, 1_048_576);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.storage_backend(), "memory");
    }

    #[test]
    fn test_postgres_s3_requires_credentials() {
        let err = config(&[("DATABASE_URL", "postgres://localhost/hooks")]).unwrap_err();
        assert!(err.to_string().contains("MINIO_HOST"), "{err}");

        let config = config(&[
            ("DATABASE_URL", "postgres://localhost/hooks"),
            ("MINIO_HOST", "localhost:9000"),
            ("MINIO_ACCESS_KEY", "minio"),
            ("MINIO_SECRET_KEY", "minio123"),
            ("MINIO_USE_SSL", "true"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();
        match config.storage {
            StorageConfig::PostgresS3 {
                max_connections,
                minio,
                ..
            } => {
                assert_eq!(max_connections, 10);
                assert!(minio.use_ssl);
                assert_eq!(minio.region, "us-east-1");
                assert!(!format!("{minio:?}").contains("minio123"));
            }
            StorageConfig::Memory => panic!("expected postgres-s3"),
        }
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_invalid_values_are_reported() {
        let err = config(&[("STORAGE_BACKEND", "memory"), ("MAX_BODY_BYTES", "lots")]).unwrap_err();
        assert!(err.to_string().contains("MAX_BODY_BYTES"));

        assert!(config(&[("STORAGE_BACKEND", "redis")]).is_err());
        assert!(config(&[("STORAGE_BACKEND", "memory"), ("LOG_FORMAT", "xml")]).is_err());
    }
}
