use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

#[derive(Debug, Clone, Deserialize)]
pub enum StorageConfig {
    /// Files under `root`, served back from `url`.
    Local { root: PathBuf, url: String },
    S3(S3Config),
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub db_wait_attempts: u32,
    pub db_wait_interval: Duration,
    pub jwt: JwtConfig,
    pub storage: StorageConfig,
    pub upload_limit_bytes: usize,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let jwt = JwtConfig {
            secret: std::env::var("JWT_SECRET").context("JWT_SECRET is not set")?,
            issuer: env_or("JWT_ISSUER", "recipebox"),
            audience: env_or("JWT_AUDIENCE", "recipebox-users"),
            ttl_minutes: env_parse("JWT_TTL_MINUTES", 60),
            refresh_ttl_minutes: env_parse("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 14),
        };

        let storage = match env_or("STORAGE_BACKEND", "local").as_str() {
            "local" => StorageConfig::Local {
                root: PathBuf::from(env_or("MEDIA_ROOT", "./media")),
                url: env_or("MEDIA_URL", "/media"),
            },
            "s3" => StorageConfig::S3(S3Config {
                endpoint: std::env::var("MINIO_ENDPOINT").context("MINIO_ENDPOINT is not set")?,
                bucket: std::env::var("MINIO_BUCKET").context("MINIO_BUCKET is not set")?,
                access_key: std::env::var("MINIO_ACCESS_KEY")
                    .context("MINIO_ACCESS_KEY is not set")?,
                secret_key: std::env::var("MINIO_SECRET_KEY")
                    .context("MINIO_SECRET_KEY is not set")?,
                region: env_or("MINIO_REGION", "us-east-1"),
            }),
            other => anyhow::bail!("unknown STORAGE_BACKEND {other:?}, expected local or s3"),
        };

        Ok(Self {
            database_url,
            db_wait_attempts: env_parse("DB_WAIT_ATTEMPTS", 30),
            db_wait_interval: Duration::from_secs(env_parse("DB_WAIT_INTERVAL_SECS", 1)),
            jwt,
            storage,
            upload_limit_bytes: env_parse("UPLOAD_LIMIT_BYTES", 10 * 1024 * 1024),
        })
    }
}
