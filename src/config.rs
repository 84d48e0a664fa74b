use crate::services::file_service::{AllowedTypes, UploadPolicy};
use crate::store::S3Settings;
use anyhow::{Context, Result, bail};
use axum::http::HeaderValue;
use clap::{Parser, ValueEnum};
use std::env;

/// Which object store the service talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Remote S3-compatible service (MinIO, AWS S3, R2).
    S3,
    /// SQLite + local disk.
    Local,
    /// Process memory; nothing persists.
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments; fixed after startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub backend: Backend,
    pub s3: S3Settings,
    pub bucket: String,
    pub storage_dir: String,
    pub database_url: String,
    pub max_file_size: u64,
    pub allowed_file_types: String,
    pub cors_origin: String,
    pub log_format: LogFormat,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "File manager backed by an S3-compatible object store")]
pub struct Args {
    /// Host to bind to (overrides FILE_MANAGER_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILE_MANAGER_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Deployment environment; `production` hides internal error messages
    /// (overrides FILE_MANAGER_ENV)
    #[arg(long)]
    pub environment: Option<String>,

    /// Object store backend (overrides FILE_MANAGER_BACKEND)
    #[arg(long, value_enum)]
    pub backend: Option<Backend>,

    /// S3 endpoint host (overrides FILE_MANAGER_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// S3 endpoint port (overrides FILE_MANAGER_S3_PORT)
    #[arg(long)]
    pub s3_port: Option<u16>,

    /// Talk to the S3 endpoint over TLS (overrides FILE_MANAGER_S3_USE_SSL)
    #[arg(long)]
    pub s3_use_ssl: Option<bool>,

    /// S3 access key (overrides FILE_MANAGER_S3_ACCESS_KEY)
    #[arg(long)]
    pub s3_access_key: Option<String>,

    /// S3 secret key (overrides FILE_MANAGER_S3_SECRET_KEY)
    #[arg(long)]
    pub s3_secret_key: Option<String>,

    /// Bucket holding all files (overrides FILE_MANAGER_BUCKET)
    #[arg(long)]
    pub bucket: Option<String>,

    /// Region used when creating the bucket (overrides FILE_MANAGER_REGION)
    #[arg(long)]
    pub region: Option<String>,

    /// Payload directory of the local backend (overrides FILE_MANAGER_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// SQLite URL of the local backend (overrides FILE_MANAGER_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Largest accepted upload in bytes (overrides FILE_MANAGER_MAX_FILE_SIZE)
    #[arg(long)]
    pub max_file_size: Option<u64>,

    /// Comma-separated MIME types, or `*/*` (overrides FILE_MANAGER_ALLOWED_FILE_TYPES)
    #[arg(long)]
    pub allowed_file_types: Option<String>,

    /// Allowed CORS origin, `*` for any (overrides FILE_MANAGER_CORS_ORIGIN)
    #[arg(long)]
    pub cors_origin: Option<String>,

    /// Log output format (overrides FILE_MANAGER_LOG_FORMAT)
    #[arg(long, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Apply the local backend schema and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Read `key` through `lookup`, parse it, or fall back to `default`.
fn env_parse<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        None => Ok(default),
    }
}

fn env_or<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key).unwrap_or_else(|| default.to_string())
}

fn env_enum<T, F>(lookup: &F, key: &str, default: T) -> Result<T>
where
    T: ValueEnum,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(value) => <T as ValueEnum>::from_str(value.trim(), true)
            .map_err(|err| anyhow::anyhow!("parsing {} value `{}`: {}", key, value, err)),
        None => Ok(default),
    }
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |key| env::var(key).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over values found through `lookup` over defaults.
    pub fn resolve<F>(args: Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env_port = env_parse(&lookup, "FILE_MANAGER_PORT", 3000u16)?;
        let env_s3_port = env_parse(&lookup, "FILE_MANAGER_S3_PORT", 9000u16)?;
        let env_s3_ssl = env_parse(&lookup, "FILE_MANAGER_S3_USE_SSL", false)?;
        let env_max_size = env_parse(&lookup, "FILE_MANAGER_MAX_FILE_SIZE", 52_428_800u64)?;
        let env_backend = env_enum(&lookup, "FILE_MANAGER_BACKEND", Backend::S3)?;
        let env_log_format = env_enum(&lookup, "FILE_MANAGER_LOG_FORMAT", LogFormat::Text)?;

        let cfg = Self {
            host: args
                .host
                .unwrap_or_else(|| env_or(&lookup, "FILE_MANAGER_HOST", "0.0.0.0")),
            port: args.port.unwrap_or(env_port),
            environment: args
                .environment
                .unwrap_or_else(|| env_or(&lookup, "FILE_MANAGER_ENV", "development")),
            backend: args.backend.unwrap_or(env_backend),
            s3: S3Settings {
                endpoint: args
                    .s3_endpoint
                    .unwrap_or_else(|| env_or(&lookup, "FILE_MANAGER_S3_ENDPOINT", "localhost")),
                port: args.s3_port.unwrap_or(env_s3_port),
                use_ssl: args.s3_use_ssl.unwrap_or(env_s3_ssl),
                access_key: args
                    .s3_access_key
                    .unwrap_or_else(|| env_or(&lookup, "FILE_MANAGER_S3_ACCESS_KEY", "minioadmin")),
                secret_key: args
                    .s3_secret_key
                    .unwrap_or_else(|| env_or(&lookup, "FILE_MANAGER_S3_SECRET_KEY", "minioadmin")),
                region: args
                    .region
                    .unwrap_or_else(|| env_or(&lookup, "FILE_MANAGER_REGION", "us-east-1")),
            },
            bucket: args
                .bucket
                .unwrap_or_else(|| env_or(&lookup, "FILE_MANAGER_BUCKET", "files")),
            storage_dir: args
                .storage_dir
                .unwrap_or_else(|| env_or(&lookup, "FILE_MANAGER_STORAGE_DIR", "./data/objects")),
            database_url: args.database_url.unwrap_or_else(|| {
                env_or(
                    &lookup,
                    "FILE_MANAGER_DATABASE_URL",
                    "sqlite://./data/meta/file_manager.db",
                )
            }),
            max_file_size: args.max_file_size.unwrap_or(env_max_size),
            allowed_file_types: args
                .allowed_file_types
                .unwrap_or_else(|| env_or(&lookup, "FILE_MANAGER_ALLOWED_FILE_TYPES", "*/*")),
            cors_origin: args
                .cors_origin
                .unwrap_or_else(|| env_or(&lookup, "FILE_MANAGER_CORS_ORIGIN", "*")),
            log_format: args.log_format.unwrap_or(env_log_format),
        };

        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        if self.port == 0 {
            bail!("invalid port configuration: 0");
        }
        if self.backend == Backend::S3 && self.s3.port == 0 {
            bail!("invalid S3 port configuration: 0");
        }
        if self.max_file_size == 0 {
            bail!("invalid max file size configuration: 0");
        }
        if self.bucket.trim().is_empty() {
            bail!("bucket name must not be empty");
        }
        if self.backend == Backend::S3
            && (self.s3.access_key.is_empty() || self.s3.secret_key.is_empty())
        {
            bail!("S3 access key and secret key are required");
        }
        if self.cors_origin != "*" {
            HeaderValue::from_str(&self.cors_origin)
                .with_context(|| format!("invalid CORS origin `{}`", self.cors_origin))?;
        }
        Ok(())
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    pub fn upload_policy(&self) -> UploadPolicy {
        UploadPolicy {
            max_file_size: self.max_file_size,
            allowed_types: AllowedTypes::parse(&self.allowed_file_types),
        }
    }
}
