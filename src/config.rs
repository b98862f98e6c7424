use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "RELIEF_PHOTOS_";

/// Which object store backend holds photo payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreBackend {
    /// S3 or any S3-compatible service.
    S3,
    /// A local directory.
    Fs,
}

impl FromStr for StoreBackend {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "s3" => Ok(Self::S3),
            "fs" | "filesystem" => Ok(Self::Fs),
            other => bail!("unknown store backend `{}` (expected `s3` or `fs`)", other),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub cache_dir: String,
    pub store: StoreBackend,
    pub store_dir: String,
    pub s3_bucket: String,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
    pub s3_path_style: bool,
    pub public_base_url: Option<String>,
    pub max_upload_mb: u64,
    pub upload_timeout: Duration,
    pub fetch_timeout: Duration,
    pub presign_ttl: Duration,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Photo upload and delivery service")]
pub struct Args {
    /// Host to bind to (overrides RELIEF_PHOTOS_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides RELIEF_PHOTOS_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides RELIEF_PHOTOS_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Local cache directory (overrides RELIEF_PHOTOS_CACHE_DIR)
    #[arg(long)]
    pub cache_dir: Option<String>,

    /// Object store backend (overrides RELIEF_PHOTOS_STORE)
    #[arg(long, value_enum)]
    pub store: Option<StoreBackend>,

    /// Directory for the `fs` backend (overrides RELIEF_PHOTOS_STORE_DIR)
    #[arg(long)]
    pub store_dir: Option<String>,

    /// S3 bucket (overrides RELIEF_PHOTOS_S3_BUCKET)
    #[arg(long)]
    pub s3_bucket: Option<String>,

    /// S3 region (overrides RELIEF_PHOTOS_S3_REGION)
    #[arg(long)]
    pub s3_region: Option<String>,

    /// Custom S3 endpoint, e.g. MinIO (overrides RELIEF_PHOTOS_S3_ENDPOINT)
    #[arg(long)]
    pub s3_endpoint: Option<String>,

    /// Use path-style S3 addressing (overrides RELIEF_PHOTOS_S3_PATH_STYLE)
    #[arg(long)]
    pub s3_path_style: bool,

    /// CDN or website prefix for public URLs (overrides RELIEF_PHOTOS_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Upload ceiling in MiB (overrides RELIEF_PHOTOS_MAX_UPLOAD_MB)
    #[arg(long)]
    pub max_upload_mb: Option<u64>,

    /// Upload timeout in seconds (overrides RELIEF_PHOTOS_UPLOAD_TIMEOUT_SECS)
    #[arg(long)]
    pub upload_timeout_secs: Option<u64>,

    /// Object fetch timeout in seconds (overrides RELIEF_PHOTOS_FETCH_TIMEOUT_SECS)
    #[arg(long)]
    pub fetch_timeout_secs: Option<u64>,

    /// Presigned URL lifetime in seconds (overrides RELIEF_PHOTOS_PRESIGN_TTL_SECS)
    #[arg(long)]
    pub presign_ttl_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

/// Look up `RELIEF_PHOTOS_{name}`; unset and empty both count as absent.
fn env_string(name: &str) -> Result<Option<String>> {
    let key = format!("{ENV_PREFIX}{name}");
    match env::var(&key) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

fn env_parsed<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_string(name)?
        .map(|value| {
            value.trim().parse::<T>().map_err(|err| {
                anyhow::anyhow!("parsing {}{} value `{}`: {}", ENV_PREFIX, name, value, err)
            })
        })
        .transpose()
}

fn env_flag(name: &str) -> Result<bool> {
    Ok(env_string(name)?
        .map(|value| matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false))
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let migrate = args.migrate;
        Ok((Self::merge(args)?, migrate))
    }

    /// CLI values win over environment values, which win over defaults.
    pub fn merge(args: Args) -> Result<Self> {
        let secs = |cli: Option<u64>, name: &str, default: u64| -> Result<Duration> {
            let value = match cli {
                Some(value) => value,
                None => env_parsed::<u64>(name)?.unwrap_or(default),
            };
            Ok(Duration::from_secs(value))
        };

        let cfg = Self {
            host: args
                .host
                .map_or_else(|| env_string("HOST"), |v| Ok(Some(v)))?
                .unwrap_or_else(|| "0.0.0.0".into()),
            port: match args.port {
                Some(port) => port,
                None => env_parsed::<u16>("PORT")?.unwrap_or(8080),
            },
            database_url: args
                .database_url
                .map_or_else(|| env_string("DATABASE_URL"), |v| Ok(Some(v)))?
                .unwrap_or_else(|| "sqlite://./data/meta/photos.db".into()),
            cache_dir: args
                .cache_dir
                .map_or_else(|| env_string("CACHE_DIR"), |v| Ok(Some(v)))?
                .unwrap_or_else(|| "./.cache".into()),
            store: match args.store {
                Some(store) => store,
                None => env_parsed::<StoreBackend>("STORE")?.unwrap_or(StoreBackend::S3),
            },
            store_dir: args
                .store_dir
                .map_or_else(|| env_string("STORE_DIR"), |v| Ok(Some(v)))?
                .unwrap_or_else(|| "./data/objects".into()),
            s3_bucket: args
                .s3_bucket
                .map_or_else(|| env_string("S3_BUCKET"), |v| Ok(Some(v)))?
                .unwrap_or_default(),
            s3_region: args
                .s3_region
                .map_or_else(|| env_string("S3_REGION"), |v| Ok(Some(v)))?,
            s3_endpoint: args
                .s3_endpoint
                .map_or_else(|| env_string("S3_ENDPOINT"), |v| Ok(Some(v)))?,
            s3_access_key: env_string("S3_ACCESS_KEY")?,
            s3_secret_key: env_string("S3_SECRET_KEY")?,
            s3_path_style: args.s3_path_style || env_flag("S3_PATH_STYLE")?,
            public_base_url: args
                .public_base_url
                .map_or_else(|| env_string("PUBLIC_BASE_URL"), |v| Ok(Some(v)))?,
            max_upload_mb: match args.max_upload_mb {
                Some(mb) => mb,
                None => env_parsed::<u64>("MAX_UPLOAD_MB")?.unwrap_or(10),
            },
            upload_timeout: secs(args.upload_timeout_secs, "UPLOAD_TIMEOUT_SECS", 60)?,
            fetch_timeout: secs(args.fetch_timeout_secs, "FETCH_TIMEOUT_SECS", 30)?,
            presign_ttl: secs(args.presign_ttl_secs, "PRESIGN_TTL_SECS", 300)?,
        };

        if cfg.max_upload_mb == 0 {
            bail!("max upload size must be at least 1 MiB");
        }
        if cfg.store == StoreBackend::S3 && cfg.s3_bucket.trim().is_empty() {
            bail!("{}S3_BUCKET is required for the s3 store backend", ENV_PREFIX);
        }

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}
