use anyhow::Result;
use axum::Router;
use relief_photos::{
    config::{self, StoreBackend},
    routes,
    services::{
        local_cache::LocalCache,
        object_store::{
            ObjectStore,
            filesystem::FileSystemStore,
            s3::{S3ObjectStore, S3Settings},
        },
        photo_repository::SqlitePhotoRepository,
        photo_service::{PhotoService, PhotoSettings},
    },
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!(
        "Starting relief-photos on {} (store: {:?}, cache: {})",
        cfg.addr(),
        cfg.store,
        cfg.cache_dir
    );

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    tracing::debug!("Connecting using raw URL => {}", db_url);

    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    if !db_path.starts_with(":memory:") {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
    }

    let options = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
    let db: Arc<sqlx::Pool<sqlx::Sqlite>> = Arc::new(
        SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?,
    );
    let repo = SqlitePhotoRepository::new(db.clone());

    // --- Schema ---
    repo.migrate().await?;
    if migrate {
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Ensure cache directory exists ---
    if !Path::new(&cfg.cache_dir).exists() {
        fs::create_dir_all(&cfg.cache_dir)?;
        tracing::info!("Created cache directory at {}", cfg.cache_dir);
    }

    // --- Object store ---
    let store: Arc<dyn ObjectStore> = match cfg.store {
        StoreBackend::S3 => {
            let settings = S3Settings {
                bucket: cfg.s3_bucket.clone(),
                region: cfg.s3_region.clone(),
                endpoint: cfg.s3_endpoint.clone(),
                access_key: cfg.s3_access_key.clone(),
                secret_key: cfg.s3_secret_key.clone(),
                path_style: cfg.s3_path_style,
                public_base_url: cfg.public_base_url.clone(),
            };
            Arc::new(S3ObjectStore::connect(settings, cfg.max_upload_bytes()).await?)
        }
        StoreBackend::Fs => {
            fs::create_dir_all(&cfg.store_dir)?;
            tracing::info!("Storing objects under {}", cfg.store_dir);
            Arc::new(FileSystemStore::new(
                &cfg.store_dir,
                cfg.public_base_url.clone(),
                cfg.max_upload_bytes(),
            ))
        }
    };

    // --- Initialize core service ---
    let service = PhotoService::new(
        Arc::new(repo),
        store,
        LocalCache::new(&cfg.cache_dir),
        PhotoSettings {
            upload_timeout: cfg.upload_timeout,
            fetch_timeout: cfg.fetch_timeout,
            presign_ttl: cfg.presign_ttl,
        },
    );

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_upload_bytes()).with_state(service);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
