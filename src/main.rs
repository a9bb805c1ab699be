//! s3stub - S3-compatible object-storage mock for integration testing

use axum::extract::DefaultBodyLimit;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use s3stub::api::handlers::{
    bucket_get_handler, create_bucket, delete_bucket, delete_object, get_object, head_bucket,
    head_object, head_root, health_check, list_buckets, post_object, put_object_or_copy, AppState,
};
use s3stub::config::Config;
use s3stub::multipart::MultipartEngine;
use s3stub::store::{FilesystemStore, ObjectStore};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

/// Version string including build timestamp for --version output
fn version_long() -> &'static str {
    // e.g. "0.3.2 (built 2026-02-23T21:40:07Z)"
    static V: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    V.get_or_init(|| {
        format!(
            "{} (built {})",
            env!("CARGO_PKG_VERSION"),
            env!("S3STUB_BUILD_TIME"),
        )
    })
}

/// s3stub — S3-compatible object-storage mock for integration testing
#[derive(Parser, Debug)]
#[command(name = "s3stub")]
#[command(version = version_long())]
#[command(author, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Storage root directory (overrides config)
    #[arg(short, long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Bucket to create at startup (repeatable)
    #[arg(short, long = "bucket", value_name = "NAME")]
    buckets: Vec<String>,

    /// Keep the storage root on exit even when it was auto-created
    #[arg(long)]
    retain_files_on_exit: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    // Priority: RUST_LOG > S3STUB_LOG_LEVEL > --verbose > default
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| std::env::var("S3STUB_LOG_LEVEL").map(EnvFilter::new))
        .unwrap_or_else(|_| {
            if cli.verbose {
                EnvFilter::new("s3stub=trace,tower_http=trace")
            } else {
                EnvFilter::new("s3stub=info,tower_http=info")
            }
        });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Load configuration from file if specified, otherwise use default loading
    let mut config = if let Some(ref path) = cli.config {
        Config::from_file(path)?
    } else {
        Config::load()
    };

    // CLI overrides
    if let Some(ref addr) = cli.listen {
        config.listen_addr = addr.parse()?;
    }
    if let Some(root) = cli.root {
        config.root = Some(root);
    }
    if cli.retain_files_on_exit {
        config.retain_files_on_exit = true;
    }
    config.initial_buckets.extend(cli.buckets);

    info!(
        "Starting s3stub v{} (built {})",
        env!("CARGO_PKG_VERSION"),
        env!("S3STUB_BUILD_TIME"),
    );
    info!("  Listen address: {}", config.listen_addr);

    // Resolve the storage root. An auto-created temp root is deleted on exit
    // via the guard unless retention was requested.
    let (root, _temp_guard): (PathBuf, Option<TempDir>) =
        match (config.root.clone(), config.retain_files_on_exit) {
            (Some(root), _) => (root, None),
            (None, true) => {
                let root = std::env::temp_dir().join(format!("s3stub-{}", Uuid::new_v4()));
                (root, None)
            }
            (None, false) => {
                let tmp = TempDir::with_prefix("s3stub-")?;
                (tmp.path().to_path_buf(), Some(tmp))
            }
        };
    info!("  Storage root: {:?}", root);
    if config.retain_files_on_exit {
        info!("  Retaining files on exit");
    }

    let store = Arc::new(FilesystemStore::open(root).await?);
    for bucket in &config.initial_buckets {
        store.create_bucket(bucket).await?;
        info!("  Created bucket: {}", bucket);
    }

    let store: Arc<dyn ObjectStore> = store;
    let multipart = Arc::new(MultipartEngine::new(store.clone()));
    let state = Arc::new(AppState { store, multipart });

    // Build router with S3-style paths
    // S3 API paths:
    //   GET / - list buckets
    //   PUT /{bucket} - create bucket
    //   DELETE /{bucket} - delete bucket
    //   HEAD /{bucket} - head bucket
    //   GET /{bucket}?list-type=2 - list objects
    //   GET /{bucket}?uploads - list multipart uploads
    //   PUT /{bucket}/{key...} - put object / copy / upload part
    //   GET /{bucket}/{key...} - get object / list parts
    //   HEAD /{bucket}/{key...} - object metadata
    //   DELETE /{bucket}/{key...} - delete object / abort upload
    //   POST /{bucket}/{key...} - initiate / complete multipart upload
    let app = Router::new()
        .route("/health", get(health_check))
        // Root: list buckets + HEAD probe for S3 client compatibility
        .route("/", get(list_buckets).head(head_root))
        // Object operations (wildcard routes first - more specific)
        .route(
            "/:bucket/*key",
            get(get_object)
                .put(put_object_or_copy)
                .delete(delete_object)
                .head(head_object)
                .post(post_object),
        )
        // Bucket operations (without trailing slash)
        .route(
            "/:bucket",
            get(bucket_get_handler)
                .put(create_bucket)
                .delete(delete_bucket)
                .head(head_bucket),
        )
        // Bucket operations (with trailing slash)
        .route(
            "/:bucket/",
            get(bucket_get_handler)
                .put(create_bucket)
                .delete(delete_bucket)
                .head(head_bucket),
        )
        .layer(TraceLayer::new_for_http())
        // Objects can be arbitrarily large; the body is streamed to disk
        .layer(DefaultBodyLimit::disable())
        // CORS must be outermost to handle OPTIONS preflight
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = TcpListener::bind(&config.listen_addr).await?;
    info!("s3stub listening on http://{}", config.listen_addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Handle shutdown signals (SIGINT, SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
