//! AxoShare server binary.
//!
//! This crate wires together the HTTP API, the access-control engine,
//! the blob and metadata stores, and static frontend delivery. The main
//! entry point builds the Axum router, configures TLS, and starts
//! HTTP/HTTPS listeners.

mod atomic;
mod auth;
mod background;
mod config;
mod engine;
mod error;
mod files;
mod frontend;
mod http;
mod listing;
mod locking;
mod logging;
mod naming;
mod password;
mod records;
mod share;
mod storage;
mod tls;
mod upload;
mod version;

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::{delete, get, post};
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span};

use crate::auth::AuthConfig;
use crate::background::spawn_background_tasks;
use crate::config::{Args, META_DIR_NAME};
use crate::http::{RequestScheme, build_cors_layer, resolve_client_ip};
use crate::records::MetaStore;
use crate::share::ShareConfig;
use crate::storage::Storage;
use crate::upload::UploadConfig;

shadow!(build);

/// Starts the AxoShare server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let storage = Arc::new(Storage::new(PathBuf::from(&args.storage_dir)));
    storage.ensure_root().await?;
    let meta = Arc::new(MetaStore::new(storage.root_path().join(META_DIR_NAME)));
    meta.ensure_root().await?;
    let auth_config = Arc::new(AuthConfig {
        admin_key: args.admin_key.clone(),
    });
    let upload_config = Arc::new(UploadConfig {
        max_total_size: args.upload_max_size,
    });
    let share_config = Arc::new(ShareConfig {
        public_url: args.public_url.clone(),
    });
    let storage_for_tasks = storage.clone();
    let meta_for_tasks = meta.clone();

    let upload_body_limit = if args.upload_max_size == 0 {
        DefaultBodyLimit::disable()
    } else {
        DefaultBodyLimit::max(args.upload_max_size as usize)
    };

    let mut app = Router::new()
        .route("/api/files", get(files::list_files))
        .route(
            "/api/upload",
            post(upload::upload_files).layer(upload_body_limit),
        )
        .route("/api/download/{name}", get(files::download_file))
        .route("/api/delete/{name}", delete(files::delete_file))
        .route("/api/stats", get(files::get_stats))
        .route(
            "/api/files/{name}/toggle-hidden",
            post(share::toggle_hidden),
        )
        .route("/api/files/{name}/set-password", post(share::set_password))
        .route(
            "/api/files/{name}/set-view-limit",
            post(share::set_view_limit),
        )
        .route("/api/files/{name}/reset-views", post(share::reset_views))
        .route(
            "/api/files/{name}/generate-share-link",
            post(share::generate_share_link),
        )
        .route("/h/{token}", get(share::resolve_hidden))
        .route("/health", get(files::health))
        .route("/api/version", get(version::get_version_info))
        .fallback(frontend::serve_frontend)
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.ip());
                    let client_ip = resolve_client_ip(request.headers(), connect_ip)
                        .map(|ip| ip.to_string())
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(storage))
        .layer(Extension(meta))
        .layer(Extension(auth_config))
        .layer(Extension(upload_config))
        .layer(Extension(share_config));

    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let http_addr = SocketAddr::new(host, args.http_port);
    let https_addr = SocketAddr::new(host, args.https_port);
    let tls_config = tls::build_rustls_config(&args, host).await?;
    let handle = Handle::new();

    info!("🚀 Starting HTTP server at {}", http_addr);
    info!("🔒 Starting HTTPS server at {}", https_addr);

    let http_app = app.clone().layer(Extension(RequestScheme::Http));
    let https_app = app.layer(Extension(RequestScheme::Https));

    let http_server = axum_server::bind(http_addr)
        .handle(handle.clone())
        .serve(http_app.into_make_service_with_connect_info::<SocketAddr>());
    let https_server = axum_server::bind_rustls(https_addr, tls_config)
        .handle(handle.clone())
        .serve(https_app.into_make_service_with_connect_info::<SocketAddr>());

    spawn_background_tasks(storage_for_tasks, meta_for_tasks);
    tokio::select! {
        result = http_server => result?,
        result = https_server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

async fn shutdown_signal(handle: Handle) {
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
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
