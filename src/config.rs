//! CLI arguments and server configuration defaults.

use clap::Parser;
use shadow_rs::formatcp;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const META_DIR_NAME: &str = ".meta";
pub const DEFAULT_ADMIN_KEY: &str = "axo";
pub const DEFAULT_UPLOAD_MAX_SIZE: u64 = 100 * 1024 * 1024;
pub const DEFAULT_LOCK_WAIT_TIMEOUT_SECS: u64 = 10;
pub const HIDDEN_TOKEN_LEN: usize = 48;
pub const GENERATED_PASSWORD_LEN: usize = 16;
pub const TOKEN_REROLL_ATTEMPTS: usize = 8;
pub const STORED_NAME_RETRY_ATTEMPTS: usize = 5;
pub const MAINTENANCE_INTERVAL_SECS: u64 = 900;
pub const TEMP_FILE_TTL_SECS: u64 = 24 * 60 * 60;

pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "pdf", "doc", "docx", "txt", "zip", "rar", "mp3", "mp4", "avi",
];

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "axo-share", version = VERSION_INFO, about = "AxoShare server")]
pub struct Args {
    #[arg(
        short = 's',
        long,
        env = "AXO_SHARE_STORAGE_DIR",
        default_value = ".axo-share/files",
        help = "Storage directory for uploaded files"
    )]
    pub storage_dir: String,
    #[arg(
        short = 'a',
        long,
        env = "AXO_SHARE_ADMIN_KEY",
        default_value = DEFAULT_ADMIN_KEY,
        help = "Shared admin secret for upload/delete/manage operations"
    )]
    pub admin_key: String,
    #[arg(
        short = 'b',
        long,
        env = "AXO_SHARE_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for HTTP/HTTPS"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "AXO_SHARE_HTTP_PORT",
        default_value_t = 5015,
        help = "HTTP port"
    )]
    pub http_port: u16,
    #[arg(
        short = 'P',
        long,
        env = "AXO_SHARE_HTTPS_PORT",
        default_value_t = 5016,
        help = "HTTPS port"
    )]
    pub https_port: u16,
    #[arg(short = 'c', long, env = "AXO_SHARE_TLS_CERT", help = "TLS cert path")]
    pub tls_cert: Option<String>,
    #[arg(short = 'k', long, env = "AXO_SHARE_TLS_KEY", help = "TLS key path")]
    pub tls_key: Option<String>,
    #[arg(
        long,
        env = "AXO_SHARE_CORS_ORIGINS",
        help = "Comma separated CORS origins"
    )]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "AXO_SHARE_PUBLIC_URL",
        help = "Public base URL used in generated share links (falls back to the request Host)"
    )]
    pub public_url: Option<String>,
    #[arg(
        long,
        env = "AXO_SHARE_UPLOAD_MAX_SIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_SIZE,
        help = "Max upload total size in bytes"
    )]
    pub upload_max_size: u64,
}
