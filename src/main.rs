//! tierproxy
//!
//! Two-tiered caching reverse proxy.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           tierproxy                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐    ┌──────────────┐    ┌──────────────┐       │
//! │  │    Proxy     │───▶│     Tier     │───▶│    Origin    │       │
//! │  │    Server    │    │  Controller  │    │  Forwarder   │       │
//! │  └──────────────┘    └──────┬───────┘    └──────────────┘       │
//! │                     L1 (RAM) │ L2 (disk)                        │
//! │  ┌──────────────┐           │                                   │
//! │  │    Admin     │◀──────────┘ metrics / health / stats          │
//! │  │    Server    │                                               │
//! │  └──────────────┘                                               │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use tierproxy::cache::{CacheConfig, TierController};
use tierproxy::error::Result;
use tierproxy::proxy::{
    AdminServer, HttpOriginForwarder, ProxyConfig, ProxyServer, DEFAULT_ADMIN_ADDR,
    DEFAULT_LISTEN_ADDR,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// tierproxy - Caching reverse proxy with RAM and disk tiers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Proxy bind address
    #[arg(long, env = "LISTEN_ADDR", default_value = DEFAULT_LISTEN_ADDR)]
    listen_addr: String,

    /// Origin base URL
    #[arg(long, env = "ORIGIN_URL")]
    origin: String,

    /// Directory for L2 storage objects
    #[arg(long, env = "CACHE_DIR", default_value = "/var/cache/tierproxy/l2")]
    cache_dir: String,

    /// L2 hits after which an entry is promoted to L1
    #[arg(long, env = "PROMOTION_THRESHOLD", default_value = "10")]
    promotion_threshold: u64,

    /// Origin round-trip timeout in seconds
    #[arg(long, env = "ORIGIN_TIMEOUT_SECONDS", default_value = "30")]
    origin_timeout_seconds: u64,

    /// Metrics and health server bind address
    #[arg(long, env = "ADMIN_ADDR", default_value = DEFAULT_ADMIN_ADDR)]
    admin_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    init_logging(&args);

    info!("Starting tierproxy");
    info!("  Origin: {}", args.origin);
    info!("  Cache directory: {}", args.cache_dir);
    info!("  Promotion threshold: {}", args.promotion_threshold);
    info!("  Origin timeout: {} seconds", args.origin_timeout_seconds);

    let proxy_config = ProxyConfig {
        listen_addr: args.listen_addr.clone(),
        admin_addr: args.admin_addr.clone(),
        origin: args.origin.clone(),
        origin_timeout: Duration::from_secs(args.origin_timeout_seconds),
    };
    proxy_config.validate()?;

    let cache_config = CacheConfig::new(&args.cache_dir, args.promotion_threshold);

    let origin = HttpOriginForwarder::new(&proxy_config.origin, proxy_config.origin_timeout)
        .map_err(|e| {
            error!("Failed to create origin forwarder: {}", e);
            e
        })?;

    let controller = Arc::new(TierController::new(cache_config, Arc::new(origin)).map_err(
        |e| {
            error!("Failed to open L2 storage: {}", e);
            e
        },
    )?);

    let proxy = ProxyServer::new(controller.clone()).run(proxy_config.listen_socket()?);
    let admin = AdminServer::new(controller).run(proxy_config.admin_socket()?);

    tokio::select! {
        result = futures::future::try_join(proxy, admin) => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "reqwest=warn"] {
        if let Ok(directive) = directive.parse() {
            filter = filter.add_directive(directive);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}
