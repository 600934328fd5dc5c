//! AEGIS GeoDNS Server Entry Point
//!
//! Runs the authoritative GeoDNS server with:
//! - UDP and TCP DNS listeners
//! - Zones read from Redis/DragonflyDB
//! - Background endpoint health checks
//! - GeoIP proximity steering
//!
//! ## Usage
//!
//! ```bash
//! # Run with default configuration
//! aegis-geodns
//!
//! # Run with custom config file (TOML or YAML)
//! aegis-geodns --config /etc/aegis/geodns.toml
//!
//! # Run on non-standard ports (for testing without root)
//! aegis-geodns --udp-port 5053 --tcp-port 5053
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use aegis_geodns::dns::{
    DnsConfig, DnsServer, GeoResolver, HealthChecker, NetworkProbe, RedisStore, RequestHandler,
    TrafficSteering,
};

/// AEGIS GeoDNS Server
#[derive(Parser, Debug)]
#[command(name = "aegis-geodns")]
#[command(author = "AEGIS Team")]
#[command(version = "0.1.0")]
#[command(about = "AEGIS geo-aware authoritative DNS server", long_about = None)]
struct Args {
    /// Path to configuration file (TOML or YAML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// UDP listen port (overrides config)
    #[arg(long)]
    udp_port: Option<u16>,

    /// TCP listen port (overrides config)
    #[arg(long)]
    tcp_port: Option<u16>,

    /// Bind address (overrides config)
    #[arg(long)]
    bind: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Disable background health checks
    #[arg(long)]
    no_healthcheck: bool,
}

fn load_config(path: &Path) -> anyhow::Result<DnsConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;

    let config = match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => DnsConfig::from_yaml(&content)?,
        _ => DnsConfig::from_toml(&content)?,
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => DnsConfig::default(),
    };

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("Failed to set tracing subscriber")?;

    info!("Starting AEGIS GeoDNS Server v{}", env!("CARGO_PKG_VERSION"));

    // Override with command line arguments
    if let Some(bind) = &args.bind {
        let ip = bind.parse().with_context(|| format!("Invalid bind address {}", bind))?;
        config.udp_addr.set_ip(ip);
        config.tcp_addr.set_ip(ip);
    }
    if let Some(port) = args.udp_port {
        config.udp_addr.set_port(port);
    }
    if let Some(port) = args.tcp_port {
        config.tcp_addr.set_port(port);
    }
    if args.no_healthcheck {
        config.healthcheck.enabled = false;
        info!("Health checks disabled");
    }

    config.validate()?;

    // Zone store
    let zone_store = Arc::new(RedisStore::connect(&config.redis).await?);
    let handler = Arc::new(RequestHandler::new(config.handler.clone(), zone_store).await?);
    info!("Serving {} zones", handler.zones().zones().len());

    // Health checks
    let health = if config.healthcheck.enabled {
        let health_store = Arc::new(RedisStore::connect(&config.healthcheck.redis).await?);
        let probe = Arc::new(NetworkProbe::new(config.healthcheck.timeout())?);
        let checker = Arc::new(HealthChecker::new(health_store, probe, config.healthcheck.clone()));

        match checker.reload().await {
            Ok(count) => info!("Loaded {} health check endpoints", count),
            Err(e) => warn!("Initial health table load failed: {}", e),
        }

        tokio::spawn(Arc::clone(&checker).run());
        Some(checker)
    } else {
        None
    };

    // GeoIP
    let geo = Arc::new(GeoResolver::open(&config.geoip));

    let steering = Arc::new(TrafficSteering::new(health, geo));
    let server = Arc::new(DnsServer::new(config, handler, steering)?);

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!("DNS server error: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}
