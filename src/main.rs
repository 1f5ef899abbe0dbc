//! HTTP load balancer.
//!
//! # Architecture Overview
//!
//! ```text
//!                         ┌──────────────────────────────────────────────┐
//!                         │                LOAD BALANCER                  │
//!     Client Request      │  ┌────────┐   ┌──────────┐   ┌────────────┐  │
//!     ────────────────────┼─▶│  http  │──▶│ affinity │──▶│  strategy  │  │
//!                         │  │ server │   │cookie/ip │   │ rr/w/lc/ip │  │
//!                         │  └───┬────┘   └──────────┘   └─────┬──────┘  │
//!                         │      │                             ▼         │
//!                         │      │  ActiveGuard         ┌────────────┐   │
//!                         │      └─────────────────────▶│  registry  │   │
//!     Client Response     │  ┌────────┐                 └─────▲──────┘   │
//!     ◀───────────────────┼──│forward │◀──── Backend          │          │
//!                         │  └────────┘                 ┌─────┴──────┐   │
//!                         │                             │   health   │   │
//!                         │                             │  monitor   │   │
//!                         │                             └────────────┘   │
//!                         └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use http_balancer::affinity::StickyMode;
use http_balancer::config::{parse_backend_list, resolve_config, ConfigError, ConfigOverrides};
use http_balancer::config::watcher::ConfigWatcher;
use http_balancer::http::HttpServer;
use http_balancer::lifecycle::{wait_for_ctrl_c, Shutdown};
use http_balancer::load_balancer::StrategyKind;
use http_balancer::observability::{logging, metrics};

#[derive(Parser, Debug)]
#[command(name = "http-balancer")]
#[command(about = "HTTP load balancer with health checks and sticky sessions", long_about = None)]
struct Cli {
    /// TOML configuration file. Watched for changes.
    #[arg(short, long, env = "LB_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on, e.g. 0.0.0.0:8080.
    #[arg(short, long)]
    listen: Option<String>,

    /// Backends as `url=weight,url,...`.
    #[arg(long, env = "BACKENDS")]
    backends: Option<String>,

    /// roundrobin | weighted | least | iphash
    #[arg(long, env = "STRATEGY")]
    strategy: Option<StrategyKind>,

    /// none | cookie | ip
    #[arg(long, env = "STICKY")]
    sticky: Option<StickyMode>,
}

impl Cli {
    /// Overrides kept for the life of the process and re-applied on reload.
    fn overrides(&self) -> Result<ConfigOverrides, ConfigError> {
        let backends = self.backends.as_deref().map(parse_backend_list).transpose()?;
        Ok(ConfigOverrides {
            bind_address: self.listen.clone(),
            backends,
            strategy: self.strategy,
            sticky: self.sticky,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let overrides = cli.overrides()?;
    let config = match resolve_config(cli.config.as_deref(), &overrides) {
        Ok(config) => config,
        Err(ConfigError::Validation(errors)) => {
            for error in &errors {
                eprintln!("config error: {error}");
            }
            return Err(format!("{} configuration error(s)", errors.len()).into());
        }
        Err(e) => return Err(e.into()),
    };

    logging::init(&config.observability.log_level);
    tracing::info!("http-balancer v{} starting", env!("CARGO_PKG_VERSION"));

    if config.balancer.sticky == StickyMode::Cookie && config.balancer.sticky_sweep_secs == 0 {
        tracing::warn!("Cookie affinity without a janitor: expired sticky entries are never freed");
    }

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // Keep the watcher alive for the life of the server.
    let (_watcher, config_updates) = match &cli.config {
        Some(path) => {
            let (watcher, rx) = ConfigWatcher::new(path, overrides);
            (Some(watcher.run()?), rx)
        }
        None => {
            let (_, rx) = mpsc::unbounded_channel();
            (None, rx)
        }
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    let shutdown = Shutdown::new();
    tokio::spawn(wait_for_ctrl_c(shutdown.clone()));

    let server = HttpServer::new(config);
    server.run(listener, config_updates, shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
