//! regdns - a registry-backed DNS server written in Rust

pub mod balancer;
pub mod config;
pub mod dns_server;
pub mod error;
pub mod message;
pub mod registry;
pub mod resolver;
pub mod upstream;

use std::sync::Arc;

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use rolling_file::{RollingConditionBasic, RollingFileAppender};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// log timestamps in the local timezone instead of the default UTC
struct LocalTimer;
impl fmt::time::FormatTime for LocalTimer {
    fn format_time(&self, w: &mut fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(w, "{}", Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z"))
    }
}

#[derive(Parser, Debug)]
#[command(name = "regdns")]
#[command(about = "A registry-backed DNS server written in Rust", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "regdns.yaml")]
    config: String,

    /// Overrides the listen address from the config file.
    #[arg(long)]
    address: Option<String>,
}

fn main() -> Result<()> {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);

    // the runtime's worker threads are the packet worker pool, one per core
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cores)
        .thread_name("regdns-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cores))
}

async fn async_main(cores: usize) -> Result<()> {
    std::fs::create_dir_all("logs").unwrap_or_default();

    let file_appender = RollingFileAppender::new(
        "logs/regdns.log",
        RollingConditionBasic::new().daily(),
        30,
    )?;
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false).with_timer(LocalTimer))
        .with(fmt::layer().with_writer(std::io::stdout).with_timer(LocalTimer))
        .init();

    let args = Args::parse();
    info!("starting regdns version {}", env!("CARGO_PKG_VERSION"));
    info!("worker pool sized to {} threads", cores);

    let mut cfg = config::Config::load(&args.config)?;
    if let Some(address) = args.address {
        cfg.listen = address;
    }

    let registry = Arc::new(registry::StaticRegistry::new());
    for (service, group, instances) in cfg.static_services() {
        info!(
            "static service '{}' in group '{}' with {} instance(s)",
            service,
            group,
            instances.len()
        );
        registry.insert(&service, &group, instances);
    }

    let server = Arc::new(dns_server::DnsServer::create(&cfg, registry).await?);
    info!("forwarding unowned names to backend dns {}", cfg.backend_addr());

    {
        let server = server.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received, stopping dns server");
                server.shutdown();
            }
        });
    }

    server.run().await
}
