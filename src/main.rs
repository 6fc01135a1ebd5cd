use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use bifrost::config::Config;
use bifrost::ctrl_msg::CtrlRings;
use bifrost::error::Result;
use bifrost::fwd::Forwarder;
use bifrost::http_server::{self, AppState};
use bifrost::master::Master;
use bifrost::metrics::Metrics;
use bifrost::netif::{DiscardTap, UdpSocketNetif};
use bifrost::pipeline::Slave;
use bifrost::rate_limiter::SourceRateLimiter;
use bifrost::resolver::RefusingResolver;
use bifrost::stats::NetifStats;

#[derive(Debug, Parser)]
#[command(name = "bifrost", about = "Forwarding and caching DNS engine")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the DNS bind address.
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Override the management HTTP bind address.
    #[arg(long)]
    http: Option<SocketAddr>,

    /// Override the forwarding mode (disable, direct, cache).
    #[arg(long)]
    mode: Option<String>,

    /// Override the default upstream list (comma-separated host[:port]).
    #[arg(long)]
    upstreams: Option<String>,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut cfg = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    cfg.apply_env();
    if let Some(bind) = cli.bind {
        cfg.bind_dns = bind;
    }
    if let Some(http) = cli.http {
        cfg.bind_http = Some(http);
    }
    if let Some(mode) = &cli.mode {
        cfg.fwd_mode = mode.parse().map_err(bifrost::error::BifrostError::from)?;
    }
    if let Some(upstreams) = &cli.upstreams {
        cfg.fwd_def_addrs = upstreams.clone();
    }
    Ok(cfg)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let cfg = load_config(&cli)?;
    info!(
        mode = %cfg.fwd_mode,
        upstreams = %cfg.fwd_def_addrs,
        bind = %cfg.bind_dns,
        "starting bifrost"
    );

    let stats = Arc::new(NetifStats::new());
    let fwd = Forwarder::new(cfg.fwd_control()?, cfg.slave_threads, stats.clone());
    let rings = Arc::new(CtrlRings::new(cfg.slave_threads));
    let resolver = Arc::new(RefusingResolver);

    let mut handles = fwd.spawn_workers(cfg.fwd_threads)?;
    handles.push(fwd.spawn_cache_sweeper()?);

    // packet pipelines share one bound socket; each slave gets a clone
    let netif = UdpSocketNetif::bind(cfg.bind_dns)?;
    for cpu in 0..cfg.slave_threads.max(1) {
        let queue = netif.try_clone()?;
        let slave = Slave::new(
            cpu,
            queue,
            resolver.clone(),
            SourceRateLimiter::new(cfg.rate_limits()),
            fwd.clone(),
            rings.clone(),
            stats.clone(),
        );
        handles.push(
            std::thread::Builder::new()
                .name(format!("bifrost-slave-{cpu}"))
                .spawn(move || slave.run())
                .map_err(bifrost::error::BifrostError::from)?,
        );
    }

    // master loop: reload handling, response fan-out, kernel-tap shuttle
    let reload_flag = Arc::new(AtomicBool::new(false));
    let reload_cfg = cli.config.clone();
    let master = Master::new(
        DiscardTap,
        fwd.clone(),
        rings.clone(),
        reload_flag.clone(),
        Box::new(move || {
            let path = reload_cfg.as_ref()?;
            match Config::from_file(path) {
                Ok(mut cfg) => {
                    cfg.apply_env();
                    cfg.fwd_control()
                        .map_err(|e| error!("reload rejected: {e}"))
                        .ok()
                }
                Err(e) => {
                    error!("reload failed: {e}");
                    None
                }
            }
        }),
    );
    handles.push(
        std::thread::Builder::new()
            .name("bifrost-master".to_string())
            .spawn(move || master.run())
            .map_err(bifrost::error::BifrostError::from)?,
    );

    if let Some(bind) = cfg.bind_http {
        let metrics = Arc::new(Metrics::new()?);
        let state = AppState {
            fwd: fwd.clone(),
            metrics,
        };
        tokio::spawn(async move {
            if let Err(e) = http_server::serve(bind, state).await {
                error!("management HTTP server failed: {e}");
            }
        });
    }

    // SIGHUP re-reads the config; ctrl-c shuts the engine down
    #[cfg(unix)]
    {
        let flag = reload_flag.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{SignalKind, signal};
            let Ok(mut sighup) = signal(SignalKind::hangup()) else {
                warn!("failed to install SIGHUP handler");
                return;
            };
            loop {
                sighup.recv().await;
                info!("SIGHUP received, scheduling reload");
                flag.store(true, Ordering::Relaxed);
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    fwd.stop();
    for handle in handles {
        let _ = handle.join();
    }
    Ok(())
}
