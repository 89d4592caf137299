use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mochimap_indexer::chain::{ChainSync, IndexEvent, SyncOptions};
use mochimap_indexer::config::IndexerConfig;
use mochimap_indexer::mempool::{FeedWatcher, MempoolTracker};
use mochimap_indexer::metrics;
use mochimap_indexer::p2p::bootstrap::Bootstrapper;
use mochimap_indexer::p2p::scheduler::SchedulerOptions;
use mochimap_indexer::p2p::{CrawlScheduler, PeerDirectory};
use mochimap_indexer::protocol::{GatewayClient, ProtocolClient};
use mochimap_indexer::storage::{SledStore, Storage};

#[derive(Parser, Debug)]
#[command(name = "mochimap-indexer", version, about = "Mochimo block-explorer indexer")]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Protocol gateway base URL
    #[arg(long)]
    gateway: Option<String>,

    /// Document store directory
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Pending transaction feed
    #[arg(long)]
    mempool: Option<PathBuf>,

    /// Extra bootstrap source (URL or file), tried after the configured ones
    #[arg(long)]
    startlist: Vec<String>,

    /// Health and metrics listen address, e.g. 127.0.0.1:9100
    #[arg(long)]
    metrics_addr: Option<String>,

    /// Skip the integrity sweep after new tips
    #[arg(long)]
    no_integrity: bool,

    /// Do not watch the mempool feed
    #[arg(long)]
    no_mempool: bool,
}

fn load_config(args: &Args) -> anyhow::Result<IndexerConfig> {
    let base = match &args.config {
        Some(path) => IndexerConfig::load(path)?,
        None => IndexerConfig::default(),
    };
    let mut config = base.apply_env();

    if let Some(gateway) = &args.gateway {
        config.gateway_url = gateway.clone();
    }
    if let Some(dir) = &args.data_dir {
        config.data_dir = dir.clone();
    }
    if let Some(path) = &args.mempool {
        config.mempool_path = path.clone();
    }
    config.bootstrap_sources.extend(args.startlist.iter().cloned());
    if let Some(addr) = &args.metrics_addr {
        config.metrics_addr = Some(addr.clone());
    }
    if args.no_integrity {
        config.integrity_sweep = false;
    }

    if let Err(e) = config.validate() {
        bail!("invalid configuration: {}", e);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args = Args::parse();
    let config = load_config(&args)?;
    info!(
        "[INIT] mochimap-indexer v{} (gateway: {}, data: {})",
        env!("CARGO_PKG_VERSION"),
        config.gateway_url,
        config.data_dir.display()
    );

    let store = SledStore::open(&config.data_dir)
        .with_context(|| format!("opening store at {}", config.data_dir.display()))?;
    for (collection, count) in store.counts() {
        info!("[INIT] {} documents: {}", collection.as_str(), count);
    }
    let sled = Arc::new(store);
    let store: Arc<dyn Storage> = sled.clone();

    let client: Arc<dyn ProtocolClient> =
        Arc::new(GatewayClient::new(&config.gateway_url, config.request_timeout())?);
    let directory = Arc::new(PeerDirectory::new(
        config.probe_interval_secs,
        config.stale_after_secs,
    ));

    let sync = ChainSync::new(
        Arc::clone(&client),
        Arc::clone(&store),
        Arc::clone(&directory),
        SyncOptions {
            dedup_capacity: config.dedup_capacity,
            workers: config.sync_workers,
            integrity_sweep: config.integrity_sweep,
        },
    );
    let dispatcher = sync
        .spawn()
        .context("chain synchronizer already started")?;

    let bootstrap = Bootstrapper::new(&config.bootstrap_sources, config.request_timeout())?;
    let scheduler = CrawlScheduler::new(
        Arc::clone(&directory),
        Arc::clone(&client),
        bootstrap,
        Arc::clone(&sync),
        Arc::clone(&store),
        SchedulerOptions::from_config(&config),
    );
    if let Err(e) = scheduler.restore_peers() {
        warn!("[INIT] could not restore peers: {}", e);
    }
    let crawler = scheduler.spawn();

    let watcher = if args.no_mempool {
        None
    } else {
        let tracker = Arc::new(MempoolTracker::new(
            config.mempool_path.clone(),
            Arc::clone(&store),
        ));
        Some(FeedWatcher::new(config.mempool_poll()).spawn(tracker))
    };

    if let Some(addr) = &config.metrics_addr {
        let addr: SocketAddr = addr
            .parse()
            .with_context(|| format!("invalid metrics address {}", addr))?;
        tokio::spawn(metrics::serve(addr));
    }

    let mut events = sync.subscribe();
    let reporter = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(IndexEvent::Ledger {
                    height, supply, ..
                }) => info!(
                    "[LEDGER] supply at {}: total {} circulating {} max {}",
                    height, supply.total, supply.circulating, supply.max
                ),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("[INIT] event reporter skipped {} events", n)
                }
                Err(_) => break,
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("[INIT] Shutting down");
    crawler.abort();
    dispatcher.abort();
    reporter.abort();
    if let Some(w) = watcher {
        w.abort();
    }
    sled.flush()?;
    Ok(())
}
