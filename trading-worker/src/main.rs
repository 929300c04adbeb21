use anyhow::Result;
use clap::Parser;
use log::{info, warn};
use tokio::sync::watch;
use trading_protocol::RedisQueue;
use trading_worker::broker::Credentials;
use trading_worker::{ConnectionManager, PendingTrades, WorkerConfig, WorkerRuntime};

/// Per-tenant trading worker. Owns the brokerage sessions for one tenant
/// and serves requests from the tenant's queue namespace.
#[derive(Parser, Debug)]
#[command(name = "trading-worker")]
struct Args {
    /// Queue connection URL (overrides QUEUE_URL / REDIS_URL).
    #[arg(long)]
    queue_url: Option<String>,

    /// Tenant id (overrides TENANT_ID).
    #[arg(long)]
    tenant_id: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let mut config = WorkerConfig::from_env();
    if let Some(url) = args.queue_url {
        config.queue_url = url;
    }
    if let Some(tenant_id) = args.tenant_id {
        config.tenant_id = tenant_id;
    }

    if !config.tenant_id.is_empty() {
        info!(
            "Worker: multi-tenant mode, tenant_id={} slug={}",
            config.tenant_id, config.tenant_slug
        );
    }
    if config.mock_mode {
        warn!("============================================================");
        warn!("DEV_MOCK_MODE ENABLED - the paper brokerage serves all calls");
        warn!("============================================================");
    }

    let credentials = match trading_worker::config::load_credentials() {
        Ok(credentials) => credentials,
        Err(e) if config.mock_mode => {
            warn!("Worker: {} (ignored in mock mode)", e);
            Credentials::default()
        }
        Err(e) => return Err(e),
    };

    let brokerage = trading_worker::config::select_brokerage(&config)?;

    let transport = RedisQueue::connect(&config.queue_url).await?;
    let connections =
        ConnectionManager::new(brokerage, credentials, config.connection_settings());
    let runtime = WorkerRuntime::new(
        transport,
        config.queue_names(),
        connections,
        PendingTrades::new(),
        &config,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Worker: received SIGINT, initiating shutdown"),
            _ = sigterm.recv() => info!("Worker: received SIGTERM, initiating shutdown"),
        }
        let _ = shutdown_tx.send(true);
    });

    runtime.run(shutdown_rx).await;
    Ok(())
}
