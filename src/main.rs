//! # Remarket — Remarketing Campaign Scheduler
//!
//! Durable per-tenant job scheduling with drip-fed campaign broadcasts
//! over Telegram and Discord.
//!
//! Usage:
//!   remarket                         # Start the gateway (default port 8990)
//!   remarket --port 8080             # Custom port
//!   remarket --config ./config.toml  # Explicit config file

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use remarket_core::config::RemarketConfig;
use remarket_gateway::AppState;
use remarket_scheduler::{
    CampaignDb, CampaignExecutor, JobStore, ProgressBus, RetryPolicy, SchedulerSet,
};
use remarket_senders::{DiscordSender, SenderRegistry, TelegramSender};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "remarket",
    version,
    about = "Remarketing campaign scheduler and delivery pipeline"
)]
struct Cli {
    /// Config file path (default: ~/.remarket/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the gateway bind host
    #[arg(long)]
    host: Option<String>,

    /// Override the gateway bind port
    #[arg(short, long)]
    port: Option<u16>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "remarket=debug,remarket_scheduler=debug,remarket_gateway=debug,tower_http=debug"
    } else {
        "remarket=info,remarket_scheduler=info,remarket_gateway=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => RemarketConfig::load_from(path)?,
        None => RemarketConfig::load()?,
    };
    if let Some(host) = cli.host {
        config.gateway.host = host;
    }
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }

    let data_dir = PathBuf::from(&config.storage.data_dir);
    std::fs::create_dir_all(&data_dir)?;

    let store = Arc::new(JobStore::open(&data_dir.join("jobs.db"))?);
    let campaigns = Arc::new(CampaignDb::open(&data_dir.join("campaigns.db"))?);
    let progress = ProgressBus::default();

    // Delivery adapters. Telegram is always registered: campaign drips
    // deliver through it with per-campaign bot tokens even when no
    // global token is configured.
    let telegram_token = config
        .channels
        .telegram
        .as_ref()
        .filter(|t| t.enabled)
        .map(|t| t.bot_token.clone());
    let telegram = Arc::new(TelegramSender::new(telegram_token));

    let mut registry = SenderRegistry::new();
    registry.register(telegram.clone());
    if let Some(discord) = config.channels.discord.as_ref().filter(|d| d.enabled) {
        registry.register(Arc::new(DiscordSender::new(Some(
            discord.bot_token.clone(),
        ))));
    }
    registry.register(Arc::new(
        CampaignExecutor::new(campaigns.clone(), telegram, progress.clone())
            .with_batch_size(config.scheduler.batch_size as u32)
            .with_drip_delay(std::time::Duration::from_secs(config.scheduler.drip_delay_secs))
            .with_jitter_ms(config.scheduler.jitter_min_ms, config.scheduler.jitter_max_ms),
    ));

    let policy = RetryPolicy {
        max_attempts: config.scheduler.max_attempts,
        base_delay: std::time::Duration::from_secs(config.scheduler.retry_base_secs),
    };
    let schedulers = Arc::new(SchedulerSet::new(store, Arc::new(registry), policy));
    let restored = schedulers.restore().await?;
    if restored > 0 {
        tracing::info!("restored scheduler actors for {restored} tenant(s)");
    }

    let state = AppState {
        gateway_config: config.gateway.clone(),
        start_time: std::time::Instant::now(),
        schedulers,
        campaigns,
        progress,
    };
    remarket_gateway::start(state).await
}
