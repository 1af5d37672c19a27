use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info};
use tokio_util::sync::CancellationToken;

use degenter::{
    chain::{LcdClient, RpcClient},
    cron::{jobs::meta_backfill, CronScheduler, CronSettings},
    fasttrack::FastTrackReactor,
    worker::{trade_sink, BlockProcessor, IndexWorker, TokenFetcher},
    ws::{self, SubscriberHub, TradePump},
    Database, NotifyBus, Settings,
};

#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> Result<()> {
    simple_logger::SimpleLogger::new()
        .with_level(log::LevelFilter::Info)
        .env()
        .init()
        .context("Failed to initialize logger")?;

    let settings = Arc::new(Settings::new().context("Failed to load configuration")?);
    info!("Starting degenter indexer");

    let db = Database::new(settings.clone()).await?;
    let rpc = RpcClient::new(&settings.chain.rpc_url)?;
    let lcd = LcdClient::new(&settings.chain.lcd_url)?;

    let bus = Arc::new(NotifyBus::new());
    let token_fetcher = TokenFetcher::new(
        db.clone(),
        lcd.clone(),
        Duration::from_secs(settings.meta.refresh_sec.max(1)),
    );

    let cancellation_token = CancellationToken::new();
    let mut handles = Vec::new();

    // Trade sink: batched, deduplicated trade writes.
    let (sink, sink_handle) = trade_sink(
        db.clone(),
        settings.indexer.trades_batch_max,
        settings.indexer.trades_batch_wait_ms,
        cancellation_token.child_token(),
    );
    handles.push(sink_handle);

    // Fast-track enrichment of freshly created pools.
    let reactor = Arc::new(FastTrackReactor::new(
        db.clone(),
        lcd.clone(),
        token_fetcher.clone(),
    ));
    reactor.start(&bus);

    // Live broadcaster: WebSocket endpoint plus the trade pump.
    let hub = Arc::new(SubscriberHub::new());
    {
        let bind = settings.ws.bind.clone();
        let hub = hub.clone();
        let token = cancellation_token.child_token();
        handles.push(tokio::spawn(async move {
            if let Err(e) = ws::server::serve(&bind, hub, token).await {
                error!("WebSocket server failed: {:#}", e);
            }
        }));
    }
    {
        let pump = TradePump::new(db.clone(), hub.clone());
        let token = cancellation_token.child_token();
        handles.push(tokio::spawn(async move {
            if let Err(e) = pump.run(token).await {
                error!("Trade pump failed: {:#}", e);
            }
        }));
    }

    // Periodic jobs: metadata refresh and matrix rollups.
    {
        let cron = CronScheduler::new(
            Arc::new(db.clone()),
            token_fetcher.clone(),
            CronSettings {
                meta_refresh_interval_secs: settings.meta.refresh_sec,
                meta_concurrency: settings.meta.concurrency,
                ..CronSettings::default()
            },
        );
        let token = cancellation_token.child_token();
        handles.push(tokio::spawn(async move {
            if let Err(e) = cron.run(token).await {
                error!("Cron scheduler failed: {:#}", e);
            }
        }));
    }

    // Optional one-shot metadata backfill sweep.
    if settings.meta.backfill {
        let db = db.clone();
        let fetcher = token_fetcher.clone();
        let meta_settings = settings.meta.clone();
        let token = cancellation_token.child_token();
        handles.push(tokio::spawn(async move {
            if let Err(e) = meta_backfill::run(&db, &fetcher, &meta_settings, token).await {
                error!("Metadata backfill failed: {:#}", e);
            }
        }));
    }

    // The block pipeline itself.
    let processor = Arc::new(BlockProcessor::new(
        db.clone(),
        rpc.clone(),
        bus.clone(),
        sink,
        token_fetcher,
        settings.clone(),
    ));
    let worker = IndexWorker::new(processor, db.clone(), rpc, settings.clone());
    {
        let token = cancellation_token.child_token();
        handles.push(tokio::spawn(async move {
            if let Err(e) = worker.run(token).await {
                error!("Index worker failed: {:#}", e);
            }
        }));
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown signal received, stopping...");
    cancellation_token.cancel();

    for handle in handles {
        let _ = handle.await;
    }

    info!("Shutdown complete");
    Ok(())
}
