use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use castpulse_alerts::{AlertDeliveryService, AlertEvaluationService};
use castpulse_analytics::AggregationService;
use castpulse_core::CastpulseConfig;
use castpulse_ingest::blob::BlobArchive;
use castpulse_ingest::IngestionService;
use castpulse_ml::sentiment::{EmbeddingScorer, OpinionClient, SentimentPipeline};
use castpulse_reddit::{RateLimiter, RedditClient};
use castpulse_store::Store;
use castpulse_tasks::handlers::load_cast_catalog;
use castpulse_tasks::{TaskContext, TaskQueue, WorkerPool};

mod app;

#[derive(Parser)]
#[command(name = "castpulse", about = "Castpulse pipeline workers and HTTP boundary")]
struct Cli {
    /// Path to castpulse.toml (default: ~/.castpulse/castpulse.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "castpulse=info,tower_http=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .or_else(|| std::env::var("CASTPULSE_CONFIG").ok());
    let config = Arc::new(CastpulseConfig::load(config_path.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), using defaults");
        CastpulseConfig::default()
    }));

    let store = Store::open(&config.database.path)?;
    let queue = TaskQueue::open(
        &config.database.path,
        config.queue.max_retries,
        config.queue.retry_base_secs,
    )?;

    let limiter = Arc::new(
        RateLimiter::connect(
            &config.redis.url,
            config.reddit.rate_limit_calls,
            config.reddit.rate_limit_period,
            "reddit:rate",
        )
        .await,
    );
    let reddit = Arc::new(RedditClient::new(config.reddit.clone(), limiter)?);
    let blob = config
        .blob
        .as_ref()
        .map(|blob_config| Arc::new(BlobArchive::from_config(blob_config)));

    let cache_dir = model_cache_dir();
    let scorer = Arc::new(EmbeddingScorer::new(
        &config.sentiment.primary_model,
        Some(&cache_dir),
    )?);
    let fallback = match &config.sentiment.fallback_endpoint {
        Some(endpoint) => Some(OpinionClient::new(
            endpoint,
            config.sentiment.fallback_key.as_deref(),
        )?),
        None => None,
    };
    let catalog = load_cast_catalog(&store, config.operational.roster_dir.as_deref())?;
    let pipeline = Arc::new(
        SentimentPipeline::new(
            scorer,
            fallback,
            &config.sentiment,
            &catalog,
            Some(cache_dir),
        )
        .await,
    );

    let ingestion = IngestionService::new(reddit, store.clone(), blob, config.clone());
    let ctx = Arc::new(TaskContext::new(
        store.clone(),
        queue.clone(),
        ingestion,
        pipeline,
        AggregationService::new(store.clone()),
        AlertEvaluationService::new(store.clone()),
        AlertDeliveryService::new(store.clone(), &config.notifications),
        config.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let workers = WorkerPool::new(queue.clone(), ctx, config.queue.task_time_limit_secs);
    let worker_handle = tokio::spawn(workers.run(shutdown_rx));

    let state = Arc::new(app::AppState {
        store,
        queue,
        config: config.clone(),
    });
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("castpulse listening on {addr}");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = worker_handle.await;
    Ok(())
}

fn model_cache_dir() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".castpulse").join("model-cache")
}
