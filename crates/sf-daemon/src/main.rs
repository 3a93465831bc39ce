// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use anyhow::{Context, Result};
use clap::Parser;
use sf_cache::ArtifactCache;
use sf_config::{
    ModelClientEntry, SlideForgeConfig, load_config, load_model_configs_sidecar, validate_config,
};
use sf_daemon::{AppState, build_app};
use sf_host::{MockModelClient, ModelClientPool, ModelKind, RateGateConfig, RetryConfig};
use sf_mutate::InMemoryPresentation;
use sf_runtime::{BudgetLimit, HookRegistry, StageEngine};
use sf_scheduler::{JobScheduler, KindConfig};
use sf_status::{InMemoryStatusStore, RedisStatusStore, SnapshotStore, StatusChannel};
use sf_store::JobStore;
use sf_ws::WsFanout;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Generate jobs are rate-limited to <= 2/s; analyze-template jobs are
/// cheap precondition-free lookups and left unbounded.
const GENERATE_MAX_PER_MINUTE: u32 = 120;

#[derive(Parser, Debug)]
#[command(name = "sf-daemon", version, about = "SlideForge orchestration daemon")]
struct Args {
    /// Bind address, overrides the config file's `bind` if set.
    #[arg(long)]
    bind: Option<String>,

    /// Path to a TOML config file. Falls back to defaults plus env overrides.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose per-module logging.
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    sf_telemetry::init_tracing(args.debug);

    let mut config = load_config(args.config.as_deref()).context("load config")?;
    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    let sidecar = load_model_configs_sidecar(std::path::Path::new(&config.job_root))
        .context("load model_configs.json sidecar")?;
    config.model_clients.extend(sidecar);
    for warning in validate_config(&config).context("validate config")? {
        warn!(%warning, "configuration warning");
    }

    let store = Arc::new(
        JobStore::open(config.job_root.as_str())
            .await
            .context("open job store")?,
    );
    let status = Arc::new(StatusChannel::new(build_snapshot_store(&config).await?));
    let cache = Arc::new(ArtifactCache::new(config.cache_root.as_str()));
    let host = build_model_pool(&config).await;
    let presentation = Arc::new(InMemoryPresentation::new());

    let budget = BudgetLimit::default();
    let engine = Arc::new(StageEngine::new(
        store.clone(),
        status.clone(),
        cache,
        host,
        presentation,
        HookRegistry::new(),
        budget,
        format!("{}/output", config.job_root),
        config.validation.max_iterations,
        config.validation.max_workers,
        config.validation.max_workers > 1,
    ));

    let per_kind_workers = config.scheduler.max_concurrent_jobs.max(1);
    let scheduler = JobScheduler::new(
        engine,
        store.clone(),
        status.clone(),
        format!("{}/inputs", config.job_root),
        budget,
        KindConfig {
            queue_capacity: config.scheduler.queue_capacity,
            workers: per_kind_workers,
            max_per_minute: GENERATE_MAX_PER_MINUTE,
        },
        KindConfig {
            queue_capacity: config.scheduler.queue_capacity,
            workers: per_kind_workers,
            max_per_minute: 0,
        },
    );
    scheduler.spawn_workers();

    let state = Arc::new(AppState {
        store,
        status: status.clone(),
        scheduler,
        fanout: WsFanout::new(status),
        output_root: format!("{}/output", config.job_root),
        started_at: Instant::now(),
    });

    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("bind {}", config.bind))?;
    info!(bind = %config.bind, "sf-daemon listening");

    axum::serve(listener, app).await.context("serve")
}

async fn build_snapshot_store(config: &SlideForgeConfig) -> Result<Arc<dyn SnapshotStore>> {
    match &config.redis_url {
        Some(url) => {
            let store = RedisStatusStore::connect(url)
                .await
                .map_err(|e| anyhow::anyhow!("connect redis: {e}"))?;
            Ok(Arc::new(store))
        }
        None => Ok(Arc::new(InMemoryStatusStore::default())),
    }
}

/// Register a client for every entry in `config.model_clients`. Only
/// `mock` entries are actually wireable today — the wire protocol of a
/// real provider is out of scope for this orchestrator, so a `provider`
/// entry is accepted by the config schema but logged as unsupported
/// rather than silently ignored.
async fn build_model_pool(config: &SlideForgeConfig) -> Arc<ModelClientPool> {
    let pool = Arc::new(ModelClientPool::new(
        RateGateConfig {
            min_interval: Duration::from_millis(250),
        },
        RetryConfig::default(),
    ));
    for (name, entry) in &config.model_clients {
        let kind = match name.as_str() {
            "text" => ModelKind::Text,
            "vision" => ModelKind::Vision,
            "deep_thinking" => ModelKind::DeepThinking,
            "embedding" => ModelKind::Embedding,
            other => {
                warn!(model_kind = other, "unrecognised model client kind in config, skipping");
                continue;
            }
        };
        match entry {
            ModelClientEntry::Mock {} => {
                pool.register(kind, Arc::new(MockModelClient::new())).await;
            }
            ModelClientEntry::Provider { endpoint, .. } => {
                warn!(
                    model_kind = name,
                    endpoint, "provider-backed model clients are not implemented; leaving unregistered"
                );
            }
        }
    }
    pool
}
