mod api;
mod comparator;
mod config;
mod error;
mod executor;
mod grading;
mod harness;
mod language;
mod ledger;
mod metrics;
mod template;

use std::{
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use crate::{
    comparator::{
        Comparator,
        NormalizedComparator,
        RemoteComparator,
    },
    config::{
        ComparatorConfig,
        GraderConfig,
        LedgerBackendConfig,
    },
    executor::{
        CircuitBreaker,
        Judge0Client,
        Poller,
    },
    grading::GradingPipeline,
    language::LanguageRegistry,
    ledger::{
        AttemptLedger,
        InMemoryLedger,
        RedisLedger,
    },
    metrics::MetricsRegistry,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = GraderConfig::from_env().context("failed to build grader config")?;
    init_tracing(&cfg);

    let registry = LanguageRegistry::load(cfg.enabled_languages.as_deref())
        .context("language registry failed validation")?;
    let metrics = Arc::new(MetricsRegistry::new());

    let backend = Judge0Client::new(
        &cfg.executor,
        registry.iter().map(|d| d.judge0_id),
        CircuitBreaker::new(cfg.breaker.clone()),
    )
    .context("failed to build execution client")?;

    let comparator: Arc<dyn Comparator> = match &cfg.comparator {
        ComparatorConfig::Normalized => {
            tracing::warn!(
                "COMPARATOR_URL not set; outputs are compared by normalized tokens, \
                 order-sensitive and without reading the problem description"
            );
            Arc::new(NormalizedComparator)
        }
        ComparatorConfig::Remote { url, timeout_ms } => Arc::new(
            RemoteComparator::new(url.clone(), Duration::from_millis(*timeout_ms))
                .context("failed to build comparator client")?,
        ),
    };

    let ledger: Arc<dyn AttemptLedger> = match &cfg.ledger {
        LedgerBackendConfig::InMemory => Arc::new(InMemoryLedger::new()),
        LedgerBackendConfig::Redis { url, key_prefix } => Arc::new(
            RedisLedger::new(url, key_prefix.clone())
                .await
                .context("failed to connect attempt ledger to redis")?,
        ),
    };

    tracing::info!(
        languages = registry.iter().count(),
        executor = %cfg.executor.base_url,
        wait = cfg.executor.wait,
        comparator = comparator.name(),
        ledger = ledger.name(),
        "grader configured"
    );

    let pipeline = GradingPipeline::new(
        Arc::new(registry),
        Arc::new(backend),
        comparator,
        metrics.clone(),
    )
    .with_poller(Poller::new(cfg.poll_max_retries, cfg.poll_interval))
    .with_wait(cfg.executor.wait)
    .with_reference_spacing(cfg.reference_spacing)
    .with_max_reference_batch(cfg.max_reference_batch);

    let app = api::routes(Arc::new(pipeline), ledger, metrics);

    let listener = TcpListener::bind(cfg.bind_addr)
        .await
        .context("failed to bind listener")?;
    tracing::info!(addr = %cfg.bind_addr, "grader listening");

    axum::serve(listener, app)
        .await
        .context("grader server error")?;

    Ok(())
}

fn init_tracing(cfg: &GraderConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cfg.log_level.clone()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_current_span(false)
        .with_span_list(false)
        .init();
}
