use std::{
    env,
    net::SocketAddr,
    str::FromStr,
    time::Duration,
};

use anyhow::{
    Context,
    Result,
    anyhow,
};

use crate::{
    executor::BreakerConfig,
    language::LanguageKey,
};

#[derive(Debug, Clone)]
pub struct GraderConfig {
    pub bind_addr: SocketAddr,
    pub executor: ExecutorConfig,
    pub breaker: BreakerConfig,
    pub poll_interval: Duration,
    pub poll_max_retries: u32,
    pub reference_spacing: Duration,
    pub max_reference_batch: usize,
    pub enabled_languages: Option<Vec<LanguageKey>>,
    pub comparator: ComparatorConfig,
    pub ledger: LedgerBackendConfig,
    pub log_level: String,
}

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub base_url: String,
    pub auth_header: Option<String>,
    pub auth_token: Option<String>,
    pub host_header: Option<String>,
    pub timeout_ms: u64,
    /// Ask the service to run synchronously instead of polling.
    pub wait: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComparatorConfig {
    Normalized,
    Remote { url: String, timeout_ms: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerBackendConfig {
    InMemory,
    Redis { url: String, key_prefix: String },
}

impl GraderConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    pub fn from_vars<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = var("BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8080".to_string())
            .parse::<SocketAddr>()
            .context("invalid BIND_ADDR")?;

        let executor = ExecutorConfig {
            base_url: var("EXECUTOR_BASE_URL")
                .unwrap_or_else(|| "http://127.0.0.1:2358".to_string())
                .trim_end_matches('/')
                .to_string(),
            auth_header: non_empty(var("EXECUTOR_AUTH_HEADER")),
            auth_token: non_empty(var("EXECUTOR_AUTH_TOKEN")),
            host_header: non_empty(var("EXECUTOR_HOST_HEADER")),
            timeout_ms: parse_var(&var, "EXECUTOR_TIMEOUT_MS", 10_000u64).max(100),
            wait: parse_var(&var, "EXECUTOR_WAIT", false),
        };
        if executor.auth_header.is_some() != executor.auth_token.is_some() {
            return Err(anyhow!(
                "EXECUTOR_AUTH_HEADER and EXECUTOR_AUTH_TOKEN must be set together"
            ));
        }

        let breaker = BreakerConfig {
            failure_threshold: parse_var(&var, "CB_FAILURE_THRESHOLD", 5u32).max(1),
            open_for: Duration::from_secs(parse_var(&var, "CB_OPEN_SECONDS", 20u64)),
        };

        let enabled_languages = match non_empty(var("ENABLED_LANGUAGES")) {
            None => None,
            Some(raw) => Some(
                parse_csv(&raw)
                    .iter()
                    .map(|key| {
                        LanguageKey::from_str(key)
                            .map_err(|_| anyhow!("unknown language in ENABLED_LANGUAGES: {key}"))
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
        };

        let comparator = match non_empty(var("COMPARATOR_URL")) {
            None => ComparatorConfig::Normalized,
            Some(url) => ComparatorConfig::Remote {
                url,
                timeout_ms: parse_var(&var, "COMPARATOR_TIMEOUT_MS", 15_000u64).max(100),
            },
        };

        let ledger = match var("LEDGER_BACKEND")
            .unwrap_or_else(|| "memory".to_string())
            .to_ascii_lowercase()
            .as_str()
        {
            "memory" | "in_memory" => LedgerBackendConfig::InMemory,
            "redis" => LedgerBackendConfig::Redis {
                url: var("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
                key_prefix: var("LEDGER_KEY_PREFIX")
                    .unwrap_or_else(|| "grader:attempts".to_string()),
            },
            other => return Err(anyhow!("unsupported LEDGER_BACKEND: {other}")),
        };

        Ok(Self {
            bind_addr,
            executor,
            breaker,
            poll_interval: Duration::from_millis(parse_var(&var, "POLL_INTERVAL_MS", 500u64)),
            poll_max_retries: parse_var(&var, "POLL_MAX_RETRIES", 20u32).max(1),
            reference_spacing: Duration::from_millis(parse_var(
                &var,
                "REFERENCE_SPACING_MS",
                500u64,
            )),
            max_reference_batch: parse_var(&var, "REFERENCE_BATCH_MAX", 20usize).max(1),
            enabled_languages,
            comparator,
            ledger,
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_var<F, T>(var: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    var(key)
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}
