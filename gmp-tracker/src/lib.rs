pub mod aggregator;
pub mod asyncutil;
pub mod chain;
#[cfg(feature = "commands")]
pub mod commands;
#[cfg(not(feature = "commands"))]
mod commands;
#[cfg(feature = "config")]
pub mod config;
#[cfg(not(feature = "config"))]
mod config;
pub mod contracts;
pub mod finality;
pub mod gas;
pub mod hop;
pub mod lifecycle;
pub mod recovery;
pub mod report;
pub mod search;
pub mod tracker;
pub mod types;

#[cfg(test)]
mod test_utils;

use std::sync::Arc;

use asyncutil::future::RetryPolicy;
use asyncutil::task::{CancellableTask, TaskError, TaskGroup};
use error_stack::{report, FutureExt, Result, ResultExt};
use thiserror::Error;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::aggregator::Aggregator;
use crate::chain::StaticChainRegistry;
use crate::config::Config;
use crate::contracts::StaticContractRegistry;
use crate::search::{HttpSearchClient, LookupKey};
use crate::tracker::{Snapshot, Tracker};

/// Builds a tracker for one message from the configured collaborators.
pub fn tracker(cfg: &Config, key: LookupKey) -> Tracker<HttpSearchClient> {
    let client = HttpSearchClient::builder()
        .base_url(cfg.search_api.clone())
        .timeout(cfg.request_timeout)
        .retry_policy(RetryPolicy::repeat_constant(
            cfg.retry_delay,
            cfg.retry_max_attempts,
        ))
        .build();
    let contracts = StaticContractRegistry::new(cfg.contracts.clone(), cfg.environment.clone());
    let aggregator = Aggregator::new(Arc::new(client), Arc::new(contracts));

    Tracker::new(
        key,
        Arc::new(aggregator),
        Arc::new(StaticChainRegistry::new(cfg.chains.clone())),
        cfg.coordination_chain.clone(),
        cfg.thresholds,
    )
    .poll_interval(cfg.poll_interval)
}

/// Fetches and projects a message once.
pub async fn status(cfg: Config, key: &str) -> Result<Snapshot, Error> {
    tracker(&cfg, LookupKey::parse(key))
        .refresh(types::now())
        .await
        .ok_or_else(|| report!(Error::NotFound))
        .attach_printable_lazy(|| format!("key: {key}"))
}

/// Follows every message until it settles or the process is signalled to stop.
pub async fn watch(cfg: Config, keys: Vec<String>) -> Result<(), Error> {
    let main_token = CancellationToken::new();
    let exit_token = main_token.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("signal received, waiting for trackers to exit gracefully");

        exit_token.cancel();
    });

    keys.into_iter()
        .fold(TaskGroup::new("gmp-tracker"), |group, key| {
            let tracker = tracker(&cfg, LookupKey::parse(&key));

            group.add_task(
                format!("tracker-{key}"),
                CancellableTask::create(|token| {
                    tracker.run(token).change_context(Error::Tracker)
                }),
            )
        })
        .run(main_token)
        .await
        .change_context(Error::AppFailure)
}

async fn wait_for_signal() {
    match (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) {
        (Ok(mut sigint), Ok(mut sigterm)) => {
            tokio::select! {
                _ = sigint.recv() => {},
                _ = sigterm.recv() => {},
            }
        }
        _ => {
            warn!("failed to capture SIGINT/SIGTERM, falling back to ctrl-c");
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to load config")]
    LoadConfig,
    #[error("message not found")]
    NotFound,
    #[error("tracker failed")]
    Tracker,
    #[error("task execution failed")]
    Task(#[from] TaskError),
    #[error("app failed")]
    AppFailure,
    #[error("failed to serialize output")]
    Serialization,
}
