use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use error_stack::{Result, ResultExt};
use serde::Serialize;
use thiserror::Error;
use tokio::select;
use tokio::sync::watch::{self, Receiver, Sender};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregator::Aggregator;
use crate::chain::ChainRegistry;
use crate::finality::{format_remaining, time_remaining, FinalityEstimator, Thresholds};
use crate::gas::GasEstimator;
use crate::hop::{Hop, HopRole, MultihopBundle};
use crate::lifecycle::{self, active_step, ProjectionContext, Step, StepId, StepStatus, StepTitle};
use crate::recovery::{self, EligibleAction, PlanContext, WalletContext};
use crate::search::{DurationEstimate, LookupKey, SearchClient};
use crate::types::{now, Timestamp};

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to publish snapshot")]
    Publish,
}

/// Projection of one hop of the bundle.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HopView {
    pub role: HopRole,
    pub steps: Vec<Step>,
    pub active_step: Option<StepId>,
    pub actions: Vec<EligibleAction>,
    /// Time left until the confirmation is expected, while it is still pending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finality_countdown: Option<String>,
}

/// Everything known about a tracked message at one point in time.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Snapshot {
    pub key: String,
    pub updated_at: Timestamp,
    pub bundle: MultihopBundle,
    pub hops: Vec<HopView>,
    /// Destination gas limit offered for paying gas on the primary hop.
    pub gas_limit: Option<u64>,
    pub terminal: bool,
}

impl Snapshot {
    pub fn primary(&self) -> Option<&HopView> {
        self.hops.iter().find(|view| view.role == HopRole::Primary)
    }
}

/// Periodically re-aggregates one message and publishes its projected lifecycle.
pub struct Tracker<S> {
    key: LookupKey,
    aggregator: Arc<Aggregator<S>>,
    finality: FinalityEstimator<S>,
    gas: GasEstimator<S>,
    chains: Arc<dyn ChainRegistry>,
    coordination_chain: String,
    thresholds: Thresholds,
    poll_interval: Duration,
    estimate: Option<DurationEstimate>,
    last_bundle: Option<MultihopBundle>,
    snapshot_tx: Sender<Option<Snapshot>>,
    snapshot_rx: Receiver<Option<Snapshot>>,
}

impl<S> Tracker<S>
where
    S: SearchClient,
{
    pub fn new(
        key: LookupKey,
        aggregator: Arc<Aggregator<S>>,
        chains: Arc<dyn ChainRegistry>,
        coordination_chain: impl Into<String>,
        thresholds: Thresholds,
    ) -> Self {
        let client = aggregator.client().clone();
        let (snapshot_tx, snapshot_rx) = watch::channel(None);

        Self {
            key,
            finality: FinalityEstimator::new(client.clone()),
            gas: GasEstimator::new(client),
            aggregator,
            chains,
            coordination_chain: coordination_chain.into(),
            thresholds,
            poll_interval: Duration::from_secs(30),
            estimate: None,
            last_bundle: None,
            snapshot_tx,
            snapshot_rx,
        }
    }

    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn snapshots(&self) -> Receiver<Option<Snapshot>> {
        self.snapshot_rx.clone()
    }

    /// Polls until the message reaches a terminal state or the token is cancelled.
    pub async fn run(mut self, token: CancellationToken) -> Result<(), Error> {
        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            select! {
                _ = interval.tick() => {
                    let Some(snapshot) = self.refresh(now()).await else {
                        continue;
                    };
                    let terminal = snapshot.terminal;

                    self.publish(snapshot)?;
                    if terminal {
                        info!(key = %self.key, "message reached a terminal state");
                        return Ok(());
                    }
                },
                _ = token.cancelled() => {
                    info!(key = %self.key, "tracker exiting");
                    return Ok(());
                },
            }
        }
    }

    /// Aggregates once and projects the result. A failed aggregation reuses the last bundle;
    /// `None` means the message has not been found yet.
    pub async fn refresh(&mut self, now: Timestamp) -> Option<Snapshot> {
        match self.aggregator.aggregate(&self.key).await {
            Some(bundle) => self.last_bundle = Some(bundle),
            None if self.last_bundle.is_some() => {
                warn!(key = %self.key, "keeping last known state of message")
            }
            None => debug!(key = %self.key, "message not found yet"),
        }
        let bundle = self.last_bundle.clone()?;

        if self.estimate.is_none() {
            if let Some(source) = bundle.data.call.as_ref().and_then(|call| call.chain.as_deref()) {
                self.estimate = self
                    .finality
                    .estimate(source, bundle.data.destination_chain())
                    .await;
            }
        }
        let estimate = self.estimate.clone();
        let gas_limit = self.gas.estimate(&bundle.data).await;

        Some(self.project(bundle, estimate.as_ref(), gas_limit, now))
    }

    fn project(
        &self,
        bundle: MultihopBundle,
        estimate: Option<&DurationEstimate>,
        gas_limit: Option<u64>,
        now: Timestamp,
    ) -> Snapshot {
        let hops = bundle
            .hops()
            .map(|(role, hop)| {
                let estimate = estimate.filter(|_| role == HopRole::Primary);
                let projection = ProjectionContext {
                    now,
                    chains: self.chains.as_ref(),
                    coordination_chain: &self.coordination_chain,
                    thresholds: &self.thresholds,
                    estimate,
                };
                let plan = PlanContext {
                    chains: self.chains.as_ref(),
                    thresholds: &self.thresholds,
                    estimate,
                    gas_limit: gas_limit.filter(|_| role == HopRole::Primary),
                    wallet: WalletContext::read_only(now),
                };

                let steps = lifecycle::project(hop, &projection);
                HopView {
                    role,
                    active_step: active_step(&steps).map(|step| step.id),
                    finality_countdown: countdown(hop, &steps, estimate, now),
                    actions: recovery::plan(hop, &plan),
                    steps,
                }
            })
            .collect();

        Snapshot {
            key: self.key.to_string(),
            updated_at: now,
            terminal: bundle.is_terminal(),
            bundle,
            hops,
            gas_limit,
        }
    }

    fn publish(&self, snapshot: Snapshot) -> Result<(), Error> {
        log_transitions(&self.key, self.snapshot_rx.borrow().as_ref(), &snapshot);

        self.snapshot_tx
            .send(Some(snapshot))
            .change_context(Error::Publish)
    }
}

fn countdown(
    hop: &Hop,
    steps: &[Step],
    estimate: Option<&DurationEstimate>,
    now: Timestamp,
) -> Option<String> {
    let confirming = steps
        .iter()
        .any(|step| step.id == StepId::Confirm && step.status == StepStatus::Pending);
    if !confirming || hop.express_executed.is_some() {
        return None;
    }

    time_remaining(hop.call_timestamp(), estimate, now).map(format_remaining)
}

fn log_transitions(key: &LookupKey, previous: Option<&Snapshot>, current: &Snapshot) {
    let known: HashMap<(HopRole, StepId), (StepStatus, StepTitle)> = previous
        .into_iter()
        .flat_map(|snapshot| &snapshot.hops)
        .flat_map(|view| {
            view.steps
                .iter()
                .map(|step| ((view.role, step.id), (step.status, step.title)))
        })
        .collect();

    for view in &current.hops {
        for step in &view.steps {
            if known.get(&(view.role, step.id)) == Some(&(step.status, step.title)) {
                continue;
            }

            info!(
                %key,
                hop = %view.role,
                step = %step.id,
                status = %step.status,
                title = %step.title,
                "step changed"
            );
        }
    }
}
