use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use error_stack::{report, Result};
use mockall::automock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, warn};
use valuable::Valuable;

use super::destination_reached;
use crate::aggregator::Aggregator;
use crate::hop::{Hop, MultihopBundle};
use crate::report::LoggableError;
use crate::search::{LookupKey, SearchClient};
use crate::types::{ChainType, TxHash};

#[derive(Error, Debug)]
pub enum Error {
    #[error("another recovery action is in flight for this message")]
    ActionInFlight,
    #[error("message has no call to recover")]
    MissingCall,
    #[error("message is not approved on its destination yet")]
    NotApproved,
    #[error("failed to submit transaction")]
    Submission,
}

/// Result of broadcasting one recovery transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Submission {
    pub success: bool,
    pub transaction_hash: Option<TxHash>,
    /// Broadcast result code reported by coordination-type chains; zero means accepted.
    pub broadcast_code: Option<u32>,
    pub error: Option<String>,
}

/// Signs and broadcasts recovery transactions. Timeouts are the submitter's responsibility.
#[automock]
#[async_trait]
pub trait Submitter: Send + Sync {
    async fn pay_gas(&self, hop: &Hop, gas_limit: u64) -> Result<Submission, Error>;
    /// Confirms the call on the coordination layer and approves or relays it to the
    /// destination, whichever is still missing.
    async fn confirm_approve(&self, hop: &Hop) -> Result<Submission, Error>;
    async fn execute(&self, hop: &Hop) -> Result<Submission, Error>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Success,
    Failed,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ActionOutcome {
    pub status: ActionStatus,
    pub message: String,
    pub transaction_hash: Option<TxHash>,
    /// Chain the transaction was sent on.
    pub chain: Option<String>,
    /// The confirm/approve submitted automatically after a successful gas payment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub follow_up: Option<Box<ActionOutcome>>,
    /// Bundle fetched after the action settled.
    #[serde(skip)]
    pub bundle: Option<MultihopBundle>,
}

impl ActionOutcome {
    fn new(status: ActionStatus, message: impl Into<String>, chain: Option<String>) -> Self {
        Self {
            status,
            message: message.into(),
            transaction_hash: None,
            chain,
            follow_up: None,
            bundle: None,
        }
    }

    fn rejected(report: &error_stack::Report<Error>, chain: Option<String>) -> Self {
        Self::new(
            ActionStatus::Failed,
            LoggableError::from(report).to_string(),
            chain,
        )
    }

    pub fn succeeded(&self) -> bool {
        self.status == ActionStatus::Success
    }
}

/// Time given to the search service to index a successful submission before re-fetching.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct SettleDelays {
    #[serde(with = "humantime_serde")]
    pub pay_gas: Duration,
    #[serde(with = "humantime_serde")]
    pub confirm_approve: Duration,
}

impl Default for SettleDelays {
    fn default() -> Self {
        Self {
            pay_gas: Duration::from_secs(1),
            confirm_approve: Duration::from_secs(15),
        }
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, Error> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| report!(Error::ActionInFlight))?;

        Ok(Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Submits recovery actions for one tracked message, one at a time.
pub struct RecoveryExecutor<S, B> {
    aggregator: Arc<Aggregator<S>>,
    submitter: B,
    key: LookupKey,
    coordination_chain: String,
    delays: SettleDelays,
    in_flight: AtomicBool,
}

impl<S, B> RecoveryExecutor<S, B>
where
    S: SearchClient,
    B: Submitter,
{
    pub fn new(
        aggregator: Arc<Aggregator<S>>,
        submitter: B,
        key: LookupKey,
        coordination_chain: impl Into<String>,
        delays: SettleDelays,
    ) -> Self {
        Self {
            aggregator,
            submitter,
            key,
            coordination_chain: coordination_chain.into(),
            delays,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Pays (or adds) gas for the call. On success the message is re-fetched and, unless the
    /// destination already got there or the broadcast reported a failure code, confirmation
    /// and approval are submitted once.
    pub async fn pay_gas(&self, hop: &Hop, gas_limit: u64) -> Result<ActionOutcome, Error> {
        let _guard = InFlight::acquire(&self.in_flight)?;
        let call = hop.call.as_ref().ok_or_else(|| report!(Error::MissingCall))?;
        let chain = call.chain.clone();

        info!(key = %self.key, action = "pay_gas", gas_limit, "submitting recovery action");
        let submission = match self.submitter.pay_gas(hop, gas_limit).await {
            Ok(submission) => submission,
            Err(report) => return Ok(self.rejected(&report, "pay_gas", chain)),
        };

        let mut outcome = ActionOutcome {
            transaction_hash: submission.transaction_hash.clone(),
            ..ActionOutcome::new(
                status(submission.success),
                submission
                    .error
                    .clone()
                    .unwrap_or_else(|| "Pay gas successful".to_string()),
                chain,
            )
        };
        if !submission.success {
            return Ok(outcome);
        }

        sleep(self.delays.pay_gas).await;
        let refreshed = self.aggregator.aggregate(&self.key).await;

        if let Some(bundle) = &refreshed {
            let accepted = submission.broadcast_code.unwrap_or_default() == 0;
            if accepted && !destination_reached(hop) && !destination_reached(&bundle.data) {
                let (follow_up, submitted) = self.relay(&bundle.data).await;
                outcome.follow_up = submitted.then(|| Box::new(follow_up));
            }
        }

        outcome.bundle = refreshed;
        Ok(outcome)
    }

    pub async fn confirm_approve(&self, hop: &Hop) -> Result<ActionOutcome, Error> {
        let _guard = InFlight::acquire(&self.in_flight)?;
        hop.call.as_ref().ok_or_else(|| report!(Error::MissingCall))?;

        info!(key = %self.key, action = "confirm_approve", "submitting recovery action");
        Ok(self.relay_and_refresh(hop).await)
    }

    /// Executes the approved message on its destination. Coordination-type destinations are
    /// executed by relaying.
    pub async fn execute(&self, hop: &Hop) -> Result<ActionOutcome, Error> {
        let _guard = InFlight::acquire(&self.in_flight)?;
        let call = hop.call.as_ref().ok_or_else(|| report!(Error::MissingCall))?;

        if call.destination_chain_type == Some(ChainType::Cosmos) {
            info!(key = %self.key, action = "execute", "relaying to destination");
            return Ok(self.relay_and_refresh(hop).await);
        }

        let approved = hop.approved.as_ref().ok_or_else(|| report!(Error::NotApproved))?;
        let chain = approved.chain.clone();

        info!(key = %self.key, action = "execute", "submitting recovery action");
        let submission = match self.submitter.execute(hop).await {
            Ok(submission) => submission,
            Err(report) => return Ok(self.rejected(&report, "execute", chain)),
        };

        let executed = submission.success && submission.transaction_hash.is_some();
        let message = submission.error.clone().unwrap_or_else(|| {
            if executed {
                "Execute successful".to_string()
            } else {
                "Execution failed without a transaction".to_string()
            }
        });

        let mut outcome = ActionOutcome {
            transaction_hash: submission.transaction_hash,
            ..ActionOutcome::new(status(executed), message, chain)
        };
        if executed {
            outcome.bundle = self.aggregator.aggregate(&self.key).await;
        }

        Ok(outcome)
    }

    async fn relay_and_refresh(&self, hop: &Hop) -> ActionOutcome {
        let (mut outcome, submitted) = self.relay(hop).await;
        if submitted {
            outcome.bundle = self.aggregator.aggregate(&self.key).await;
        }

        outcome
    }

    /// Submits confirm/approve. The flag tells whether the submitter accepted the
    /// transaction; a manual attempt without an error message still reports success.
    async fn relay(&self, hop: &Hop) -> (ActionOutcome, bool) {
        let chain = Some(self.coordination_chain.clone());

        let submission = match self.submitter.confirm_approve(hop).await {
            Ok(submission) => submission,
            Err(report) => return (self.rejected(&report, "confirm_approve", chain), false),
        };

        let submitted = submission.success;
        if submitted {
            sleep(self.delays.confirm_approve).await;
        }

        let verb = match hop.call.as_ref().and_then(|call| call.destination_chain_type) {
            Some(ChainType::Cosmos) => "Execute",
            _ => "Approve",
        };
        let status = status(submission.success || submission.error.is_none());
        let message = submission
            .error
            .unwrap_or_else(|| format!("{verb} successful"));

        let outcome = ActionOutcome {
            transaction_hash: submission.transaction_hash,
            ..ActionOutcome::new(status, message, chain)
        };
        (outcome, submitted)
    }

    fn rejected(
        &self,
        report: &error_stack::Report<Error>,
        action: &str,
        chain: Option<String>,
    ) -> ActionOutcome {
        warn!(
            err = LoggableError::from(report).as_value(),
            key = %self.key,
            action,
            "recovery action failed"
        );
        ActionOutcome::rejected(report, chain)
    }
}

fn status(success: bool) -> ActionStatus {
    if success {
        ActionStatus::Success
    } else {
        ActionStatus::Failed
    }
}
