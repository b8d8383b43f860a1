//! Ordered lifecycle steps derived from a hop's event records.

use serde::Serialize;
use serde_with::SerializeDisplay;

use crate::chain::{ChainMetadata, ChainRegistry};
use crate::finality::Thresholds;
use crate::hop::{
    Approved, Call, Confirm, ErrorEvent, Executed, ExpressExecuted, GasPaid, Hop, Refunded,
};
use crate::types::{elapsed, ChainType, Timestamp, TxHash};

mod projector;

pub use projector::{project, ProjectionContext};

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepId {
    Send,
    PayGas,
    Express,
    Confirm,
    Approve,
    Execute,
    Refund,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Success,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, SerializeDisplay, strum::Display)]
pub enum StepTitle {
    Send,
    Sent,
    #[strum(serialize = "Checking Gas Paid")]
    CheckingGasPaid,
    #[strum(serialize = "Pay Gas")]
    PayGas,
    #[strum(serialize = "Gas Paid")]
    GasPaid,
    #[strum(serialize = "Express Executed")]
    ExpressExecuted,
    Confirm,
    #[strum(serialize = "Waiting for Finality")]
    WaitingForFinality,
    #[strum(serialize = "Invalid Call")]
    InvalidCall,
    #[strum(serialize = "Failed to Confirm")]
    FailedToConfirm,
    Confirmed,
    Approve,
    Approving,
    Approved,
    Execute,
    #[strum(serialize = "Waiting for IBC")]
    WaitingForIbc,
    Error,
    Executed,
    #[strum(serialize = "Excess Gas Refunded")]
    ExcessGasRefunded,
}

/// The event record a step was derived from.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StepRecord {
    Call(Call),
    GasPaid(GasPaid),
    ExpressExecuted(ExpressExecuted),
    Confirm(Confirm),
    Approved(Approved),
    Executed(Executed),
    Error(ErrorEvent),
    Refunded(Refunded),
}

impl StepRecord {
    pub fn transaction_hash(&self) -> Option<&TxHash> {
        match self {
            StepRecord::Call(call) => call.transaction_hash.as_ref(),
            StepRecord::GasPaid(paid) => paid.transaction_hash.as_ref(),
            StepRecord::ExpressExecuted(express) => express.transaction_hash.as_ref(),
            StepRecord::Confirm(confirm) => confirm
                .confirmation_txhash
                .as_ref()
                .or(confirm.transaction_hash.as_ref()),
            StepRecord::Approved(approved) => approved.transaction_hash.as_ref(),
            StepRecord::Executed(executed) => executed
                .transaction_hash
                .as_ref()
                .or(executed.relay_transaction_hash.as_ref()),
            StepRecord::Error(error) => error.transaction_hash.as_ref(),
            StepRecord::Refunded(refunded) => refunded.transaction_hash.as_ref(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Step {
    pub id: StepId,
    pub title: StepTitle,
    pub status: StepStatus,
    pub data: Option<StepRecord>,
    #[serde(rename = "chainData")]
    pub chain: Option<ChainMetadata>,
}

impl Step {
    /// Explorer link of the transaction behind this step.
    pub fn link(&self) -> Option<String> {
        let hash = self.data.as_ref()?.transaction_hash()?;
        self.chain.as_ref()?.transaction_url(hash)
    }

    fn is_pending(&self) -> bool {
        self.status == StepStatus::Pending
    }
}

/// The first pending step, the only one a recovery action can unblock.
pub fn active_step(steps: &[Step]) -> Option<&Step> {
    steps.iter().find(|step| step.is_pending())
}

/// Status verdicts shared by the step projection and the recovery planner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HopStatus {
    pub source_chain_type: Option<ChainType>,
    pub destination_chain_type: Option<ChainType>,
    /// A confirmation exists and is not the stale failed poll.
    pub confirm_succeeded: bool,
    /// Confirmation succeeded or a later record proves it did.
    pub confirm_settled: bool,
    pub execute_succeeded: bool,
    /// An execution error outlived its grace period.
    pub errored: bool,
    /// Relayed by the coordination layer but not yet delivered on the destination.
    pub relayed_undelivered: bool,
}

impl HopStatus {
    pub fn derive(
        hop: &Hop,
        chains: &dyn ChainRegistry,
        thresholds: &Thresholds,
        now: Timestamp,
    ) -> Self {
        let source_chain_type = hop.source_chain_type(chains);
        let destination_chain_type = hop.destination_chain_type(chains);

        let failed_poll_id = hop
            .confirm_failed_event
            .as_ref()
            .and_then(|failed| failed.poll_id.as_ref());
        let confirm_succeeded = hop.confirm.as_ref().is_some_and(|confirm| {
            source_chain_type == Some(ChainType::Cosmos)
                || confirm.poll_id.as_ref() != failed_poll_id
        });

        let confirm_settled = confirm_succeeded
            || hop.approved.is_some()
            || hop.executed.is_some()
            || hop.is_executed
            || hop.error.is_some();

        let execute_succeeded = hop.executed.as_ref().is_some_and(|executed| {
            executed.relay_transaction_hash.is_none()
                || (executed.transaction_hash.is_some() && hop.error.is_none())
        }) || hop.is_executed;

        let error_since = hop
            .error
            .as_ref()
            .and_then(|error| error.block_timestamp)
            .or_else(|| hop.approved.as_ref()?.block_timestamp)
            .or_else(|| hop.confirm.as_ref()?.block_timestamp);
        let errored = hop.error.is_some()
            && exceeds(elapsed(error_since, now), thresholds.execute_error_grace.as_secs());

        let relayed_undelivered = hop.executed.as_ref().is_some_and(|executed| {
            executed.relay_transaction_hash.is_some() && executed.transaction_hash.is_none()
        });

        Self {
            source_chain_type,
            destination_chain_type,
            confirm_succeeded,
            confirm_settled,
            execute_succeeded,
            errored,
            relayed_undelivered,
        }
    }
}

/// Strictly greater; an unknown elapsed time exceeds nothing.
pub(crate) fn exceeds(elapsed: Option<u64>, threshold: u64) -> bool {
    elapsed.is_some_and(|elapsed| elapsed > threshold)
}

/// Greater or equal; an unknown elapsed time reaches nothing.
pub(crate) fn reaches(elapsed: Option<u64>, threshold: u64) -> bool {
    elapsed.is_some_and(|elapsed| elapsed >= threshold)
}
