//! Recovery actions that unblock a stalled message, and the rules deciding when each one is
//! legal.

use serde::Serialize;

use crate::chain::ChainRegistry;
use crate::finality::Thresholds;
use crate::gas::DEFAULT_GAS_LIMIT;
use crate::hop::Hop;
use crate::lifecycle::{reaches, HopStatus};
use crate::search::DurationEstimate;
use crate::types::{elapsed, ChainType, Timestamp};

mod executor;

pub use executor::{
    ActionOutcome, ActionStatus, Error, MockSubmitter, RecoveryExecutor, SettleDelays, Submission,
    Submitter,
};

/// Below this remaining gas amount a message is considered out of gas.
pub const MIN_GAS_REMAIN_AMOUNT: f64 = 0.000001;

/// What the operator environment can currently sign for. A missing signer disables actions; it
/// never fails planning.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WalletContext {
    pub now: Timestamp,
    pub has_source_signer: bool,
    pub has_destination_signer: bool,
    pub source_chain_matches_wallet: bool,
    pub destination_chain_matches_wallet: bool,
    /// Another action is being submitted for this hop.
    pub in_flight: bool,
}

impl WalletContext {
    /// No signer connected: actions are listed but none is enabled, except relays that need no
    /// destination signature.
    pub fn read_only(now: Timestamp) -> Self {
        Self {
            now,
            ..Self::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmStage {
    /// No confirmation recorded yet.
    Confirm,
    Approve,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RecoveryAction {
    PayGas {
        /// Some gas was already paid and more is added.
        add: bool,
        gas_limit: u64,
    },
    ConfirmApprove {
        stage: ConfirmStage,
    },
    Execute {
        /// Coordination-type destinations are executed by relaying, without a destination
        /// signer.
        via_relay: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct EligibleAction {
    #[serde(flatten)]
    pub action: RecoveryAction,
    /// Shown but not actionable until the right wallet is connected and nothing is in flight.
    pub enabled: bool,
}

pub struct PlanContext<'a> {
    pub chains: &'a dyn ChainRegistry,
    pub thresholds: &'a Thresholds,
    pub estimate: Option<&'a DurationEstimate>,
    /// Destination gas limit to request when paying gas.
    pub gas_limit: Option<u64>,
    pub wallet: WalletContext,
}

/// Lists the recovery actions legal for a hop right now, in lifecycle order.
pub fn plan(hop: &Hop, ctx: &PlanContext) -> Vec<EligibleAction> {
    let Some(call) = hop.call.as_ref() else {
        return vec![];
    };
    let status = HopStatus::derive(hop, ctx.chains, ctx.thresholds, ctx.wallet.now);
    let wallet = &ctx.wallet;

    let mut actions = vec![];

    if pay_gas_eligible(hop, ctx) {
        let source_signer = wallet.has_source_signer && wallet.source_chain_matches_wallet;
        actions.push(EligibleAction {
            action: RecoveryAction::PayGas {
                add: hop.gas_paid.is_some(),
                gas_limit: ctx.gas_limit.unwrap_or(DEFAULT_GAS_LIMIT),
            },
            enabled: source_signer && !wallet.in_flight,
        });
    }

    if confirm_approve_eligible(hop, &status, ctx) {
        let stage = match hop.confirm {
            Some(_) => ConfirmStage::Approve,
            None => ConfirmStage::Confirm,
        };
        actions.push(EligibleAction {
            action: RecoveryAction::ConfirmApprove { stage },
            enabled: !wallet.in_flight,
        });
    }

    if execute_eligible(hop, &status, ctx) {
        let via_relay = call.destination_chain_type == Some(ChainType::Cosmos);
        let destination_signer =
            wallet.has_destination_signer && wallet.destination_chain_matches_wallet;
        actions.push(EligibleAction {
            action: RecoveryAction::Execute { via_relay },
            enabled: (via_relay || destination_signer) && !wallet.in_flight,
        });
    }

    actions
}

fn pay_gas_eligible(hop: &Hop, ctx: &PlanContext) -> bool {
    let Some(call) = hop.call.as_ref() else {
        return false;
    };
    if hop.executed.is_some() || hop.is_executed || hop.approved.is_some() {
        return false;
    }

    let since_call = elapsed(call.block_timestamp, ctx.wallet.now);
    if call.chain_type == Some(ChainType::Cosmos)
        && !reaches(since_call, ctx.thresholds.recovery_delay.as_secs())
    {
        return false;
    }

    let flags = &hop.flags;
    !hop.is_gas_paid()
        || flags.is_insufficient_fee
        || flags.is_invalid_gas_paid
        || flags.not_enough_gas_to_execute
        || hop
            .remaining_gas()
            .is_some_and(|remaining| remaining < MIN_GAS_REMAIN_AMOUNT)
}

fn confirm_approve_eligible(hop: &Hop, status: &HopStatus, ctx: &PlanContext) -> bool {
    let Some(call) = hop.call.as_ref() else {
        return false;
    };
    let now = ctx.wallet.now;

    let already_done = if call.destination_chain_type == Some(ChainType::Cosmos) {
        status.confirm_succeeded
    } else {
        hop.approved.is_some()
    };
    let stuck_in_relay = hop.error.is_some() && status.relayed_undelivered;
    let delivered = (hop.executed.is_some() && !stuck_in_relay) || hop.is_executed;

    let finality_reached = hop.confirm.is_some()
        || hop.confirm_failed
        || elapsed(call.block_timestamp, now)
            .is_some_and(|since| since as f64 >= ctx.thresholds.finality_time(ctx.estimate));

    let since_last = elapsed(
        hop.confirm
            .as_ref()
            .map_or(call.block_timestamp, |confirm| confirm.block_timestamp),
        now,
    );

    let flags = &hop.flags;
    let out_of_gas = hop.remaining_gas().map_or(true, |remaining| remaining == 0.0)
        && hop.gas_paid_to_callback.is_none()
        && !flags.is_call_from_relayer
        && !hop.is_proposal();
    let invalid = flags.is_invalid_destination_chain
        || flags.is_invalid_call
        || flags.is_insufficient_fee
        || out_of_gas;

    !already_done
        && !delivered
        && finality_reached
        && reaches(since_last, ctx.thresholds.recovery_delay.as_secs())
        && !invalid
}

fn execute_eligible(hop: &Hop, status: &HopStatus, ctx: &PlanContext) -> bool {
    let Some(call) = hop.call.as_ref() else {
        return false;
    };
    let to_cosmos = call.destination_chain_type == Some(ChainType::Cosmos);

    let ready = if to_cosmos {
        status.confirm_succeeded
    } else {
        hop.approved.is_some()
    };
    let delivered = hop
        .executed
        .as_ref()
        .is_some_and(|executed| executed.transaction_hash.is_some())
        || hop.is_executed;

    let ready_since = if to_cosmos {
        hop.confirm.as_ref().and_then(|confirm| confirm.block_timestamp)
    } else {
        hop.approved.as_ref().and_then(|approved| approved.block_timestamp)
    }
    .or(call.block_timestamp);
    let grace = if to_cosmos {
        ctx.thresholds.cosmos_execute_grace
    } else {
        ctx.thresholds.execute_error_grace
    };
    let grace_passed = reaches(elapsed(ready_since, ctx.wallet.now), grace.as_secs());

    ready && !delivered && (hop.error.is_some() || grace_passed) && call.has_payload()
}

/// Whether the destination reached the state a confirm/approve submission drives it to:
/// executed for coordination-type destinations, approved otherwise.
pub(crate) fn destination_reached(hop: &Hop) -> bool {
    match hop.call.as_ref().and_then(|call| call.destination_chain_type) {
        Some(ChainType::Cosmos) => hop.executed.is_some(),
        _ => hop.approved.is_some(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;
    use crate::lifecycle::{project, ProjectionContext};
    use crate::test_utils::{call_record, chains, hop, CALL_TIMESTAMP};

    fn connected(now: Timestamp) -> WalletContext {
        WalletContext {
            now,
            has_source_signer: true,
            has_destination_signer: true,
            source_chain_matches_wallet: true,
            destination_chain_matches_wallet: true,
            in_flight: false,
        }
    }

    fn plan_at(raw: Value, wallet: WalletContext) -> Vec<EligibleAction> {
        let chains = chains();
        let thresholds = Thresholds::default();
        let ctx = PlanContext {
            chains: &chains,
            thresholds: &thresholds,
            estimate: None,
            gas_limit: Some(250_000),
            wallet,
        };

        plan(&hop(raw), &ctx)
    }

    fn actions(plan: &[EligibleAction]) -> Vec<RecoveryAction> {
        plan.iter().map(|eligible| eligible.action).collect()
    }

    fn cosmos_bound_call(hash: &str) -> Value {
        let mut call = call_record(hash);
        call["returnValues"]["destinationChain"] = json!("osmosis");
        call["destination_chain_type"] = json!("cosmos");
        call
    }

    #[test]
    fn unpaid_call_offers_pay_gas_with_connected_wallet() {
        let raw = json!({ "call": call_record("0x1") });

        let plan = plan_at(raw.clone(), connected(CALL_TIMESTAMP + 45));
        assert_eq!(
            plan,
            vec![EligibleAction {
                action: RecoveryAction::PayGas {
                    add: false,
                    gas_limit: 250_000
                },
                enabled: true,
            }]
        );

        let read_only = plan_at(raw, WalletContext::read_only(CALL_TIMESTAMP + 45));
        assert_eq!(read_only.len(), 1);
        assert!(!read_only[0].enabled);
    }

    #[test]
    fn wrong_network_or_in_flight_disables_pay_gas() {
        let raw = json!({ "call": call_record("0x1") });

        let wrong_chain = WalletContext {
            source_chain_matches_wallet: false,
            ..connected(CALL_TIMESTAMP + 45)
        };
        let in_flight = WalletContext {
            in_flight: true,
            ..connected(CALL_TIMESTAMP + 45)
        };

        assert!(!plan_at(raw.clone(), wrong_chain)[0].enabled);
        assert!(!plan_at(raw, in_flight)[0].enabled);
    }

    #[test]
    fn cosmos_source_waits_before_pay_gas() {
        let mut call = call_record("0x1");
        call["chain"] = json!("osmosis");
        call["chain_type"] = json!("cosmos");
        let raw = json!({ "call": call });

        assert!(plan_at(raw.clone(), connected(CALL_TIMESTAMP + 59)).is_empty());
        assert_eq!(plan_at(raw, connected(CALL_TIMESTAMP + 60)).len(), 1);
    }

    #[test]
    fn underfunded_gas_is_topped_up() {
        for flag in [
            json!({"is_insufficient_fee": true}),
            json!({"is_invalid_gas_paid": true}),
            json!({"not_enough_gas_to_execute": true}),
            json!({"gas": {"gas_remain_amount": 0.0000001}}),
        ] {
            let mut raw = json!({ "call": call_record("0x1"), "gas_paid": {} });
            for (key, value) in flag.as_object().unwrap() {
                raw[key] = value.clone();
            }

            let actions = actions(&plan_at(raw, connected(CALL_TIMESTAMP + 10)));
            assert!(
                actions.contains(&RecoveryAction::PayGas {
                    add: true,
                    gas_limit: 250_000
                }),
                "{actions:?}"
            );
        }

        let funded = json!({
            "call": call_record("0x1"),
            "gas_paid": {},
            "gas": {"gas_remain_amount": 0.5}
        });
        assert!(plan_at(funded, connected(CALL_TIMESTAMP + 10)).is_empty());
    }

    #[test]
    fn fully_executed_hop_has_no_actions() {
        let raw = json!({
            "call": call_record("0x1"),
            "gas_paid": {},
            "gas": {"gas_remain_amount": 0.1},
            "confirm": {"poll_id": 1, "block_timestamp": CALL_TIMESTAMP + 100},
            "approved": {"block_timestamp": CALL_TIMESTAMP + 200},
            "executed": {"transactionHash": "0xexec"}
        });

        assert!(plan_at(raw.clone(), connected(CALL_TIMESTAMP + 10_000)).is_empty());

        let chains = chains();
        let thresholds = Thresholds::default();
        let steps = project(
            &hop(raw),
            &ProjectionContext {
                now: CALL_TIMESTAMP + 10_000,
                chains: &chains,
                coordination_chain: "axelarnet",
                thresholds: &thresholds,
                estimate: None,
            },
        );
        assert!(steps
            .iter()
            .all(|step| step.status == crate::lifecycle::StepStatus::Success));
    }

    #[test]
    fn confirm_offered_after_finality_and_recovery_delay() {
        let raw = json!({
            "call": call_record("0x1"),
            "gas_paid": {},
            "gas": {"gas_remain_amount": 0.1}
        });

        assert!(plan_at(raw.clone(), connected(CALL_TIMESTAMP + 599)).is_empty());
        assert_eq!(
            actions(&plan_at(raw, connected(CALL_TIMESTAMP + 600))),
            vec![RecoveryAction::ConfirmApprove {
                stage: ConfirmStage::Confirm
            }]
        );
    }

    #[test]
    fn approve_offered_once_confirmed_for_a_minute() {
        let raw = json!({
            "call": call_record("0x1"),
            "gas_paid": {},
            "gas": {"gas_remain_amount": 0.1},
            "confirm": {"poll_id": 1, "block_timestamp": CALL_TIMESTAMP + 100}
        });

        assert!(plan_at(raw.clone(), connected(CALL_TIMESTAMP + 159)).is_empty());

        let plan = plan_at(raw, WalletContext::read_only(CALL_TIMESTAMP + 160));
        assert_eq!(
            plan,
            vec![EligibleAction {
                action: RecoveryAction::ConfirmApprove {
                    stage: ConfirmStage::Approve
                },
                enabled: true,
            }]
        );
    }

    #[test]
    fn invalid_or_gasless_calls_cannot_be_confirmed() {
        for extra in [
            json!({"is_invalid_destination_chain": true, "gas": {"gas_remain_amount": 0.1}}),
            json!({"is_invalid_call": true, "gas": {"gas_remain_amount": 0.1}}),
            json!({}),
        ] {
            let mut raw = json!({ "call": call_record("0x1"), "gas_paid": {} });
            for (key, value) in extra.as_object().unwrap() {
                raw[key] = value.clone();
            }

            let actions = actions(&plan_at(raw, connected(CALL_TIMESTAMP + 1_000)));
            assert!(
                actions
                    .iter()
                    .all(|action| !matches!(action, RecoveryAction::ConfirmApprove { .. })),
                "{actions:?}"
            );
        }

        let relayer_call = json!({
            "call": call_record("0x1"),
            "gas_paid": {},
            "is_call_from_relayer": true
        });
        assert_eq!(
            actions(&plan_at(relayer_call, connected(CALL_TIMESTAMP + 1_000))),
            vec![RecoveryAction::ConfirmApprove {
                stage: ConfirmStage::Confirm
            }]
        );
    }

    #[test]
    fn execute_on_evm_waits_for_grace_or_error() {
        let raw = json!({
            "call": call_record("0x1"),
            "gas_paid": {},
            "confirm": {"poll_id": 1},
            "approved": {"block_timestamp": CALL_TIMESTAMP + 100}
        });

        assert!(plan_at(raw.clone(), connected(CALL_TIMESTAMP + 219)).is_empty());

        let plan = plan_at(raw.clone(), connected(CALL_TIMESTAMP + 220));
        assert_eq!(
            plan,
            vec![EligibleAction {
                action: RecoveryAction::Execute { via_relay: false },
                enabled: true,
            }]
        );

        let mut errored = raw.clone();
        errored["error"] = json!({"message": "reverted"});
        assert_eq!(
            actions(&plan_at(errored, connected(CALL_TIMESTAMP + 101))),
            vec![RecoveryAction::Execute { via_relay: false }]
        );

        let no_signer = plan_at(raw.clone(), WalletContext::read_only(CALL_TIMESTAMP + 220));
        assert!(!no_signer[0].enabled);

        let mut no_payload = raw;
        no_payload["call"]["returnValues"]["payload"] = json!("");
        assert!(plan_at(no_payload, connected(CALL_TIMESTAMP + 220)).is_empty());
    }

    #[test]
    fn execute_on_cosmos_relays_without_signer() {
        let raw = json!({
            "call": cosmos_bound_call("0x1"),
            "gas_paid": {},
            "gas": {"gas_remain_amount": 0.1},
            "confirm": {"poll_id": 1, "block_timestamp": CALL_TIMESTAMP + 100}
        });

        let early = actions(&plan_at(raw.clone(), connected(CALL_TIMESTAMP + 399)));
        assert!(!early.contains(&RecoveryAction::Execute { via_relay: true }));

        let plan = plan_at(raw, WalletContext::read_only(CALL_TIMESTAMP + 400));
        assert!(plan.contains(&EligibleAction {
            action: RecoveryAction::Execute { via_relay: true },
            enabled: true,
        }));
    }

    #[test]
    fn stale_confirmation_does_not_unlock_cosmos_execute() {
        let raw = json!({
            "call": cosmos_bound_call("0x1"),
            "gas_paid": {},
            "confirm": {"poll_id": 1, "block_timestamp": CALL_TIMESTAMP},
            "confirm_failed_event": {"poll_id": 1}
        });

        let actions = actions(&plan_at(raw, connected(CALL_TIMESTAMP + 1_000)));
        assert!(actions
            .iter()
            .all(|action| !matches!(action, RecoveryAction::Execute { .. })));
    }
}
