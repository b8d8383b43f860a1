use crate::chain::{ChainMetadata, ChainRegistry};
use crate::finality::Thresholds;
use crate::hop::Hop;
use crate::lifecycle::{exceeds, HopStatus, Step, StepId, StepRecord, StepStatus, StepTitle};
use crate::search::DurationEstimate;
use crate::types::{elapsed, truthy, ChainType, Timestamp};

/// Everything a projection depends on besides the hop itself. Two projections with equal
/// contexts over the same hop are identical.
#[derive(Clone, Copy)]
pub struct ProjectionContext<'a> {
    pub now: Timestamp,
    pub chains: &'a dyn ChainRegistry,
    pub coordination_chain: &'a str,
    pub thresholds: &'a Thresholds,
    pub estimate: Option<&'a DurationEstimate>,
}

/// Projects a hop into its ordered lifecycle steps: send, pay_gas, express, confirm, approve,
/// execute, refund. Steps that do not apply to the hop are left out.
pub fn project(hop: &Hop, ctx: &ProjectionContext) -> Vec<Step> {
    let status = HopStatus::derive(hop, ctx.chains, ctx.thresholds, ctx.now);
    let chains = Chains::resolve(hop, ctx);

    let mut steps: Vec<Step> = [
        Some(send(hop, &chains)),
        pay_gas(hop, &chains, ctx),
        express(hop, &chains),
        confirm(hop, &status, &chains, ctx),
        approve(hop, &status, &chains),
        Some(execute(hop, &status, &chains, ctx)),
        refund(hop, &chains),
    ]
    .into_iter()
    .flatten()
    .collect();

    settle(&mut steps, hop);
    steps
}

struct Chains {
    source: Option<ChainMetadata>,
    destination: Option<ChainMetadata>,
    coordination: Option<ChainMetadata>,
}

impl Chains {
    fn resolve(hop: &Hop, ctx: &ProjectionContext) -> Self {
        let lookup = |chain: Option<&str>| chain.and_then(|chain| ctx.chains.chain(chain));

        Self {
            source: lookup(hop.call.as_ref().and_then(|call| call.chain.as_deref())),
            destination: lookup(hop.destination_chain()),
            coordination: ctx.chains.chain(ctx.coordination_chain),
        }
    }
}

fn send(hop: &Hop, chains: &Chains) -> Step {
    let (title, status) = match hop.call {
        Some(_) => (StepTitle::Sent, StepStatus::Success),
        None => (StepTitle::Send, StepStatus::Pending),
    };

    Step {
        id: StepId::Send,
        title,
        status,
        data: hop.call.clone().map(StepRecord::Call),
        chain: chains.source.clone(),
    }
}

fn pay_gas(hop: &Hop, chains: &Chains, ctx: &ProjectionContext) -> Option<Step> {
    if hop.is_proposal() && !hop.is_gas_paid() {
        return None;
    }

    let paid = hop.gas_paid.as_ref().or(hop.gas_paid_to_callback.as_ref());
    let indexing = elapsed(hop.call_timestamp(), ctx.now)
        .is_some_and(|since| since < ctx.thresholds.checking_gas_paid.as_secs());

    let (title, status) = match paid {
        Some(_) => (StepTitle::GasPaid, StepStatus::Success),
        None if indexing => (StepTitle::CheckingGasPaid, StepStatus::Pending),
        None => (StepTitle::PayGas, StepStatus::Pending),
    };

    let chain = if hop.gas_paid_to_callback.is_some() {
        chains.destination.clone()
    } else {
        chains.source.clone()
    };

    Some(Step {
        id: StepId::PayGas,
        title,
        status,
        data: paid.cloned().map(StepRecord::GasPaid),
        chain,
    })
}

fn express(hop: &Hop, chains: &Chains) -> Option<Step> {
    let express = hop.express_executed.as_ref()?;

    Some(Step {
        id: StepId::Express,
        title: StepTitle::ExpressExecuted,
        status: StepStatus::Success,
        data: Some(StepRecord::ExpressExecuted(express.clone())),
        chain: chains.destination.clone(),
    })
}

fn confirm(
    hop: &Hop,
    status: &HopStatus,
    chains: &Chains,
    ctx: &ProjectionContext,
) -> Option<Step> {
    let moved_past = hop.approved.is_some()
        && (hop.executed.is_some() || hop.is_executed || hop.error.is_some());
    if hop.confirm.is_none() && moved_past {
        return None;
    }

    let data = hop.confirm.as_ref().or(hop.confirm_failed_event.as_ref());

    let (title, step_status) = if status.confirm_settled {
        (StepTitle::Confirmed, StepStatus::Success)
    } else if hop.flags.is_invalid_call {
        (StepTitle::InvalidCall, StepStatus::Failed)
    } else if hop.confirm_failed {
        (StepTitle::FailedToConfirm, StepStatus::Failed)
    } else if hop.is_gas_paid() || hop.express_executed.is_some() {
        let has_poll = data.is_some_and(|confirm| {
            confirm.poll_id.is_some() || confirm.confirmation_txhash.is_some()
        });
        let finality_passed = elapsed(hop.call_timestamp(), ctx.now)
            .is_some_and(|since| since as f64 >= ctx.thresholds.finality_time(ctx.estimate));

        if !has_poll && finality_passed {
            (StepTitle::Confirm, StepStatus::Pending)
        } else {
            (StepTitle::WaitingForFinality, StepStatus::Pending)
        }
    } else {
        (StepTitle::Confirm, StepStatus::Pending)
    };

    Some(Step {
        id: StepId::Confirm,
        title,
        status: step_status,
        data: data.cloned().map(StepRecord::Confirm),
        chain: chains.coordination.clone(),
    })
}

fn approve(hop: &Hop, status: &HopStatus, chains: &Chains) -> Option<Step> {
    if status.destination_chain_type != Some(ChainType::Evm) {
        return None;
    }

    let (title, step_status) = match &hop.approved {
        Some(_) => (StepTitle::Approved, StepStatus::Success),
        None if status.confirm_succeeded => (StepTitle::Approving, StepStatus::Pending),
        None => (StepTitle::Approve, StepStatus::Pending),
    };

    Some(Step {
        id: StepId::Approve,
        title,
        status: step_status,
        data: hop.approved.clone().map(StepRecord::Approved),
        chain: chains.destination.clone(),
    })
}

fn execute(hop: &Hop, status: &HopStatus, chains: &Chains, ctx: &ProjectionContext) -> Step {
    let since_relay = elapsed(
        hop.confirm
            .as_ref()
            .and_then(|confirm| confirm.block_timestamp)
            .or(hop.call_timestamp()),
        ctx.now,
    );

    let (title, step_status) = if status.execute_succeeded {
        (StepTitle::Executed, StepStatus::Success)
    } else if status.errored {
        (StepTitle::Error, StepStatus::Failed)
    } else if status.relayed_undelivered && exceeds(since_relay, ctx.thresholds.ibc_wait.as_secs()) {
        (StepTitle::WaitingForIbc, StepStatus::Pending)
    } else {
        (StepTitle::Execute, StepStatus::Pending)
    };

    let data = match (&hop.executed, &hop.error) {
        (Some(executed), _) => Some(StepRecord::Executed(executed.clone())),
        (None, Some(error)) if !hop.is_executed => Some(StepRecord::Error(error.clone())),
        _ => None,
    };

    let chain = if status.relayed_undelivered {
        chains.coordination.clone()
    } else {
        chains.destination.clone()
    };

    Step {
        id: StepId::Execute,
        title,
        status: step_status,
        data,
        chain,
    }
}

fn refund(hop: &Hop, chains: &Chains) -> Option<Step> {
    let refunded = hop.refunded.as_ref()?;
    let receipt_status = refunded.receipt.as_ref()?.status.as_ref()?;
    if !truthy(receipt_status) {
        return None;
    }

    Some(Step {
        id: StepId::Refund,
        title: StepTitle::ExcessGasRefunded,
        status: StepStatus::Success,
        data: Some(StepRecord::Refunded(refunded.clone())),
        chain: chains.source.clone(),
    })
}

/// A later success proves every earlier step has happened, even when its record has not been
/// indexed yet. Such steps are settled so no pending step precedes a successful one.
fn settle(steps: &mut [Step], hop: &Hop) {
    let Some(last_success) = steps
        .iter()
        .rposition(|step| step.status == StepStatus::Success)
    else {
        return;
    };

    for step in steps.iter_mut().take(last_success) {
        if step.status != StepStatus::Pending {
            continue;
        }

        (step.title, step.status) = match step.id {
            StepId::Send => (StepTitle::Sent, StepStatus::Success),
            StepId::PayGas => (StepTitle::GasPaid, StepStatus::Success),
            StepId::Express => (StepTitle::ExpressExecuted, StepStatus::Success),
            StepId::Confirm => (StepTitle::Confirmed, StepStatus::Success),
            StepId::Approve => (StepTitle::Approved, StepStatus::Success),
            StepId::Execute if hop.error.is_some() => (StepTitle::Error, StepStatus::Failed),
            StepId::Execute => (StepTitle::Executed, StepStatus::Success),
            StepId::Refund => (StepTitle::ExcessGasRefunded, StepStatus::Success),
        };
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;
    use serde_json::{json, Value};

    use super::*;
    use crate::test_utils::{chains, hop, CALL_TIMESTAMP};

    fn steps_at(raw: Value, now: Timestamp) -> Vec<Step> {
        steps_with_estimate(raw, now, None)
    }

    fn steps_with_estimate(
        raw: Value,
        now: Timestamp,
        estimate: Option<&DurationEstimate>,
    ) -> Vec<Step> {
        let chains = chains();
        let thresholds = Thresholds::default();
        let ctx = ProjectionContext {
            now,
            chains: &chains,
            coordination_chain: "axelarnet",
            thresholds: &thresholds,
            estimate,
        };

        project(&hop(raw), &ctx)
    }

    fn summary(steps: &[Step]) -> Vec<(StepId, StepStatus, StepTitle)> {
        steps
            .iter()
            .map(|step| (step.id, step.status, step.title))
            .collect()
    }

    fn find(steps: &[Step], id: StepId) -> &Step {
        steps.iter().find(|step| step.id == id).unwrap()
    }

    fn call() -> Value {
        json!({
            "transactionHash": "0xCALL",
            "chain": "ethereum",
            "block_timestamp": CALL_TIMESTAMP,
            "returnValues": {
                "destinationChain": "avalanche",
                "destinationContractAddress": "0xdest",
                "payload": "0x1234"
            }
        })
    }

    fn assert_well_formed(steps: &[Step]) {
        let ids = steps.iter().map(|step| step.id).collect::<Vec<_>>();
        assert_eq!(ids.iter().filter(|id| **id == StepId::Send).count(), 1);
        assert!(ids.iter().tuple_windows().all(|(a, b)| a < b), "{ids:?}");

        let last_success = steps
            .iter()
            .rposition(|step| step.status == StepStatus::Success);
        if let Some(last_success) = last_success {
            assert!(steps[..last_success]
                .iter()
                .all(|step| step.status != StepStatus::Pending));
        }
    }

    #[test]
    fn call_only_hop() {
        let steps = steps_at(json!({ "call": call() }), CALL_TIMESTAMP + 10);

        assert_eq!(
            summary(&steps),
            vec![
                (StepId::Send, StepStatus::Success, StepTitle::Sent),
                (StepId::PayGas, StepStatus::Pending, StepTitle::CheckingGasPaid),
                (StepId::Confirm, StepStatus::Pending, StepTitle::Confirm),
                (StepId::Approve, StepStatus::Pending, StepTitle::Approve),
                (StepId::Execute, StepStatus::Pending, StepTitle::Execute),
            ]
        );
        assert_well_formed(&steps);
    }

    #[test]
    fn empty_hop_only_waits_to_be_sent() {
        let steps = steps_at(json!({}), CALL_TIMESTAMP);

        assert_eq!(
            summary(&steps),
            vec![
                (StepId::Send, StepStatus::Pending, StepTitle::Send),
                (StepId::PayGas, StepStatus::Pending, StepTitle::PayGas),
                (StepId::Confirm, StepStatus::Pending, StepTitle::Confirm),
                (StepId::Execute, StepStatus::Pending, StepTitle::Execute),
            ]
        );
    }

    #[test]
    fn unpaid_gas_after_checking_window_asks_to_pay() {
        let steps = steps_at(json!({ "call": call() }), CALL_TIMESTAMP + 45);

        let pay_gas = find(&steps, StepId::PayGas);
        assert_eq!(pay_gas.title, StepTitle::PayGas);
        assert_eq!(pay_gas.status, StepStatus::Pending);
    }

    #[test]
    fn governance_proposal_without_gas_skips_pay_gas() {
        let mut call = call();
        call["proposal_id"] = json!(42);

        let steps = steps_at(json!({ "call": call }), CALL_TIMESTAMP + 45);

        assert!(steps.iter().all(|step| step.id != StepId::PayGas));
    }

    #[test]
    fn fully_executed_hop_succeeds_everywhere() {
        let steps = steps_at(
            json!({
                "call": call(),
                "gas_paid": {"transactionHash": "0xgas"},
                "confirm": {"poll_id": 3, "block_timestamp": CALL_TIMESTAMP + 100},
                "approved": {"transactionHash": "0xapprove", "block_timestamp": CALL_TIMESTAMP + 200},
                "executed": {"transactionHash": "0xexec", "block_timestamp": CALL_TIMESTAMP + 300},
                "refunded": {"transactionHash": "0xrefund", "receipt": {"status": 1}}
            }),
            CALL_TIMESTAMP + 1_000,
        );

        assert_eq!(
            summary(&steps),
            vec![
                (StepId::Send, StepStatus::Success, StepTitle::Sent),
                (StepId::PayGas, StepStatus::Success, StepTitle::GasPaid),
                (StepId::Confirm, StepStatus::Success, StepTitle::Confirmed),
                (StepId::Approve, StepStatus::Success, StepTitle::Approved),
                (StepId::Execute, StepStatus::Success, StepTitle::Executed),
                (StepId::Refund, StepStatus::Success, StepTitle::ExcessGasRefunded),
            ]
        );
        assert_eq!(
            find(&steps, StepId::Execute).link().as_deref(),
            Some("https://snowtrace.io/tx/0xexec")
        );
    }

    #[test]
    fn execution_error_fails_only_after_grace_period() {
        let raw = json!({
            "call": call(),
            "gas_paid": {},
            "approved": {"block_timestamp": CALL_TIMESTAMP},
            "error": {"block_timestamp": CALL_TIMESTAMP, "message": "reverted"}
        });

        let settling = steps_at(raw.clone(), CALL_TIMESTAMP + 60);
        let execute = find(&settling, StepId::Execute);
        assert_eq!(execute.status, StepStatus::Pending);
        assert_eq!(execute.title, StepTitle::Execute);

        let failed = steps_at(raw, CALL_TIMESTAMP + 121);
        let execute = find(&failed, StepId::Execute);
        assert_eq!(execute.status, StepStatus::Failed);
        assert_eq!(execute.title, StepTitle::Error);
        assert!(matches!(execute.data, Some(StepRecord::Error(_))));
    }

    #[test]
    fn confirm_is_dropped_once_flow_moved_past_it() {
        let steps = steps_at(
            json!({
                "call": call(),
                "gas_paid": {},
                "approved": {},
                "executed": {"transactionHash": "0xexec"}
            }),
            CALL_TIMESTAMP + 1_000,
        );

        assert!(steps.iter().all(|step| step.id != StepId::Confirm));
        assert_well_formed(&steps);
    }

    #[test]
    fn failed_confirmation_is_reported() {
        let invalid = steps_at(
            json!({ "call": call(), "is_invalid_call": true }),
            CALL_TIMESTAMP + 100,
        );
        let failed = steps_at(
            json!({ "call": call(), "confirm_failed": true, "confirm_failed_event": {"poll_id": 1} }),
            CALL_TIMESTAMP + 100,
        );

        assert_eq!(
            (find(&invalid, StepId::Confirm).status, find(&invalid, StepId::Confirm).title),
            (StepStatus::Failed, StepTitle::InvalidCall)
        );
        assert_eq!(
            (find(&failed, StepId::Confirm).status, find(&failed, StepId::Confirm).title),
            (StepStatus::Failed, StepTitle::FailedToConfirm)
        );
    }

    #[test]
    fn waiting_for_finality_flips_to_confirm_after_estimate() {
        let raw = json!({ "call": call(), "gas_paid": {} });
        let estimate = DurationEstimate {
            key: Some("ethereum".to_string()),
            confirm: Some(100.0),
            ..DurationEstimate::default()
        };

        let waiting = steps_with_estimate(raw.clone(), CALL_TIMESTAMP + 114, Some(&estimate));
        assert_eq!(find(&waiting, StepId::Confirm).title, StepTitle::WaitingForFinality);

        let flipped = steps_with_estimate(raw.clone(), CALL_TIMESTAMP + 115, Some(&estimate));
        let confirm = find(&flipped, StepId::Confirm);
        assert_eq!(confirm.title, StepTitle::Confirm);
        assert_eq!(confirm.status, StepStatus::Pending);

        let default_finality = steps_at(raw, CALL_TIMESTAMP + 599);
        assert_eq!(
            find(&default_finality, StepId::Confirm).title,
            StepTitle::WaitingForFinality
        );
    }

    #[test]
    fn finality_flip_is_suppressed_while_a_poll_exists() {
        let steps = steps_at(
            json!({
                "call": call(),
                "gas_paid": {},
                "confirm_failed_event": {"poll_id": 5}
            }),
            CALL_TIMESTAMP + 10_000,
        );

        assert_eq!(find(&steps, StepId::Confirm).title, StepTitle::WaitingForFinality);
    }

    #[test]
    fn confirmed_without_approval_is_approving() {
        let steps = steps_at(
            json!({
                "call": call(),
                "gas_paid": {},
                "confirm": {"poll_id": 9}
            }),
            CALL_TIMESTAMP + 1_000,
        );

        assert_eq!(
            find(&steps, StepId::Approve).title,
            StepTitle::Approving
        );
        assert_eq!(
            find(&steps, StepId::Confirm).chain.as_ref().map(|chain| chain.id.as_str()),
            Some("axelarnet")
        );
    }

    #[test]
    fn relayed_message_waits_for_ibc_on_coordination_chain() {
        let mut call = call();
        call["returnValues"]["destinationChain"] = json!("osmosis");

        let steps = steps_at(
            json!({
                "call": call,
                "gas_paid": {},
                "confirm": {"poll_id": 1, "block_timestamp": CALL_TIMESTAMP + 100},
                "executed": {"axelarTransactionHash": "0xrelay"},
                "error": {}
            }),
            CALL_TIMESTAMP + 161,
        );

        let execute = find(&steps, StepId::Execute);
        assert_eq!(execute.title, StepTitle::WaitingForIbc);
        assert_eq!(execute.status, StepStatus::Pending);
        assert_eq!(
            execute.chain.as_ref().map(|chain| chain.id.as_str()),
            Some("axelarnet")
        );
        assert!(steps.iter().all(|step| step.id != StepId::Approve));
    }

    #[test]
    fn express_execution_settles_unindexed_gas_payment() {
        let steps = steps_at(
            json!({
                "call": call(),
                "express_executed": {"transactionHash": "0xexpress"}
            }),
            CALL_TIMESTAMP + 20,
        );

        assert_eq!(
            summary(&steps)[..3],
            [
                (StepId::Send, StepStatus::Success, StepTitle::Sent),
                (StepId::PayGas, StepStatus::Success, StepTitle::GasPaid),
                (StepId::Express, StepStatus::Success, StepTitle::ExpressExecuted),
            ]
        );
        assert_eq!(find(&steps, StepId::Confirm).title, StepTitle::WaitingForFinality);
        assert_well_formed(&steps);
    }

    #[test]
    fn refund_requires_successful_receipt() {
        let base = json!({ "call": call(), "gas_paid": {}, "executed": {"transactionHash": "0x1"} });

        let mut failed_refund = base.clone();
        failed_refund["refunded"] = json!({"receipt": {"status": 0}});
        assert!(steps_at(failed_refund, CALL_TIMESTAMP + 1_000)
            .iter()
            .all(|step| step.id != StepId::Refund));

        let mut refunded = base;
        refunded["refunded"] = json!({"receipt": {"status": true}});
        assert_eq!(
            steps_at(refunded, CALL_TIMESTAMP + 1_000).last().map(|step| step.id),
            Some(StepId::Refund)
        );
    }

    #[test]
    fn projection_is_idempotent_and_well_formed() {
        let records = [
            ("gas_paid", json!({})),
            ("express_executed", json!({})),
            ("confirm", json!({"poll_id": 2, "block_timestamp": CALL_TIMESTAMP + 50})),
            ("confirm_failed", json!(true)),
            ("confirm_failed_event", json!({"poll_id": 1})),
            ("approved", json!({"block_timestamp": CALL_TIMESTAMP + 80})),
            ("executed", json!({"axelarTransactionHash": "0xrelay"})),
            ("is_executed", json!(true)),
            ("error", json!({"block_timestamp": CALL_TIMESTAMP + 90})),
            ("refunded", json!({"receipt": {"status": 1}})),
            ("is_invalid_call", json!(true)),
        ];

        for mask in 0u32..(1 << records.len()) {
            let mut raw = json!({ "call": call() });
            for (i, (name, value)) in records.iter().enumerate() {
                if mask & (1 << i) != 0 {
                    raw[*name] = value.clone();
                }
            }

            for now in [CALL_TIMESTAMP + 10, CALL_TIMESTAMP + 200, CALL_TIMESTAMP + 5_000] {
                let first = steps_at(raw.clone(), now);
                let second = steps_at(raw.clone(), now);

                assert_eq!(first, second);
                assert_well_formed(&first);
            }
        }
    }
}
