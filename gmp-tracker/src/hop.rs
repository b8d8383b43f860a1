//! Event records of a single message leg and their aggregation into a multihop bundle.
//!
//! The search service returns loosely shaped JSON documents. [Hop::from_raw] is the only place
//! where that shape is interpreted: every record is decoded on its own, so one malformed record
//! never hides the rest of the lifecycle.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serde_with::{serde_as, DefaultOnError, DisplayFromStr, PickFirst};
use tracing::warn;

use crate::chain::ChainRegistry;
use crate::contracts::CustomValues;
use crate::types::{truthy, ChainType, LooseString, Timestamp, TxHash};

#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Call {
    #[serde(rename = "transactionHash")]
    #[serde_as(as = "DefaultOnError")]
    pub transaction_hash: Option<TxHash>,
    #[serde(rename = "logIndex")]
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    pub log_index: Option<u64>,
    #[serde(rename = "_logIndex")]
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    pub event_log_index: Option<u64>,
    #[serde(rename = "messageIdIndex")]
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    pub message_id_index: Option<u64>,
    #[serde_as(as = "DefaultOnError")]
    pub chain: Option<String>,
    #[serde_as(as = "DefaultOnError")]
    pub chain_type: Option<ChainType>,
    #[serde_as(as = "DefaultOnError")]
    pub destination_chain_type: Option<ChainType>,
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    pub block_timestamp: Option<Timestamp>,
    #[serde_as(as = "DefaultOnError")]
    pub proposal_id: Option<LooseString>,
    #[serde_as(as = "DefaultOnError")]
    pub event: Option<String>,
    #[serde(rename = "returnValues")]
    pub return_values: CallValues,
    #[serde_as(as = "DefaultOnError")]
    pub transaction: Option<TransactionInfo>,
}

impl Call {
    pub fn destination_chain(&self) -> Option<&str> {
        self.return_values.destination_chain.as_deref()
    }

    pub fn has_payload(&self) -> bool {
        self.return_values
            .payload
            .as_deref()
            .is_some_and(|payload| !payload.is_empty())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CallValues {
    pub sender: Option<String>,
    pub destination_chain: Option<String>,
    pub destination_contract_address: Option<String>,
    pub payload: Option<String>,
    pub payload_hash: Option<String>,
    pub amount: Option<LooseString>,
    pub symbol: Option<String>,
    pub message_id: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionInfo {
    pub from: Option<String>,
}

#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Receipt {
    #[serde(rename = "transactionHash", alias = "hash")]
    pub transaction_hash: Option<TxHash>,
    pub status: Option<Value>,
    #[serde(rename = "gasUsed")]
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub gas_used: Option<u64>,
}

impl Receipt {
    pub fn succeeded(&self) -> bool {
        self.status.as_ref().is_some_and(truthy)
    }
}

#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasPaid {
    #[serde(rename = "transactionHash")]
    pub transaction_hash: Option<TxHash>,
    pub chain: Option<String>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub block_timestamp: Option<Timestamp>,
    #[serde(rename = "returnValues")]
    pub return_values: GasPaidValues,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GasPaidValues {
    pub gas_fee_amount: Option<LooseString>,
    pub refund_address: Option<String>,
}

#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpressExecuted {
    #[serde(rename = "transactionHash")]
    pub transaction_hash: Option<TxHash>,
    pub chain: Option<String>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub block_timestamp: Option<Timestamp>,
    pub receipt: Option<Receipt>,
}

/// Coordination layer poll outcome, used for both the successful and the failed confirmation.
#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Confirm {
    pub poll_id: Option<LooseString>,
    pub confirmation_txhash: Option<TxHash>,
    #[serde(rename = "transactionHash")]
    pub transaction_hash: Option<TxHash>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub block_timestamp: Option<Timestamp>,
}

#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Approved {
    #[serde(rename = "transactionHash")]
    pub transaction_hash: Option<TxHash>,
    pub chain: Option<String>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub block_timestamp: Option<Timestamp>,
    #[serde(rename = "returnValues")]
    pub return_values: ApprovedValues,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ApprovedValues {
    pub command_id: Option<String>,
    pub source_chain: Option<String>,
    pub source_address: Option<String>,
    pub contract_address: Option<String>,
    pub amount: Option<LooseString>,
    pub symbol: Option<String>,
}

#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Executed {
    #[serde(rename = "transactionHash")]
    pub transaction_hash: Option<TxHash>,
    /// Hash of the coordination layer transaction that relayed the message. Set without
    /// `transaction_hash` while an IBC-style delivery is still in transit.
    #[serde(rename = "axelarTransactionHash")]
    pub relay_transaction_hash: Option<TxHash>,
    pub chain: Option<String>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub block_timestamp: Option<Timestamp>,
    pub receipt: Option<Receipt>,
}

#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorEvent {
    pub code: Option<LooseString>,
    pub reason: Option<String>,
    pub message: Option<String>,
    #[serde(rename = "transactionHash")]
    pub transaction_hash: Option<TxHash>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub block_timestamp: Option<Timestamp>,
}

#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Refunded {
    #[serde(rename = "transactionHash")]
    pub transaction_hash: Option<TxHash>,
    pub receipt: Option<Receipt>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub amount: Option<f64>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub block_timestamp: Option<Timestamp>,
}

#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GasInfo {
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub gas_paid_amount: Option<f64>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub gas_remain_amount: Option<f64>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub gas_used_amount: Option<f64>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub gas_approve_amount: Option<f64>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub gas_execute_amount: Option<f64>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub gas_express_amount: Option<f64>,
}

/// Supplementary gas-added or refund transaction.
#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TxRef {
    #[serde(rename = "transactionHash")]
    pub transaction_hash: Option<TxHash>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub block_timestamp: Option<Timestamp>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub amount: Option<f64>,
}

/// Pointer to the call emitted on another chain by this message's execution.
#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CallbackRef {
    #[serde(rename = "transactionHash")]
    pub transaction_hash: Option<TxHash>,
    #[serde(rename = "transactionIndex")]
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub transaction_index: Option<u64>,
    #[serde(rename = "logIndex")]
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub log_index: Option<u64>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TokenEvent {
    pub symbol: Option<String>,
    pub token_symbol: Option<String>,
    pub destination_address: Option<String>,
}

/// Interchain token service records that ride along with the message.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ItsEvents {
    pub token_sent: Option<TokenEvent>,
    pub interchain_transfer: Option<TokenEvent>,
    pub interchain_transfer_with_data: Option<TokenEvent>,
    pub token_deployed: Option<TokenEvent>,
    pub token_deployment_initialized: Option<TokenEvent>,
    pub token_manager_deployment_started: Option<TokenEvent>,
    pub interchain_token_deployment_started: Option<TokenEvent>,
}

/// Verdicts computed upstream by the search service. They are inputs here, never derived.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct HopFlags {
    pub is_insufficient_fee: bool,
    pub is_invalid_destination_chain: bool,
    pub is_invalid_source_address: bool,
    pub is_invalid_contract_address: bool,
    pub is_invalid_call: bool,
    pub is_invalid_gas_paid: bool,
    pub not_enough_gas_to_execute: bool,
    pub is_call_from_relayer: bool,
    pub not_to_refund: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Hop {
    pub call: Option<Call>,
    pub gas_paid: Option<GasPaid>,
    pub gas_paid_to_callback: Option<GasPaid>,
    pub express_executed: Option<ExpressExecuted>,
    pub confirm: Option<Confirm>,
    pub confirm_failed: bool,
    pub confirm_failed_event: Option<Confirm>,
    pub approved: Option<Approved>,
    pub executed: Option<Executed>,
    pub is_executed: bool,
    pub error: Option<ErrorEvent>,
    pub refunded: Option<Refunded>,
    pub gas: Option<GasInfo>,
    pub gas_added_transactions: Vec<TxRef>,
    pub refunded_more_transactions: Vec<TxRef>,
    pub callback: Option<CallbackRef>,
    pub command_id: Option<String>,
    pub status: Option<String>,
    pub simplified_status: Option<String>,
    #[serde(flatten)]
    pub flags: HopFlags,
    #[serde(flatten)]
    pub its: ItsEvents,
    pub custom_values: Option<CustomValues>,
}

impl Hop {
    /// Decodes a raw search document. Returns `None` only when the document is not an object.
    pub fn from_raw(raw: Value) -> Option<Self> {
        let Value::Object(mut fields) = raw else {
            return None;
        };

        let flags = HopFlags {
            is_insufficient_fee: flag(&fields, "is_insufficient_fee"),
            is_invalid_destination_chain: flag(&fields, "is_invalid_destination_chain"),
            is_invalid_source_address: flag(&fields, "is_invalid_source_address"),
            is_invalid_contract_address: flag(&fields, "is_invalid_contract_address"),
            is_invalid_call: flag(&fields, "is_invalid_call"),
            is_invalid_gas_paid: flag(&fields, "is_invalid_gas_paid"),
            not_enough_gas_to_execute: flag(&fields, "not_enough_gas_to_execute"),
            is_call_from_relayer: flag(&fields, "is_call_from_relayer"),
            not_to_refund: flag(&fields, "not_to_refund"),
        };

        Some(Self {
            call: record(&mut fields, "call"),
            gas_paid: record(&mut fields, "gas_paid"),
            gas_paid_to_callback: record(&mut fields, "gas_paid_to_callback"),
            express_executed: record(&mut fields, "express_executed"),
            confirm: record(&mut fields, "confirm"),
            confirm_failed: flag(&fields, "confirm_failed"),
            confirm_failed_event: record(&mut fields, "confirm_failed_event"),
            approved: record(&mut fields, "approved"),
            executed: record(&mut fields, "executed"),
            is_executed: flag(&fields, "is_executed"),
            error: record(&mut fields, "error"),
            refunded: record(&mut fields, "refunded"),
            gas: record(&mut fields, "gas"),
            gas_added_transactions: record(&mut fields, "gas_added_transactions")
                .unwrap_or_default(),
            refunded_more_transactions: record(&mut fields, "refunded_more_transactions")
                .unwrap_or_default(),
            callback: record(&mut fields, "callback"),
            command_id: record(&mut fields, "command_id"),
            status: record(&mut fields, "status"),
            simplified_status: record(&mut fields, "simplified_status"),
            flags,
            its: ItsEvents {
                token_sent: record(&mut fields, "token_sent"),
                interchain_transfer: record(&mut fields, "interchain_transfer"),
                interchain_transfer_with_data: record(
                    &mut fields,
                    "interchain_transfer_with_data",
                ),
                token_deployed: record(&mut fields, "token_deployed"),
                token_deployment_initialized: record(&mut fields, "token_deployment_initialized"),
                token_manager_deployment_started: record(
                    &mut fields,
                    "token_manager_deployment_started",
                ),
                interchain_token_deployment_started: record(
                    &mut fields,
                    "interchain_token_deployment_started",
                ),
            },
            custom_values: None,
        })
    }

    pub fn call_hash(&self) -> Option<&TxHash> {
        self.call.as_ref()?.transaction_hash.as_ref()
    }

    pub fn call_timestamp(&self) -> Option<Timestamp> {
        self.call.as_ref()?.block_timestamp
    }

    pub fn is_gas_paid(&self) -> bool {
        self.gas_paid.is_some() || self.gas_paid_to_callback.is_some()
    }

    pub fn is_proposal(&self) -> bool {
        self.call
            .as_ref()
            .is_some_and(|call| call.proposal_id.is_some())
    }

    pub fn remaining_gas(&self) -> Option<f64> {
        self.gas.as_ref()?.gas_remain_amount
    }

    pub fn message_id(&self) -> Option<String> {
        let call = self.call.as_ref()?;

        call.return_values.message_id.clone().or_else(|| {
            call.transaction_hash
                .as_ref()
                .zip(call.event_log_index)
                .map(|(hash, index)| format!("{hash}-{index}"))
        })
    }

    pub fn command_id(&self) -> Option<&str> {
        self.approved
            .as_ref()
            .and_then(|approved| approved.return_values.command_id.as_deref())
            .or(self.command_id.as_deref())
    }

    pub fn source_chain(&self) -> Option<&str> {
        self.approved
            .as_ref()
            .and_then(|approved| approved.return_values.source_chain.as_deref())
            .or_else(|| self.call.as_ref()?.chain.as_deref())
    }

    pub fn destination_chain(&self) -> Option<&str> {
        self.call
            .as_ref()
            .and_then(Call::destination_chain)
            .or_else(|| self.approved.as_ref()?.chain.as_deref())
    }

    pub fn contract_address(&self) -> Option<&str> {
        self.approved
            .as_ref()
            .and_then(|approved| approved.return_values.contract_address.as_deref())
            .or_else(|| {
                self.call
                    .as_ref()?
                    .return_values
                    .destination_contract_address
                    .as_deref()
            })
    }

    pub fn amount(&self) -> Option<&LooseString> {
        self.approved
            .as_ref()
            .and_then(|approved| approved.return_values.amount.as_ref())
            .or_else(|| self.call.as_ref()?.return_values.amount.as_ref())
    }

    /// Resolves the token symbol: call, token_sent, interchain_transfer,
    /// interchain_transfer_with_data, token_deployed, token_deployment_initialized (token
    /// symbol), token_manager_deployment_started, interchain_token_deployment_started (token
    /// symbol).
    pub fn symbol(&self) -> Option<&str> {
        let its = &self.its;

        self.call
            .as_ref()
            .and_then(|call| call.return_values.symbol.as_deref())
            .or_else(|| its.token_sent.as_ref()?.symbol.as_deref())
            .or_else(|| its.interchain_transfer.as_ref()?.symbol.as_deref())
            .or_else(|| its.interchain_transfer_with_data.as_ref()?.symbol.as_deref())
            .or_else(|| its.token_deployed.as_ref()?.symbol.as_deref())
            .or_else(|| {
                its.token_deployment_initialized
                    .as_ref()?
                    .token_symbol
                    .as_deref()
            })
            .or_else(|| {
                its.token_manager_deployment_started
                    .as_ref()?
                    .symbol
                    .as_deref()
            })
            .or_else(|| {
                its.interchain_token_deployment_started
                    .as_ref()?
                    .token_symbol
                    .as_deref()
            })
    }

    /// Name of the method that started this message.
    pub fn method(&self) -> Option<String> {
        let its = &self.its;

        if its.token_sent.is_some()
            || its.interchain_transfer.is_some()
            || its.interchain_transfer_with_data.is_some()
        {
            return Some("InterchainTransfer".to_string());
        }
        if its.token_deployment_initialized.is_some() {
            return Some("TokenDeploymentInitialized".to_string());
        }
        if its.token_deployed.is_some() {
            return Some("TokenDeployed".to_string());
        }
        if its.token_manager_deployment_started.is_some() {
            return Some("TokenManagerDeployment".to_string());
        }
        if its.interchain_token_deployment_started.is_some() {
            return Some("InterchainTokenDeployment".to_string());
        }

        self.call
            .as_ref()?
            .event
            .as_ref()
            .map(|event| event.replace("ContractCall", "callContract"))
    }

    /// Chain type of the source chain, preferring the registry over the call's own annotation.
    pub fn source_chain_type(&self, chains: &dyn ChainRegistry) -> Option<ChainType> {
        let call = self.call.as_ref()?;

        call.chain
            .as_deref()
            .and_then(|chain| chains.chain(chain))
            .map(|chain| chain.chain_type)
            .or(call.chain_type)
    }

    /// Chain type of the destination chain, preferring the registry over the call's own
    /// annotation.
    pub fn destination_chain_type(&self, chains: &dyn ChainRegistry) -> Option<ChainType> {
        self.destination_chain()
            .and_then(|chain| chains.chain(chain))
            .map(|chain| chain.chain_type)
            .or_else(|| self.call.as_ref()?.destination_chain_type)
    }

    /// The search service stops changing a message once it has been delivered or has failed and
    /// its refund is settled.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.simplified_status.as_deref(),
            Some("received") | Some("failed")
        ) && (self.executed.is_some() || self.error.is_some())
            && (self.refunded.is_some() || self.flags.not_to_refund)
    }
}

fn record<T: DeserializeOwned>(fields: &mut Map<String, Value>, name: &'static str) -> Option<T> {
    let value = fields.remove(name).filter(|value| !value.is_null())?;

    serde_json::from_value(value)
        .inspect_err(|err| warn!(record = name, err = %err, "dropping malformed record"))
        .ok()
}

fn flag(fields: &Map<String, Value>, name: &str) -> bool {
    fields.get(name).is_some_and(truthy)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum HopRole {
    Origin,
    Primary,
    Callback,
}

/// Up to three messages linked by forward transaction hash correlation: the origin whose
/// execution emitted the primary call, the primary message itself, and the callback its
/// execution emitted in turn.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MultihopBundle {
    #[serde(rename = "originData", skip_serializing_if = "Option::is_none")]
    pub origin: Option<Hop>,
    pub data: Hop,
    #[serde(rename = "callbackData", skip_serializing_if = "Option::is_none")]
    pub callback: Option<Hop>,
}

impl MultihopBundle {
    pub fn single(data: Hop) -> Self {
        Self {
            origin: None,
            data,
            callback: None,
        }
    }

    pub fn is_multihop(&self) -> bool {
        self.origin.is_some() || self.callback.is_some()
    }

    /// Hops in lifecycle order.
    pub fn hops(&self) -> impl Iterator<Item = (HopRole, &Hop)> {
        self.origin
            .iter()
            .map(|hop| (HopRole::Origin, hop))
            .chain(std::iter::once((HopRole::Primary, &self.data)))
            .chain(self.callback.iter().map(|hop| (HopRole::Callback, hop)))
    }

    pub fn is_terminal(&self) -> bool {
        self.data.is_terminal()
    }
}
