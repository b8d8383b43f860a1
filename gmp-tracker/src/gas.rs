use std::sync::Arc;

use tracing::{debug, warn};
use valuable::Valuable;

use crate::hop::Hop;
use crate::report::LoggableError;
use crate::search::{SearchClient, SearchFilter};

pub const DEFAULT_GAS_LIMIT: u64 = 700_000;

/// Typical execution gas of a destination chain when no recent execution is known.
pub fn fallback_gas_limit(destination_chain: &str) -> u64 {
    match destination_chain.to_ascii_lowercase().as_str() {
        "binance" => 150_000,
        "ethereum" | "polygon" | "polygon-sepolia" | "fantom" | "optimism"
        | "optimism-sepolia" | "base" | "base-sepolia" | "celo" | "kava" | "linea"
        | "linea-sepolia" | "fraxtal" => 400_000,
        "avalanche" | "scroll" => 500_000,
        "arbitrum" | "arbitrum-sepolia" | "centrifuge" | "centrifuge-2" => 1_000_000,
        "filecoin" | "filecoin-2" => 200_000_000,
        "mantle" | "mantle-sepolia" => 3_000_000_000,
        _ => DEFAULT_GAS_LIMIT,
    }
}

/// Estimates the destination gas limit for topping up an underpaid message.
pub struct GasEstimator<S> {
    client: Arc<S>,
}

impl<S> GasEstimator<S>
where
    S: SearchClient,
{
    pub fn new(client: Arc<S>) -> Self {
        Self { client }
    }

    /// Returns `None` when the hop does not need more gas, otherwise the gas used by the latest
    /// execution on the same destination contract or the chain's fallback.
    pub async fn estimate(&self, hop: &Hop) -> Option<u64> {
        let call = hop.call.as_ref()?;
        let lacks_gas = hop.flags.is_insufficient_fee || hop.gas_paid.is_none();
        if !lacks_gas || hop.confirm.is_some() || hop.approved.is_some() {
            return None;
        }

        let destination_chain = call.return_values.destination_chain.clone()?;
        let contract = call.return_values.destination_contract_address.clone()?;

        let filter = SearchFilter {
            destination_chain: Some(destination_chain.clone()),
            destination_contract_address: Some(contract),
            status: Some("executed".to_string()),
            size: Some(1),
            ..SearchFilter::default()
        };

        let latest = self
            .client
            .search_messages(filter)
            .await
            .inspect_err(|report| {
                warn!(
                    err = LoggableError::from(report).as_value(),
                    chain = destination_chain,
                    "failed to fetch latest execution for gas estimate"
                )
            })
            .ok()
            .and_then(|response| response.hops().into_iter().next());

        let gas_used = latest.as_ref().and_then(|latest| match &latest.express_executed {
            Some(express) => express.receipt.as_ref()?.gas_used,
            None => latest.executed.as_ref()?.receipt.as_ref()?.gas_used,
        });
        debug!(chain = destination_chain, gas_used, "estimated destination gas");

        Some(
            gas_used
                .filter(|gas| *gas > 0)
                .unwrap_or_else(|| fallback_gas_limit(&destination_chain)),
        )
    }
}
