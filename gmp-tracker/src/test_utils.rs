use serde_json::{json, Value};

use crate::chain::{ChainMetadata, Explorer, StaticChainRegistry};
use crate::hop::Hop;
use crate::types::ChainType;

pub const CALL_TIMESTAMP: u64 = 1_700_000_000;

pub fn hop(raw: Value) -> Hop {
    Hop::from_raw(raw).expect("fixture must be a json object")
}

fn chain(id: &str, name: &str, chain_type: ChainType, explorer: &str) -> ChainMetadata {
    ChainMetadata {
        id: id.to_string(),
        chain_name: name.to_string(),
        chain_type,
        explorer: Some(Explorer {
            url: explorer.parse().expect("fixture url must be valid"),
            transaction_path: "/tx/{tx}".to_string(),
            block_path: "/block/{block}".to_string(),
        }),
    }
}

/// Two evm chains, one cosmos chain and the coordination chain.
pub fn chains() -> StaticChainRegistry {
    StaticChainRegistry::new(vec![
        chain("ethereum", "Ethereum", ChainType::Evm, "https://etherscan.io"),
        chain("avalanche", "Avalanche", ChainType::Evm, "https://snowtrace.io"),
        chain("osmosis", "Osmosis", ChainType::Cosmos, "https://mintscan.io/osmosis"),
        chain("axelarnet", "Axelarnet", ChainType::Cosmos, "https://axelarscan.io"),
    ])
}

/// A call from ethereum to avalanche sent at [CALL_TIMESTAMP].
pub fn call_record(hash: &str) -> Value {
    json!({
        "transactionHash": hash,
        "_logIndex": 1,
        "logIndex": 1,
        "chain": "ethereum",
        "chain_type": "evm",
        "destination_chain_type": "evm",
        "block_timestamp": CALL_TIMESTAMP,
        "returnValues": {
            "destinationChain": "avalanche",
            "destinationContractAddress": "0xdest",
            "payload": "0x1234"
        }
    })
}
