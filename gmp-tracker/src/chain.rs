use mockall::automock;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::types::{ChainType, TxHash};

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Explorer {
    pub url: Url,
    #[serde(default = "default_transaction_path")]
    pub transaction_path: String,
    #[serde(default = "default_block_path")]
    pub block_path: String,
}

fn default_transaction_path() -> String {
    "/tx/{tx}".to_string()
}

fn default_block_path() -> String {
    "/block/{block}".to_string()
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct ChainMetadata {
    pub id: String,
    pub chain_name: String,
    pub chain_type: ChainType,
    pub explorer: Option<Explorer>,
}

impl ChainMetadata {
    pub fn transaction_url(&self, hash: &TxHash) -> Option<String> {
        let explorer = self.explorer.as_ref()?;

        Some(format!(
            "{}{}",
            explorer.url.as_str().trim_end_matches('/'),
            explorer.transaction_path.replace("{tx}", hash.as_str())
        ))
    }

    fn matches(&self, chain: &str) -> bool {
        self.id.eq_ignore_ascii_case(chain) || self.chain_name.eq_ignore_ascii_case(chain)
    }
}

/// Read-only lookup of chain metadata by chain id or name.
#[automock]
pub trait ChainRegistry: Send + Sync {
    fn chain(&self, chain: &str) -> Option<ChainMetadata>;
}

/// Registry backed by the chains listed in the configuration.
#[derive(Clone, Debug, Default)]
pub struct StaticChainRegistry {
    chains: Vec<ChainMetadata>,
}

impl StaticChainRegistry {
    pub fn new(chains: Vec<ChainMetadata>) -> Self {
        Self { chains }
    }
}

impl ChainRegistry for StaticChainRegistry {
    fn chain(&self, chain: &str) -> Option<ChainMetadata> {
        self.chains
            .iter()
            .find(|metadata| metadata.matches(chain))
            .cloned()
    }
}
