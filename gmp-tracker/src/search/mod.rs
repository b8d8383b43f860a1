//! Read-side collaborator that returns raw message documents and historical duration
//! statistics.

use std::fmt::{Display, Formatter};

use async_trait::async_trait;
use error_stack::Result;
use mockall::automock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_with::{serde_as, DisplayFromStr, PickFirst};
use thiserror::Error;

use crate::hop::Hop;
use crate::types::TxHash;

mod http;

pub use http::HttpSearchClient;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to reach the search service")]
    Connection,
    #[error("search service returned an unexpected response")]
    InvalidResponse,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_log_index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_chain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_chain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination_contract_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl SearchFilter {
    pub fn by_tx_hash(hash: &TxHash) -> Self {
        Self {
            tx_hash: Some(hash.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SearchResponse {
    pub data: Vec<Value>,
    pub total: u64,
}

impl SearchResponse {
    /// Decodes every document, skipping the ones that are not objects.
    pub fn hops(self) -> Vec<Hop> {
        self.data.into_iter().filter_map(Hop::from_raw).collect()
    }
}

/// Historical duration statistics in seconds for messages leaving one source chain.
#[serde_as]
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DurationEstimate {
    pub key: Option<String>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub confirm: Option<f64>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub express_execute: Option<f64>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    pub total: Option<f64>,
}

#[automock]
#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn search_messages(&self, filter: SearchFilter) -> Result<SearchResponse, Error>;

    async fn estimate_time_spent(
        &self,
        source_chain: String,
        destination_chain: Option<String>,
    ) -> Result<Vec<DurationEstimate>, Error>;
}

/// How a message is looked up: by its source transaction, its message id or the command id of
/// its approval.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum LookupKey {
    TxHash(TxHash),
    MessageId(String),
    CommandId(String),
}

impl LookupKey {
    /// Message ids are `{tx hash}-{index}`, everything else is treated as a transaction hash.
    pub fn parse(key: &str) -> Self {
        let key = key.trim();

        if key.contains('-') {
            LookupKey::MessageId(key.to_string())
        } else {
            LookupKey::TxHash(TxHash::from(key))
        }
    }

    pub fn filter(&self) -> SearchFilter {
        match self {
            LookupKey::TxHash(hash) => SearchFilter::by_tx_hash(hash),
            LookupKey::MessageId(id) => SearchFilter {
                message_id: Some(id.clone()),
                ..SearchFilter::default()
            },
            LookupKey::CommandId(id) => SearchFilter {
                command_id: Some(id.clone()),
                ..SearchFilter::default()
            },
        }
    }
}

impl Display for LookupKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            LookupKey::TxHash(hash) => write!(f, "{hash}"),
            LookupKey::MessageId(id) | LookupKey::CommandId(id) => write!(f, "{id}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn lookup_key_distinguishes_message_ids() {
        assert_eq!(
            LookupKey::parse(" 0xabc-3 "),
            LookupKey::MessageId("0xabc-3".to_string())
        );
        assert_eq!(
            LookupKey::parse("0xabc"),
            LookupKey::TxHash(TxHash::from("0xABC"))
        );
    }

    #[test]
    fn filter_serializes_only_set_fields() {
        let filter = SearchFilter {
            tx_hash: Some("0xabc".to_string()),
            tx_log_index: Some(2),
            ..SearchFilter::default()
        };

        assert_eq!(
            serde_json::to_value(filter).unwrap(),
            json!({"txHash": "0xabc", "txLogIndex": 2})
        );
        assert_eq!(
            serde_json::to_value(LookupKey::CommandId("0x1".to_string()).filter()).unwrap(),
            json!({"commandId": "0x1"})
        );
    }

    #[test]
    fn response_skips_non_object_documents() {
        let response: SearchResponse = serde_json::from_value(json!({
            "data": [{"call": {}}, "garbage", {"executed": {}}],
            "total": 3
        }))
        .unwrap();

        assert_eq!(response.hops().len(), 2);
    }

    #[test]
    fn duration_estimate_accepts_string_numbers() {
        let estimate: DurationEstimate =
            serde_json::from_value(json!({"key": "ethereum", "confirm": "960.5", "total": 1200}))
                .unwrap();

        assert_eq!(estimate.confirm, Some(960.5));
        assert_eq!(estimate.total, Some(1200.0));
        assert_eq!(estimate.express_execute, None);
    }
}
