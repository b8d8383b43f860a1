use std::sync::Arc;

use error_stack::{Result, ResultExt};
use futures::future::join;
use thiserror::Error;
use tracing::{debug, warn};
use valuable::Valuable;

use crate::contracts::{annotate, ContractRegistry};
use crate::hop::{Hop, MultihopBundle};
use crate::report::LoggableError;
use crate::search::{LookupKey, SearchClient, SearchFilter};
use crate::types::TxHash;

#[derive(Error, Debug)]
pub enum Error {
    #[error("failed to search for the primary message")]
    Primary,
    #[error("failed to search for a linked message")]
    Linked,
}

/// Links a message to the message that emitted it and to the message its execution emitted.
pub struct Aggregator<S> {
    client: Arc<S>,
    contracts: Arc<dyn ContractRegistry>,
}

impl<S> Aggregator<S>
where
    S: SearchClient,
{
    pub fn new(client: Arc<S>, contracts: Arc<dyn ContractRegistry>) -> Self {
        Self { client, contracts }
    }

    pub fn client(&self) -> &Arc<S> {
        &self.client
    }

    /// Resolves the bundle for a lookup key. Returns `None` when the primary message cannot be
    /// found or fetched; failures of linked lookups only drop the linked hop.
    pub async fn aggregate(&self, key: &LookupKey) -> Option<MultihopBundle> {
        let primary = self
            .primary(key)
            .await
            .inspect_err(|report| {
                warn!(
                    err = LoggableError::from(report).as_value(),
                    %key,
                    "failed to fetch message"
                )
            })
            .ok()??;

        let (callback, origin) = join(self.callback(&primary), self.origin(&primary)).await;
        let callback = self.linked(callback, key, "callback");
        let origin = self.linked(origin, key, "origin");

        Some(MultihopBundle {
            origin,
            data: primary,
            callback,
        })
    }

    fn linked(
        &self,
        result: Result<Option<Hop>, Error>,
        key: &LookupKey,
        role: &str,
    ) -> Option<Hop> {
        result
            .inspect_err(|report| {
                warn!(
                    err = LoggableError::from(report).as_value(),
                    %key,
                    role,
                    "failed to fetch linked message"
                )
            })
            .ok()
            .flatten()
            .inspect(|_| debug!(%key, role, "linked message found"))
    }

    async fn search(&self, filter: SearchFilter, context: Error) -> Result<Vec<Hop>, Error> {
        let printable = format!("{filter:?}");

        Ok(self
            .client
            .search_messages(filter)
            .await
            .change_context(context)
            .attach_printable(printable)?
            .hops())
    }

    async fn primary(&self, key: &LookupKey) -> Result<Option<Hop>, Error> {
        let hop = self
            .search(key.filter(), Error::Primary)
            .await?
            .into_iter()
            .next()
            .map(|hop| annotate(hop, self.contracts.as_ref()));

        Ok(hop)
    }

    /// The message emitted by executing `primary`, found through the explicit callback pointer
    /// or, lacking one, the destination execution transaction.
    async fn callback(&self, primary: &Hop) -> Result<Option<Hop>, Error> {
        let pointer = primary.callback.as_ref().and_then(|callback| {
            let hash = callback.transaction_hash.clone()?;
            let filter = SearchFilter {
                tx_index: callback.transaction_index,
                tx_log_index: callback.log_index,
                ..SearchFilter::by_tx_hash(&hash)
            };
            Some((hash, filter))
        });
        let execution = || {
            let hash = primary.executed.as_ref()?.transaction_hash.clone()?;
            let filter = SearchFilter::by_tx_hash(&hash);
            Some((hash, filter))
        };

        let Some((hash, filter)) = pointer.or_else(execution) else {
            return Ok(None);
        };

        let hop = self
            .search(filter, Error::Linked)
            .await?
            .into_iter()
            .find(|candidate| candidate.call_hash() == Some(&hash))
            .map(|hop| annotate(hop, self.contracts.as_ref()));

        Ok(hop)
    }

    /// The message whose execution emitted `primary`'s call. Only looked up for calls made by
    /// a relayer or paid for as a callback.
    async fn origin(&self, primary: &Hop) -> Result<Option<Hop>, Error> {
        let Some(call_hash) = primary.call_hash() else {
            return Ok(None);
        };
        if primary.gas_paid_to_callback.is_none() && !primary.flags.is_call_from_relayer {
            return Ok(None);
        }

        let hop = self
            .search(SearchFilter::by_tx_hash(call_hash), Error::Linked)
            .await?
            .into_iter()
            .find(|candidate| executed_in(candidate, call_hash))
            .map(|hop| annotate(hop, self.contracts.as_ref()));

        Ok(hop)
    }
}

/// Whether `candidate` was delivered, normally or by express, in transaction `hash`. A hop is
/// never its own origin since its call and its execution happen on different chains.
fn executed_in(candidate: &Hop, hash: &TxHash) -> bool {
    let express = candidate
        .express_executed
        .as_ref()
        .and_then(|express| express.transaction_hash.as_ref());
    let executed = candidate
        .executed
        .as_ref()
        .and_then(|executed| executed.transaction_hash.as_ref());

    candidate.call_hash() != Some(hash) && (express == Some(hash) || executed == Some(hash))
}
