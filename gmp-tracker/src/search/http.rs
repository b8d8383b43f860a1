use std::time::Duration;

use async_trait::async_trait;
use error_stack::{Result, ResultExt};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;
use url::Url;

use super::{DurationEstimate, Error, SearchClient, SearchFilter, SearchResponse};
use crate::asyncutil::future::{with_retry, RetryPolicy};

/// Search service reached over its JSON-over-HTTP API.
#[derive(TypedBuilder)]
pub struct HttpSearchClient {
    base_url: Url,
    #[builder(default = Duration::from_secs(10))]
    timeout: Duration,
    #[builder(default = RetryPolicy::NoRetry)]
    retry_policy: RetryPolicy,
    #[builder(default)]
    client: Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EstimateTimeSpentRequest {
    source_chain: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    destination_chain: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EstimateTimeSpentResponse {
    List(Vec<DurationEstimate>),
    Wrapped { data: Vec<DurationEstimate> },
}

impl HttpSearchClient {
    fn endpoint(&self, method: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');

        Url::parse(&format!("{base}/{method}"))
            .change_context(Error::Connection)
            .attach_printable_lazy(|| format!("base url: {}", self.base_url))
    }

    async fn post<B, R>(&self, method: &str, body: &B) -> Result<R, Error>
    where
        B: Serialize + Sync,
        R: DeserializeOwned + Send,
    {
        let url = self.endpoint(method)?;

        with_retry(
            || async {
                self.client
                    .post(url.clone())
                    .timeout(self.timeout)
                    .json(body)
                    .send()
                    .await
                    .and_then(|response| response.error_for_status())
                    .change_context(Error::Connection)
                    .attach_printable_lazy(|| url.clone())?
                    .json::<R>()
                    .await
                    .change_context(Error::InvalidResponse)
                    .attach_printable_lazy(|| url.clone())
            },
            self.retry_policy,
        )
        .await
    }
}

#[async_trait]
impl SearchClient for HttpSearchClient {
    async fn search_messages(&self, filter: SearchFilter) -> Result<SearchResponse, Error> {
        self.post("searchGMP", &filter).await
    }

    async fn estimate_time_spent(
        &self,
        source_chain: String,
        destination_chain: Option<String>,
    ) -> Result<Vec<DurationEstimate>, Error> {
        let request = EstimateTimeSpentRequest {
            source_chain,
            destination_chain,
        };

        let response: EstimateTimeSpentResponse =
            self.post("estimateTimeSpent", &request).await?;

        Ok(match response {
            EstimateTimeSpentResponse::List(estimates)
            | EstimateTimeSpentResponse::Wrapped { data: estimates } => estimates,
        })
    }
}
