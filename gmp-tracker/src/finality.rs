use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use valuable::Valuable;

use crate::report::LoggableError;
use crate::search::{DurationEstimate, SearchClient};
use crate::types::Timestamp;

/// Latency assumptions that decide when a waiting step becomes actionable.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Thresholds {
    /// Gas payment is still being indexed until this much time has passed since the call.
    #[serde(with = "humantime_serde")]
    pub checking_gas_paid: Duration,
    /// Minimum age of a call (or its confirmation) before recovery actions are offered.
    #[serde(with = "humantime_serde")]
    pub recovery_delay: Duration,
    #[serde(with = "humantime_serde")]
    pub ibc_wait: Duration,
    /// An execution error is reported as failed only after this grace period.
    #[serde(with = "humantime_serde")]
    pub execute_error_grace: Duration,
    /// Manual execution on a coordination-type destination waits this long after confirmation.
    #[serde(with = "humantime_serde")]
    pub cosmos_execute_grace: Duration,
    /// Finality assumed when no historical estimate is available.
    #[serde(with = "humantime_serde")]
    pub finality_default: Duration,
    /// Added to the estimated confirmation time.
    #[serde(with = "humantime_serde")]
    pub finality_buffer: Duration,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            checking_gas_paid: Duration::from_secs(30),
            recovery_delay: Duration::from_secs(60),
            ibc_wait: Duration::from_secs(60),
            execute_error_grace: Duration::from_secs(120),
            cosmos_execute_grace: Duration::from_secs(300),
            finality_default: Duration::from_secs(600),
            finality_buffer: Duration::from_secs(15),
        }
    }
}

impl Thresholds {
    /// Seconds after the call at which finality is expected to have been reached.
    pub fn finality_time(&self, estimate: Option<&DurationEstimate>) -> f64 {
        match estimate.and_then(|estimate| estimate.confirm) {
            Some(confirm) if confirm.is_finite() && confirm != 0.0 => {
                confirm + self.finality_buffer.as_secs_f64()
            }
            _ => self.finality_default.as_secs_f64(),
        }
    }
}

/// Seconds left until the estimated confirmation of a call, if it is still in the future.
pub fn time_remaining(
    call_timestamp: Option<Timestamp>,
    estimate: Option<&DurationEstimate>,
    now: Timestamp,
) -> Option<Duration> {
    let confirm = estimate?
        .confirm
        .filter(|confirm| confirm.is_finite() && *confirm > 0.0)?;
    let remaining = call_timestamp? as f64 + confirm - now as f64;

    (remaining > 0.0)
        .then(|| Duration::try_from_secs_f64(remaining).ok())
        .flatten()
}

/// Compact countdown such as `4m 05s` or `12s`.
pub fn format_remaining(remaining: Duration) -> String {
    let secs = remaining.as_secs();
    let (hours, minutes, seconds) = (secs / 3600, (secs % 3600) / 60, secs % 60);

    match (hours, minutes) {
        (0, 0) => format!("{seconds}s"),
        (0, _) => format!("{minutes}m {seconds:02}s"),
        _ => format!("{hours}h {minutes:02}m"),
    }
}

/// Looks up historical confirmation statistics for a source chain.
pub struct FinalityEstimator<S> {
    client: Arc<S>,
}

impl<S> FinalityEstimator<S>
where
    S: SearchClient,
{
    pub fn new(client: Arc<S>) -> Self {
        Self { client }
    }

    /// Returns `None` when the statistics are unavailable; callers fall back to the default
    /// thresholds.
    pub async fn estimate(
        &self,
        source_chain: &str,
        destination_chain: Option<&str>,
    ) -> Option<DurationEstimate> {
        let estimates = self
            .client
            .estimate_time_spent(
                source_chain.to_string(),
                destination_chain.map(str::to_string),
            )
            .await
            .inspect_err(|report| {
                warn!(
                    err = LoggableError::from(report).as_value(),
                    chain = source_chain,
                    "failed to fetch finality estimate"
                )
            })
            .ok()?;

        let estimate = estimates
            .into_iter()
            .find(|estimate| {
                estimate
                    .key
                    .as_deref()
                    .is_some_and(|key| key.eq_ignore_ascii_case(source_chain))
            });
        debug!(chain = source_chain, ?estimate, "fetched finality estimate");

        estimate
    }
}
