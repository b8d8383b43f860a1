use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryPolicy {
    RepeatConstant { sleep: Duration, max_attempts: u64 },
    NoRetry,
}

impl RetryPolicy {
    pub fn repeat_constant(sleep: Duration, max_attempts: u64) -> Self {
        Self::RepeatConstant {
            sleep,
            max_attempts,
        }
    }

    fn delay(&self, attempts: u64) -> Option<Duration> {
        match self {
            RetryPolicy::RepeatConstant {
                sleep,
                max_attempts,
            } if attempts < *max_attempts => Some(*sleep),
            _ => None,
        }
    }
}

/// Runs the future produced by `get_future` until it succeeds or the policy gives up, returning
/// the last error in that case.
pub async fn with_retry<F, Fut, R, Err>(get_future: F, policy: RetryPolicy) -> Result<R, Err>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<R, Err>>,
{
    let mut attempts = 0u64;

    loop {
        match get_future().await {
            Ok(result) => return Ok(result),
            Err(err) => {
                attempts = attempts.saturating_add(1);

                match policy.delay(attempts) {
                    Some(delay) => {
                        debug!(attempts, "retrying after failure");
                        sleep(delay).await;
                    }
                    None => return Err(err),
                }
            }
        }
    }
}
