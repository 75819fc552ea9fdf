use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Bounded retry policy for calls against the hosted model. Waits grow
/// linearly with the attempt number, so the total latency of one inbound
/// request is capped by `max_attempts * timeout + sum(backoff)`.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            backoff_base: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_base * attempt
    }
}

/// Verdict a task passes on a completed service call: take the value, or
/// reject the payload and spend another attempt on it.
#[derive(Debug)]
pub(crate) enum Judgment<T> {
    Accept(T),
    Reject(String),
}

/// Terminal failures of an exhausted retry loop. The two variants are
/// distinct on purpose: `Unavailable` means the service itself kept
/// failing, `Rejected` means it answered but never acceptably.
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("service unavailable after {attempts} attempts: {cause}")]
    Unavailable { attempts: u32, cause: anyhow::Error },

    #[error("no acceptable result after {attempts} attempts")]
    Rejected { attempts: u32 },
}

/// Drives `call` until it yields an accepted value or the attempt budget
/// runs out. Transport errors and rejected payloads both consume an
/// attempt; whichever kind the final attempt produced decides the
/// terminal error.
pub(crate) async fn run_validated<T, F, Fut>(
    policy: &RetryPolicy,
    what: &str,
    mut call: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Judgment<T>, anyhow::Error>>,
{
    debug_assert!(policy.max_attempts >= 1);

    let mut attempt = 1u32;
    loop {
        match call().await {
            Ok(Judgment::Accept(value)) => {
                debug!(attempt, "{} accepted a result", what);
                return Ok(value);
            }
            Ok(Judgment::Reject(reason)) => {
                warn!(attempt, %reason, "{} returned an unacceptable result", what);
                if attempt >= policy.max_attempts {
                    return Err(RetryError::Rejected { attempts: attempt });
                }
            }
            Err(err) => {
                warn!(attempt, error = %err, "{} attempt failed", what);
                if attempt >= policy.max_attempts {
                    return Err(RetryError::Unavailable {
                        attempts: attempt,
                        cause: err,
                    });
                }
            }
        }
        sleep(policy.backoff(attempt)).await;
        attempt += 1;
    }
}
