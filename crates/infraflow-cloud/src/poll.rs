//! Polling for asynchronous provider state transitions

use crate::error::{CloudError, Result};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

/// Polling configuration
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay between two checks
    pub interval: Duration,

    /// Give up after this long
    pub timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
        }
    }
}

impl PollConfig {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

/// Poll `check` until it yields a value
///
/// `check` returns `Ok(Some(_))` once the target state is reached and
/// `Ok(None)` while it is still converging. An error from `check` ends the
/// wait and is returned unchanged. Exceeding the timeout yields
/// [`CloudError::Timeout`], cancellation yields [`CloudError::Cancelled`].
pub async fn poll_until<T, F, Fut>(
    cancel: &CancellationToken,
    config: &PollConfig,
    what: &str,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = Instant::now() + config.timeout;

    loop {
        if cancel.is_cancelled() {
            return Err(CloudError::Cancelled(format!("waiting for {}", what)));
        }

        if let Some(value) = check().await? {
            return Ok(value);
        }

        let next = Instant::now() + config.interval;
        if next > deadline {
            return Err(CloudError::Timeout(format!(
                "{} did not converge within {:?}",
                what, config.timeout
            )));
        }

        tracing::trace!("Still waiting for {}", what);

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(CloudError::Cancelled(format!("waiting for {}", what)));
            }
            _ = sleep_until(next) => {}
        }
    }
}
