//! Wraps a device's `connect` with exponential-backoff retry. Delay starts
//! at 1 s and doubles after every failure up to a 60 s cap; the supervisor
//! exits as soon as a connect attempt succeeds (spec.md §4.8).

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const INITIAL_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(60);

/// Retries `connect` with exponential backoff until it succeeds or
/// `cancel` fires. Returns `None` on cancellation.
pub async fn supervise<T, E, F, Fut>(
    label: &str,
    cancel: &CancellationToken,
    mut connect: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut delay = INITIAL_DELAY;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        tokio::select! {
            _ = cancel.cancelled() => return None,
            result = connect() => {
                match result {
                    Ok(value) => {
                        info!(%label, attempt, "connect succeeded");
                        return Some(value);
                    }
                    Err(e) => {
                        warn!(%label, attempt, error = %e, next_delay_secs = delay.as_secs(), "connect failed, backing off");
                    }
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        delay = (delay * 2).min(MAX_DELAY);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_until_success_and_returns_value() {
        let attempts = AtomicU32::new(0);
        let cancel = CancellationToken::new();

        tokio::time::pause();

        let result = supervise("test", &cancel, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            async move {
                if n < 3 {
                    Err("not yet")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result, Some(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_stops_retrying() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result: Option<i32> = supervise("test", &cancel, || async { Err("always fails") }).await;
        assert_eq!(result, None);
    }
}
