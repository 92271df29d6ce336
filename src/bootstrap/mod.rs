//! Startup dependency waits.
//!
//! External collaborators come up in their own time; the agent retries
//! with bounded exponential backoff (base 2, 2 s floor, 30 s ceiling) and
//! gives up only after the per-dependency deadline, surfacing the final
//! failure to the caller.

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{error, warn};

/// Deadline for the database and the identity provider.
pub const CORE_DEADLINE: Duration = Duration::from_secs(300);
/// Deadline for the ticketing service.
pub const TICKETING_DEADLINE: Duration = Duration::from_secs(120);

/// Backoff schedule: 2, 4, 8, 16, 30, 30, … seconds.
fn backoff_delay(attempt: u32) -> Duration {
    let secs = (2u64 << attempt.min(5)).clamp(2, 30);
    Duration::from_secs(secs)
}

/// Retry `op` until it succeeds or `deadline` elapses. The last error is
/// returned when the deadline is exhausted.
pub async fn wait_for<T, E, F, Fut>(what: &str, deadline: Duration, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) => {
                if started.elapsed() >= deadline {
                    error!("{what} still unavailable after {}s: {e}", deadline.as_secs());
                    return Err(e);
                }
                let delay = backoff_delay(attempt);
                warn!("{what} not ready ({e}); retrying in {}s", delay.as_secs());
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn backoff_doubles_then_saturates() {
        let delays: Vec<u64> = (0..8).map(|a| backoff_delay(a).as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 30, 30, 30, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn returns_first_success() {
        let calls = Cell::new(0u32);
        let result: Result<u32, String> = wait_for("thing", Duration::from_secs(60), || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move {
                if n < 3 {
                    Err(format!("attempt {n} failed"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn surfaces_the_last_error_after_the_deadline() {
        let result: Result<(), String> = wait_for("thing", Duration::ZERO, || async {
            Err("still down".to_string())
        })
        .await;
        // The deadline is already exhausted at the first failure, so the
        // error comes straight back without a sleep.
        assert_eq!(result, Err("still down".to_string()));
    }
}
