//! Conflict retry with exponential backoff and jitter.
//!
//! Every write to the object store may fail with a resource-version
//! conflict (HTTP 409). [`retry_on_conflict`] re-runs a thunk that is
//! expected to refetch the object, reapply the intended field delta, and
//! write again, never reusing a stale object between attempts. Only
//! conflicts are retried; any other error is surfaced immediately so the
//! dispatcher can requeue.
//!
//! # Example
//!
//! ```ignore
//! use volume_group_operator::retry::{retry_on_conflict, ConflictRetry};
//!
//! retry_on_conflict(&ConflictRetry::default(), "update VolumeGroup status", |attempt| {
//!     let api = api.clone();
//!     async move {
//!         let mut latest = if attempt == 0 { seed.clone() } else { api.get(&name).await? };
//!         latest.status = desired.clone();
//!         api.replace_status(&name, &pp, serde_json::to_vec(&latest)?).await?;
//!         Ok(())
//!     }
//! })
//! .await?;
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::Error;

/// Budget for conflict-retried writes.
#[derive(Clone, Debug)]
pub struct ConflictRetry {
    /// Maximum number of attempts before the conflict is surfaced.
    pub max_attempts: u32,
    /// Initial delay between attempts.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl Default for ConflictRetry {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

/// Execute a write with bounded conflict retry.
///
/// The thunk receives the zero-based attempt number; attempt 0 may use the
/// object the reconciler already holds, later attempts must refetch.
/// Returns the thunk's result, or the conflict error once the budget is
/// exhausted.
pub async fn retry_on_conflict<F, Fut, T>(
    config: &ConflictRetry,
    operation_name: &str,
    mut body: F,
) -> Result<T, Error>
where
    F: FnMut(u32) -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let mut delay = config.initial_delay;

    for attempt in 0..config.max_attempts {
        match body(attempt).await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_conflict() => {
                if attempt + 1 >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt + 1,
                        "conflict retry budget exhausted"
                    );
                    return Err(e);
                }

                // Jitter: 0.5x to 1.5x of the delay
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let jittered_delay = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

                warn!(
                    operation = %operation_name,
                    attempt = attempt + 1,
                    delay_ms = jittered_delay.as_millis(),
                    "write conflicted, refetching and retrying"
                );

                tokio::time::sleep(jittered_delay).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
            Err(e) => return Err(e),
        }
    }

    unreachable!("max_attempts is at least 1")
}
