//! Retrying a single attempt until quorum, or until the retry budget runs
//! out.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::attempt::{run_attempt, Decision, StatsHandle};
use crate::error::ExecutionError;
use crate::events::EventEmitter;
use crate::scripts::ScriptDigest;
use crate::settings::Settings;
use crate::store::Store;

/// Runs [`run_attempt`] repeatedly until it decides `For`, or until the
/// configured retry budget (`retry_count + 1` total attempts, unlimited
/// when `retry_count` is negative) is exhausted.
///
/// Every attempt's [`StatsHandle`] is retained, in order, whether the
/// overall call ultimately succeeds or fails; a background task relays each
/// attempt's against-votes onto `events` as they complete, independent of
/// whether that attempt's decision already resolved.
pub async fn run_with_retry(
    stores: &[Arc<dyn Store>],
    script: ScriptDigest,
    keys: Vec<String>,
    args: Vec<Vec<u8>>,
    settings: &Settings,
    events: &Arc<EventEmitter>,
) -> Result<Vec<StatsHandle>, ExecutionError> {
    let mut attempts = Vec::new();
    let mut attempt_number: i64 = 0;

    loop {
        let (decision, stats) =
            run_attempt(stores, script.clone(), keys.clone(), args.clone()).await;
        spawn_event_relay(stats.clone(), Arc::clone(events));
        attempts.push(stats);

        if decision == Decision::For {
            tracing::debug!(attempt_number, "quorum reached");
            return Ok(attempts);
        }

        attempt_number += 1;
        let exhausted = settings.retry_count >= 0 && attempt_number > settings.retry_count;
        if exhausted {
            tracing::warn!(attempt_number, "retry budget exhausted without quorum");
            return Err(ExecutionError { attempts });
        }

        tracing::debug!(attempt_number, "attempt failed to reach quorum, retrying");
        tokio::time::sleep(jittered_delay(settings.retry_delay, settings.retry_jitter)).await;
    }
}

fn spawn_event_relay(mut stats: StatsHandle, events: Arc<EventEmitter>) {
    tokio::spawn(async move {
        let final_stats = stats.wait_for_completion().await;
        for (_, result) in final_stats.votes {
            if let Err(err) = result {
                events.emit_error(err);
            }
        }
    });
}

fn jittered_delay(delay: Duration, jitter: Duration) -> Duration {
    if jitter.is_zero() {
        return delay;
    }
    let jitter_ms = jitter.as_millis() as i64;
    let offset = rand::thread_rng().gen_range(-jitter_ms..=jitter_ms);
    let delay_ms = delay.as_millis() as i64;
    Duration::from_millis((delay_ms + offset).max(0) as u64)
}
