//! The scoped-use supervisor: keeps a lock alive for the lifetime of a
//! caller-supplied routine by extending it automatically ahead of its
//! expiration, and releases it unconditionally once the routine returns
//! (or panics).

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use crate::error::Error;
use crate::lock::{ExecutionResult, Lock};
use crate::redlock::Redlock;
use crate::settings::{Overrides, Settings};

struct AbortInner {
    aborted: AtomicBool,
    error: Mutex<Option<Error>>,
}

/// A cooperative cancellation signal handed to a [`using`] routine.
///
/// The supervisor sets this once it can no longer guarantee exclusive
/// ownership (the lock expired and a renewed extension could not be
/// obtained in time); routines that poll it can stop touching the guarded
/// resource promptly instead of running to completion unaware.
#[derive(Clone)]
pub struct AbortSignal {
    inner: Arc<AbortInner>,
}

impl AbortSignal {
    fn new() -> Self {
        Self {
            inner: Arc::new(AbortInner {
                aborted: AtomicBool::new(false),
                error: Mutex::new(None),
            }),
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    pub fn error(&self) -> Option<Error> {
        self.inner.error.lock().unwrap().clone()
    }

    fn abort(&self, error: Error) {
        *self.inner.error.lock().unwrap() = Some(error);
        self.inner.aborted.store(true, Ordering::SeqCst);
    }
}

/// Runs `routine` while holding a lock over `resources`, automatically
/// extending it as it approaches expiration, and releases the lock on
/// every exit path once `routine` finishes (successfully, by returning an
/// error the caller maps however it likes, or by panicking).
///
/// Rejects the call up front if `automatic_extension_threshold` is not at
/// least 100ms inside `duration`, since a threshold that close to (or past)
/// the full duration leaves no room to ever extend before expiring.
pub async fn using<F, Fut, R>(
    redlock: &Redlock,
    resources: Vec<String>,
    duration: Duration,
    overrides: Overrides,
    routine: F,
) -> Result<R, Error>
where
    F: FnOnce(AbortSignal) -> Fut,
    Fut: Future<Output = R>,
{
    let settings = redlock.settings_for(&overrides);
    let threshold_ms = settings.automatic_extension_threshold.as_millis();
    let duration_ms = duration.as_millis();
    if duration_ms < 100 || threshold_ms > duration_ms - 100 {
        return Err(Error::ThresholdTooClose);
    }

    let lock = redlock
        .acquire(resources.clone(), duration, overrides.clone())
        .await?;
    let value = lock.value.clone();
    let shared_lock = Arc::new(AsyncMutex::new(lock));
    let signal = AbortSignal::new();

    let (stop_tx, stop_rx) = watch::channel(false);
    let extender = spawn_extender(
        redlock.clone(),
        Arc::clone(&shared_lock),
        duration,
        overrides.clone(),
        settings.clone(),
        signal.clone(),
        stop_rx,
    );

    let guard = ReleaseGuard {
        redlock: redlock.clone(),
        resources,
        value,
        extender: Some((stop_tx, extender)),
        released: false,
    };

    let result = routine(signal).await;
    // Await the release and propagate its error on the normal exit path, per
    // the scoped-use contract; a routine that panics instead unwinds through
    // `guard`'s `Drop`, which can only fire a best-effort release since it
    // cannot await.
    guard.release().await?;
    Ok(result)
}

fn spawn_extender(
    redlock: Redlock,
    shared_lock: Arc<AsyncMutex<Lock>>,
    duration: Duration,
    overrides: Overrides,
    settings: Settings,
    signal: AbortSignal,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let sleep_for = {
                let lock = shared_lock.lock().await;
                lock.remaining()
                    .saturating_sub(settings.automatic_extension_threshold)
            };
            // A stop arriving while we're only waiting for the next
            // scheduled extension cancels that pending timer outright; one
            // arriving once we've moved past this `select!` into an
            // in-flight `extend_inner` call below is left to complete, per
            // the "Finishing" state's "await any in-flight extension"
            // requirement.
            tokio::select! {
                _ = stop.changed() => return,
                _ = tokio::time::sleep(sleep_for) => {}
            }
            if *stop.borrow() {
                return;
            }

            let mut lock = shared_lock.lock().await;
            if lock.is_expired() {
                signal.abort(Error::AlreadyExpired);
                return;
            }
            match redlock
                .extend_inner(&lock, duration, overrides.clone())
                .await
            {
                Ok(extended) => {
                    tracing::trace!("automatic extension succeeded");
                    *lock = extended;
                }
                Err(err) => {
                    if lock.is_expired() {
                        tracing::warn!(error = %err, "automatic extension failed after expiry");
                        signal.abort(err);
                        return;
                    }
                    tracing::debug!(error = %err, "automatic extension failed, retrying before expiry");
                }
            }
        }
    })
}

/// Releases the lock (and stops the extender task) on every exit path out of
/// [`using`]. The normal path calls [`ReleaseGuard::release`] directly so its
/// result can be awaited and propagated; `Drop` is only the backstop for a
/// routine that unwinds via panic, where nothing can be awaited and the
/// release is necessarily best-effort.
struct ReleaseGuard {
    redlock: Redlock,
    resources: Vec<String>,
    value: String,
    extender: Option<(watch::Sender<bool>, JoinHandle<()>)>,
    released: bool,
}

impl ReleaseGuard {
    /// Stops the extender and releases the lock on the normal exit path.
    /// Per the "Finishing" state, a pending extension timer is cancelled
    /// but any extension already in flight is awaited and its result
    /// swallowed (the extender always returns `()`, win or lose) rather
    /// than aborted out from under it, so a successful extension can't race
    /// a release against a now-stale value.
    async fn release(mut self) -> Result<ExecutionResult, Error> {
        if let Some((stop, handle)) = self.extender.take() {
            let _ = stop.send(true);
            let _ = handle.await;
        }
        self.released = true;
        let resources = std::mem::take(&mut self.resources);
        let value = std::mem::take(&mut self.value);
        self.redlock
            .release_inner(&resources, &value, Overrides::default())
            .await
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Some((_stop, handle)) = self.extender.take() {
            handle.abort();
        }
        let redlock = self.redlock.clone();
        let resources = std::mem::take(&mut self.resources);
        let value = std::mem::take(&mut self.value);
        tokio::spawn(async move {
            let overrides = Overrides {
                retry_count: Some(0),
                ..Default::default()
            };
            let _ = redlock.release_inner(&resources, &value, overrides).await;
        });
    }
}
