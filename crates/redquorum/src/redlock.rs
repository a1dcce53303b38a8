//! The coordinator: ties together the store set, the script registry, the
//! retry driver, and the event channel into the public `acquire` /
//! `extend` / `release` / `using` surface.

use std::sync::Arc;
use std::time::Duration;

use rand::RngCore;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::error::{Error, VoteError};
use crate::events::EventEmitter;
use crate::lock::{ExecutionResult, Lock};
use crate::retry::run_with_retry;
use crate::scripts::{ScriptRegistry, ScriptRewrites};
use crate::settings::{Overrides, Settings};
use crate::store::Store;

struct Inner {
    stores: Vec<Arc<dyn Store>>,
    scripts: ScriptRegistry,
    settings: Settings,
    events: Arc<EventEmitter>,
}

/// The Redlock coordinator. Cheap to clone: every clone shares the same
/// store set, script registry, settings, and event channel via an internal
/// `Arc`, which is also how a [`Lock`] is able to call back into the
/// coordinator that produced it.
#[derive(Clone)]
pub struct Redlock {
    inner: Arc<Inner>,
}

impl Redlock {
    /// Builds a coordinator over `stores` with the given default settings.
    /// Fails if `stores` is empty — there is no quorum over zero stores.
    pub fn new(stores: Vec<Arc<dyn Store>>, settings: Settings) -> Result<Self, Error> {
        Self::with_scripts(stores, settings, ScriptRegistry::new())
    }

    /// As [`Redlock::new`], but with caller-supplied script rewrites
    /// applied before digesting.
    pub fn with_script_rewrites(
        stores: Vec<Arc<dyn Store>>,
        settings: Settings,
        rewrites: &dyn ScriptRewrites,
    ) -> Result<Self, Error> {
        Self::with_scripts(stores, settings, ScriptRegistry::with_rewrites(rewrites))
    }

    fn with_scripts(
        stores: Vec<Arc<dyn Store>>,
        settings: Settings,
        scripts: ScriptRegistry,
    ) -> Result<Self, Error> {
        if stores.is_empty() {
            return Err(Error::EmptyStoreSet);
        }
        Ok(Self {
            inner: Arc::new(Inner {
                stores,
                scripts,
                settings,
                events: Arc::new(EventEmitter::new()),
            }),
        })
    }

    /// Subscribes to the coordinator's non-fatal per-vote error stream.
    pub fn on_error(&self) -> broadcast::Receiver<VoteError> {
        self.inner.events.on_error()
    }

    /// The coordinator's default settings with `overrides` layered on top,
    /// without running any store calls. Used by the supervisor to validate
    /// its extension threshold before acquiring.
    pub(crate) fn settings_for(&self, overrides: &Overrides) -> Settings {
        self.inner.settings.layer(overrides)
    }

    /// Attempts to exclusively acquire every resource in `resources` for
    /// `duration`, retrying per the effective settings until quorum or
    /// budget exhaustion.
    #[tracing::instrument(level = "debug", skip(self, overrides), fields(resources = resources.len()))]
    pub async fn acquire(
        &self,
        resources: Vec<String>,
        duration: Duration,
        overrides: Overrides,
    ) -> Result<Lock, Error> {
        let millis = whole_millis(duration)?;
        let settings = self.inner.settings.layer(&overrides);
        let value = random_value();
        let args = vec![value.clone().into_bytes(), millis.to_string().into_bytes()];

        let start = Instant::now();
        let outcome = run_with_retry(
            &self.inner.stores,
            self.inner.scripts.acquire.clone(),
            resources.clone(),
            args,
            &settings,
            &self.inner.events,
        )
        .await;

        match outcome {
            Ok(_attempts) => {
                let expiration = expiration_after(start, duration, settings.drift_factor);
                Ok(Lock {
                    resources,
                    value,
                    expiration,
                    redlock: self.clone(),
                })
            }
            Err(exec_err) => {
                self.best_effort_release(resources, value);
                Err(Error::Execution(exec_err))
            }
        }
    }

    /// Spawns a single, unretried release attempt and swallows its result;
    /// used after a failed acquire to clean up whatever minority of stores
    /// may have granted the lock before the attempt as a whole failed.
    fn best_effort_release(&self, resources: Vec<String>, value: String) {
        let redlock = self.clone();
        tokio::spawn(async move {
            let overrides = Overrides {
                retry_count: Some(0),
                ..Default::default()
            };
            let _ = redlock.release_inner(&resources, &value, overrides).await;
        });
    }

    #[tracing::instrument(level = "debug", skip(self, lock, overrides), fields(resources = lock.resources.len()))]
    pub(crate) async fn extend_inner(
        &self,
        lock: &Lock,
        duration: Duration,
        overrides: Overrides,
    ) -> Result<Lock, Error> {
        if lock.is_expired() {
            return Err(Error::AlreadyExpired);
        }
        let millis = whole_millis(duration)?;
        let settings = self.inner.settings.layer(&overrides);
        let args = vec![lock.value.clone().into_bytes(), millis.to_string().into_bytes()];

        let start = Instant::now();
        run_with_retry(
            &self.inner.stores,
            self.inner.scripts.extend.clone(),
            lock.resources.clone(),
            args,
            &settings,
            &self.inner.events,
        )
        .await
        .map_err(Error::Execution)?;

        let expiration = expiration_after(start, duration, settings.drift_factor);
        Ok(Lock {
            resources: lock.resources.clone(),
            value: lock.value.clone(),
            expiration,
            redlock: self.clone(),
        })
    }

    #[tracing::instrument(level = "debug", skip(self, overrides), fields(resources = resources.len()))]
    pub(crate) async fn release_inner(
        &self,
        resources: &[String],
        value: &str,
        overrides: Overrides,
    ) -> Result<ExecutionResult, Error> {
        let settings = self.inner.settings.layer(&overrides);
        let args = vec![value.as_bytes().to_vec()];
        let attempts = run_with_retry(
            &self.inner.stores,
            self.inner.scripts.release.clone(),
            resources.to_vec(),
            args,
            &settings,
            &self.inner.events,
        )
        .await
        .map_err(Error::Execution)?;
        Ok(ExecutionResult { attempts })
    }

    /// Closes every store's underlying connection. Best-effort; any single
    /// store's failure to close cleanly does not stop the others.
    pub async fn quit(&self) {
        for store in &self.inner.stores {
            if let Err(err) = store.quit().await {
                tracing::debug!(error = %err.message, "store did not close cleanly");
            }
        }
    }
}

fn expiration_after(start: Instant, duration: Duration, drift_factor: f64) -> Instant {
    let drift = compute_drift(duration, drift_factor);
    (start + duration).checked_sub(drift).unwrap_or(start)
}

fn compute_drift(duration: Duration, drift_factor: f64) -> Duration {
    let drift_ms = (drift_factor * duration.as_millis() as f64).round().max(0.0) as u64;
    Duration::from_millis(drift_ms + 2)
}

fn whole_millis(duration: Duration) -> Result<u64, Error> {
    if duration.subsec_nanos() % 1_000_000 != 0 {
        return Err(Error::InvalidDuration);
    }
    Ok(duration.as_millis() as u64)
}

fn random_value() -> String {
    let mut bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}
