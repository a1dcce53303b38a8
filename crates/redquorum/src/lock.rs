//! The lock handle returned by a successful acquisition, and the
//! diagnostics bundle returned by extend/release calls.

use tokio::time::Instant;

use crate::attempt::StatsHandle;
use crate::error::Error;
use crate::redlock::Redlock;
use crate::settings::Overrides;

/// The full attempt history behind a successful `extend` or `release` call,
/// retained for diagnostics even though the call itself only needed the
/// final decision.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub attempts: Vec<StatsHandle>,
}

/// A held, time-bounded claim over one or more named resources.
///
/// Every [`Lock`] is bound to the [`Redlock`] coordinator that produced it,
/// so `extend`/`release` can be called directly on the handle without
/// threading the coordinator through separately.
#[derive(Clone)]
pub struct Lock {
    pub resources: Vec<String>,
    pub value: String,
    pub expiration: Instant,
    pub(crate) redlock: Redlock,
}

impl Lock {
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expiration
    }

    pub fn remaining(&self) -> std::time::Duration {
        self.expiration.saturating_duration_since(Instant::now())
    }

    /// Extends this lock's expiration in place. Rejects an already-expired
    /// lock without contacting any store; on success, replaces `self` with
    /// the new handle's fields (the prior handle is conceptually invalid
    /// once this returns, whether it succeeded or failed).
    pub async fn extend(
        &mut self,
        duration: std::time::Duration,
        overrides: Overrides,
    ) -> Result<(), Error> {
        let extended = self.redlock.extend_inner(self, duration, overrides).await?;
        *self = extended;
        Ok(())
    }

    /// Releases this lock. Invalidates the handle's expiration immediately,
    /// regardless of the quorum outcome of the underlying release calls.
    pub async fn release(&mut self, overrides: Overrides) -> Result<ExecutionResult, Error> {
        let redlock = self.redlock.clone();
        let resources = self.resources.clone();
        let value = self.value.clone();
        self.expiration = Instant::now();
        redlock.release_inner(&resources, &value, overrides).await
    }
}

impl std::fmt::Debug for Lock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lock")
            .field("resources", &self.resources)
            .field("value", &self.value)
            .field("expiration", &self.expiration)
            .finish()
    }
}
