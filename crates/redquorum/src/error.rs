use crate::attempt::StatsHandle;

/// One or more requested keys were already held by another owner.
///
/// Carried as the error half of an against-vote; it never escapes to a
/// caller on its own, only nested inside an [`ExecutionError`]'s attempt
/// stats (see [`crate::AttemptStats`]).
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("The operation was applied to: {granted} of the {requested} requested resources.")]
pub struct ResourceLockedError {
    pub granted: usize,
    pub requested: usize,
}

/// The error half of a single store's against-vote.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VoteError {
    #[error(transparent)]
    ResourceLocked(#[from] ResourceLockedError),
    #[error("store error: {0}")]
    Store(String),
}

/// Quorum could not be reached within the retry budget.
///
/// Carries the complete per-attempt stats history, exactly as surfaced by
/// the retry driver, for diagnostics.
#[derive(Debug, Clone, thiserror::Error)]
#[error("quorum was not reached after {count} attempt(s)", count = self.attempts.len())]
pub struct ExecutionError {
    pub attempts: Vec<StatsHandle>,
}

/// Errors surfaced by the public API.
///
/// Per-store faults and resource contention never reach here directly; they
/// are folded into votes and, on exhaustion, into [`Error::Execution`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error("Duration must be a whole number of milliseconds.")]
    InvalidDuration,

    #[error("at least one store is required")]
    EmptyStoreSet,

    #[error("automaticExtensionThreshold must be <= duration - 100ms")]
    ThresholdTooClose,

    #[error("Cannot extend an already-expired lock.")]
    AlreadyExpired,

    #[error(transparent)]
    Execution(#[from] ExecutionError),
}
