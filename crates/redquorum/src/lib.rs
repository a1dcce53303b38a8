//! Distributed mutual exclusion over a set of independent Redis-compatible
//! stores, implementing the Redlock algorithm: acquisition, extension, and
//! release all require a quorum (`N/2 + 1`) of stores to agree, and every
//! granted lock carries a drift-corrected expiration rather than trusting
//! the requested duration outright.
//!
//! The coordinator ([`Redlock`]) is deliberately agnostic to how a store is
//! reached; anything implementing [`Store`] can participate, which is what
//! makes the quorum and retry logic exercisable without a real Redis
//! cluster in tests.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use redquorum::{Overrides, RedisStore, Redlock, Settings, Store};
//!
//! # async fn example() -> Result<(), redquorum::Error> {
//! let stores: Vec<Arc<dyn Store>> = vec![
//!     Arc::new(RedisStore::connect("redis://node-a").await.unwrap()),
//!     Arc::new(RedisStore::connect("redis://node-b").await.unwrap()),
//!     Arc::new(RedisStore::connect("redis://node-c").await.unwrap()),
//! ];
//! let redlock = Redlock::new(stores, Settings::default())?;
//! let mut lock = redlock
//!     .acquire(vec!["inventory:sku-42".into()], Duration::from_secs(10), Overrides::default())
//!     .await?;
//! lock.release(Overrides::default()).await?;
//! # Ok(())
//! # }
//! ```

mod attempt;
mod error;
mod events;
mod invoker;
mod lock;
mod redlock;
mod retry;
mod scripts;
mod settings;
mod store;
mod supervisor;

pub use attempt::{AttemptStats, Decision, StatsHandle, StoreId};
pub use error::{Error, ExecutionError, ResourceLockedError, VoteError};
pub use events::EventEmitter;
pub use lock::{ExecutionResult, Lock};
pub use redlock::Redlock;
pub use scripts::{NoRewrites, ScriptRewrites};
pub use settings::{Overrides, Settings};
pub use store::{RedisStore, Store, StoreError};
pub use supervisor::{using, AbortSignal};
