//! The key-value store abstraction.
//!
//! `redquorum` does not know or care how a store is reached; it only needs
//! something that can evaluate a cached script by hash, fall back to the
//! raw script text, and otherwise get out of the way. This mirrors the
//! narrow client contract the Redlock algorithm actually depends on.

use async_trait::async_trait;

/// A fault reported by a single store during script evaluation.
///
/// `no_script` is set when the store's reply indicates the script was not
/// cached (a `NOSCRIPT`-prefixed error in Redis terms), which the invoker
/// uses to decide whether to retry with the raw script text.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct StoreError {
    pub message: String,
    pub no_script: bool,
}

impl StoreError {
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            no_script: false,
        }
    }
}

/// One independently operable key-value endpoint participating in the quorum.
///
/// Implementors need only support atomic server-side script evaluation and
/// connection teardown; `redquorum` supplies the scripts and interprets
/// their integer replies.
#[async_trait]
pub trait Store: Send + Sync {
    /// Evaluate a cached script by its SHA-1 hex digest.
    async fn eval_sha(&self, hash: &str, keys: &[String], args: &[Vec<u8>]) -> Result<i64, StoreError>;

    /// Evaluate a script by its raw text, e.g. after a `NOSCRIPT` miss.
    async fn eval(&self, script: &str, keys: &[String], args: &[Vec<u8>]) -> Result<i64, StoreError>;

    /// Close the underlying connection. Best-effort; errors are informational.
    async fn quit(&self) -> Result<(), StoreError>;
}

/// A [`Store`] backed by a `redis`-crate connection manager.
///
/// The connection manager transparently reconnects and is cheap to clone,
/// so one `RedisStore` can be shared across concurrent invocations without
/// its own internal pooling.
pub struct RedisStore {
    conn: redis::aio::ConnectionManager,
}

impl RedisStore {
    /// Connect to a single Redis-compatible endpoint.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(to_store_error)?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(to_store_error)?;
        Ok(Self { conn })
    }

    /// Wrap an already-established connection manager.
    pub fn from_connection_manager(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn eval_sha(&self, hash: &str, keys: &[String], args: &[Vec<u8>]) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("EVALSHA")
            .arg(hash)
            .arg(keys.len())
            .arg(keys)
            .arg(args)
            .query_async(&mut conn)
            .await
            .map_err(to_store_error)
    }

    async fn eval(&self, script: &str, keys: &[String], args: &[Vec<u8>]) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("EVAL")
            .arg(script)
            .arg(keys.len())
            .arg(keys)
            .arg(args)
            .query_async(&mut conn)
            .await
            .map_err(to_store_error)
    }

    async fn quit(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("QUIT")
            .query_async(&mut conn)
            .await
            .map_err(to_store_error)
    }
}

fn to_store_error(err: redis::RedisError) -> StoreError {
    let no_script = err.code() == Some("NOSCRIPT");
    StoreError {
        message: err.to_string(),
        no_script,
    }
}
