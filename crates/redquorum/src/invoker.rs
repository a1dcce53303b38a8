//! Invoking a single script against a single store and turning its reply
//! into a vote.

use crate::error::{ResourceLockedError, VoteError};
use crate::scripts::ScriptDigest;
use crate::store::Store;

/// The outcome of one store's evaluation of one script.
pub enum ClientExecutionResult {
    For,
    Against(VoteError),
}

/// Evaluate `script` against `store`, preferring the cached hash and falling
/// back to the raw text exactly once on a `NOSCRIPT` miss.
#[tracing::instrument(level = "trace", skip(store, script, args), fields(keys = keys.len()))]
pub async fn invoke(
    store: &dyn Store,
    script: &ScriptDigest,
    keys: &[String],
    args: &[Vec<u8>],
) -> ClientExecutionResult {
    let reply = match store.eval_sha(&script.hash, keys, args).await {
        Ok(reply) => Ok(reply),
        Err(err) if err.no_script => store.eval(script.text, keys, args).await,
        Err(err) => Err(err),
    };

    match reply {
        Ok(granted) if granted as usize == keys.len() => ClientExecutionResult::For,
        Ok(granted) => {
            tracing::debug!(granted, requested = keys.len(), "store declined resources");
            ClientExecutionResult::Against(VoteError::ResourceLocked(ResourceLockedError {
                granted: granted.max(0) as usize,
                requested: keys.len(),
            }))
        }
        Err(err) => {
            tracing::warn!(error = %err.message, "store invocation failed");
            ClientExecutionResult::Against(VoteError::Store(err.message))
        }
    }
}
