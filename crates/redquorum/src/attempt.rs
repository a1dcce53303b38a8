//! Fanning a single script out across every store and tallying the votes.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use crate::error::VoteError;
use crate::invoker::{invoke, ClientExecutionResult};
use crate::scripts::ScriptDigest;
use crate::store::Store;

/// Index of a store within the coordinator's configured set, used only for
/// attributing votes in diagnostics.
pub type StoreId = usize;

/// The decision an attempt reaches once a quorum of votes agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    For,
    Against,
}

/// The votes collected for a single attempt, as of the moment observed.
///
/// `votes.len() < total` means replies are still outstanding; a
/// [`StatsHandle`] lets callers either peek at the current partial state or
/// wait for every reply to land.
#[derive(Debug, Clone)]
pub struct AttemptStats {
    pub votes: Vec<(StoreId, Result<(), VoteError>)>,
    pub total: usize,
}

impl AttemptStats {
    pub fn is_complete(&self) -> bool {
        self.votes.len() >= self.total
    }

    pub fn for_votes(&self) -> usize {
        self.votes.iter().filter(|(_, v)| v.is_ok()).count()
    }

    pub fn against_votes(&self) -> usize {
        self.votes.len() - self.for_votes()
    }
}

/// A handle onto one attempt's in-flight and eventually-final vote tally.
///
/// Cloning a handle is cheap and every clone observes the same underlying
/// stream of updates; this is how a caller can hold a `Vec<StatsHandle>`
/// across several attempts without pinning a future per attempt.
#[derive(Debug, Clone)]
pub struct StatsHandle(watch::Receiver<AttemptStats>);

impl StatsHandle {
    /// The most recently observed tally; may still be incomplete.
    pub fn current(&self) -> AttemptStats {
        self.0.borrow().clone()
    }

    /// Waits until every store has replied, then returns the final tally.
    pub async fn wait_for_completion(&mut self) -> AttemptStats {
        let _ = self.0.wait_for(|stats| stats.is_complete()).await;
        self.0.borrow().clone()
    }
}

fn quorum_for(total: usize) -> usize {
    total / 2 + 1
}

/// Runs one attempt: invokes `script` against every store concurrently,
/// resolving to a [`Decision`] as soon as a quorum of votes agree one way or
/// the other. The returned [`StatsHandle`] continues to track late replies
/// after the decision has already been returned.
///
/// If neither side reaches quorum once every store has replied (only
/// possible with an even store count split exactly down the middle), the
/// attempt conservatively decides `Against`.
pub async fn run_attempt(
    stores: &[Arc<dyn Store>],
    script: ScriptDigest,
    keys: Vec<String>,
    args: Vec<Vec<u8>>,
) -> (Decision, StatsHandle) {
    let total = stores.len();
    let quorum = quorum_for(total);

    let (vote_tx, mut vote_rx) = mpsc::channel::<(StoreId, Result<(), VoteError>)>(total.max(1));
    let (stats_tx, stats_rx) = watch::channel(AttemptStats {
        votes: Vec::with_capacity(total),
        total,
    });
    let (decision_tx, decision_rx) = oneshot::channel::<Decision>();

    for (id, store) in stores.iter().cloned().enumerate() {
        let vote_tx = vote_tx.clone();
        let script = script.clone();
        let keys = keys.clone();
        let args = args.clone();
        tokio::spawn(async move {
            let result = match invoke(store.as_ref(), &script, &keys, &args).await {
                ClientExecutionResult::For => Ok(()),
                ClientExecutionResult::Against(err) => Err(err),
            };
            // A send error only happens if the collector task below has
            // already exited, which only occurs after this sender (and all
            // its clones) have been dropped. Nothing to do either way.
            let _ = vote_tx.send((id, result)).await;
        });
    }
    drop(vote_tx);

    tokio::spawn(async move {
        let mut stats = AttemptStats {
            votes: Vec::with_capacity(total),
            total,
        };
        let mut decision_tx = Some(decision_tx);

        while let Some((id, result)) = vote_rx.recv().await {
            stats.votes.push((id, result));
            let _ = stats_tx.send(stats.clone());

            if decision_tx.is_some() {
                let decision = if stats.for_votes() >= quorum {
                    Some(Decision::For)
                } else if stats.against_votes() >= quorum || stats.is_complete() {
                    Some(Decision::Against)
                } else {
                    None
                };
                if let Some(decision) = decision {
                    if let Some(tx) = decision_tx.take() {
                        let _ = tx.send(decision);
                    }
                }
            }
        }
    });

    let decision = decision_rx.await.unwrap_or(Decision::Against);
    (decision, StatsHandle(stats_rx))
}
