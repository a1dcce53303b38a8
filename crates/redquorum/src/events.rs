//! The non-fatal error channel: every against-vote is fanned out here,
//! whether or not anything is listening.

use tokio::sync::broadcast;

use crate::error::VoteError;

const CHANNEL_CAPACITY: usize = 256;

/// Emits [`VoteError`]s observed during attempts, independent of whether
/// the overall attempt/retry sequence ultimately succeeds.
///
/// A lagging or absent subscriber never blocks or slows down the
/// coordinator: the channel is a best-effort broadcast, and a subscriber
/// that falls behind simply observes a gap (via
/// [`broadcast::error::RecvError::Lagged`]) rather than stalling emission.
pub struct EventEmitter {
    sender: broadcast::Sender<VoteError>,
}

impl EventEmitter {
    pub fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Subscribes to future vote errors. Past errors are not replayed.
    pub fn on_error(&self) -> broadcast::Receiver<VoteError> {
        self.sender.subscribe()
    }

    /// Publishes a vote error. A no-op, by design, if nobody is subscribed.
    pub fn emit_error(&self, error: VoteError) {
        tracing::warn!(%error, "store declined a request");
        let _ = self.sender.send(error);
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new()
    }
}
