//! Arrival notifications.
//!
//! A bounded channel of payload-free tokens. Capture sessions send a token
//! after each successful commit without ever blocking; when the channel is
//! full the token is dropped. Consumers treat a token as "the store changed"
//! and re-read the store in full, so lost or coalesced tokens are harmless.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::time::Duration;

use crate::message::Message;
use crate::store::{MessageStore, StoreError};

/// Number of tokens that can be pending before new ones are dropped
pub const ARRIVAL_CHANNEL_CAPACITY: usize = 100;

/// Create a connected notifier/receiver pair
pub fn arrival_channel() -> (ArrivalNotifier, ArrivalReceiver) {
    let (tx, rx) = mpsc::sync_channel(ARRIVAL_CHANNEL_CAPACITY);
    (ArrivalNotifier { tx }, ArrivalReceiver { rx })
}

/// Sending half, cloned into every capture session
#[derive(Debug, Clone)]
pub struct ArrivalNotifier {
    tx: SyncSender<()>,
}

impl ArrivalNotifier {
    /// Signal that a message arrived. Never blocks.
    ///
    /// Returns whether the token was queued.
    pub fn notify(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) => true,
            Err(TrySendError::Full(())) => {
                tracing::trace!("Arrival channel full, dropping token");
                false
            }
            Err(TrySendError::Disconnected(())) => {
                tracing::trace!("No arrival consumer, dropping token");
                false
            }
        }
    }
}

/// Receiving half, owned by the consumer
#[derive(Debug)]
pub struct ArrivalReceiver {
    rx: Receiver<()>,
}

impl ArrivalReceiver {
    /// Block until the next token. Returns `false` once every notifier is gone.
    pub fn wait(&self) -> bool {
        self.rx.recv().is_ok()
    }

    /// Block until the next token or until `timeout` elapses
    pub fn wait_timeout(&self, timeout: Duration) -> Result<(), RecvTimeoutError> {
        self.rx.recv_timeout(timeout)
    }

    /// Discard pending tokens, returning how many there were
    pub fn drain(&self) -> usize {
        self.rx.try_iter().count()
    }

    /// Run the consumer loop: on each wakeup, coalesce pending tokens and
    /// hand a fresh listing of `store` to `on_refresh`.
    ///
    /// Returns when every notifier has been dropped.
    pub fn refresh_loop<F>(&self, store: &dyn MessageStore, mut on_refresh: F)
    where
        F: FnMut(Result<Vec<Message>, StoreError>),
    {
        while self.wait() {
            let coalesced = self.drain();
            if coalesced > 0 {
                tracing::trace!(coalesced, "Coalesced arrival tokens");
            }
            on_refresh(store.list());
        }
    }
}
