//! Cancellable contract event stream.
//!
//! A subscription is a bounded channel plus a [`CancellationToken`]. The
//! producer side ([`EventPublisher`]) stops as soon as the token fires and
//! drops its sender, which ends the stream for the consumer.
//!
//! ```ignore
//! let mut sub = client.subscribe_events(counter, "NewNumber").await?;
//! let cancel = sub.cancel_token();
//! tokio::spawn(async move { while let Some(ev) = sub.next().await { /* ... */ } });
//! // later
//! cancel.cancel();
//! ```

use tally_core::{ContractEvent, TallyResult};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Default channel depth; events beyond it apply backpressure to the poller.
pub const EVENT_BUFFER: usize = 256;

/// Consumer half: pull events until the stream ends or is cancelled.
#[derive(Debug)]
pub struct EventSubscription {
    events: mpsc::Receiver<TallyResult<ContractEvent>>,
    cancel: CancellationToken,
}

/// Producer half, owned by whatever is watching the chain.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    events: mpsc::Sender<TallyResult<ContractEvent>>,
    cancel: CancellationToken,
}

impl EventSubscription {
    pub fn channel(buffer: usize) -> (Self, EventPublisher) {
        let (tx, rx) = mpsc::channel(buffer);
        let cancel = CancellationToken::new();
        (
            Self {
                events: rx,
                cancel: cancel.clone(),
            },
            EventPublisher { events: tx, cancel },
        )
    }

    /// Next event or stream error; `None` once the producer is gone.
    pub async fn next(&mut self) -> Option<TallyResult<ContractEvent>> {
        self.events.recv().await
    }

    /// Token that stops the producer when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl EventPublisher {
    /// Sends one item. Returns `false` once the subscription is cancelled or
    /// dropped, at which point the producer should stop.
    pub async fn publish(&self, item: TallyResult<ContractEvent>) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            sent = self.events.send(item) => sent.is_ok(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves when the consumer cancels.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}
