//! # Change Publisher
//!
//! Per-poll fan-out of tally changes to live listeners such as a results page.
//!
//! - One broadcast channel per poll, created on first subscribe
//! - Subscribers only see changes published after they subscribed
//! - Publishing never waits on a subscriber; a slow one skips what it missed
//! - Channels are dropped once their last subscriber leaves
use std::{
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio_stream::{
    Stream, StreamExt,
    wrappers::{BroadcastStream, errors::BroadcastStreamRecvError},
};
use tracing::{debug, warn};

use crate::{
    error::PublishError,
    models::{PollId, TallyChange},
};

pub type TallyStream = Pin<Box<dyn Stream<Item = TallyChange> + Send>>;

pub trait Publisher: Send + Sync {
    /// Hands the change to whoever is listening right now and returns immediately.
    fn publish(&self, poll_id: PollId, change: TallyChange) -> Result<(), PublishError>;

    fn subscribe(&self, poll_id: PollId) -> TallyStream;
}

type Channels = DashMap<PollId, broadcast::Sender<TallyChange>>;

pub struct BroadcastPublisher {
    channels: Arc<Channels>,
    capacity: usize,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn subscriber_count(&self, poll_id: PollId) -> usize {
        self.channels
            .get(&poll_id)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }
}

impl Publisher for BroadcastPublisher {
    fn publish(&self, poll_id: PollId, change: TallyChange) -> Result<(), PublishError> {
        let delivered = match self.channels.get(&poll_id) {
            Some(sender) => sender.send(change).ok(),
            None => None,
        };

        match delivered {
            Some(receivers) => debug!("Published {change:?} on poll {poll_id} to {receivers}"),
            None => {
                prune(&self.channels, poll_id);
                debug!("No listeners on poll {poll_id}, dropped {change:?}");
            }
        }

        Ok(())
    }

    fn subscribe(&self, poll_id: PollId) -> TallyStream {
        let receiver = self
            .channels
            .entry(poll_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();

        let stream = BroadcastStream::new(receiver).filter_map(move |item| match item {
            Ok(change) => Some(change),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!("Subscriber on poll {poll_id} lagged, skipped {skipped} changes");
                None
            }
        });

        Box::pin(Subscription {
            changes: Box::pin(stream),
            _prune: PruneOnDrop {
                channels: self.channels.clone(),
                poll_id,
            },
        })
    }
}

fn prune(channels: &Channels, poll_id: PollId) {
    if channels
        .remove_if(&poll_id, |_, sender| sender.receiver_count() == 0)
        .is_some()
    {
        debug!("Dropped idle channel for poll {poll_id}");
    }
}

struct Subscription {
    // Declared first so the receiver is gone before the prune runs.
    changes: TallyStream,
    _prune: PruneOnDrop,
}

impl Stream for Subscription {
    type Item = TallyChange;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.changes.as_mut().poll_next(cx)
    }
}

struct PruneOnDrop {
    channels: Arc<Channels>,
    poll_id: PollId,
}

impl Drop for PruneOnDrop {
    fn drop(&mut self) {
        prune(&self.channels, self.poll_id);
    }
}
